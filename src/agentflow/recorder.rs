//! Event recording and analysis.
//!
//! [`EventRecorder`] is an [`EventHandler`] that retains the last `N`
//! events in a ring buffer (default 1000). The accessors return snapshots,
//! so recorded history can be inspected while a run is still in flight.
//! [`EventAnalyzer`] derives per-agent metrics and a per-second timeline
//! from a recorded slice.

use crate::agentflow::event::{Event, EventHandler, EventType};
use async_trait::async_trait;
use chrono::Duration;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

/// Default ring-buffer capacity of an [`EventRecorder`].
pub const DEFAULT_RECORDER_CAPACITY: usize = 1000;

/// Ring-buffered event sink.
///
/// Subscribe it to a dispatcher and query the captured history afterwards:
///
/// ```rust,no_run
/// use agentflow::event::EventDispatcher;
/// use agentflow::recorder::EventRecorder;
/// use std::sync::Arc;
///
/// let bus = EventDispatcher::synchronous();
/// let recorder = Arc::new(EventRecorder::new());
/// bus.subscribe(recorder.clone());
/// // ... run agents ...
/// for event in recorder.events() {
///     println!("{} {}", event.timestamp, event.event_type.tag());
/// }
/// ```
pub struct EventRecorder {
    buffer: Mutex<VecDeque<Event>>,
    capacity: usize,
}

impl EventRecorder {
    /// Recorder with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_RECORDER_CAPACITY)
    }

    /// Recorder retaining at most `capacity` events (oldest evicted first).
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            capacity: capacity.max(1),
        }
    }

    fn record(&self, event: Event) {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        if buffer.len() >= self.capacity {
            buffer.pop_front();
        }
        buffer.push_back(event);
    }

    /// Snapshot of all retained events, oldest first.
    pub fn events(&self) -> Vec<Event> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Retained events of one type.
    pub fn events_by_type(&self, event_type: &EventType) -> Vec<Event> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| &e.event_type == event_type)
            .cloned()
            .collect()
    }

    /// Retained events emitted by one agent (matched on `agent_id`).
    pub fn events_by_agent(&self, agent_id: &str) -> Vec<Event> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.agent_id == agent_id)
            .cloned()
            .collect()
    }

    /// Number of retained events.
    pub fn len(&self) -> usize {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// `true` when nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Discard all retained events.
    pub fn clear(&self) {
        self.buffer.lock().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl Default for EventRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventHandler for EventRecorder {
    async fn on_event(&self, event: &Event) {
        self.record(event.clone());
    }
}

/// Metrics derived for one agent from a recorded event slice.
#[derive(Debug, Clone, Default)]
pub struct AgentMetrics {
    /// Display name observed on the agent's events.
    pub agent_name: String,
    /// Count of events per wire tag.
    pub event_counts: HashMap<String, usize>,
    /// Number of `agent.error` / `tool.error` events.
    pub error_count: usize,
    /// `agent.start` → `agent.complete` wall-clock span, when both exist.
    pub duration: Option<Duration>,
}

impl AgentMetrics {
    /// Total number of events attributed to this agent.
    pub fn total_events(&self) -> usize {
        self.event_counts.values().sum()
    }
}

/// Stateless analysis helpers over recorded events.
pub struct EventAnalyzer;

impl EventAnalyzer {
    /// Derive per-agent metrics, keyed by `agent_id`.
    pub fn agent_metrics(events: &[Event]) -> HashMap<String, AgentMetrics> {
        let mut out: HashMap<String, AgentMetrics> = HashMap::new();
        for event in events {
            let entry = out.entry(event.agent_id.clone()).or_default();
            if entry.agent_name.is_empty() {
                entry.agent_name = event.agent_name.clone();
            }
            *entry.event_counts.entry(event.event_type.tag()).or_insert(0) += 1;
            if matches!(event.event_type, EventType::AgentError | EventType::ToolError) {
                entry.error_count += 1;
            }
        }
        // Second pass for start→complete spans: earliest start, latest complete.
        for (agent_id, metrics) in out.iter_mut() {
            let start = events
                .iter()
                .filter(|e| &e.agent_id == agent_id && e.event_type == EventType::AgentStart)
                .map(|e| e.timestamp)
                .min();
            let complete = events
                .iter()
                .filter(|e| &e.agent_id == agent_id && e.event_type == EventType::AgentComplete)
                .map(|e| e.timestamp)
                .max();
            if let (Some(start), Some(complete)) = (start, complete) {
                if complete >= start {
                    metrics.duration = Some(complete - start);
                }
            }
        }
        out
    }

    /// Group events by wall-clock second (unix timestamp), oldest first.
    pub fn timeline(events: &[Event]) -> BTreeMap<i64, Vec<Event>> {
        let mut out: BTreeMap<i64, Vec<Event>> = BTreeMap::new();
        for event in events {
            out.entry(event.timestamp.timestamp()).or_default().push(event.clone());
        }
        out
    }
}
