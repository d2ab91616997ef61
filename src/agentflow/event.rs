//! In-process event bus.
//!
//! Agents, tools, and workflows report progress through typed [`Event`]s
//! published on an [`EventDispatcher`]. Implement [`EventHandler`] to
//! receive them:
//!
//! ```rust,no_run
//! use agentflow::event::{Event, EventDispatcher, EventHandler, EventType};
//! use async_trait::async_trait;
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! #[async_trait]
//! impl EventHandler for Printer {
//!     async fn on_event(&self, event: &Event) {
//!         println!("[{}] {}", event.event_type.tag(), event.agent_name);
//!     }
//! }
//!
//! # async {
//! let bus = EventDispatcher::synchronous();
//! let id = bus.subscribe(Arc::new(Printer));
//! bus.publish(Event::new(EventType::Progress, "a1", "Agent")).await;
//! bus.unsubscribe(id);
//! # };
//! ```
//!
//! # Delivery modes
//!
//! - **Synchronous** ([`EventDispatcher::synchronous`]) — handlers run
//!   inline on `publish`, in registration order. Lossless; handlers must be
//!   fast.
//! - **Buffered** ([`EventDispatcher::buffered`]) — events are enqueued on a
//!   capacity-bounded queue and drained by a single worker task. When the
//!   queue is full the *oldest* event is dropped and the
//!   [drop counter](EventDispatcher::dropped_count) is incremented. Ordering
//!   from a single emitter is preserved; cross-emitter ordering is
//!   unspecified. Callers that cannot tolerate loss must use the
//!   synchronous mode.

use crate::agentflow::agent::AgentInfo;
use crate::agentflow::message::Message;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Classification of an [`Event`]. The enum is open: anything outside the
/// built-in lifecycle can travel as [`Custom`](EventType::Custom).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventType {
    /// An agent run began.
    AgentStart,
    /// An agent run finished successfully.
    AgentComplete,
    /// An agent run failed (includes cancellation).
    AgentError,
    /// A tool is about to execute.
    ToolCall,
    /// A tool finished successfully.
    ToolResult,
    /// A tool invocation failed.
    ToolError,
    /// A provider round-trip is about to start.
    GenerationBefore,
    /// A provider round-trip finished.
    GenerationAfter,
    /// Progress report (current/total/message in `data`).
    Progress,
    /// A conversation message was sent or received (direction in `data`).
    Message,
    /// Application-defined event; the tag is rendered as `custom.<name>`.
    Custom(String),
}

impl EventType {
    /// Wire-stable string tag (e.g. `"agent.start"`, `"custom.checkpoint"`).
    pub fn tag(&self) -> String {
        match self {
            EventType::AgentStart => "agent.start".to_string(),
            EventType::AgentComplete => "agent.complete".to_string(),
            EventType::AgentError => "agent.error".to_string(),
            EventType::ToolCall => "tool.call".to_string(),
            EventType::ToolResult => "tool.result".to_string(),
            EventType::ToolError => "tool.error".to_string(),
            EventType::GenerationBefore => "generation.before".to_string(),
            EventType::GenerationAfter => "generation.after".to_string(),
            EventType::Progress => "progress".to_string(),
            EventType::Message => "message".to_string(),
            EventType::Custom(name) => format!("custom.{}", name),
        }
    }

    /// Parse a wire tag back into an `EventType`. Unknown tags are treated
    /// as custom events carrying the full tag (the enum is open).
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "agent.start" => EventType::AgentStart,
            "agent.complete" => EventType::AgentComplete,
            "agent.error" => EventType::AgentError,
            "tool.call" => EventType::ToolCall,
            "tool.result" => EventType::ToolResult,
            "tool.error" => EventType::ToolError,
            "generation.before" => EventType::GenerationBefore,
            "generation.after" => EventType::GenerationAfter,
            "progress" => EventType::Progress,
            "message" => EventType::Message,
            other => match other.strip_prefix("custom.") {
                Some(name) => EventType::Custom(name.to_string()),
                None => EventType::Custom(other.to_string()),
            },
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// One observability record. Events are one-shot and append-only: once
/// published they are never mutated.
#[derive(Debug, Clone)]
pub struct Event {
    pub event_type: EventType,
    /// Stable id of the emitting agent.
    pub agent_id: String,
    /// Display name of the emitting agent.
    pub agent_name: String,
    /// Wall-clock emission time.
    pub timestamp: DateTime<Utc>,
    /// Event payload; shape depends on `event_type`.
    pub data: Value,
    /// Error description for failure events.
    pub error: Option<String>,
    /// Free-form key/value annotations.
    pub metadata: HashMap<String, String>,
}

impl Event {
    /// Build an event with an empty payload, stamped now.
    pub fn new(
        event_type: EventType,
        agent_id: impl Into<String>,
        agent_name: impl Into<String>,
    ) -> Self {
        Self {
            event_type,
            agent_id: agent_id.into(),
            agent_name: agent_name.into(),
            timestamp: Utc::now(),
            data: Value::Null,
            error: None,
            metadata: HashMap::new(),
        }
    }

    /// Attach a payload (builder pattern).
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Attach an error description (builder pattern).
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Attach a metadata entry (builder pattern).
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Receiver of published events.
///
/// The `Send + Sync` bound lets a handler be shared across agents and tokio
/// tasks via `Arc<dyn EventHandler>`; internal state must use its own
/// synchronization.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_event(&self, event: &Event);
}

/// Opaque handle returned by [`EventDispatcher::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct BufferedQueue {
    queue: Mutex<VecDeque<Event>>,
    capacity: usize,
    signal: Arc<Notify>,
    worker_cancel: CancellationToken,
}

struct Shared {
    handlers: RwLock<Vec<(u64, Arc<dyn EventHandler>)>>,
    next_id: AtomicU64,
    dropped: AtomicU64,
    buffered: Option<BufferedQueue>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Some(buffered) = &self.buffered {
            buffered.worker_cancel.cancel();
        }
    }
}

impl Shared {
    fn handler_snapshot(&self) -> Vec<Arc<dyn EventHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect()
    }
}

/// Pub/sub hub for [`Event`]s. Cloning is cheap — clones share the same
/// subscriber list and queue.
#[derive(Clone)]
pub struct EventDispatcher {
    shared: Arc<Shared>,
}

impl EventDispatcher {
    /// Build a dispatcher that runs handlers inline on `publish`.
    pub fn synchronous() -> Self {
        Self {
            shared: Arc::new(Shared {
                handlers: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                dropped: AtomicU64::new(0),
                buffered: None,
            }),
        }
    }

    /// Build a dispatcher with a capacity-bounded queue drained by a single
    /// worker task. Must be called from within a tokio runtime.
    pub fn buffered(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let signal = Arc::new(Notify::new());
        let worker_cancel = CancellationToken::new();
        let shared = Arc::new(Shared {
            handlers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            dropped: AtomicU64::new(0),
            buffered: Some(BufferedQueue {
                queue: Mutex::new(VecDeque::with_capacity(capacity)),
                capacity,
                signal: Arc::clone(&signal),
                worker_cancel: worker_cancel.clone(),
            }),
        });

        tokio::spawn(run_worker(Arc::downgrade(&shared), signal, worker_cancel));

        Self { shared }
    }

    /// Register a handler. Handlers run in registration order.
    pub fn subscribe(&self, handler: Arc<dyn EventHandler>) -> SubscriptionId {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        self.shared
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, handler));
        SubscriptionId(id)
    }

    /// Remove a previously registered handler. Unknown ids are a no-op.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.shared
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(hid, _)| *hid != id.0);
    }

    /// Publish an event.
    ///
    /// Synchronous mode awaits every handler inline. Buffered mode enqueues
    /// and returns immediately; when the queue is full the oldest event is
    /// dropped and counted.
    pub async fn publish(&self, event: Event) {
        match &self.shared.buffered {
            None => {
                for handler in self.shared.handler_snapshot() {
                    handler.on_event(&event).await;
                }
            }
            Some(buffered) => {
                {
                    let mut queue = buffered
                        .queue
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                    if queue.len() >= buffered.capacity {
                        queue.pop_front();
                        let total = self.shared.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                        log::warn!(
                            "event queue full (capacity {}), dropped oldest event ({} total)",
                            buffered.capacity,
                            total
                        );
                    }
                    queue.push_back(event);
                }
                buffered.signal.notify_one();
            }
        }
    }

    /// Number of events dropped due to queue overflow since construction.
    ///
    /// Always zero in synchronous mode.
    pub fn dropped_count(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Number of events currently waiting in the buffered queue.
    pub fn pending_count(&self) -> usize {
        match &self.shared.buffered {
            None => 0,
            Some(b) => b.queue.lock().unwrap_or_else(PoisonError::into_inner).len(),
        }
    }

    /// Number of registered handlers.
    pub fn handler_count(&self) -> usize {
        self.shared
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Background drain loop for buffered dispatchers. Holds only a weak
/// reference so dropping the last dispatcher handle stops the worker.
async fn run_worker(weak: Weak<Shared>, signal: Arc<Notify>, cancel: CancellationToken) {
    loop {
        // Drain whatever is queued, one batch at a time. Locks are released
        // before any handler is awaited.
        loop {
            let (batch, handlers) = match weak.upgrade() {
                Some(shared) => {
                    let buffered = match &shared.buffered {
                        Some(b) => b,
                        None => return,
                    };
                    let batch: Vec<Event> = {
                        let mut queue = buffered
                            .queue
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner);
                        queue.drain(..).collect()
                    };
                    (batch, shared.handler_snapshot())
                }
                None => return,
            };
            if batch.is_empty() {
                break;
            }
            for event in &batch {
                for handler in &handlers {
                    handler.on_event(event).await;
                }
            }
        }

        tokio::select! {
            _ = signal.notified() => {}
            _ = cancel.cancelled() => return,
        }
    }
}

/// Per-agent emission facade bound to a dispatcher (or to nothing, in which
/// case every emit is a no-op). Carried inside
/// [`ToolContext`](crate::tool::ToolContext) so tools can report progress
/// without knowing about the bus.
#[derive(Clone)]
pub struct EventEmitter {
    dispatcher: Option<EventDispatcher>,
    agent: AgentInfo,
    run_id: String,
}

impl EventEmitter {
    /// Build an emitter publishing to `dispatcher` on behalf of `agent`.
    pub fn new(dispatcher: EventDispatcher, agent: AgentInfo, run_id: impl Into<String>) -> Self {
        Self {
            dispatcher: Some(dispatcher),
            agent,
            run_id: run_id.into(),
        }
    }

    /// Build an emitter that discards everything.
    pub fn noop(agent: AgentInfo, run_id: impl Into<String>) -> Self {
        Self {
            dispatcher: None,
            agent,
            run_id: run_id.into(),
        }
    }

    /// The run this emitter is bound to.
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// The dispatcher behind this emitter, if any.
    pub fn dispatcher(&self) -> Option<&EventDispatcher> {
        self.dispatcher.as_ref()
    }

    fn build(&self, event_type: EventType) -> Event {
        Event::new(event_type, self.agent.id.clone(), self.agent.name.clone())
            .with_metadata("run_id", self.run_id.clone())
    }

    /// Emit an event of the given type with a payload.
    pub async fn emit(&self, event_type: EventType, data: Value) {
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.publish(self.build(event_type).with_data(data)).await;
        }
    }

    /// Emit a progress report.
    pub async fn emit_progress(&self, current: u64, total: u64, message: impl Into<String>) {
        self.emit(
            EventType::Progress,
            json!({
                "current": current,
                "total": total,
                "message": message.into(),
            }),
        )
        .await;
    }

    /// Emit a message event (rendered role + text preview).
    pub async fn emit_message(&self, direction: &str, message: &Message) {
        self.emit(
            EventType::Message,
            json!({
                "direction": direction,
                "role": message.role.to_string(),
                "text": message.text_content(),
            }),
        )
        .await;
    }

    /// Emit an error event.
    pub async fn emit_error(&self, error: impl std::fmt::Display) {
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher
                .publish(self.build(EventType::AgentError).with_error(error.to_string()))
                .await;
        }
    }

    /// Emit a custom event under `custom.<name>`.
    pub async fn emit_custom(&self, name: impl Into<String>, data: Value) {
        self.emit(EventType::Custom(name.into()), data).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agentflow::agent::{AgentInfo, AgentType};
    use std::sync::atomic::AtomicUsize;

    struct Counter {
        seen: AtomicUsize,
    }

    #[async_trait]
    impl EventHandler for Counter {
        async fn on_event(&self, _event: &Event) {
            self.seen.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn info() -> AgentInfo {
        AgentInfo::new("a1", "Agent", "test agent", AgentType::Custom)
    }

    #[tokio::test]
    async fn synchronous_delivery_is_inline() {
        let bus = EventDispatcher::synchronous();
        let counter = Arc::new(Counter {
            seen: AtomicUsize::new(0),
        });
        bus.subscribe(counter.clone());

        bus.publish(Event::new(EventType::Progress, "a", "A")).await;
        bus.publish(Event::new(EventType::Progress, "a", "A")).await;
        assert_eq!(counter.seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = EventDispatcher::synchronous();
        let counter = Arc::new(Counter {
            seen: AtomicUsize::new(0),
        });
        let id = bus.subscribe(counter.clone());
        bus.publish(Event::new(EventType::Progress, "a", "A")).await;
        bus.unsubscribe(id);
        bus.publish(Event::new(EventType::Progress, "a", "A")).await;
        assert_eq!(counter.seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn buffered_overflow_drops_oldest_and_counts() {
        // No handler subscribed: enqueue faster than the worker can exist.
        let bus = EventDispatcher::buffered(2);
        // Saturate the queue synchronously before the worker gets a chance
        // to run (publish never yields in buffered mode).
        for i in 0..5 {
            bus.publish(
                Event::new(EventType::Progress, "a", "A").with_data(json!({ "i": i })),
            )
            .await;
        }
        assert!(bus.dropped_count() >= 1);
    }

    #[tokio::test]
    async fn emitter_tags_run_id() {
        let bus = EventDispatcher::synchronous();

        struct Capture {
            run_ids: Mutex<Vec<String>>,
        }

        #[async_trait]
        impl EventHandler for Capture {
            async fn on_event(&self, event: &Event) {
                self.run_ids
                    .lock()
                    .unwrap()
                    .push(event.metadata.get("run_id").cloned().unwrap_or_default());
            }
        }

        let capture = Arc::new(Capture {
            run_ids: Mutex::new(Vec::new()),
        });
        bus.subscribe(capture.clone());

        let emitter = EventEmitter::new(bus.clone(), info(), "run-42");
        emitter.emit_progress(1, 10, "working").await;

        assert_eq!(capture.run_ids.lock().unwrap().as_slice(), ["run-42"]);
    }

    #[test]
    fn tags_round_trip() {
        for t in [
            EventType::AgentStart,
            EventType::AgentComplete,
            EventType::AgentError,
            EventType::ToolCall,
            EventType::ToolResult,
            EventType::ToolError,
            EventType::GenerationBefore,
            EventType::GenerationAfter,
            EventType::Progress,
            EventType::Message,
            EventType::Custom("checkpoint".into()),
        ] {
            assert_eq!(EventType::from_tag(&t.tag()), t);
        }
    }
}
