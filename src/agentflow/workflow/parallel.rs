//! Parallel workflow agent.
//!
//! Fans its steps out onto separate tasks bounded by a semaphore
//! (`max_concurrency`, default = number of steps). Every branch receives a
//! deep **clone** of the initial state, so concurrent mutation across
//! branches is impossible by construction. A workflow timeout (or the
//! caller's cancellation) cancels all in-flight branches through a shared
//! child token.
//!
//! Exactly one merge strategy combines the branch results:
//!
//! - [`MergeStrategy::All`] — a new state whose `parallel_results` key maps
//!   each step name to that branch's value map; branch messages are copied
//!   in step order. Failed branches are recorded in the status report and
//!   omitted from `parallel_results`; siblings keep running when one branch
//!   fails.
//! - [`MergeStrategy::First`] — the first branch to complete successfully
//!   wins and the rest are cancelled. Cancelled branches surface no error;
//!   if *every* branch fails the workflow returns an aggregate error.
//! - [`MergeStrategy::Func`] — a caller-supplied reducer over the map of
//!   successful branch states.

use crate::agentflow::agent::{AgentError, AgentInfo, AgentType, BaseAgent};
use crate::agentflow::event::{EventDispatcher, EventEmitter, EventType};
use crate::agentflow::state::{keys, State};
use crate::agentflow::workflow::step::{
    StepStatus, WorkflowReport, WorkflowStep, WORKFLOW_STATUS_KEY,
};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// How a parallel workflow combines its branch results.
#[derive(Clone)]
pub enum MergeStrategy {
    /// Merge every successful branch under `parallel_results`.
    All,
    /// First successful branch wins; the rest are cancelled.
    First,
    /// Caller-supplied reducer over `step name → result state`.
    Func(Arc<dyn Fn(HashMap<String, State>) -> State + Send + Sync>),
}

impl std::fmt::Debug for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            MergeStrategy::All => "All",
            MergeStrategy::First => "First",
            MergeStrategy::Func(_) => "Func",
        };
        write!(f, "MergeStrategy::{}", name)
    }
}

/// Workflow agent fanning its steps out concurrently.
pub struct ParallelAgent {
    info: AgentInfo,
    steps: Vec<WorkflowStep>,
    max_concurrency: Option<usize>,
    merge: MergeStrategy,
    timeout: Option<Duration>,
    events: Option<EventDispatcher>,
    last_report: Mutex<Option<WorkflowReport>>,
}

impl ParallelAgent {
    /// Empty parallel workflow with the [`MergeStrategy::All`] default.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            info: AgentInfo::new(id, name, "parallel workflow", AgentType::Workflow),
            steps: Vec::new(),
            max_concurrency: None,
            merge: MergeStrategy::All,
            timeout: None,
            events: None,
            last_report: Mutex::new(None),
        }
    }

    /// Append a step (builder pattern).
    pub fn with_step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Bound concurrent branches (builder pattern). Defaults to the number
    /// of steps.
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit.max(1));
        self
    }

    /// Select a merge strategy (builder pattern).
    pub fn with_merge_strategy(mut self, merge: MergeStrategy) -> Self {
        self.merge = merge;
        self
    }

    /// Shorthand for [`MergeStrategy::First`] (builder pattern).
    pub fn merge_first(self) -> Self {
        self.with_merge_strategy(MergeStrategy::First)
    }

    /// Shorthand for a custom reducer (builder pattern).
    pub fn merge_func(
        self,
        f: impl Fn(HashMap<String, State>) -> State + Send + Sync + 'static,
    ) -> Self {
        self.with_merge_strategy(MergeStrategy::Func(Arc::new(f)))
    }

    /// Cancel all in-flight branches after `timeout` (builder pattern).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Publish lifecycle events to `bus` (builder pattern).
    pub fn with_event_bus(mut self, bus: EventDispatcher) -> Self {
        self.events = Some(bus);
        self
    }

    /// Step names in registration order.
    pub fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.name().to_string()).collect()
    }

    /// Status report of the most recent run, if any.
    pub fn last_report(&self) -> Option<WorkflowReport> {
        self.last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn store_report(&self, report: &WorkflowReport) {
        *self
            .last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(report.clone());
    }
}

/// Outcome of one branch, sent back over the collection channel.
type BranchOutcome = (usize, Result<State, AgentError>);

#[async_trait]
impl BaseAgent for ParallelAgent {
    fn info(&self) -> &AgentInfo {
        &self.info
    }

    async fn run(&self, cancel: &CancellationToken, state: State) -> Result<State, AgentError> {
        let emitter = match &self.events {
            Some(bus) => EventEmitter::new(bus.clone(), self.info.clone(), Uuid::new_v4().to_string()),
            None => EventEmitter::noop(self.info.clone(), Uuid::new_v4().to_string()),
        };

        if self.steps.is_empty() {
            return Ok(state);
        }

        emitter
            .emit(
                EventType::AgentStart,
                json!({"steps": self.steps.len(), "merge": format!("{:?}", self.merge)}),
            )
            .await;

        let mut report = WorkflowReport::pending(self.step_names());
        let branch_token = cancel.child_token();
        let timed_out = Arc::new(AtomicBool::new(false));

        if let Some(timeout) = self.timeout {
            let token = branch_token.clone();
            let flag = Arc::clone(&timed_out);
            tokio::spawn(async move {
                tokio::select! {
                    _ = tokio::time::sleep(timeout) => {
                        flag.store(true, Ordering::SeqCst);
                        token.cancel();
                    }
                    _ = token.cancelled() => {}
                }
            });
        }

        let limit = self.max_concurrency.unwrap_or(self.steps.len()).max(1);
        let semaphore = Arc::new(Semaphore::new(limit));
        let (tx, mut rx) = mpsc::unbounded_channel::<BranchOutcome>();
        let initial_message_count = state.message_count();

        for (index, step) in self.steps.iter().enumerate() {
            // Each branch works on an independent deep clone.
            let branch_state = state.clone();
            let step = step.clone();
            let token = branch_token.clone();
            let semaphore = Arc::clone(&semaphore);
            let tx = tx.clone();
            report.steps[index].mark_running();

            tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                let outcome = tokio::select! {
                    _ = token.cancelled() => Err(AgentError::Cancelled { partial: None }),
                    result = step.execute(&token, branch_state) => result,
                };
                let _ = tx.send((index, outcome));
            });
        }
        drop(tx);

        // Collect branch outcomes. Indexed so merge stays deterministic in
        // step order regardless of completion order.
        let step_count = self.steps.len();
        let mut results: Vec<Option<State>> = (0..step_count).map(|_| None).collect();
        let mut errors: Vec<String> = Vec::new();
        let mut winner: Option<usize> = None;

        while let Some((index, outcome)) = rx.recv().await {
            let name = self.steps[index].name().to_string();
            match outcome {
                Ok(branch_state) => {
                    report.steps[index].mark_completed();
                    results[index] = Some(branch_state);
                    emitter
                        .emit_progress(
                            report.count(StepStatus::Completed) as u64,
                            step_count as u64,
                            format!("branch '{}' completed", name),
                        )
                        .await;
                    if matches!(self.merge, MergeStrategy::First) && winner.is_none() {
                        winner = Some(index);
                        branch_token.cancel();
                    }
                }
                Err(AgentError::Cancelled { .. }) => {
                    // Cancelled siblings are not failures.
                    report.steps[index].mark_skipped();
                }
                Err(err) => {
                    log::warn!(
                        "parallel '{}': branch '{}' failed: {}",
                        self.info.name,
                        name,
                        err
                    );
                    report.steps[index].mark_failed(err.to_string());
                    errors.push(format!("{}: {}", name, err));
                }
            }
        }

        // The caller's own cancellation trumps any merge outcome.
        if cancel.is_cancelled() && !timed_out.load(Ordering::SeqCst) {
            self.store_report(&report);
            emitter.emit_error("workflow cancelled").await;
            return Err(AgentError::Cancelled {
                partial: Some(Box::new(state)),
            });
        }

        let merged = match &self.merge {
            MergeStrategy::First => {
                let Some(index) = winner else {
                    self.store_report(&report);
                    let err = if timed_out.load(Ordering::SeqCst) && errors.is_empty() {
                        AgentError::Timeout {
                            after_ms: self.timeout.map(|t| t.as_millis() as u64).unwrap_or(0),
                        }
                    } else {
                        AgentError::AllBranchesFailed(errors)
                    };
                    emitter.emit_error(&err).await;
                    return Err(err);
                };
                match results[index].take() {
                    Some(branch_state) => branch_state,
                    None => state,
                }
            }
            MergeStrategy::All => {
                let merged = state.clone();
                let mut parallel_results = Map::new();
                for (index, slot) in results.iter().enumerate() {
                    let Some(branch_state) = slot else { continue };
                    let name = self.steps[index].name().to_string();
                    parallel_results.insert(name, branch_state.values_as_object());
                    // Copy only the messages the branch itself produced.
                    for message in branch_state.messages().into_iter().skip(initial_message_count) {
                        merged.add_message(message);
                    }
                }
                merged.set(keys::PARALLEL_RESULTS, Value::Object(parallel_results));
                merged
            }
            MergeStrategy::Func(reduce) => {
                let mut map = HashMap::new();
                for (index, slot) in results.iter_mut().enumerate() {
                    if let Some(branch_state) = slot.take() {
                        map.insert(self.steps[index].name().to_string(), branch_state);
                    }
                }
                reduce(map)
            }
        };

        merged.set_metadata(WORKFLOW_STATUS_KEY, report.to_json());
        self.store_report(&report);
        emitter
            .emit(
                EventType::AgentComplete,
                json!({
                    "completed": report.count(StepStatus::Completed),
                    "failed": report.count(StepStatus::Failed),
                    "skipped": report.count(StepStatus::Skipped),
                }),
            )
            .await;
        Ok(merged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn delay_step(name: &str, millis: u64) -> WorkflowStep {
        let tag = name.to_string();
        WorkflowStep::func(name, move |cancel, state| {
            let tag = tag.clone();
            async move {
                tokio::select! {
                    _ = cancel.cancelled() => Err(AgentError::Cancelled { partial: None }),
                    _ = tokio::time::sleep(Duration::from_millis(millis)) => {
                        state.set("winner", json!(tag));
                        Ok(state)
                    }
                }
            }
        })
    }

    #[tokio::test]
    async fn merge_all_collects_branch_values() {
        let workflow = ParallelAgent::new("p", "p")
            .with_step(WorkflowStep::func("left", |_c, s| async move {
                s.set("value", json!("L"));
                Ok(s)
            }))
            .with_step(WorkflowStep::func("right", |_c, s| async move {
                s.set("value", json!("R"));
                Ok(s)
            }));

        let state = State::new();
        state.set("shared", json!("base"));
        let out = workflow.run(&CancellationToken::new(), state).await.unwrap();

        let results = out.get(keys::PARALLEL_RESULTS).unwrap();
        assert_eq!(results["left"]["value"], json!("L"));
        assert_eq!(results["right"]["value"], json!("R"));
        // Both branches saw the seeded key via their clone.
        assert_eq!(results["left"]["shared"], json!("base"));
    }

    #[tokio::test]
    async fn merge_first_returns_fastest_and_cancels_rest() {
        let workflow = ParallelAgent::new("p", "p")
            .merge_first()
            .with_timeout(Duration::from_millis(400))
            .with_step(delay_step("fast", 10))
            .with_step(delay_step("medium", 150))
            .with_step(delay_step("slow", 300));

        let out = workflow
            .run(&CancellationToken::new(), State::new())
            .await
            .unwrap();
        assert_eq!(out.get("winner"), Some(json!("fast")));

        let report = workflow.last_report().unwrap();
        assert_eq!(report.status_of("fast"), Some(StepStatus::Completed));
        assert_eq!(report.status_of("medium"), Some(StepStatus::Skipped));
        assert_eq!(report.status_of("slow"), Some(StepStatus::Skipped));
    }

    #[tokio::test]
    async fn merge_first_with_all_failures_aggregates() {
        let workflow = ParallelAgent::new("p", "p")
            .merge_first()
            .with_step(WorkflowStep::func("a", |_c, _s| async move {
                Err(AgentError::Execution("a failed".into()))
            }))
            .with_step(WorkflowStep::func("b", |_c, _s| async move {
                Err(AgentError::Execution("b failed".into()))
            }));

        let err = workflow
            .run(&CancellationToken::new(), State::new())
            .await
            .unwrap_err();
        match err {
            AgentError::AllBranchesFailed(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn merge_all_omits_failed_branches() {
        let workflow = ParallelAgent::new("p", "p")
            .with_step(WorkflowStep::func("good", |_c, s| async move {
                s.set("value", json!(1));
                Ok(s)
            }))
            .with_step(WorkflowStep::func("bad", |_c, _s| async move {
                Err(AgentError::Execution("nope".into()))
            }));

        let out = workflow
            .run(&CancellationToken::new(), State::new())
            .await
            .unwrap();
        let results = out.get(keys::PARALLEL_RESULTS).unwrap();
        assert!(results.get("good").is_some());
        assert!(results.get("bad").is_none());

        let report = workflow.last_report().unwrap();
        assert_eq!(report.status_of("bad"), Some(StepStatus::Failed));
    }

    #[tokio::test]
    async fn branches_never_share_state() {
        let workflow = ParallelAgent::new("p", "p")
            .with_step(WorkflowStep::func("a", |_c, s| async move {
                s.set("branch", json!("a"));
                tokio::time::sleep(Duration::from_millis(20)).await;
                assert_eq!(s.get("branch"), Some(json!("a")));
                Ok(s)
            }))
            .with_step(WorkflowStep::func("b", |_c, s| async move {
                s.set("branch", json!("b"));
                tokio::time::sleep(Duration::from_millis(20)).await;
                assert_eq!(s.get("branch"), Some(json!("b")));
                Ok(s)
            }));

        let state = State::new();
        workflow.run(&CancellationToken::new(), state.clone()).await.unwrap();
        // The input state itself is untouched by the branches.
        assert!(state.get("branch").is_none());
    }

    #[tokio::test]
    async fn merge_func_reduces() {
        let workflow = ParallelAgent::new("p", "p")
            .merge_func(|branches| {
                let total: i64 = branches
                    .values()
                    .filter_map(|s| s.get("n").and_then(|v| v.as_i64()))
                    .sum();
                let out = State::new();
                out.set("total", json!(total));
                out
            })
            .with_step(WorkflowStep::func("x", |_c, s| async move {
                s.set("n", json!(2));
                Ok(s)
            }))
            .with_step(WorkflowStep::func("y", |_c, s| async move {
                s.set("n", json!(3));
                Ok(s)
            }));

        let out = workflow
            .run(&CancellationToken::new(), State::new())
            .await
            .unwrap();
        assert_eq!(out.get("total"), Some(json!(5)));
    }
}
