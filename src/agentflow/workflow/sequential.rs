//! Sequential workflow agent.
//!
//! Executes a fixed, ordered list of steps, threading each step's output
//! state into the next. Failure handling is governed by `stop_on_error`
//! (default `true`):
//!
//! - **stop on error** — the failed step is marked `Failed`, later steps
//!   stay `Pending`, and the run surfaces the step's error.
//! - **continue on error** — the failure is recorded and the next step runs
//!   with the unchanged state.
//!
//! Cancellation is observed between steps; a cancelled run returns the last
//! consistent state inside the error.

use crate::agentflow::agent::{AgentError, AgentInfo, AgentType, BaseAgent};
use crate::agentflow::event::{EventDispatcher, EventEmitter, EventType};
use crate::agentflow::state::State;
use crate::agentflow::workflow::step::{
    StepStatus, WorkflowReport, WorkflowStep, WORKFLOW_STATUS_KEY,
};
use async_trait::async_trait;
use serde_json::json;
use std::sync::{Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Workflow agent running its steps strictly in order.
///
/// # Example
///
/// ```rust,no_run
/// use agentflow::workflow::{SequentialAgent, WorkflowStep};
/// use agentflow::state::State;
/// use serde_json::json;
/// use tokio_util::sync::CancellationToken;
/// # use agentflow::agent::BaseAgent;
///
/// # async {
/// let pipeline = SequentialAgent::new("pipeline", "Analysis pipeline")
///     .with_step(WorkflowStep::func("analyze", |_c, s| async move {
///         s.set("analysis", json!("done"));
///         Ok(s)
///     }))
///     .with_step(WorkflowStep::func("summarize", |_c, s| async move {
///         s.set("response", json!("summary"));
///         Ok(s)
///     }));
///
/// let out = pipeline.run(&CancellationToken::new(), State::new()).await?;
/// assert_eq!(out.get("response"), Some(json!("summary")));
/// # Ok::<(), agentflow::agent::AgentError>(())
/// # };
/// ```
pub struct SequentialAgent {
    info: AgentInfo,
    steps: Vec<WorkflowStep>,
    stop_on_error: bool,
    events: Option<EventDispatcher>,
    last_report: Mutex<Option<WorkflowReport>>,
}

impl SequentialAgent {
    /// Empty sequential workflow. Add steps with
    /// [`with_step`](Self::with_step).
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            info: AgentInfo::new(id, name, "sequential workflow", AgentType::Workflow),
            steps: Vec::new(),
            stop_on_error: true,
            events: None,
            last_report: Mutex::new(None),
        }
    }

    /// Append a step (builder pattern).
    pub fn with_step(mut self, step: WorkflowStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Record failures and keep going instead of aborting (builder pattern).
    pub fn continue_on_error(mut self) -> Self {
        self.stop_on_error = false;
        self
    }

    /// Publish lifecycle events to `bus` (builder pattern).
    pub fn with_event_bus(mut self, bus: EventDispatcher) -> Self {
        self.events = Some(bus);
        self
    }

    /// Step names in execution order.
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

#[async_trait]
impl BaseAgent for SequentialAgent {
    fn info(&self) -> &AgentInfo {
        &self.info
    }

    async fn run(&self, cancel: &CancellationToken, state: State) -> Result<State, AgentError> {
        let emitter = match &self.events {
            Some(bus) => EventEmitter::new(bus.clone(), self.info.clone(), Uuid::new_v4().to_string()),
            None => EventEmitter::noop(self.info.clone(), Uuid::new_v4().to_string()),
        };
        emitter
            .emit(EventType::AgentStart, json!({"steps": self.steps.len()}))
            .await;

        let mut report = WorkflowReport::pending(self.step_names());
        let mut current = state;
        let total = self.steps.len() as u64;

        for (index, step) in self.steps.iter().enumerate() {
            if cancel.is_cancelled() {
                self.store_report(&report);
                emitter.emit_error("workflow cancelled").await;
                return Err(AgentError::Cancelled {
                    partial: Some(Box::new(current)),
                });
            }

            report.steps[index].mark_running();
            emitter
                .emit_progress(index as u64 + 1, total, format!("running step '{}'", step.name()))
                .await;
            log::debug!(
                "sequential '{}': step {}/{} '{}'",
                self.info.name,
                index + 1,
                total,
                step.name()
            );

            match step.execute(cancel, current.clone()).await {
                Ok(next_state) => {
                    report.steps[index].mark_completed();
                    current = next_state;
                }
                Err(err) => {
                    report.steps[index].mark_failed(err.to_string());
                    log::warn!(
                        "sequential '{}': step '{}' failed: {}",
                        self.info.name,
                        step.name(),
                        err
                    );
                    if self.stop_on_error {
                        self.store_report(&report);
                        let failure = AgentError::StepFailed {
                            step: step.name().to_string(),
                            message: err.to_string(),
                        };
                        emitter.emit_error(&failure).await;
                        return Err(failure);
                    }
                    // Continue with the unchanged state.
                }
            }
        }

        current.set_metadata(WORKFLOW_STATUS_KEY, report.to_json());
        self.store_report(&report);
        emitter
            .emit(
                EventType::AgentComplete,
                json!({
                    "completed": report.count(StepStatus::Completed),
                    "failed": report.count(StepStatus::Failed),
                }),
            )
            .await;
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ok_step(name: &str) -> WorkflowStep {
        let key = name.to_string();
        WorkflowStep::func(name, move |_c, s| {
            let key = key.clone();
            async move {
                s.set(key, json!(true));
                Ok(s)
            }
        })
    }

    fn failing_step(name: &str) -> WorkflowStep {
        WorkflowStep::func(name, |_c, _s| async move {
            Err(AgentError::Execution("boom".into()))
        })
    }

    #[tokio::test]
    async fn threads_state_through_steps() {
        let workflow = SequentialAgent::new("w", "w")
            .with_step(ok_step("a"))
            .with_step(ok_step("b"));
        let out = workflow
            .run(&CancellationToken::new(), State::new())
            .await
            .unwrap();
        assert_eq!(out.get("a"), Some(json!(true)));
        assert_eq!(out.get("b"), Some(json!(true)));
        assert!(out.get_metadata(WORKFLOW_STATUS_KEY).is_some());
    }

    #[tokio::test]
    async fn stop_on_error_leaves_later_steps_pending() {
        let workflow = SequentialAgent::new("w", "w")
            .with_step(ok_step("a"))
            .with_step(failing_step("b"))
            .with_step(ok_step("c"));

        let err = workflow
            .run(&CancellationToken::new(), State::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::StepFailed { ref step, .. } if step == "b"));

        let report = workflow.last_report().unwrap();
        assert_eq!(report.status_of("a"), Some(StepStatus::Completed));
        assert_eq!(report.status_of("b"), Some(StepStatus::Failed));
        assert_eq!(report.status_of("c"), Some(StepStatus::Pending));
    }

    #[tokio::test]
    async fn continue_on_error_keeps_unchanged_state() {
        let workflow = SequentialAgent::new("w", "w")
            .continue_on_error()
            .with_step(failing_step("a"))
            .with_step(ok_step("b"));

        let out = workflow
            .run(&CancellationToken::new(), State::new())
            .await
            .unwrap();
        assert_eq!(out.get("b"), Some(json!(true)));

        let report = workflow.last_report().unwrap();
        assert_eq!(report.status_of("a"), Some(StepStatus::Failed));
        assert_eq!(report.status_of("b"), Some(StepStatus::Completed));
    }

    #[tokio::test]
    async fn cancellation_between_steps() {
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        let workflow = SequentialAgent::new("w", "w")
            .with_step(WorkflowStep::func("first", move |_c, s| {
                let cancel = cancel_clone.clone();
                async move {
                    cancel.cancel();
                    Ok(s)
                }
            }))
            .with_step(ok_step("second"));

        let err = workflow.run(&cancel, State::new()).await.unwrap_err();
        assert!(matches!(err, AgentError::Cancelled { .. }));
        let report = workflow.last_report().unwrap();
        assert_eq!(report.status_of("second"), Some(StepStatus::Pending));
    }
}
