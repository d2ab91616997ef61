//! Workflow steps and status reporting.
//!
//! A [`WorkflowStep`] is the polymorphic unit every workflow executes:
//! either an agent step (any [`BaseAgent`]) or a function step (an async
//! closure over the state). Each execution is tracked by a [`StepReport`]
//! with a [`StepStatus`] and timing, aggregated into a [`WorkflowReport`]
//! that workflows also record into the result state's metadata under
//! [`WORKFLOW_STATUS_KEY`].

use crate::agentflow::agent::{AgentError, BaseAgent};
use crate::agentflow::state::State;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// State-metadata key under which workflows record their final
/// [`WorkflowReport`] (as JSON).
pub const WORKFLOW_STATUS_KEY: &str = "workflow_status";

type StepFn =
    Arc<dyn Fn(CancellationToken, State) -> BoxFuture<'static, Result<State, AgentError>> + Send + Sync>;

#[derive(Clone)]
enum StepKind {
    Agent(Arc<dyn BaseAgent>),
    Func(StepFn),
}

/// One executable unit of a workflow.
#[derive(Clone)]
pub struct WorkflowStep {
    name: String,
    kind: StepKind,
}

impl WorkflowStep {
    /// Step that runs an agent. The step name is the agent's name.
    pub fn agent(agent: Arc<dyn BaseAgent>) -> Self {
        Self {
            name: agent.name().to_string(),
            kind: StepKind::Agent(agent),
        }
    }

    /// Step that runs an async function over the state.
    ///
    /// ```rust
    /// use agentflow::workflow::WorkflowStep;
    /// use serde_json::json;
    ///
    /// let step = WorkflowStep::func("stamp", |_cancel, state| async move {
    ///     state.set("stamped", json!(true));
    ///     Ok(state)
    /// });
    /// assert_eq!(step.name(), "stamp");
    /// ```
    pub fn func<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(CancellationToken, State) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<State, AgentError>> + Send + 'static,
    {
        let f: StepFn = Arc::new(move |cancel, state| Box::pin(f(cancel, state)));
        Self {
            name: name.into(),
            kind: StepKind::Func(f),
        }
    }

    /// The step's display name (unique within a workflow by convention).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Override the step name (builder pattern). Useful when the same agent
    /// appears twice in one workflow.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Run the step with the given state.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        state: State,
    ) -> Result<State, AgentError> {
        match &self.kind {
            StepKind::Agent(agent) => agent.run(cancel, state).await,
            StepKind::Func(f) => f(cancel.clone(), state).await,
        }
    }
}

impl std::fmt::Debug for WorkflowStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self.kind {
            StepKind::Agent(_) => "agent",
            StepKind::Func(_) => "func",
        };
        f.debug_struct("WorkflowStep")
            .field("name", &self.name)
            .field("kind", &kind)
            .finish()
    }
}

/// Execution state of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        };
        write!(f, "{}", s)
    }
}

/// Status and timing of one step execution.
#[derive(Debug, Clone)]
pub struct StepReport {
    pub name: String,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl StepReport {
    /// Fresh report in the `Pending` state.
    pub fn pending(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Pending,
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = StepStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self) {
        self.status = StepStatus::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error.into());
    }

    pub fn mark_skipped(&mut self) {
        self.status = StepStatus::Skipped;
    }

    /// Wall-clock span of the execution, when both timestamps exist.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) if end >= start => Some(end - start),
            _ => None,
        }
    }
}

/// Aggregated status of one workflow run.
#[derive(Debug, Clone, Default)]
pub struct WorkflowReport {
    pub steps: Vec<StepReport>,
}

impl WorkflowReport {
    /// Report with every step `Pending`.
    pub fn pending(names: impl IntoIterator<Item = String>) -> Self {
        Self {
            steps: names.into_iter().map(StepReport::pending).collect(),
        }
    }

    /// Status of the named step, if present.
    pub fn status_of(&self, name: &str) -> Option<StepStatus> {
        self.steps.iter().find(|s| s.name == name).map(|s| s.status)
    }

    /// Number of steps with the given status.
    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }

    /// `true` when no step failed.
    pub fn is_success(&self) -> bool {
        self.count(StepStatus::Failed) == 0
    }

    /// JSON rendering recorded into state metadata.
    pub fn to_json(&self) -> Value {
        json!(self
            .steps
            .iter()
            .map(|s| {
                json!({
                    "name": s.name,
                    "status": s.status.to_string(),
                    "started_at": s.started_at.map(|t| t.to_rfc3339()),
                    "finished_at": s.finished_at.map(|t| t.to_rfc3339()),
                    "error": s.error,
                })
            })
            .collect::<Vec<_>>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn func_step_threads_state() {
        let step = WorkflowStep::func("double", |_cancel, state| async move {
            let n = state.get("n").and_then(|v| v.as_i64()).unwrap_or(0);
            state.set("n", json!(n * 2));
            Ok(state)
        });

        let state = State::new();
        state.set("n", json!(21));
        let out = step
            .execute(&CancellationToken::new(), state)
            .await
            .unwrap();
        assert_eq!(out.get("n"), Some(json!(42)));
    }

    #[test]
    fn report_tracks_lifecycle() {
        let mut report = WorkflowReport::pending(vec!["a".to_string(), "b".to_string()]);
        assert_eq!(report.status_of("a"), Some(StepStatus::Pending));

        report.steps[0].mark_running();
        report.steps[0].mark_completed();
        report.steps[1].mark_failed("boom");

        assert_eq!(report.status_of("a"), Some(StepStatus::Completed));
        assert_eq!(report.status_of("b"), Some(StepStatus::Failed));
        assert!(!report.is_success());
        assert!(report.steps[0].duration().is_some());

        let rendered = report.to_json();
        assert_eq!(rendered[1]["error"], json!("boom"));
    }
}
