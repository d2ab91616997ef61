//! Conditional workflow agent.
//!
//! Routes execution through named branches, each guarded by a predicate
//! over the current [`State`]. Branches are evaluated in descending
//! priority (ties broken by name, so ordering is stable), and by default
//! only the first match executes. With no match, the default step runs if
//! one is set; otherwise the input state is returned unchanged.
//!
//! Two toggles change the shape:
//!
//! - [`allow_multiple_matches`](ConditionalAgent::allow_multiple_matches) —
//!   every matching branch runs sequentially in priority order, each seeing
//!   the previous branch's output state.
//! - [`evaluate_all_conditions`](ConditionalAgent::evaluate_all_conditions)
//!   — predicates are all evaluated eagerly even after a match (useful when
//!   predicates are free of side effects and you want full telemetry);
//!   the default evaluates lazily.

use crate::agentflow::agent::{AgentError, AgentInfo, AgentType, BaseAgent};
use crate::agentflow::event::{EventDispatcher, EventEmitter, EventType};
use crate::agentflow::state::State;
use crate::agentflow::workflow::step::{
    StepStatus, WorkflowReport, WorkflowStep, WORKFLOW_STATUS_KEY,
};
use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

type Predicate = Arc<dyn Fn(&State) -> bool + Send + Sync>;

/// A guarded branch of a [`ConditionalAgent`].
#[derive(Clone)]
pub struct Branch {
    name: String,
    priority: i32,
    predicate: Predicate,
    step: WorkflowStep,
}

impl Branch {
    /// Branch with the default priority (0).
    pub fn new(
        name: impl Into<String>,
        predicate: impl Fn(&State) -> bool + Send + Sync + 'static,
        step: WorkflowStep,
    ) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            predicate: Arc::new(predicate),
            step,
        }
    }

    /// Override the priority (builder pattern). Higher runs first.
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// The branch name, used in status reports.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl std::fmt::Debug for Branch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Branch")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Workflow agent routing by predicates over state.
///
/// # Example
///
/// ```rust,no_run
/// use agentflow::workflow::{Branch, ConditionalAgent, WorkflowStep};
/// use agentflow::state::State;
/// use serde_json::json;
/// use tokio_util::sync::CancellationToken;
/// # use agentflow::agent::BaseAgent;
///
/// # async {
/// let router = ConditionalAgent::new("router", "Data router")
///     .with_branch(Branch::new(
///         "image",
///         |s: &State| s.get_str("data_type").as_deref() == Some("image"),
///         WorkflowStep::func("image", |_c, s| async move {
///             s.set("handled_by", json!("image"));
///             Ok(s)
///         }),
///     ))
///     .with_default(WorkflowStep::func("fallback", |_c, s| async move {
///         s.set("handled_by", json!("fallback"));
///         Ok(s)
///     }));
///
/// let state = State::new();
/// state.set("data_type", json!("image"));
/// let out = router.run(&CancellationToken::new(), state).await?;
/// assert_eq!(out.get("handled_by"), Some(json!("image")));
/// # Ok::<(), agentflow::agent::AgentError>(())
/// # };
/// ```
pub struct ConditionalAgent {
    info: AgentInfo,
    branches: Vec<Branch>,
    default_step: Option<WorkflowStep>,
    allow_multiple_matches: bool,
    evaluate_all_conditions: bool,
    events: Option<EventDispatcher>,
    last_report: Mutex<Option<WorkflowReport>>,
}

impl ConditionalAgent {
    /// Router with no branches. Running it returns the state unchanged.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            info: AgentInfo::new(id, name, "conditional workflow", AgentType::Workflow),
            branches: Vec::new(),
            default_step: None,
            allow_multiple_matches: false,
            evaluate_all_conditions: false,
            events: None,
            last_report: Mutex::new(None),
        }
    }

    /// Register a branch (builder pattern).
    pub fn with_branch(mut self, branch: Branch) -> Self {
        self.branches.push(branch);
        self
    }

    /// Step to run when no branch matches (builder pattern).
    pub fn with_default(mut self, step: WorkflowStep) -> Self {
        self.default_step = Some(step);
        self
    }

    /// Run *all* matching branches sequentially, chaining their states
    /// (builder pattern).
    pub fn allow_multiple_matches(mut self) -> Self {
        self.allow_multiple_matches = true;
        self
    }

    /// Evaluate every predicate eagerly, even after a match
    /// (builder pattern).
    pub fn evaluate_all_conditions(mut self) -> Self {
        self.evaluate_all_conditions = true;
        self
    }

    /// Publish lifecycle events to `bus` (builder pattern).
    pub fn with_event_bus(mut self, bus: EventDispatcher) -> Self {
        self.events = Some(bus);
        self
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

    /// Branches sorted for evaluation: descending priority, names ascending
    /// on ties.
    fn ordered_branches(&self) -> Vec<Branch> {
        let mut ordered = self.branches.clone();
        ordered.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.name.cmp(&b.name)));
        ordered
    }
}

#[async_trait]
impl BaseAgent for ConditionalAgent {
    fn info(&self) -> &AgentInfo {
        &self.info
    }

    async fn run(&self, cancel: &CancellationToken, state: State) -> Result<State, AgentError> {
        let emitter = match &self.events {
            Some(bus) => EventEmitter::new(bus.clone(), self.info.clone(), Uuid::new_v4().to_string()),
            None => EventEmitter::noop(self.info.clone(), Uuid::new_v4().to_string()),
        };
        emitter
            .emit(EventType::AgentStart, json!({"branches": self.branches.len()}))
            .await;

        let ordered = self.ordered_branches();
        let mut names: Vec<String> = ordered.iter().map(|b| b.name.clone()).collect();
        if self.default_step.is_some() {
            names.push("default".to_string());
        }
        let mut report = WorkflowReport::pending(names);

        // Decide which branches match. Lazy evaluation stops at the first
        // match unless multi-match or eager evaluation is requested.
        let mut matching: Vec<usize> = Vec::new();
        for (index, branch) in ordered.iter().enumerate() {
            if !matching.is_empty() && !self.allow_multiple_matches && !self.evaluate_all_conditions
            {
                break;
            }
            if (branch.predicate)(&state) {
                matching.push(index);
            }
        }
        if !self.allow_multiple_matches {
            matching.truncate(1);
        }

        let mut current = state;

        if matching.is_empty() {
            match &self.default_step {
                Some(step) => {
                    let last = report.steps.len() - 1;
                    report.steps[last].mark_running();
                    log::debug!("conditional '{}': running default branch", self.info.name);
                    match step.execute(cancel, current).await {
                        Ok(next) => {
                            report.steps[last].mark_completed();
                            current = next;
                        }
                        Err(err) => {
                            report.steps[last].mark_failed(err.to_string());
                            self.store_report(&report);
                            let failure = AgentError::StepFailed {
                                step: "default".to_string(),
                                message: err.to_string(),
                            };
                            emitter.emit_error(&failure).await;
                            return Err(failure);
                        }
                    }
                }
                None => {
                    // No match and no default: the input passes through.
                    for step in report.steps.iter_mut() {
                        step.mark_skipped();
                    }
                    self.store_report(&report);
                    emitter
                        .emit(EventType::AgentComplete, json!({"matched": 0}))
                        .await;
                    return Ok(current);
                }
            }
        } else {
            for &index in &matching {
                if cancel.is_cancelled() {
                    self.store_report(&report);
                    emitter.emit_error("workflow cancelled").await;
                    return Err(AgentError::Cancelled {
                        partial: Some(Box::new(current)),
                    });
                }
                let branch = &ordered[index];
                report.steps[index].mark_running();
                log::debug!(
                    "conditional '{}': branch '{}' matched (priority {})",
                    self.info.name,
                    branch.name,
                    branch.priority
                );
                match branch.step.execute(cancel, current).await {
                    Ok(next) => {
                        report.steps[index].mark_completed();
                        current = next;
                    }
                    Err(err) => {
                        report.steps[index].mark_failed(err.to_string());
                        self.store_report(&report);
                        let failure = AgentError::StepFailed {
                            step: branch.name.clone(),
                            message: err.to_string(),
                        };
                        emitter.emit_error(&failure).await;
                        return Err(failure);
                    }
                }
            }
        }

        for step in report.steps.iter_mut() {
            if step.status == StepStatus::Pending {
                step.mark_skipped();
            }
        }

        current.set_metadata(WORKFLOW_STATUS_KEY, report.to_json());
        self.store_report(&report);
        emitter
            .emit(
                EventType::AgentComplete,
                json!({"matched": matching.len().max(usize::from(self.default_step.is_some() && matching.is_empty()))}),
            )
            .await;
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn tag_step(tag: &str) -> WorkflowStep {
        let tag = tag.to_string();
        WorkflowStep::func(tag.clone(), move |_c, s| {
            let tag = tag.clone();
            async move {
                s.set("handled_by", json!(tag.clone()));
                let mut order: Vec<serde_json::Value> = s
                    .get("order")
                    .and_then(|v| v.as_array().cloned())
                    .unwrap_or_default();
                order.push(json!(tag));
                s.set("order", json!(order));
                Ok(s)
            }
        })
    }

    fn typed_branch(data_type: &'static str, priority: i32) -> Branch {
        Branch::new(
            data_type,
            move |s: &State| s.get_str("data_type").as_deref() == Some(data_type),
            tag_step(data_type),
        )
        .with_priority(priority)
    }

    #[tokio::test]
    async fn first_match_wins_and_default_is_skipped() {
        let router = ConditionalAgent::new("r", "r")
            .with_branch(typed_branch("text", 0))
            .with_branch(typed_branch("image", 0))
            .with_branch(typed_branch("structured", 0))
            .with_default(tag_step("default"));

        let state = State::new();
        state.set("data_type", json!("image"));
        let out = router.run(&CancellationToken::new(), state).await.unwrap();

        assert_eq!(out.get("handled_by"), Some(json!("image")));
        let report = router.last_report().unwrap();
        assert_eq!(report.count(StepStatus::Completed), 1);
        assert_eq!(report.status_of("image"), Some(StepStatus::Completed));
        assert_eq!(report.status_of("default"), Some(StepStatus::Skipped));
    }

    #[tokio::test]
    async fn no_match_without_default_passes_state_through() {
        let router = ConditionalAgent::new("r", "r").with_branch(typed_branch("text", 0));
        let state = State::new();
        state.set("data_type", json!("audio"));
        let before = state.clone();

        let out = router.run(&CancellationToken::new(), state).await.unwrap();
        assert_eq!(out, before);
    }

    #[tokio::test]
    async fn no_match_runs_default() {
        let router = ConditionalAgent::new("r", "r")
            .with_branch(typed_branch("text", 0))
            .with_default(tag_step("default"));
        let state = State::new();
        state.set("data_type", json!("audio"));

        let out = router.run(&CancellationToken::new(), state).await.unwrap();
        assert_eq!(out.get("handled_by"), Some(json!("default")));
    }

    #[tokio::test]
    async fn priority_orders_evaluation_with_stable_ties() {
        let router = ConditionalAgent::new("r", "r")
            .allow_multiple_matches()
            .with_branch(Branch::new("zeta", |_s: &State| true, tag_step("zeta")))
            .with_branch(Branch::new("alpha", |_s: &State| true, tag_step("alpha")))
            .with_branch(Branch::new("high", |_s: &State| true, tag_step("high")).with_priority(5));

        let out = router
            .run(&CancellationToken::new(), State::new())
            .await
            .unwrap();
        // Priority 5 first, then equal-priority branches by name.
        assert_eq!(out.get("order"), Some(json!(["high", "alpha", "zeta"])));
    }

    #[tokio::test]
    async fn multi_match_chains_states() {
        let router = ConditionalAgent::new("r", "r")
            .allow_multiple_matches()
            .with_branch(Branch::new("a", |_s: &State| true, tag_step("a")))
            .with_branch(Branch::new("b", |_s: &State| true, tag_step("b")));

        let out = router
            .run(&CancellationToken::new(), State::new())
            .await
            .unwrap();
        // Branch b saw branch a's output.
        assert_eq!(out.get("order"), Some(json!(["a", "b"])));
        let report = router.last_report().unwrap();
        assert_eq!(report.count(StepStatus::Completed), 2);
    }

    #[tokio::test]
    async fn lazy_vs_eager_predicate_evaluation() {
        let evaluations = Arc::new(AtomicUsize::new(0));

        let make_branch = |name: &'static str, counter: Arc<AtomicUsize>| {
            Branch::new(
                name,
                move |_s: &State| {
                    counter.fetch_add(1, Ordering::SeqCst);
                    true
                },
                tag_step(name),
            )
        };

        let lazy = ConditionalAgent::new("r", "r")
            .with_branch(make_branch("a", evaluations.clone()))
            .with_branch(make_branch("b", evaluations.clone()));
        lazy.run(&CancellationToken::new(), State::new()).await.unwrap();
        assert_eq!(evaluations.load(Ordering::SeqCst), 1);

        evaluations.store(0, Ordering::SeqCst);
        let eager = ConditionalAgent::new("r", "r")
            .evaluate_all_conditions()
            .with_branch(make_branch("a", evaluations.clone()))
            .with_branch(make_branch("b", evaluations.clone()));
        eager.run(&CancellationToken::new(), State::new()).await.unwrap();
        assert_eq!(evaluations.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn branch_failure_surfaces() {
        let router = ConditionalAgent::new("r", "r").with_branch(Branch::new(
            "always",
            |_s: &State| true,
            WorkflowStep::func("always", |_c, _s| async move {
                Err(AgentError::Execution("branch broke".into()))
            }),
        ));

        let err = router
            .run(&CancellationToken::new(), State::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::StepFailed { ref step, .. } if step == "always"));
    }
}
