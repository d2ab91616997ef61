//! Workflow agents: sequential pipelines, parallel fan-outs, and
//! conditional routing.
//!
//! Every workflow is itself a [`BaseAgent`](crate::agent::BaseAgent), so
//! workflows nest freely — a parallel branch can be a sequential pipeline
//! whose steps are conditional routers, and any of them can be an LLM
//! agent.
//!
//! | Agent | Pattern |
//! |-------|---------|
//! | [`SequentialAgent`] | Steps run in order, each feeding the next |
//! | [`ParallelAgent`] | Steps fan out on clones of the state, results merge |
//! | [`ConditionalAgent`] | Predicates over state pick the branch(es) to run |
//!
//! Each run produces a [`WorkflowReport`] (per-step status + timing),
//! recorded in the result state's metadata under
//! [`WORKFLOW_STATUS_KEY`](step::WORKFLOW_STATUS_KEY) and retrievable via
//! each agent's `last_report()`.

pub mod conditional;
pub mod parallel;
pub mod sequential;
pub mod step;

pub use conditional::{Branch, ConditionalAgent};
pub use parallel::{MergeStrategy, ParallelAgent};
pub use sequential::SequentialAgent;
pub use step::{StepReport, StepStatus, WorkflowReport, WorkflowStep, WORKFLOW_STATUS_KEY};
