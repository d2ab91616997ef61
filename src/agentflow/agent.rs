//! Base agent contract, identity, and sub-agent handoff.
//!
//! Everything executable in this crate is an agent: an object implementing
//! [`BaseAgent::run`] with an identity ([`AgentInfo`]) and optional
//! tool-holding ([`ToolSet`]) and sub-agent ([`SubAgentSet`]) mixins. LLM
//! agents, workflow agents, and bridged tools all share this contract, which
//! is what makes them composable.
//!
//! # Handoff
//!
//! A parent agent delegates to a named sub-agent through
//! [`SubAgentSet::transfer_to`]: a child state is assembled according to the
//! configured [`StateInheritance`] policy, the payload is deposited into it,
//! and the sub-agent runs to completion. A per-run depth counter (default
//! cap [`DEFAULT_HANDOFF_DEPTH_CAP`]) stops delegation cycles — two agents
//! that advertise each other as sub-agents would otherwise recurse forever.

use crate::agentflow::provider::ProviderError;
use crate::agentflow::state::{State, StateInheritance};
use crate::agentflow::tool::{register_tool, Tool, ToolError, ToolRegistry};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio_util::sync::CancellationToken;

/// Maximum nested handoffs per run before [`SubAgentSet::transfer_to`]
/// refuses to recurse further.
pub const DEFAULT_HANDOFF_DEPTH_CAP: u32 = 4;

/// State-metadata key tracking the current handoff depth of a run.
pub const HANDOFF_DEPTH_KEY: &str = "handoff_depth";

/// State-metadata key carrying the note passed to a handoff.
pub const HANDOFF_NOTE_KEY: &str = "handoff_note";

/// Broad classification of an agent. Informational — behavior is always
/// chosen by the concrete type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentType {
    /// Provider-backed agent running the generation/tool loop.
    Llm,
    /// Hand-written `run` implementation.
    Custom,
    /// Orchestrates child agents (sequential, parallel, conditional).
    Workflow,
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AgentType::Llm => "llm",
            AgentType::Custom => "custom",
            AgentType::Workflow => "workflow",
        };
        write!(f, "{}", s)
    }
}

/// Identity of an agent, carried on events and tool contexts.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub agent_type: AgentType,
    pub metadata: HashMap<String, String>,
}

impl AgentInfo {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        agent_type: AgentType,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
            agent_type,
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata entry (builder pattern).
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Errors surfaced by agent and workflow runs.
///
/// Fatal outcomes that interrupt a run mid-flight (`Cancelled`,
/// `IterationLimit`) carry the last consistent state so callers can inspect
/// partial progress.
#[derive(Debug)]
pub enum AgentError {
    /// The caller's cancellation token fired.
    Cancelled { partial: Option<Box<State>> },
    /// The generation loop hit its iteration cap.
    IterationLimit { iterations: usize, partial: Box<State> },
    /// The provider call failed.
    Provider(ProviderError),
    /// A tool invocation failed at the transport level.
    Tool(ToolError),
    /// Structured output failed schema validation after all retries.
    SchemaValidation(String),
    /// `transfer_to` named an unknown sub-agent.
    SubAgentNotFound(String),
    /// The per-run handoff depth cap was reached.
    HandoffDepthExceeded { depth: u32, cap: u32 },
    /// A workflow step failed.
    StepFailed { step: String, message: String },
    /// Every branch of a parallel workflow failed.
    AllBranchesFailed(Vec<String>),
    /// A workflow-level timeout elapsed.
    Timeout { after_ms: u64 },
    /// A required input was missing from the state.
    MissingInput(String),
    /// Anything else.
    Execution(String),
}

impl fmt::Display for AgentError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentError::Cancelled { .. } => write!(f, "run cancelled"),
            AgentError::IterationLimit { iterations, .. } => {
                write!(f, "iteration cap reached after {} iterations", iterations)
            }
            AgentError::Provider(err) => write!(f, "{}", err),
            AgentError::Tool(err) => write!(f, "{}", err),
            AgentError::SchemaValidation(msg) => {
                write!(f, "structured output failed validation: {}", msg)
            }
            AgentError::SubAgentNotFound(name) => write!(f, "sub-agent not found: {}", name),
            AgentError::HandoffDepthExceeded { depth, cap } => {
                write!(f, "handoff depth {} exceeds cap {}", depth, cap)
            }
            AgentError::StepFailed { step, message } => {
                write!(f, "step '{}' failed: {}", step, message)
            }
            AgentError::AllBranchesFailed(errors) => {
                write!(f, "all branches failed: [{}]", errors.join("; "))
            }
            AgentError::Timeout { after_ms } => write!(f, "workflow timed out after {}ms", after_ms),
            AgentError::MissingInput(key) => write!(f, "missing required input: {}", key),
            AgentError::Execution(msg) => write!(f, "execution failed: {}", msg),
        }
    }
}

impl Error for AgentError {}

impl From<ProviderError> for AgentError {
    fn from(err: ProviderError) -> Self {
        AgentError::Provider(err)
    }
}

impl From<ToolError> for AgentError {
    fn from(err: ToolError) -> Self {
        AgentError::Tool(err)
    }
}

impl AgentError {
    /// The partial state carried by fatal mid-run errors, if any.
    pub fn partial_state(&self) -> Option<&State> {
        match self {
            AgentError::Cancelled { partial } => partial.as_deref(),
            AgentError::IterationLimit { partial, .. } => Some(partial),
            _ => None,
        }
    }
}

/// The agent contract: identity plus `run`.
///
/// Implementations must be shareable (`Arc<dyn BaseAgent>`) and reentrant —
/// a single agent may serve many concurrent runs.
#[async_trait]
pub trait BaseAgent: Send + Sync {
    /// Identity of this agent.
    fn info(&self) -> &AgentInfo;

    /// Stable identifier.
    fn id(&self) -> &str {
        &self.info().id
    }

    /// Display name. Also the lookup key for sub-agent handoff.
    fn name(&self) -> &str {
        &self.info().name
    }

    /// Human-readable description, surfaced in tool catalogues.
    fn description(&self) -> &str {
        &self.info().description
    }

    /// Informational type tag.
    fn agent_type(&self) -> AgentType {
        self.info().agent_type
    }

    /// Declared input schema, used when the agent is wrapped as a tool.
    fn input_schema(&self) -> Option<Value> {
        None
    }

    /// Execute the agent against `state` under the caller's cancellation.
    async fn run(&self, cancel: &CancellationToken, state: State) -> Result<State, AgentError>;
}

/// Tool-holding mixin embedded by agents that dispatch tools.
///
/// Thin wrapper over a [`ToolRegistry`] that derives registration metadata
/// from each tool. The registry is shared (`Arc`), so several agents can
/// hold the same tool set and observe runtime mutations.
#[derive(Clone)]
pub struct ToolSet {
    registry: Arc<ToolRegistry>,
}

impl ToolSet {
    /// Empty tool set backed by a fresh registry.
    pub fn new() -> Self {
        Self {
            registry: Arc::new(ToolRegistry::new()),
        }
    }

    /// Tool set sharing an existing registry.
    pub fn shared(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// Register a tool. Fails when the name is already taken.
    pub fn add_tool(&self, tool: Arc<dyn Tool>) -> Result<(), crate::agentflow::registry::RegistryError> {
        register_tool(&self.registry, tool)
    }

    /// Look up a tool by name.
    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.registry.get(name).map(|entry| entry.component)
    }

    /// All registered tools, sorted by name.
    pub fn list_tools(&self) -> Vec<Arc<dyn Tool>> {
        self.registry
            .list()
            .into_iter()
            .map(|entry| entry.component)
            .collect()
    }

    /// Remove a tool, returning it if it was present.
    pub fn remove_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.registry.unregister(name).map(|entry| entry.component)
    }

    /// The backing registry.
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    /// `true` when no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }
}

impl Default for ToolSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Sub-agent mixin: a named collection of child agents plus the state
/// inheritance policy applied on handoff.
pub struct SubAgentSet {
    agents: RwLock<Vec<Arc<dyn BaseAgent>>>,
    shared_state: AtomicBool,
    inheritance: RwLock<StateInheritance>,
    depth_cap: AtomicU32,
}

impl SubAgentSet {
    /// Empty set. Shared state is enabled with the default (inherit-all)
    /// policy.
    pub fn new() -> Self {
        Self {
            agents: RwLock::new(Vec::new()),
            shared_state: AtomicBool::new(true),
            inheritance: RwLock::new(StateInheritance::default()),
            depth_cap: AtomicU32::new(DEFAULT_HANDOFF_DEPTH_CAP),
        }
    }

    /// Register a child agent.
    pub fn add_sub_agent(&self, agent: Arc<dyn BaseAgent>) {
        self.agents
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(agent);
    }

    /// Snapshot of the registered children, in registration order.
    pub fn sub_agents(&self) -> Vec<Arc<dyn BaseAgent>> {
        self.agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Look up a child by display name.
    pub fn get_sub_agent_by_name(&self, name: &str) -> Option<Arc<dyn BaseAgent>> {
        self.agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|a| a.name() == name)
            .cloned()
    }

    /// Names of the registered children, in registration order.
    pub fn sub_agent_names(&self) -> Vec<String> {
        self.agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|a| a.name().to_string())
            .collect()
    }

    /// `true` when no children are registered.
    pub fn is_empty(&self) -> bool {
        self.agents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Toggle state sharing across handoffs. When disabled, children start
    /// from an empty state containing only the handoff payload.
    pub fn enable_shared_state(&self, enabled: bool) {
        self.shared_state.store(enabled, Ordering::Relaxed);
    }

    /// Configure which sections a derived child state inherits.
    pub fn configure_state_inheritance(&self, values: bool, artifacts: bool, metadata: bool) {
        *self
            .inheritance
            .write()
            .unwrap_or_else(PoisonError::into_inner) = StateInheritance {
            inherit_values: values,
            inherit_artifacts: artifacts,
            inherit_metadata: metadata,
        };
    }

    /// The active inheritance policy.
    pub fn inheritance(&self) -> StateInheritance {
        *self
            .inheritance
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Override the per-run handoff depth cap.
    pub fn set_handoff_depth_cap(&self, cap: u32) {
        self.depth_cap.store(cap.max(1), Ordering::Relaxed);
    }

    /// Hand execution off to the named child agent.
    ///
    /// Builds a child state (inheritance policy + payload + note), bumps the
    /// run's handoff depth, runs the child, and returns its result state.
    pub async fn transfer_to(
        &self,
        cancel: &CancellationToken,
        parent_state: &State,
        target: &str,
        note: &str,
        payload: Value,
    ) -> Result<State, AgentError> {
        let agent = self
            .get_sub_agent_by_name(target)
            .ok_or_else(|| AgentError::SubAgentNotFound(target.to_string()))?;

        let depth = parent_state
            .get_metadata(HANDOFF_DEPTH_KEY)
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;
        let cap = self.depth_cap.load(Ordering::Relaxed);
        if depth >= cap {
            return Err(AgentError::HandoffDepthExceeded { depth, cap });
        }

        let child = State::new();
        if self.shared_state.load(Ordering::Relaxed) {
            child.merge_from(parent_state, &self.inheritance());
        }
        if let Some(object) = payload.as_object() {
            for (key, value) in object {
                child.set(key.clone(), value.clone());
            }
        }
        if !note.is_empty() {
            child.set_metadata(HANDOFF_NOTE_KEY, Value::String(note.to_string()));
        }
        child.set_metadata(HANDOFF_DEPTH_KEY, Value::from(depth + 1));

        log::debug!(
            "handoff -> '{}' (depth {} of {})",
            target,
            depth + 1,
            cap
        );
        agent.run(cancel, child).await
    }
}

impl Default for SubAgentSet {
    fn default() -> Self {
        Self::new()
    }
}
