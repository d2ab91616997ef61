//! Tool contract and execution layer.
//!
//! A [`Tool`] is a metadata-rich component that agents invoke through the
//! registry. The metadata surface (category, tags, schemas, usage
//! instructions, behavioral flags) exists for discovery, policy, and
//! LLM-facing prompts — execution correctness depends only on
//! [`execute`](Tool::execute).
//!
//! Tools run under a [`ToolContext`]: they can read state, emit events, and
//! observe cancellation, but they can never mutate the caller's state. The
//! [`ToolExecutor`] wraps every invocation with parameter coercion, event
//! emission (`tool.call` / `tool.result` / `tool.error`), confirmation
//! policy enforcement, and panic recovery.
//!
//! # Failure model
//!
//! Two distinct shapes, both fed back to the LLM loop:
//!
//! - recoverable, domain-level failure → `Ok(ToolResult { success: false, .. })`
//!   (e.g. division by zero in the calculator)
//! - invocation failure → `Err(ToolError)` (unknown tool, bad params,
//!   recovered panic, I/O)

use crate::agentflow::agent::AgentInfo;
use crate::agentflow::event::{EventEmitter, EventType};
use crate::agentflow::registry::{ComponentMetadata, Registry, RegistryError};
use crate::agentflow::schema;
use crate::agentflow::state::StateReader;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Errors raised when a tool invocation itself fails.
#[derive(Debug, Clone)]
pub enum ToolError {
    /// No tool registered under the requested name.
    NotFound(String),
    /// Parameters failed validation or deserialization.
    InvalidParameters(String),
    /// The tool started but could not complete (I/O, recovered panic).
    ExecutionFailed(String),
    /// The tool requires confirmation and no policy granted it.
    ConfirmationDenied(String),
    /// The caller's cancellation token fired.
    Cancelled,
}

impl fmt::Display for ToolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ToolError::NotFound(name) => write!(f, "tool not found: {}", name),
            ToolError::InvalidParameters(msg) => write!(f, "invalid tool parameters: {}", msg),
            ToolError::ExecutionFailed(msg) => write!(f, "tool execution failed: {}", msg),
            ToolError::ConfirmationDenied(name) => {
                write!(f, "tool requires confirmation: {}", name)
            }
            ToolError::Cancelled => write!(f, "tool execution cancelled"),
        }
    }
}

impl Error for ToolError {}

/// Structured result of a tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Whether the tool considers the outcome successful.
    pub success: bool,
    /// Domain output, surfaced verbatim to the caller.
    pub output: Value,
    /// Diagnostic for `success == false`.
    pub error: Option<String>,
    /// Execution metadata (timing, cost, provenance).
    pub metadata: HashMap<String, Value>,
}

impl ToolResult {
    /// Successful result carrying `output`.
    pub fn success(output: Value) -> Self {
        Self {
            success: true,
            output,
            error: None,
            metadata: HashMap::new(),
        }
    }

    /// Domain-level failure with a diagnostic the LLM can recover from.
    pub fn failure(error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            output: Value::Null,
            error: Some(error),
            metadata: HashMap::new(),
        }
    }

    /// Replace the output payload (builder pattern).
    pub fn with_output(mut self, output: Value) -> Self {
        self.output = output;
        self
    }

    /// Attach a metadata entry (builder pattern).
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Per-invocation context handed to [`Tool::execute`].
///
/// State access is read-only by construction — tools return values that the
/// caller integrates.
#[derive(Clone)]
pub struct ToolContext {
    /// Cooperative cancellation; long-running tools must honor it.
    pub cancellation: CancellationToken,
    /// Read-only view of the calling run's state.
    pub state: StateReader,
    /// Event sink bound to the calling agent and run.
    pub events: EventEmitter,
    /// Identity of the invoking agent.
    pub agent: AgentInfo,
    /// Identifier of the enclosing run.
    pub run_id: String,
    /// How many times this invocation has been retried (0 on first attempt).
    pub retry_count: u32,
    /// When the invocation started.
    pub start_time: DateTime<Utc>,
}

impl ToolContext {
    /// Build a context for the given run.
    pub fn new(
        cancellation: CancellationToken,
        state: StateReader,
        events: EventEmitter,
        agent: AgentInfo,
        run_id: impl Into<String>,
    ) -> Self {
        Self {
            cancellation,
            state,
            events,
            agent,
            run_id: run_id.into(),
            retry_count: 0,
            start_time: Utc::now(),
        }
    }
}

/// The polymorphic tool contract.
///
/// Only [`name`](Tool::name), [`description`](Tool::description), and
/// [`execute`](Tool::execute) are mandatory; everything else defaults to a
/// sensible baseline.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Discovery category (e.g. `"math"`, `"web"`, `"file"`).
    fn category(&self) -> &str {
        "general"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    fn tags(&self) -> Vec<String> {
        Vec::new()
    }

    /// JSON schema of the accepted parameters.
    fn parameter_schema(&self) -> Value {
        schema::open_object_schema()
    }

    /// JSON schema of the produced output.
    fn output_schema(&self) -> Value {
        json!({"type": "object"})
    }

    /// LLM-facing guidance on when and how to call this tool.
    fn usage_instructions(&self) -> Option<String> {
        None
    }

    /// Example invocations (JSON objects with `params` and `result`).
    fn examples(&self) -> Vec<Value> {
        Vec::new()
    }

    /// Operational constraints worth surfacing to planners.
    fn constraints(&self) -> Vec<String> {
        Vec::new()
    }

    /// What the LLM should do when this tool reports a failure.
    fn error_guidance(&self) -> Option<String> {
        None
    }

    /// Free-form hints for routing and policy engines.
    fn behavioral_hints(&self) -> HashMap<String, Value> {
        HashMap::new()
    }

    /// `true` when identical params always produce identical output.
    fn is_deterministic(&self) -> bool {
        true
    }

    /// `true` when execution has irreversible side effects.
    fn is_destructive(&self) -> bool {
        false
    }

    /// `true` when a confirmation policy must approve each invocation.
    fn requires_confirmation(&self) -> bool {
        false
    }

    /// Rough latency expectation, used for scheduling heuristics.
    fn estimated_latency(&self) -> Duration {
        Duration::from_millis(100)
    }

    /// Run the tool. See the module docs for the failure model.
    async fn execute(&self, ctx: &ToolContext, params: Value) -> Result<ToolResult, ToolError>;
}

/// Registry of tools, keyed by tool name.
pub type ToolRegistry = Registry<dyn Tool>;

/// Register a tool, deriving its discovery metadata from the tool itself.
pub fn register_tool(registry: &ToolRegistry, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
    let mut metadata = ComponentMetadata::new(tool.name(), tool.description())
        .with_version(tool.version())
        .with_category(tool.category());
    for tag in tool.tags() {
        metadata = metadata.with_tag(tag);
    }
    for example in tool.examples() {
        metadata = metadata.with_example(example.to_string());
    }
    registry.register(tool, metadata)
}

/// Caller-injected policy deciding whether a confirmation-gated tool may run.
#[async_trait]
pub trait ConfirmationPolicy: Send + Sync {
    /// Return `true` to allow the invocation.
    async fn confirm(&self, tool_name: &str, params: &Value) -> bool;
}

/// Policy that approves every confirmation request.
pub struct ApproveAll;

#[async_trait]
impl ConfirmationPolicy for ApproveAll {
    async fn confirm(&self, _tool_name: &str, _params: &Value) -> bool {
        true
    }
}

/// Executes tools looked up from a registry, adding the cross-cutting
/// concerns every invocation needs: schema coercion, events, confirmation,
/// cancellation, and panic recovery.
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    confirmation: Option<Arc<dyn ConfirmationPolicy>>,
}

impl ToolExecutor {
    /// Executor over `registry` with no confirmation policy: tools that
    /// require confirmation are rejected.
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            confirmation: None,
        }
    }

    /// Attach a confirmation policy (builder pattern).
    pub fn with_confirmation(mut self, policy: Arc<dyn ConfirmationPolicy>) -> Self {
        self.confirmation = Some(policy);
        self
    }

    /// Borrow the underlying registry.
    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Execute `name` with `params` under `ctx`.
    pub async fn execute(
        &self,
        ctx: &ToolContext,
        name: &str,
        params: Value,
    ) -> Result<ToolResult, ToolError> {
        let entry = self
            .registry
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_string()))?;
        let tool = entry.component;

        if ctx.cancellation.is_cancelled() {
            return Err(ToolError::Cancelled);
        }

        let params = schema::coerce_params(&tool.parameter_schema(), &params);

        if tool.requires_confirmation() {
            let approved = match &self.confirmation {
                Some(policy) => policy.confirm(name, &params).await,
                None => false,
            };
            if !approved {
                let err = ToolError::ConfirmationDenied(name.to_string());
                ctx.events
                    .emit(
                        EventType::ToolError,
                        json!({"tool": name, "error": err.to_string()}),
                    )
                    .await;
                return Err(err);
            }
        }

        ctx.events
            .emit(EventType::ToolCall, json!({"tool": name, "params": params}))
            .await;

        let outcome = AssertUnwindSafe(tool.execute(ctx, params))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(result)) => {
                ctx.events
                    .emit(
                        EventType::ToolResult,
                        json!({
                            "tool": name,
                            "success": result.success,
                            "error": result.error,
                        }),
                    )
                    .await;
                Ok(result)
            }
            Ok(Err(err)) => {
                ctx.events
                    .emit(
                        EventType::ToolError,
                        json!({"tool": name, "error": err.to_string()}),
                    )
                    .await;
                Err(err)
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                let err = ToolError::ExecutionFailed(format!("tool panicked: {}", message));
                log::error!("tool '{}' panicked: {}", name, message);
                ctx.events
                    .emit(
                        EventType::ToolError,
                        json!({"tool": name, "error": err.to_string()}),
                    )
                    .await;
                Err(err)
            }
        }
    }
}

/// Render a tool into the catalogue entry advertised to providers.
pub fn tool_spec(tool: &dyn Tool) -> crate::agentflow::provider::ToolSpec {
    let mut spec =
        crate::agentflow::provider::ToolSpec::new(tool.name(), tool.description())
            .with_parameters(tool.parameter_schema());
    if let Some(instructions) = tool.usage_instructions() {
        spec = spec.with_usage_instructions(instructions);
    }
    for example in tool.examples() {
        spec = spec.with_example(example);
    }
    spec
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agentflow::agent::{AgentInfo, AgentType};
    use crate::agentflow::state::State;

    struct Doubler;

    #[async_trait]
    impl Tool for Doubler {
        fn name(&self) -> &str {
            "doubler"
        }

        fn description(&self) -> &str {
            "Doubles a number"
        }

        fn parameter_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {"n": {"type": "number"}},
                "required": ["n"]
            })
        }

        async fn execute(
            &self,
            _ctx: &ToolContext,
            params: Value,
        ) -> Result<ToolResult, ToolError> {
            let n = params["n"]
                .as_f64()
                .ok_or_else(|| ToolError::InvalidParameters("n must be a number".into()))?;
            Ok(ToolResult::success(json!({"result": n * 2.0})))
        }
    }

    struct Panicker;

    #[async_trait]
    impl Tool for Panicker {
        fn name(&self) -> &str {
            "panicker"
        }

        fn description(&self) -> &str {
            "Always panics"
        }

        async fn execute(
            &self,
            _ctx: &ToolContext,
            _params: Value,
        ) -> Result<ToolResult, ToolError> {
            panic!("boom");
        }
    }

    struct Guarded;

    #[async_trait]
    impl Tool for Guarded {
        fn name(&self) -> &str {
            "guarded"
        }

        fn description(&self) -> &str {
            "Needs confirmation"
        }

        fn requires_confirmation(&self) -> bool {
            true
        }

        async fn execute(
            &self,
            _ctx: &ToolContext,
            _params: Value,
        ) -> Result<ToolResult, ToolError> {
            Ok(ToolResult::success(json!("ok")))
        }
    }

    fn ctx(state: &State) -> ToolContext {
        let agent = AgentInfo::new("a1", "Agent", "test", AgentType::Custom);
        ToolContext::new(
            CancellationToken::new(),
            state.reader(),
            EventEmitter::noop(agent.clone(), "run-1"),
            agent,
            "run-1",
        )
    }

    fn executor_with(tools: Vec<Arc<dyn Tool>>) -> ToolExecutor {
        let registry = Arc::new(ToolRegistry::new());
        for tool in tools {
            register_tool(&registry, tool).unwrap();
        }
        ToolExecutor::new(registry)
    }

    #[tokio::test]
    async fn executes_with_string_coercion() {
        let executor = executor_with(vec![Arc::new(Doubler)]);
        let state = State::new();
        let result = executor
            .execute(&ctx(&state), "doubler", json!({"n": "21"}))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output["result"], json!(42.0));
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let executor = executor_with(vec![]);
        let state = State::new();
        let err = executor
            .execute(&ctx(&state), "nope", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound(_)));
    }

    #[tokio::test]
    async fn panic_is_recovered_to_error() {
        let executor = executor_with(vec![Arc::new(Panicker)]);
        let state = State::new();
        let err = executor
            .execute(&ctx(&state), "panicker", json!({}))
            .await
            .unwrap_err();
        match err {
            ToolError::ExecutionFailed(msg) => assert!(msg.contains("boom")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn confirmation_is_enforced() {
        let state = State::new();
        let executor = executor_with(vec![Arc::new(Guarded)]);
        let err = executor
            .execute(&ctx(&state), "guarded", json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::ConfirmationDenied(_)));

        let approving = executor_with(vec![Arc::new(Guarded)]).with_confirmation(Arc::new(ApproveAll));
        let ok = approving
            .execute(&ctx(&state), "guarded", json!({}))
            .await
            .unwrap();
        assert!(ok.success);
    }

    #[tokio::test]
    async fn cancelled_context_short_circuits() {
        let executor = executor_with(vec![Arc::new(Doubler)]);
        let state = State::new();
        let mut context = ctx(&state);
        context.cancellation = CancellationToken::new();
        context.cancellation.cancel();
        let err = executor
            .execute(&context, "doubler", json!({"n": 1}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Cancelled));
    }
}
