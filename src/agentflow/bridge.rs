//! Agent↔tool bridge.
//!
//! Two adapters make the agent and tool worlds interchangeable:
//!
//! - [`AgentTool`] wraps any [`BaseAgent`] behind the [`Tool`] contract, so
//!   one agent can invoke another through its normal tool-call channel. The
//!   tool's parameter schema comes from the agent's declared input schema
//!   (or defaults to an open object); params become a fresh input state and
//!   the output state becomes the tool result via pluggable mappers. Events
//!   emitted on the wrapped agent's bus are forwarded into the calling
//!   [`ToolContext`]'s dispatcher for the duration of the call.
//! - [`ToolAgent`] wraps any [`Tool`] behind the [`BaseAgent`] contract, so
//!   a tool can be a workflow step. Params are extracted from the state
//!   (default: the `"input"` key), and the result lands under `"output"`
//!   plus any named result keys.
//!
//! Wrapping an agent as a tool and that tool back into an agent yields an
//! agent with the original's behavior, modulo mapper identity.

use crate::agentflow::agent::{AgentError, AgentInfo, AgentType, BaseAgent};
use crate::agentflow::event::{Event, EventDispatcher, EventEmitter, EventHandler};
use crate::agentflow::schema;
use crate::agentflow::state::State;
use crate::agentflow::tool::{
    register_tool, Tool, ToolContext, ToolError, ToolExecutor, ToolRegistry, ToolResult,
};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Translates tool params into the wrapped agent's input state.
pub trait ParamMapper: Send + Sync {
    fn apply(&self, params: &Value, state: &State) -> Result<(), ToolError>;
}

/// Default: deposit each top-level param under the matching state key.
pub struct DefaultParamMapper;

impl ParamMapper for DefaultParamMapper {
    fn apply(&self, params: &Value, state: &State) -> Result<(), ToolError> {
        if let Some(object) = params.as_object() {
            for (key, value) in object {
                state.set(key.clone(), value.clone());
            }
        }
        Ok(())
    }
}

/// Translates the wrapped agent's output state into the tool result value.
pub trait ResultMapper: Send + Sync {
    fn extract(&self, state: &State) -> Value;
}

/// Default: flatten the state's value map into a result object.
pub struct DefaultResultMapper;

impl ResultMapper for DefaultResultMapper {
    fn extract(&self, state: &State) -> Value {
        state.values_as_object()
    }
}

/// Extract a single value by path from the output state's value map.
impl ResultMapper for crate::agentflow::mappers::PathMapper {
    fn extract(&self, state: &State) -> Value {
        self.extract(&state.values_as_object()).unwrap_or(Value::Null)
    }
}

/// Re-publishes events from the wrapped agent's bus onto the caller's bus.
struct EventForwarder {
    target: EventDispatcher,
}

#[async_trait]
impl EventHandler for EventForwarder {
    async fn on_event(&self, event: &Event) {
        self.target.publish(event.clone()).await;
    }
}

/// A [`BaseAgent`] exposed through the [`Tool`] contract.
pub struct AgentTool {
    agent: Arc<dyn BaseAgent>,
    name: String,
    description: String,
    param_mapper: Arc<dyn ParamMapper>,
    result_mapper: Arc<dyn ResultMapper>,
    /// Bus the wrapped agent publishes to, forwarded into the caller's
    /// dispatcher while the tool executes.
    forward_from: Option<EventDispatcher>,
}

impl AgentTool {
    /// Wrap `agent` with default mappers. The tool inherits the agent's
    /// name and description.
    pub fn new(agent: Arc<dyn BaseAgent>) -> Self {
        Self {
            name: agent.name().to_string(),
            description: if agent.description().is_empty() {
                format!("Runs the '{}' agent", agent.name())
            } else {
                agent.description().to_string()
            },
            agent,
            param_mapper: Arc::new(DefaultParamMapper),
            result_mapper: Arc::new(DefaultResultMapper),
            forward_from: None,
        }
    }

    /// Override the advertised tool name (builder pattern).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Override the params→state mapper (builder pattern).
    pub fn with_param_mapper(mut self, mapper: Arc<dyn ParamMapper>) -> Self {
        self.param_mapper = mapper;
        self
    }

    /// Override the state→result mapper (builder pattern).
    pub fn with_result_mapper(mut self, mapper: Arc<dyn ResultMapper>) -> Self {
        self.result_mapper = mapper;
        self
    }

    /// Forward events from the wrapped agent's bus to the caller
    /// (builder pattern). Pass the same bus the agent was built with.
    pub fn with_event_forwarding(mut self, source: EventDispatcher) -> Self {
        self.forward_from = Some(source);
        self
    }
}

#[async_trait]
impl Tool for AgentTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn category(&self) -> &str {
        "agent"
    }

    fn parameter_schema(&self) -> Value {
        self.agent
            .input_schema()
            .unwrap_or_else(schema::open_object_schema)
    }

    fn is_deterministic(&self) -> bool {
        // Agent runs go through a provider; assume nothing.
        false
    }

    async fn execute(&self, ctx: &ToolContext, params: Value) -> Result<ToolResult, ToolError> {
        let input = State::new();
        self.param_mapper.apply(&params, &input)?;

        // Forward the wrapped agent's events into the caller's bus for the
        // duration of the run.
        let forwarding = match (&self.forward_from, ctx.events.dispatcher()) {
            (Some(source), Some(target)) => {
                let id = source.subscribe(Arc::new(EventForwarder {
                    target: target.clone(),
                }));
                Some((source.clone(), id))
            }
            _ => None,
        };

        let outcome = self.agent.run(&ctx.cancellation, input).await;

        if let Some((source, id)) = forwarding {
            source.unsubscribe(id);
        }

        match outcome {
            Ok(output) => Ok(ToolResult::success(self.result_mapper.extract(&output))),
            Err(AgentError::Cancelled { .. }) => Err(ToolError::Cancelled),
            Err(err) => Err(ToolError::ExecutionFailed(err.to_string())),
        }
    }
}

/// Translates a state into the wrapped tool's params.
pub trait InputMapper: Send + Sync {
    fn extract(&self, state: &State) -> Value;
}

/// Default: read the `"input"` state key. An object becomes the params
/// verbatim; a scalar is wrapped as `{"input": value}`; a missing key
/// yields empty params.
pub struct DefaultInputMapper;

impl InputMapper for DefaultInputMapper {
    fn extract(&self, state: &State) -> Value {
        match state.get("input") {
            Some(Value::Object(object)) => Value::Object(object),
            Some(value) => {
                let mut out = Map::new();
                out.insert("input".to_string(), value);
                Value::Object(out)
            }
            None => Value::Object(Map::new()),
        }
    }
}

/// A [`Tool`] exposed through the [`BaseAgent`] contract.
pub struct ToolAgent {
    info: AgentInfo,
    tool_name: String,
    executor: ToolExecutor,
    input_mapper: Arc<dyn InputMapper>,
    events: Option<EventDispatcher>,
}

impl ToolAgent {
    /// Wrap `tool` as an agent named after it.
    pub fn new(tool: Arc<dyn Tool>) -> Self {
        let registry = Arc::new(ToolRegistry::new());
        let tool_name = tool.name().to_string();
        let description = tool.description().to_string();
        if let Err(err) = register_tool(&registry, tool) {
            // A single-tool registry cannot collide; log and carry on.
            log::warn!("tool registration failed: {}", err);
        }
        Self {
            info: AgentInfo::new(
                format!("tool-agent-{}", tool_name),
                tool_name.clone(),
                description,
                AgentType::Custom,
            ),
            tool_name,
            executor: ToolExecutor::new(registry),
            input_mapper: Arc::new(DefaultInputMapper),
            events: None,
        }
    }

    /// Override the agent identity (builder pattern).
    pub fn with_identity(mut self, id: impl Into<String>, name: impl Into<String>) -> Self {
        self.info.id = id.into();
        self.info.name = name.into();
        self
    }

    /// Override the state→params mapper (builder pattern).
    pub fn with_input_mapper(mut self, mapper: Arc<dyn InputMapper>) -> Self {
        self.input_mapper = mapper;
        self
    }

    /// Publish tool events to `bus` (builder pattern).
    pub fn with_event_bus(mut self, bus: EventDispatcher) -> Self {
        self.events = Some(bus);
        self
    }
}

#[async_trait]
impl BaseAgent for ToolAgent {
    fn info(&self) -> &AgentInfo {
        &self.info
    }

    async fn run(&self, cancel: &CancellationToken, state: State) -> Result<State, AgentError> {
        let run_id = Uuid::new_v4().to_string();
        let emitter = match &self.events {
            Some(bus) => EventEmitter::new(bus.clone(), self.info.clone(), run_id.clone()),
            None => EventEmitter::noop(self.info.clone(), run_id.clone()),
        };

        let params = self.input_mapper.extract(&state);
        let ctx = ToolContext::new(
            cancel.clone(),
            state.reader(),
            emitter,
            self.info.clone(),
            run_id,
        );

        match self.executor.execute(&ctx, &self.tool_name, params).await {
            Ok(result) => {
                state.set("output", result.output.clone());
                if let Some(object) = result.output.as_object() {
                    for (key, value) in object {
                        state.set(key.clone(), value.clone());
                    }
                }
                if let Some(error) = &result.error {
                    state.set("error", Value::String(error.clone()));
                }
                Ok(state)
            }
            Err(ToolError::Cancelled) => Err(AgentError::Cancelled {
                partial: Some(Box::new(state)),
            }),
            Err(err) => Err(AgentError::Tool(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agentflow::event::EventType;
    use crate::agentflow::recorder::EventRecorder;
    use serde_json::json;

    struct Upper {
        info: AgentInfo,
        bus: Option<EventDispatcher>,
    }

    #[async_trait]
    impl BaseAgent for Upper {
        fn info(&self) -> &AgentInfo {
            &self.info
        }

        fn input_schema(&self) -> Option<Value> {
            Some(json!({
                "type": "object",
                "properties": {"text": {"type": "string"}},
                "required": ["text"]
            }))
        }

        async fn run(
            &self,
            _cancel: &CancellationToken,
            state: State,
        ) -> Result<State, AgentError> {
            if let Some(bus) = &self.bus {
                bus.publish(Event::new(EventType::Progress, &self.info.id, &self.info.name))
                    .await;
            }
            let text = state.get_str("text").unwrap_or_default();
            state.set("result", json!(text.to_uppercase()));
            Ok(state)
        }
    }

    fn upper_agent(bus: Option<EventDispatcher>) -> Arc<dyn BaseAgent> {
        Arc::new(Upper {
            info: AgentInfo::new("upper", "upper", "Uppercases text", AgentType::Custom),
            bus,
        })
    }

    fn test_ctx(state: &State, bus: Option<EventDispatcher>) -> ToolContext {
        let info = AgentInfo::new("caller", "Caller", "", AgentType::Custom);
        let emitter = match bus {
            Some(bus) => EventEmitter::new(bus, info.clone(), "run-1"),
            None => EventEmitter::noop(info.clone(), "run-1"),
        };
        ToolContext::new(
            CancellationToken::new(),
            state.reader(),
            emitter,
            info,
            "run-1",
        )
    }

    #[tokio::test]
    async fn agent_as_tool_maps_params_and_results() {
        let tool = AgentTool::new(upper_agent(None));
        assert_eq!(tool.name(), "upper");
        assert_eq!(tool.parameter_schema()["required"][0], json!("text"));

        let state = State::new();
        let result = tool
            .execute(&test_ctx(&state, None), json!({"text": "hello"}))
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output["result"], json!("HELLO"));
        assert_eq!(result.output["text"], json!("hello"));
    }

    #[tokio::test]
    async fn agent_as_tool_forwards_events() {
        let inner_bus = EventDispatcher::synchronous();
        let caller_bus = EventDispatcher::synchronous();
        let recorder = Arc::new(EventRecorder::new());
        caller_bus.subscribe(recorder.clone());

        let tool = AgentTool::new(upper_agent(Some(inner_bus.clone())))
            .with_event_forwarding(inner_bus.clone());

        let state = State::new();
        tool.execute(&test_ctx(&state, Some(caller_bus)), json!({"text": "x"}))
            .await
            .unwrap();

        // The inner agent's Progress event crossed to the caller's bus.
        assert_eq!(recorder.events_by_type(&EventType::Progress).len(), 1);

        // After the call the forwarder is detached.
        inner_bus
            .publish(Event::new(EventType::Progress, "upper", "upper"))
            .await;
        assert_eq!(recorder.events_by_type(&EventType::Progress).len(), 1);
    }

    #[tokio::test]
    async fn tool_as_agent_stores_output_keys() {
        let tool = AgentTool::new(upper_agent(None));
        let agent = ToolAgent::new(Arc::new(tool));

        let state = State::new();
        state.set("input", json!({"text": "abc"}));
        let out = agent
            .run(&CancellationToken::new(), state)
            .await
            .unwrap();

        assert_eq!(out.get("result"), Some(json!("ABC")));
        assert_eq!(out.get("output").unwrap()["result"], json!("ABC"));
    }

    #[tokio::test]
    async fn round_trip_preserves_behavior() {
        // original agent → tool → agent: same input state, same result key.
        let original = upper_agent(None);
        let direct_state = State::new();
        direct_state.set("text", json!("round trip"));
        let direct = original
            .run(&CancellationToken::new(), direct_state)
            .await
            .unwrap();

        let bridged = ToolAgent::new(Arc::new(AgentTool::new(upper_agent(None))));
        let bridged_state = State::new();
        bridged_state.set("input", json!({"text": "round trip"}));
        let via_bridge = bridged
            .run(&CancellationToken::new(), bridged_state)
            .await
            .unwrap();

        assert_eq!(direct.get("result"), via_bridge.get("result"));
    }
}
