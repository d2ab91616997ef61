//! Provider-backed agent: the generation/tool loop.
//!
//! [`LlmAgent`] alternates provider round-trips and tool invocations until
//! the provider produces a final answer, the iteration cap is reached, the
//! run is cancelled, or the provider fails. Each iteration:
//!
//! 1. hooks `before_generate`, event `generation.before`
//! 2. `Provider::generate_message` with the current conversation
//! 3. hooks `after_generate`, event `generation.after`
//! 4. parse tool-call intent — native tool calls when present, otherwise the
//!    strict JSON fallback protocol (`{"tool": ..., "params": ...}` as the
//!    *entire* message, or an array thereof; anything else is the final
//!    answer, never a partial parse)
//! 5. dispatch the parsed calls in provider order, feeding results back as a
//!    user message prefixed `Tool results:`
//!
//! The final answer lands in the state under `response` and `output`, with
//! cumulative token usage under the `token_usage` metadata key.
//!
//! # Structured output
//!
//! With [`with_output_schema`](LlmAgent::with_output_schema) configured, the
//! final answer must parse as JSON and validate against the schema. On
//! failure the loop appends a repair instruction and retries, capped at two
//! corrective iterations.
//!
//! # Handoff
//!
//! Sub-agents attached via [`with_sub_agent`](LlmAgent::with_sub_agent) are
//! advertised as a synthetic `transfer_to_agent` tool whose `target_agent`
//! parameter enumerates the sub-agent names. When invoked, the sub-agent's
//! result state is merged back into the run (subject to the configured
//! inheritance policy) and rendered as the tool's result.
//!
//! # Example
//!
//! ```rust,ignore
//! let agent = LlmAgent::new("support", "Support Agent", provider)
//!     .with_system_prompt("You are a helpful support agent.")
//!     .with_tool(Arc::new(CalculatorTool::new()))
//!     .with_hook(Arc::new(LoggingHook::new()))
//!     .with_event_bus(bus);
//!
//! let state = State::with_user_input("What is 2 + 2?");
//! let result = agent.run(&CancellationToken::new(), state).await?;
//! println!("{}", result.get_str("response").unwrap());
//! ```

use crate::agentflow::agent::{AgentError, AgentInfo, AgentType, BaseAgent, SubAgentSet, ToolSet};
use crate::agentflow::event::{EventDispatcher, EventEmitter, EventType};
use crate::agentflow::hooks::{truncate_for_display, AgentHook, HookDispatcher, DEFAULT_DISPLAY_CAP};
use crate::agentflow::message::{Message, Role, TokenUsage};
use crate::agentflow::provider::{GenerateOptions, Provider, ToolCallRequest, ToolSpec};
use crate::agentflow::schema;
use crate::agentflow::state::{keys, State};
use crate::agentflow::tool::{
    tool_spec, ConfirmationPolicy, Tool, ToolContext, ToolError, ToolExecutor, ToolResult,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Default cap on generation/tool iterations per run.
pub const DEFAULT_MAX_ITERATIONS: usize = 10;

/// Hard cap on corrective iterations when structured output fails validation.
pub const STRUCTURED_OUTPUT_RETRIES: usize = 2;

/// Name of the synthetic handoff tool advertised for sub-agents.
pub const TRANSFER_TOOL_NAME: &str = "transfer_to_agent";

/// State-metadata key holding cumulative [`TokenUsage`] for the run.
pub const TOKEN_USAGE_KEY: &str = "token_usage";

/// State key holding the parsed structured output, when a schema is set.
pub const STRUCTURED_OUTPUT_KEY: &str = "structured_output";

/// A provider-backed agent with tools, sub-agents, and hooks.
pub struct LlmAgent {
    info: AgentInfo,
    provider: Arc<dyn Provider>,
    system_prompt: String,
    tools: ToolSet,
    sub_agents: SubAgentSet,
    hooks: HookDispatcher,
    events: Option<EventDispatcher>,
    options: GenerateOptions,
    max_iterations: usize,
    output_schema: Option<Value>,
    input_schema: Option<Value>,
    confirmation: Option<Arc<dyn ConfirmationPolicy>>,
}

impl LlmAgent {
    /// Create an agent with the mandatory identity and provider.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        provider: Arc<dyn Provider>,
    ) -> Self {
        Self {
            info: AgentInfo::new(id, name, "", AgentType::Llm),
            provider,
            system_prompt: String::new(),
            tools: ToolSet::new(),
            sub_agents: SubAgentSet::new(),
            hooks: HookDispatcher::new(),
            events: None,
            options: GenerateOptions::new(),
            max_iterations: DEFAULT_MAX_ITERATIONS,
            output_schema: None,
            input_schema: None,
            confirmation: None,
        }
    }

    /// Set the description surfaced in catalogues (builder pattern).
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.info.description = description.into();
        self
    }

    /// Set the system prompt (builder pattern).
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Grant access to a tool (builder pattern). Panics are avoided by
    /// ignoring duplicate names — the first registration wins.
    pub fn with_tool(self, tool: Arc<dyn Tool>) -> Self {
        if let Err(err) = self.tools.add_tool(tool) {
            log::warn!("tool not added: {}", err);
        }
        self
    }

    /// Share a tool registry with other agents (builder pattern).
    pub fn with_shared_tools(mut self, tools: ToolSet) -> Self {
        self.tools = tools;
        self
    }

    /// Attach a sub-agent, exposing it through `transfer_to_agent`
    /// (builder pattern).
    pub fn with_sub_agent(self, agent: Arc<dyn BaseAgent>) -> Self {
        self.sub_agents.add_sub_agent(agent);
        self
    }

    /// Attach a lifecycle hook (builder pattern).
    pub fn with_hook(mut self, hook: Arc<dyn AgentHook>) -> Self {
        self.hooks.add_hook(hook);
        self
    }

    /// Publish lifecycle and tool events to `bus` (builder pattern).
    pub fn with_event_bus(mut self, bus: EventDispatcher) -> Self {
        self.events = Some(bus);
        self
    }

    /// Override provider options (builder pattern).
    pub fn with_options(mut self, options: GenerateOptions) -> Self {
        self.options = options;
        self
    }

    /// Override the iteration cap (builder pattern).
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations.max(1);
        self
    }

    /// Require the final answer to validate against `schema`
    /// (builder pattern).
    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Declare the input schema used when this agent is bridged into a tool
    /// (builder pattern).
    pub fn with_input_schema(mut self, schema: Value) -> Self {
        self.input_schema = Some(schema);
        self
    }

    /// Inject the confirmation policy applied to gated tools
    /// (builder pattern).
    pub fn with_confirmation_policy(mut self, policy: Arc<dyn ConfirmationPolicy>) -> Self {
        self.confirmation = Some(policy);
        self
    }

    /// Toggle state sharing across handoffs.
    pub fn enable_shared_state(self, enabled: bool) -> Self {
        self.sub_agents.enable_shared_state(enabled);
        self
    }

    /// Configure which sections sub-agent runs inherit.
    pub fn configure_state_inheritance(self, values: bool, artifacts: bool, metadata: bool) -> Self {
        self.sub_agents.configure_state_inheritance(values, artifacts, metadata);
        self
    }

    /// The tool-holding mixin.
    pub fn tools(&self) -> &ToolSet {
        &self.tools
    }

    /// The sub-agent mixin.
    pub fn sub_agents(&self) -> &SubAgentSet {
        &self.sub_agents
    }

    /// The event bus, when one is attached.
    pub fn event_bus(&self) -> Option<&EventDispatcher> {
        self.events.as_ref()
    }

    // ---- catalogue & message assembly ----

    /// Catalogue advertised to the provider: every registered tool plus the
    /// synthetic handoff tool when sub-agents exist.
    fn tool_catalogue(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> =
            self.tools.list_tools().iter().map(|t| tool_spec(t.as_ref())).collect();
        let names = self.sub_agents.sub_agent_names();
        if !names.is_empty() {
            specs.push(
                ToolSpec::new(
                    TRANSFER_TOOL_NAME,
                    "Hand the conversation off to a specialized sub-agent.",
                )
                .with_parameters(json!({
                    "type": "object",
                    "properties": {
                        "target_agent": {"type": "string", "enum": names},
                        "note": {"type": "string"},
                        "payload": {"type": "object"}
                    },
                    "required": ["target_agent"]
                })),
            );
        }
        specs
    }

    /// Render the fallback tool-call protocol block embedded into the system
    /// prompt for providers without a native tool-call facility.
    fn fallback_protocol_block(specs: &[ToolSpec]) -> String {
        let mut block = String::from("\n\nYou have access to the following tools:\n");
        for spec in specs {
            block.push_str(&format!("- {}: {}\n", spec.name, spec.description));
            block.push_str(&format!("  Parameters (JSON schema): {}\n", spec.parameters));
            if let Some(instructions) = &spec.usage_instructions {
                block.push_str(&format!("  Usage: {}\n", instructions));
            }
            for example in &spec.examples {
                block.push_str(&format!("  Example: {}\n", example));
            }
        }
        block.push_str(
            "\nTo call a tool, reply with EXACTLY one JSON object of the form \
             {\"tool\": \"<name>\", \"params\": {...}} (or a JSON array of such \
             objects) and nothing else. Any other reply is treated as your \
             final answer.\n",
        );
        block
    }

    /// Build the initial conversation from the system prompt, the state's
    /// existing messages, and the seeded user input.
    fn assemble_messages(&self, state: &State, protocol_block: Option<&str>) -> Vec<Message> {
        let mut messages = Vec::new();

        let mut system = self.system_prompt.clone();
        if let Some(block) = protocol_block {
            system.push_str(block);
        }
        if !system.is_empty() {
            messages.push(Message::text(Role::System, system));
        }

        messages.extend(state.messages());

        if let Some(input) = state
            .get_str(keys::USER_INPUT)
            .or_else(|| state.get_str(keys::PROMPT))
        {
            let already_present = messages
                .iter()
                .any(|m| m.role == Role::User && m.text_content() == input);
            if !already_present {
                messages.push(Message::text(Role::User, input));
            }
        }

        messages
    }

    /// Strict fallback parser: the entire trimmed content must be one
    /// `{"tool", "params"}` object or an array of them. Anything else — a
    /// JSON value of another shape, prose, or malformed JSON — yields no
    /// calls and is treated as the final answer. Never partially parses.
    fn parse_fallback_calls(content: &str) -> Vec<ToolCallRequest> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Vec::new();
        }
        let value: Value = match serde_json::from_str(trimmed) {
            Ok(v) => v,
            Err(_) => return Vec::new(),
        };

        fn single(value: &Value) -> Option<ToolCallRequest> {
            let object = value.as_object()?;
            let name = object.get("tool")?.as_str()?;
            let params = object.get("params").cloned().unwrap_or_else(|| json!({}));
            Some(ToolCallRequest {
                name: name.to_string(),
                params,
            })
        }

        match &value {
            Value::Object(_) => single(&value).into_iter().collect(),
            Value::Array(items) => {
                let calls: Vec<_> = items.iter().filter_map(single).collect();
                if calls.len() == items.len() {
                    calls
                } else {
                    Vec::new()
                }
            }
            _ => Vec::new(),
        }
    }

    /// Compact single-line rendering of one tool outcome for the
    /// `Tool results:` feedback message.
    fn render_result_line(name: &str, result: &Result<ToolResult, ToolError>) -> String {
        match result {
            Ok(r) if r.success => format!("{}: {}", name, r.output),
            Ok(r) => format!(
                "{}: Error: {}",
                name,
                r.error.as_deref().unwrap_or("unknown error")
            ),
            Err(err) => format!("{}: Error: {}", name, err),
        }
    }

    /// Finish the run: write well-known keys, record usage, emit completion.
    async fn complete(
        &self,
        emitter: &EventEmitter,
        state: State,
        content: String,
        usage: &TokenUsage,
        iterations: usize,
    ) -> Result<State, AgentError> {
        state.set(keys::RESPONSE, Value::String(content.clone()));
        state.set(keys::OUTPUT, Value::String(content.clone()));
        state.add_message(Message::text(Role::Assistant, content.clone()));
        if usage.total_tokens > 0 {
            state.set_metadata(TOKEN_USAGE_KEY, json!(usage));
        }
        emitter
            .emit(
                EventType::AgentComplete,
                json!({
                    "iterations": iterations,
                    "output_preview": truncate_for_display(&content, DEFAULT_DISPLAY_CAP),
                }),
            )
            .await;
        log::info!(
            "agent '{}' complete after {} iteration(s)",
            self.info.name,
            iterations
        );
        Ok(state)
    }
}

#[async_trait]
impl BaseAgent for LlmAgent {
    fn info(&self) -> &AgentInfo {
        &self.info
    }

    fn input_schema(&self) -> Option<Value> {
        self.input_schema.clone()
    }

    async fn run(&self, cancel: &CancellationToken, state: State) -> Result<State, AgentError> {
        let run_id = Uuid::new_v4().to_string();
        let emitter = match &self.events {
            Some(bus) => EventEmitter::new(bus.clone(), self.info.clone(), run_id.clone()),
            None => EventEmitter::noop(self.info.clone(), run_id.clone()),
        };

        let specs = self.tool_catalogue();
        let native = self.provider.supports_native_tools();
        let protocol_block = if !native && !specs.is_empty() {
            Some(Self::fallback_protocol_block(&specs))
        } else {
            None
        };

        let mut options = self.options.clone();
        if native && !specs.is_empty() {
            options.tools = specs;
        }

        let mut messages = self.assemble_messages(&state, protocol_block.as_deref());

        emitter
            .emit(
                EventType::AgentStart,
                json!({"run_id": run_id, "messages": messages.len()}),
            )
            .await;

        let mut executor = ToolExecutor::new(Arc::clone(self.tools.registry()));
        if let Some(policy) = &self.confirmation {
            executor = executor.with_confirmation(Arc::clone(policy));
        }

        let mut usage_total = TokenUsage::default();
        let mut corrective_retries = 0usize;
        let mut iterations = 0usize;

        loop {
            if iterations >= self.max_iterations {
                let err = AgentError::IterationLimit {
                    iterations,
                    partial: Box::new(state),
                };
                emitter.emit_error(&err).await;
                return Err(err);
            }
            iterations += 1;

            if cancel.is_cancelled() {
                emitter.emit_error("run cancelled").await;
                return Err(AgentError::Cancelled {
                    partial: Some(Box::new(state)),
                });
            }

            self.hooks.before_generate(&messages).await;
            emitter
                .emit(
                    EventType::GenerationBefore,
                    json!({"iteration": iterations, "messages": messages.len()}),
                )
                .await;

            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    emitter.emit_error("run cancelled").await;
                    return Err(AgentError::Cancelled { partial: Some(Box::new(state)) });
                }
                r = self.provider.generate_message(cancel, &messages, &options) => r,
            };

            self.hooks.after_generate(&result).await;
            emitter
                .emit(
                    EventType::GenerationAfter,
                    json!({
                        "iteration": iterations,
                        "ok": result.is_ok(),
                    }),
                )
                .await;

            let response = match result {
                Ok(response) => response,
                Err(err) => {
                    emitter.emit_error(&err).await;
                    return Err(err.into());
                }
            };

            if let Some(usage) = &response.usage {
                usage_total.add(usage);
            }

            let content = response.content_text();
            let calls = if !response.tool_calls.is_empty() {
                response.tool_calls.clone()
            } else {
                Self::parse_fallback_calls(&content)
            };

            if calls.is_empty() {
                // Final answer. Structured output gets validated first.
                if let Some(schema_value) = &self.output_schema {
                    let violations = match serde_json::from_str::<Value>(content.trim()) {
                        Ok(parsed) => {
                            let violations = schema::validate(schema_value, &parsed);
                            if violations.is_empty() {
                                state.set(STRUCTURED_OUTPUT_KEY, parsed);
                            }
                            violations
                        }
                        Err(err) => vec![format!("not valid JSON: {}", err)],
                    };

                    if !violations.is_empty() {
                        if corrective_retries < STRUCTURED_OUTPUT_RETRIES {
                            corrective_retries += 1;
                            log::debug!(
                                "structured output invalid ({}), corrective retry {}/{}",
                                violations.join(", "),
                                corrective_retries,
                                STRUCTURED_OUTPUT_RETRIES
                            );
                            messages.push(Message::text(Role::Assistant, content.clone()));
                            messages.push(Message::text(
                                Role::User,
                                format!(
                                    "Your reply must be a single JSON object matching this \
                                     schema: {}. Violations: {}. Reply with ONLY the \
                                     corrected JSON.",
                                    schema_value,
                                    violations.join("; ")
                                ),
                            ));
                            continue;
                        }
                        let err = AgentError::SchemaValidation(violations.join("; "));
                        emitter.emit_error(&err).await;
                        return Err(err);
                    }
                }
                return self
                    .complete(&emitter, state, content, &usage_total, iterations)
                    .await;
            }

            // Record the assistant turn that requested the calls, then
            // dispatch them in provider order.
            let assistant_turn = if content.is_empty() {
                serde_json::to_string(
                    &calls
                        .iter()
                        .map(|c| json!({"tool": c.name, "params": c.params}))
                        .collect::<Vec<_>>(),
                )
                .unwrap_or_default()
            } else {
                content.clone()
            };
            messages.push(Message::text(Role::Assistant, assistant_turn));
            if let Some(last) = messages.last() {
                emitter.emit_message("received", last).await;
            }

            let mut lines = Vec::with_capacity(calls.len());
            for call in &calls {
                if cancel.is_cancelled() {
                    emitter.emit_error("run cancelled").await;
                    return Err(AgentError::Cancelled {
                        partial: Some(Box::new(state)),
                    });
                }

                if call.name == TRANSFER_TOOL_NAME && !self.sub_agents.is_empty() {
                    lines.push(self.dispatch_handoff(cancel, &state, call).await?);
                    continue;
                }

                if self.tools.get_tool(&call.name).is_none() {
                    log::warn!("unknown tool requested: {}", call.name);
                    lines.push(format!("Error: unknown tool {}", call.name));
                    continue;
                }

                self.hooks.before_tool_call(&call.name, &call.params).await;
                let tool_ctx = ToolContext::new(
                    cancel.clone(),
                    state.reader(),
                    emitter.clone(),
                    self.info.clone(),
                    run_id.clone(),
                );
                let result = executor.execute(&tool_ctx, &call.name, call.params.clone()).await;
                self.hooks.after_tool_call(&call.name, &result).await;

                if matches!(result, Err(ToolError::Cancelled)) {
                    emitter.emit_error("run cancelled").await;
                    return Err(AgentError::Cancelled {
                        partial: Some(Box::new(state)),
                    });
                }
                lines.push(Self::render_result_line(&call.name, &result));
            }

            // The `Tool results:` prefix keeps the next fallback parse from
            // mistaking this feedback for a tool call.
            let feedback = format!("Tool results:\n{}", lines.join("\n"));
            messages.push(Message::text(Role::User, feedback));
        }
    }
}

impl LlmAgent {
    /// Execute a `transfer_to_agent` call and merge the sub-agent's result
    /// state into the current run.
    async fn dispatch_handoff(
        &self,
        cancel: &CancellationToken,
        state: &State,
        call: &ToolCallRequest,
    ) -> Result<String, AgentError> {
        let target = match call.params.get("target_agent").and_then(Value::as_str) {
            Some(t) => t.to_string(),
            None => {
                return Ok(format!(
                    "{}: Error: missing target_agent parameter",
                    TRANSFER_TOOL_NAME
                ))
            }
        };
        let note = call
            .params
            .get("note")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let payload = call.params.get("payload").cloned().unwrap_or_else(|| json!({}));

        self.hooks.before_tool_call(TRANSFER_TOOL_NAME, &call.params).await;
        let outcome = self
            .sub_agents
            .transfer_to(cancel, state, &target, &note, payload)
            .await;

        match outcome {
            Ok(child_state) => {
                state.merge_from(&child_state, &self.sub_agents.inheritance());
                let rendered = child_state.values_as_object();
                let result = Ok(ToolResult::success(rendered.clone()));
                self.hooks.after_tool_call(TRANSFER_TOOL_NAME, &result).await;
                Ok(format!("{}: {}", TRANSFER_TOOL_NAME, rendered))
            }
            Err(AgentError::Cancelled { partial }) => {
                Err(AgentError::Cancelled { partial })
            }
            Err(err) => {
                let result: Result<ToolResult, ToolError> =
                    Err(ToolError::ExecutionFailed(err.to_string()));
                self.hooks.after_tool_call(TRANSFER_TOOL_NAME, &result).await;
                log::warn!("handoff to '{}' failed: {}", target, err);
                Ok(format!("{}: Error: {}", TRANSFER_TOOL_NAME, err))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_parser_accepts_single_object() {
        let calls = LlmAgent::parse_fallback_calls(
            r#"{"tool": "calculator", "params": {"operation": "add"}}"#,
        );
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "calculator");
        assert_eq!(calls[0].params["operation"], "add");
    }

    #[test]
    fn fallback_parser_accepts_array() {
        let calls = LlmAgent::parse_fallback_calls(
            r#"[{"tool": "a", "params": {}}, {"tool": "b", "params": {"x": 1}}]"#,
        );
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].name, "b");
    }

    #[test]
    fn fallback_parser_rejects_prose_and_partial_json() {
        assert!(LlmAgent::parse_fallback_calls("The answer is 4.").is_empty());
        assert!(LlmAgent::parse_fallback_calls(r#"{"tool": "a""#).is_empty());
        // Mixed arrays are rejected wholesale, never partially parsed.
        assert!(LlmAgent::parse_fallback_calls(
            r#"[{"tool": "a", "params": {}}, {"note": "not a call"}]"#
        )
        .is_empty());
        // JSON of the wrong shape is a final answer.
        assert!(LlmAgent::parse_fallback_calls(r#"{"answer": 42}"#).is_empty());
        assert!(LlmAgent::parse_fallback_calls("42").is_empty());
    }

    #[test]
    fn fallback_parser_defaults_missing_params() {
        let calls = LlmAgent::parse_fallback_calls(r#"{"tool": "ping"}"#);
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].params, json!({}));
    }

    #[test]
    fn result_lines_render_all_outcomes() {
        let ok = LlmAgent::render_result_line("calc", &Ok(ToolResult::success(json!({"r": 1}))));
        assert_eq!(ok, r#"calc: {"r":1}"#);

        let soft = LlmAgent::render_result_line("calc", &Ok(ToolResult::failure("division by zero")));
        assert!(soft.contains("Error: division by zero"));

        let hard =
            LlmAgent::render_result_line("calc", &Err(ToolError::NotFound("calc".into())));
        assert!(hard.contains("Error: tool not found"));
    }
}
