//! Agent↔tool bridge integration tests.

use agentflow::agent::{AgentError, AgentInfo, AgentType, BaseAgent};
use agentflow::bridge::{AgentTool, ToolAgent};
use agentflow::llm_agent::LlmAgent;
use agentflow::mappers::PathMapper;
use agentflow::message::Message;
use agentflow::provider::{GenerateOptions, Provider, ProviderError, ProviderResponse};
use agentflow::state::State;
use agentflow::tools::CalculatorTool;
use agentflow::workflow::{SequentialAgent, WorkflowStep};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

/// Deterministic "summarizer" used as the wrapped agent.
struct Summarizer {
    info: AgentInfo,
}

impl Summarizer {
    fn new() -> Arc<dyn BaseAgent> {
        Arc::new(Self {
            info: AgentInfo::new("summarizer", "summarizer", "Summarizes text", AgentType::Custom),
        })
    }
}

#[async_trait]
impl BaseAgent for Summarizer {
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

    async fn run(&self, _cancel: &CancellationToken, state: State) -> Result<State, AgentError> {
        let text = state.get_str("text").unwrap_or_default();
        let summary: String = text.split_whitespace().take(3).collect::<Vec<_>>().join(" ");
        state.set("summary", json!(summary));
        Ok(state)
    }
}

struct ScriptedProvider {
    responses: Mutex<VecDeque<ProviderResponse>>,
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn supports_native_tools(&self) -> bool {
        false
    }

    async fn generate_message(
        &self,
        _cancel: &CancellationToken,
        _messages: &[Message],
        _options: &GenerateOptions,
    ) -> Result<ProviderResponse, ProviderError> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::Api("script exhausted".into()))
    }
}

#[tokio::test]
async fn llm_agent_invokes_agent_as_tool() {
    // The LLM agent calls the wrapped summarizer through the normal
    // tool-call channel.
    let provider = Arc::new(ScriptedProvider {
        responses: Mutex::new(
            vec![
                ProviderResponse::text(
                    r#"{"tool": "summarizer", "params": {"text": "one two three four five"}}"#,
                ),
                ProviderResponse::text("Summary produced."),
            ]
            .into(),
        ),
    });

    let agent = LlmAgent::new("writer", "Writer", provider)
        .with_tool(Arc::new(AgentTool::new(Summarizer::new())));

    let out = agent
        .run(&CancellationToken::new(), State::with_user_input("summarize this"))
        .await
        .unwrap();
    assert_eq!(out.get_str("response").as_deref(), Some("Summary produced."));
}

#[tokio::test]
async fn tool_agent_runs_as_workflow_step() {
    // calculator → tool-as-agent → sequential step.
    let calculator_agent = ToolAgent::new(Arc::new(CalculatorTool::new()));

    let pipeline = SequentialAgent::new("p", "p")
        .with_step(WorkflowStep::func("seed", |_c, s| async move {
            s.set(
                "input",
                json!({"operation": "add", "operand1": 2, "operand2": 3}),
            );
            Ok(s)
        }))
        .with_step(WorkflowStep::agent(Arc::new(calculator_agent)));

    let out = pipeline
        .run(&CancellationToken::new(), State::new())
        .await
        .unwrap();

    assert_eq!(out.get("output").unwrap()["result"].as_f64().unwrap(), 5.0);
    // Named result keys are copied to the top level too.
    assert_eq!(out.get("result").unwrap().as_f64().unwrap(), 5.0);
}

#[tokio::test]
async fn path_mapper_narrows_tool_result() {
    use agentflow::event::EventEmitter;
    use agentflow::tool::{Tool, ToolContext};

    let tool = AgentTool::new(Summarizer::new())
        .with_result_mapper(Arc::new(PathMapper::new("summary")));

    let info = AgentInfo::new("caller", "Caller", "", AgentType::Custom);
    let state = State::new();
    let ctx = ToolContext::new(
        CancellationToken::new(),
        state.reader(),
        EventEmitter::noop(info.clone(), "r"),
        info,
        "r",
    );

    let result = tool
        .execute(&ctx, json!({"text": "alpha beta gamma delta"}))
        .await
        .unwrap();
    // The mapper extracted just the summary value.
    assert_eq!(result.output, json!("alpha beta gamma"));
}

#[tokio::test]
async fn bridged_round_trip_matches_direct_run() {
    let direct_state = State::new();
    direct_state.set("text", json!("a b c d"));
    let direct = Summarizer::new()
        .run(&CancellationToken::new(), direct_state)
        .await
        .unwrap();

    let round_tripped = ToolAgent::new(Arc::new(AgentTool::new(Summarizer::new())));
    let bridged_state = State::new();
    bridged_state.set("input", json!({"text": "a b c d"}));
    let bridged = round_tripped
        .run(&CancellationToken::new(), bridged_state)
        .await
        .unwrap();

    assert_eq!(direct.get("summary"), bridged.get("summary"));
}
