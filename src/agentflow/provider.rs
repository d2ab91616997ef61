//! LLM provider abstraction.
//!
//! The [`Provider`] trait is the only required external collaborator of the
//! agent loop. Concrete HTTP clients (OpenAI, Anthropic, Gemini, local
//! runtimes) live outside this crate; agents only depend on the chat
//! interface defined here.
//!
//! Three operations are defined:
//!
//! - [`generate`](Provider::generate) — one-shot prompt-in/text-out
//! - [`generate_message`](Provider::generate_message) — the canonical path:
//!   full message history in, structured response (content parts, native
//!   tool-call requests, token usage) out
//! - [`stream_message`](Provider::stream_message) — optional streaming
//!   variant yielding text deltas; the agent loop accumulates deltas before
//!   applying its iteration logic
//!
//! Every call receives the caller's [`CancellationToken`] and must honor it.

use crate::agentflow::message::{ContentPart, Message, TokenUsage};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use serde_json::Value;
use std::error::Error;
use std::fmt;
use tokio_util::sync::CancellationToken;

/// Errors surfaced by provider calls.
///
/// The variants mirror the error taxonomy the agent loop cares about:
/// transient failures (rate limits, network) may be retried by the caller,
/// everything else is surfaced upward.
#[derive(Debug, Clone)]
pub enum ProviderError {
    /// Rate limited by the upstream service; retry later.
    RateLimited(String),
    /// Transport-level failure (timeout, connection reset, HTTP 5xx).
    Network(String),
    /// The provider rejected the request (bad model, invalid payload).
    Api(String),
    /// The provider does not implement the requested operation.
    Unsupported(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::RateLimited(msg) => write!(f, "provider rate limited: {}", msg),
            ProviderError::Network(msg) => write!(f, "provider network error: {}", msg),
            ProviderError::Api(msg) => write!(f, "provider API error: {}", msg),
            ProviderError::Unsupported(msg) => write!(f, "provider unsupported: {}", msg),
        }
    }
}

impl Error for ProviderError {}

impl ProviderError {
    /// `true` for failures a caller-configured retry policy may retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::RateLimited(_) | ProviderError::Network(_))
    }
}

/// A tool advertised to the provider's native tool-call facility.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    /// JSON schema of the tool's parameters.
    pub parameters: Value,
    /// Optional LLM-facing usage instructions.
    pub usage_instructions: Option<String>,
    /// Example invocations (JSON objects).
    pub examples: Vec<Value>,
}

impl ToolSpec {
    /// Build a spec with an open-object parameter schema.
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: serde_json::json!({"type": "object", "properties": {}}),
            usage_instructions: None,
            examples: Vec::new(),
        }
    }

    /// Replace the parameter schema (builder pattern).
    pub fn with_parameters(mut self, schema: Value) -> Self {
        self.parameters = schema;
        self
    }

    /// Attach usage instructions (builder pattern).
    pub fn with_usage_instructions(mut self, text: impl Into<String>) -> Self {
        self.usage_instructions = Some(text.into());
        self
    }

    /// Append an example invocation (builder pattern).
    pub fn with_example(mut self, example: Value) -> Self {
        self.examples.push(example);
        self
    }
}

/// Options forwarded to a provider call.
///
/// # Example
///
/// ```rust
/// use agentflow::provider::GenerateOptions;
///
/// let opts = GenerateOptions::new()
///     .with_max_tokens(4096)
///     .with_temperature(0.2);
/// assert_eq!(opts.max_tokens, Some(4096));
/// ```
#[derive(Debug, Clone, Default)]
pub struct GenerateOptions {
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    /// Tool catalogue for providers with a native tool-call facility.
    pub tools: Vec<ToolSpec>,
}

impl GenerateOptions {
    /// Empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap the response token count (builder pattern).
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the sampling temperature (builder pattern).
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Advertise a tool catalogue (builder pattern).
    pub fn with_tools(mut self, tools: Vec<ToolSpec>) -> Self {
        self.tools = tools;
        self
    }
}

/// A tool invocation requested by the provider through its native facility.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub name: String,
    pub params: Value,
}

/// Structured response from [`Provider::generate_message`].
#[derive(Debug, Clone, Default)]
pub struct ProviderResponse {
    /// Ordered response content.
    pub content: Vec<ContentPart>,
    /// Native tool-call requests, in the order the model produced them.
    pub tool_calls: Vec<ToolCallRequest>,
    /// Token accounting for this round-trip, when reported.
    pub usage: Option<TokenUsage>,
}

impl ProviderResponse {
    /// Build a plain-text response.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentPart::text(text)],
            tool_calls: Vec::new(),
            usage: None,
        }
    }

    /// Build a response consisting only of native tool calls.
    pub fn from_tool_calls(calls: Vec<ToolCallRequest>) -> Self {
        Self {
            content: Vec::new(),
            tool_calls: calls,
            usage: None,
        }
    }

    /// Attach token usage (builder pattern).
    pub fn with_usage(mut self, usage: TokenUsage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Concatenated text of all text content parts.
    pub fn content_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|p| match p {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }
}

/// One delta of a streamed response.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamChunk {
    pub text: String,
    pub is_final: bool,
}

/// Chat-completion interface implemented by LLM backends.
///
/// Implementations must be cheap to share (`Arc<dyn Provider>`) and honor
/// the cancellation token on every call.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Identifier used in logs and events (e.g. `"openai"`, `"mock"`).
    fn name(&self) -> &str;

    /// Whether this backend has a native tool-call facility.
    ///
    /// When `false`, agents advertise tools through a system-prompt-embedded
    /// JSON protocol instead of [`GenerateOptions::tools`].
    fn supports_native_tools(&self) -> bool {
        true
    }

    /// Canonical chat path: messages in, structured response out.
    async fn generate_message(
        &self,
        cancel: &CancellationToken,
        messages: &[Message],
        options: &GenerateOptions,
    ) -> Result<ProviderResponse, ProviderError>;

    /// One-shot convenience path. Defaults to wrapping the prompt in a
    /// single user message and returning the response text.
    async fn generate(
        &self,
        cancel: &CancellationToken,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<String, ProviderError> {
        let messages = [Message::text(crate::agentflow::message::Role::User, prompt)];
        let response = self.generate_message(cancel, &messages, options).await?;
        Ok(response.content_text())
    }

    /// Optional streaming path yielding text deltas. Providers without
    /// streaming support keep the default, which reports `Unsupported`.
    async fn stream_message(
        &self,
        _cancel: &CancellationToken,
        _messages: &[Message],
        _options: &GenerateOptions,
    ) -> Result<BoxStream<'static, StreamChunk>, ProviderError> {
        Err(ProviderError::Unsupported(format!(
            "provider '{}' does not support streaming",
            self.name()
        )))
    }
}
