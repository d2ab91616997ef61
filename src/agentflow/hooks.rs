//! Lifecycle hooks for the agent loop.
//!
//! An [`AgentHook`] is called at four fixed points of every LLM-agent
//! iteration: before/after each provider round-trip and before/after each
//! tool call. Hooks are a side channel — they observe, they never alter the
//! loop's behavior.
//!
//! Two stock hooks ship with the crate: [`LoggingHook`] mirrors the loop
//! onto the `log` facade, and [`MetricsHook`] keeps atomic counters.

use crate::agentflow::message::Message;
use crate::agentflow::provider::{ProviderError, ProviderResponse};
use crate::agentflow::tool::{ToolError, ToolResult};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Display cap applied when echoing payloads into logs (bytes).
pub const DEFAULT_DISPLAY_CAP: usize = 200;

/// Truncate `text` to `cap` bytes on a char boundary, marking the cut.
///
/// Only the logged rendering is truncated — full payloads stay in the state
/// for structured consumers.
pub fn truncate_for_display(text: &str, cap: usize) -> String {
    if text.len() <= cap {
        return text.to_string();
    }
    let mut end = cap;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}… [{} bytes total]", &text[..end], text.len())
}

/// Callback surface invoked by the LLM agent loop.
///
/// All methods default to no-ops; implement only what you need.
#[async_trait]
pub trait AgentHook: Send + Sync {
    /// Called before each provider round-trip with the outgoing messages.
    async fn before_generate(&self, _messages: &[Message]) {}

    /// Called after each provider round-trip with the outcome.
    async fn after_generate(&self, _result: &Result<ProviderResponse, ProviderError>) {}

    /// Called before each tool invocation.
    async fn before_tool_call(&self, _tool_name: &str, _params: &Value) {}

    /// Called after each tool invocation with the outcome.
    async fn after_tool_call(&self, _tool_name: &str, _result: &Result<ToolResult, ToolError>) {}
}

/// Invokes a set of hooks in registration order.
#[derive(Clone, Default)]
pub struct HookDispatcher {
    hooks: Vec<Arc<dyn AgentHook>>,
}

impl HookDispatcher {
    /// Empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a hook (builder pattern).
    pub fn with_hook(mut self, hook: Arc<dyn AgentHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Append a hook in place.
    pub fn add_hook(&mut self, hook: Arc<dyn AgentHook>) {
        self.hooks.push(hook);
    }

    /// Number of registered hooks.
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// `true` when no hooks are registered.
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    pub async fn before_generate(&self, messages: &[Message]) {
        for hook in &self.hooks {
            hook.before_generate(messages).await;
        }
    }

    pub async fn after_generate(&self, result: &Result<ProviderResponse, ProviderError>) {
        for hook in &self.hooks {
            hook.after_generate(result).await;
        }
    }

    pub async fn before_tool_call(&self, tool_name: &str, params: &Value) {
        for hook in &self.hooks {
            hook.before_tool_call(tool_name, params).await;
        }
    }

    pub async fn after_tool_call(&self, tool_name: &str, result: &Result<ToolResult, ToolError>) {
        for hook in &self.hooks {
            hook.after_tool_call(tool_name, result).await;
        }
    }
}

/// Hook that mirrors the loop onto the `log` facade.
pub struct LoggingHook {
    display_cap: usize,
}

impl LoggingHook {
    pub fn new() -> Self {
        Self {
            display_cap: DEFAULT_DISPLAY_CAP,
        }
    }

    /// Override the per-payload display cap (builder pattern).
    pub fn with_display_cap(mut self, cap: usize) -> Self {
        self.display_cap = cap;
        self
    }
}

impl Default for LoggingHook {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentHook for LoggingHook {
    async fn before_generate(&self, messages: &[Message]) {
        log::debug!("generation starting ({} messages)", messages.len());
    }

    async fn after_generate(&self, result: &Result<ProviderResponse, ProviderError>) {
        match result {
            Ok(response) => log::debug!(
                "generation done: {} tool calls, content: {}",
                response.tool_calls.len(),
                truncate_for_display(&response.content_text(), self.display_cap)
            ),
            Err(err) => log::error!("generation failed: {}", err),
        }
    }

    async fn before_tool_call(&self, tool_name: &str, params: &Value) {
        log::info!(
            "tool call: {} {}",
            tool_name,
            truncate_for_display(&params.to_string(), self.display_cap)
        );
    }

    async fn after_tool_call(&self, tool_name: &str, result: &Result<ToolResult, ToolError>) {
        match result {
            Ok(result) if result.success => log::info!(
                "tool {} ok: {}",
                tool_name,
                truncate_for_display(&result.output.to_string(), self.display_cap)
            ),
            Ok(result) => log::warn!(
                "tool {} reported failure: {}",
                tool_name,
                result.error.as_deref().unwrap_or("unknown")
            ),
            Err(err) => log::error!("tool {} failed: {}", tool_name, err),
        }
    }
}

/// Point-in-time snapshot of a [`MetricsHook`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub generations: usize,
    pub tool_calls: usize,
    pub errors: usize,
}

/// Hook keeping atomic counters for generations, tool calls, and errors.
#[derive(Default)]
pub struct MetricsHook {
    generations: AtomicUsize,
    tool_calls: AtomicUsize,
    errors: AtomicUsize,
}

impl MetricsHook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the current counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            generations: self.generations.load(Ordering::Relaxed),
            tool_calls: self.tool_calls.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl AgentHook for MetricsHook {
    async fn after_generate(&self, result: &Result<ProviderResponse, ProviderError>) {
        self.generations.fetch_add(1, Ordering::Relaxed);
        if result.is_err() {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    async fn after_tool_call(&self, _tool_name: &str, result: &Result<ToolResult, ToolError>) {
        self.tool_calls.fetch_add(1, Ordering::Relaxed);
        let failed = match result {
            Ok(r) => !r.success,
            Err(_) => true,
        };
        if failed {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}
