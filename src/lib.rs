// src/lib.rs

//! # agentflow
//!
//! A toolkit for composing LLM agents, tools, and shared state into
//! executable workflows.
//!
//! - [`state`](agentflow::state) — thread-safe values/artifacts/messages/metadata container
//! - [`event`](agentflow::event) / [`recorder`](agentflow::recorder) — in-process event bus with recording and analysis
//! - [`registry`](agentflow::registry) / [`tool`](agentflow::tool) — metadata-rich component registry and the tool contract
//! - [`agent`](agentflow::agent) / [`llm_agent`](agentflow::llm_agent) — the base agent contract and the provider loop
//! - [`workflow`](agentflow::workflow) — sequential, parallel, and conditional composition
//! - [`bridge`](agentflow::bridge) / [`mappers`](agentflow::mappers) — agents as tools, tools as agents

// The top-level `agentflow` module.
pub mod agentflow;

// Re-export the module tree and key types at the crate root for ergonomic
// paths (`agentflow::State`, `agentflow::workflow::SequentialAgent`, ...).
pub use agentflow::{
    agent, bridge, event, hooks, llm_agent, mappers, message, provider, recorder, registry,
    schema, state, tool, tools, workflow,
};
pub use agentflow::{
    AgentError, AgentInfo, AgentType, BaseAgent, ContentPart, Event, EventDispatcher,
    EventEmitter, EventHandler, EventType, GenerateOptions, LlmAgent, Message, Provider,
    ProviderResponse, Role, State, StateReader, TokenUsage, Tool, ToolContext, ToolRegistry,
    ToolResult,
};
