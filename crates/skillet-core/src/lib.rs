//! Skillet core — shared types and agent repository loading.
//!
//! This crate contains:
//! - **types**: chat messages, tool calls, completions, and streaming deltas
//! - **config**: typed schema and loader for the on-disk agent repository
//!   (`config.yaml`, `AGENTS.md`, `skills/`, `tools/mcp/`)

pub mod config;
pub mod error;
pub mod types;

pub use config::{load_agent, AgentConfig};
pub use config::schema::{LlmSettings, McpServerConfig, McpTransport, RetryPolicy, SkillMetadata};
pub use error::ConfigError;
pub use types::{
    AgentResponse, Completion, CompletionDelta, Message, StreamEvent, ToolCall, ToolCallDelta,
    ToolDefinition, ToolDescriptor, ToolSource,
};
