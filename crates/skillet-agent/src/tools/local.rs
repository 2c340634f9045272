//! LocalTool trait — the interface for in-process tools.
//!
//! Local tools are registered on the agent at construction time and run in
//! the worker runtime, side by side with MCP tools.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;

// ─────────────────────────────────────────────
// LocalTool trait
// ─────────────────────────────────────────────

/// Every in-process tool implements this trait.
///
/// The manager advertises tools via `parameters()` and dispatches calls via
/// `execute()`. Results may be any JSON value; strings pass through to the
/// model verbatim, `null` becomes empty, everything else is serialized.
#[async_trait]
pub trait LocalTool: Send + Sync {
    /// Unique name used by the model to call this tool.
    fn name(&self) -> &str;

    /// Human-readable description shown to the model.
    fn description(&self) -> &str;

    /// JSON Schema describing the parameters.
    ///
    /// Must be `{"type": "object", "properties": {...}, "required": [...]}`.
    fn parameters(&self) -> Value;

    /// Execute the tool with the given arguments.
    ///
    /// On failure, return an `Err` — the manager catches it and converts it
    /// to an error string for the model.
    async fn execute(&self, params: HashMap<String, Value>) -> anyhow::Result<Value>;
}
