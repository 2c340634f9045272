//! Tool manager — one catalog over MCP servers and local tools.
//!
//! Connecting is sequential and forgiving: a server that fails to start is
//! logged and skipped so the agent can still run with whatever tools remain.
//! Invocation is strict about never surfacing an `Err` to the loop; the
//! model always receives a string, error or not.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::Context;
use regex::Regex;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use skillet_core::config::schema::{McpServerConfig, McpTransport, RetryPolicy};
use skillet_core::types::{ToolDefinition, ToolDescriptor, ToolSource};
use skillet_mcp::McpSession;

use super::local::LocalTool;

// ─────────────────────────────────────────────
// ToolManager
// ─────────────────────────────────────────────

/// Owns MCP sessions and local tools, and dispatches calls by name.
pub struct ToolManager {
    servers: Vec<McpServerConfig>,
    /// Free-form config vars for `${config.*}` placeholders.
    vars: Value,
    retry: RetryPolicy,
    sessions: HashMap<String, Mutex<McpSession>>,
    /// Remote tool name → owning server name.
    remote_tools: HashMap<String, String>,
    local_tools: HashMap<String, Arc<dyn LocalTool>>,
    catalog: Vec<ToolDescriptor>,
    initialized: bool,
}

impl ToolManager {
    pub fn new(servers: Vec<McpServerConfig>, vars: Value, retry: RetryPolicy) -> Self {
        Self {
            servers,
            vars,
            retry,
            sessions: HashMap::new(),
            remote_tools: HashMap::new(),
            local_tools: HashMap::new(),
            catalog: Vec::new(),
            initialized: false,
        }
    }

    /// Register an in-process tool. Must happen before `initialize`.
    pub fn register_local(&mut self, tool: Arc<dyn LocalTool>) {
        debug!(tool = tool.name(), "registered local tool");
        self.local_tools.insert(tool.name().to_string(), tool);
    }

    /// Connect every configured MCP server and build the catalog. Idempotent.
    pub async fn initialize(&mut self) {
        if self.initialized {
            return;
        }
        debug!(servers = self.servers.len(), "initializing tool manager");

        // Sequential on purpose: stdio servers share the parent's terminal
        // and spawning them concurrently interleaves their startup output.
        let servers = self.servers.clone();
        for config in &servers {
            if let Err(e) = self.connect_server(config).await {
                warn!(server = %config.name, error = %e, "Failed to connect to MCP server");
            }
        }

        for tool in self.local_tools.values() {
            self.catalog.push(ToolDescriptor {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
                source: ToolSource::Local,
            });
        }

        // On a name clash the last registration wins.
        let mut by_name: HashMap<String, ToolDescriptor> = HashMap::new();
        for descriptor in self.catalog.drain(..) {
            if let Some(shadowed) = by_name.insert(descriptor.name.clone(), descriptor) {
                warn!(tool = %shadowed.name, source = %shadowed.source, "tool shadowed by a later registration");
            }
        }
        self.catalog.extend(by_name.into_values());
        self.catalog.sort_by(|a, b| a.name.cmp(&b.name));

        debug!(tools = self.catalog.len(), "tool manager initialized");
        self.initialized = true;
    }

    async fn connect_server(&mut self, config: &McpServerConfig) -> anyhow::Result<()> {
        let mut session = match config.transport {
            McpTransport::Stdio => {
                let command = config.command.as_deref().with_context(|| {
                    format!("stdio transport requires 'command': {}", config.name)
                })?;
                let args: Vec<String> = config
                    .args
                    .iter()
                    .map(|arg| resolve_placeholders(arg, &self.vars))
                    .collect();
                let env: BTreeMap<String, String> = config
                    .env
                    .iter()
                    .map(|(k, v)| (k.clone(), resolve_placeholders(v, &self.vars)))
                    .collect();
                McpSession::connect_stdio(command, &args, &env).await?
            }
            McpTransport::Http => {
                let url = config
                    .url
                    .as_deref()
                    .with_context(|| format!("HTTP transport requires 'url': {}", config.name))?;
                let headers: BTreeMap<String, String> = config
                    .headers
                    .iter()
                    .map(|(k, v)| (k.clone(), resolve_placeholders(v, &self.vars)))
                    .collect();
                McpSession::connect_http(url, &headers).await?
            }
        };

        let tools = session.list_tools().await?;
        debug!(server = %config.name, tools = tools.len(), "discovered MCP tools");
        for tool in tools {
            self.remote_tools.insert(tool.name.clone(), config.name.clone());
            self.catalog.push(ToolDescriptor {
                name: tool.name,
                description: tool.description,
                parameters: sanitize_schema(tool.input_schema),
                source: ToolSource::Remote {
                    server: config.name.clone(),
                },
            });
        }
        self.sessions.insert(config.name.clone(), Mutex::new(session));
        Ok(())
    }

    // ────────────── Catalog ──────────────

    /// Model-facing definitions for the whole catalog, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.catalog.iter().map(ToolDescriptor::to_definition).collect()
    }

    /// Definitions restricted to the given names, preserving catalog order.
    pub fn definitions_for(&self, names: &BTreeSet<String>) -> Vec<ToolDefinition> {
        self.catalog
            .iter()
            .filter(|d| names.contains(&d.name))
            .map(ToolDescriptor::to_definition)
            .collect()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.catalog.iter().map(|d| d.name.clone()).collect()
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.catalog.iter().any(|d| d.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.catalog.is_empty()
    }

    // ────────────── Invocation ──────────────

    /// Call a tool with per-attempt timeout and exponential backoff.
    ///
    /// Always returns a string for the model; exhausted retries produce
    /// `Error: Tool '...' failed after N attempts: <last error>`.
    pub async fn call_tool(&self, name: &str, arguments: HashMap<String, Value>) -> String {
        debug!(tool = name, "calling tool");
        let timeout = Duration::from_secs(self.retry.timeout_secs);
        let max_retries = self.retry.max_retries.max(1);
        let mut last_error = String::new();

        for attempt in 0..max_retries {
            match tokio::time::timeout(timeout, self.call_impl(name, &arguments)).await {
                Ok(Ok(result)) => return result,
                Ok(Err(e)) => {
                    last_error = e.to_string();
                    warn!(
                        tool = name,
                        attempt = attempt + 1,
                        max_retries,
                        error = %last_error,
                        "tool call failed"
                    );
                }
                Err(_) => {
                    last_error =
                        format!("Tool '{name}' timed out after {}s", self.retry.timeout_secs);
                    warn!(tool = name, attempt = attempt + 1, max_retries, "tool call timed out");
                }
            }
            if attempt + 1 < max_retries {
                let backoff =
                    Duration::from_secs_f64(self.retry.backoff_secs * 2f64.powi(attempt as i32));
                debug!(tool = name, backoff_ms = backoff.as_millis() as u64, "retrying tool");
                tokio::time::sleep(backoff).await;
            }
        }

        format!("Error: Tool '{name}' failed after {max_retries} attempts: {last_error}")
    }

    async fn call_impl(
        &self,
        name: &str,
        arguments: &HashMap<String, Value>,
    ) -> anyhow::Result<String> {
        if let Some(server) = self.remote_tools.get(name) {
            let session = self
                .sessions
                .get(server)
                .with_context(|| format!("MCP server '{server}' not connected"))?;
            return session
                .lock()
                .await
                .call_tool(name, serde_json::to_value(arguments)?)
                .await;
        }

        if let Some(tool) = self.local_tools.get(name) {
            let result = tool.execute(arguments.clone()).await?;
            return Ok(match result {
                Value::Null => String::new(),
                Value::String(text) => text,
                other => other.to_string(),
            });
        }

        anyhow::bail!("Unknown tool '{name}'")
    }
}

// ─────────────────────────────────────────────
// Schema sanitization
// ─────────────────────────────────────────────

/// Recursively fix schemas that OpenAI-style function calling rejects.
/// Currently: array types missing `items` get a string item schema.
pub fn sanitize_schema(schema: Value) -> Value {
    match schema {
        Value::Object(map) => {
            let mut result = serde_json::Map::with_capacity(map.len());
            for (key, value) in map {
                let value = match value {
                    Value::Object(_) => sanitize_schema(value),
                    Value::Array(items) => Value::Array(
                        items
                            .into_iter()
                            .map(|item| {
                                if item.is_object() {
                                    sanitize_schema(item)
                                } else {
                                    item
                                }
                            })
                            .collect(),
                    ),
                    other => other,
                };
                result.insert(key, value);
            }
            if result.get("type").and_then(Value::as_str) == Some("array")
                && !result.contains_key("items")
            {
                result.insert("items".to_string(), json!({"type": "string"}));
            }
            Value::Object(result)
        }
        other => other,
    }
}

// ─────────────────────────────────────────────
// Placeholder interpolation
// ─────────────────────────────────────────────

/// Resolve `${config.x.y}` against the agent's config vars, then `${ENV_VAR}`
/// against the environment. Unresolved placeholders are left verbatim.
pub fn resolve_placeholders(value: &str, vars: &Value) -> String {
    static CONFIG_RE: OnceLock<Regex> = OnceLock::new();
    static ENV_RE: OnceLock<Regex> = OnceLock::new();
    let config_re = CONFIG_RE
        .get_or_init(|| Regex::new(r"\$\{config\.([^}]+)\}").expect("valid regex"));
    let env_re = ENV_RE.get_or_init(|| {
        Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex")
    });

    let resolved = config_re.replace_all(value, |caps: &regex::Captures| {
        let mut current = vars;
        for part in caps[1].split('.') {
            match current.get(part) {
                Some(next) => current = next,
                // Unknown config path: keep the placeholder.
                None => return caps[0].to_string(),
            }
        }
        match current {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        }
    });

    env_re
        .replace_all(&resolved, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}
