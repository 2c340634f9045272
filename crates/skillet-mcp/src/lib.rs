//! Minimal MCP client for Skillet.
//!
//! Speaks JSON-RPC 2.0 to a Model Context Protocol server over one of two
//! transports:
//!
//! - **stdio**: a spawned subprocess, one JSON message per line
//! - **http**: POST each message to a single endpoint
//!
//! Only the three methods the agent needs are implemented: the `initialize`
//! handshake, `tools/list`, and `tools/call`.

use std::collections::BTreeMap;
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tracing::debug;

/// MCP protocol revision sent during the handshake.
pub const PROTOCOL_VERSION: &str = "2024-11-05";

// ─────────────────────────────────────────────
// JSON-RPC framing
// ─────────────────────────────────────────────

#[derive(Serialize)]
struct JsonRpcRequest {
    jsonrpc: &'static str,
    id: u64,
    method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
}

#[derive(Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

// ─────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────

/// A tool advertised by a server.
#[derive(Clone, Debug)]
pub struct RemoteTool {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

enum Transport {
    Stdio {
        stdin: ChildStdin,
        stdout: BufReader<ChildStdout>,
        _child: Child,
    },
    Http {
        client: reqwest::Client,
        url: String,
        headers: reqwest::header::HeaderMap,
    },
}

/// One connected MCP server. Requests are serialized through `&mut self`,
/// which also keeps the id counter race-free.
pub struct McpSession {
    transport: Transport,
    next_id: u64,
}

impl McpSession {
    /// Spawn `command` and complete the MCP handshake over its stdio.
    pub async fn connect_stdio(
        command: &str,
        args: &[String],
        env: &BTreeMap<String, String>,
    ) -> Result<Self> {
        let mut child = Command::new(command)
            .args(args)
            .envs(env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to spawn MCP server '{command}'"))?;

        let stdin = child.stdin.take().context("child stdin unavailable")?;
        let stdout = BufReader::new(child.stdout.take().context("child stdout unavailable")?);

        let mut session = Self {
            transport: Transport::Stdio {
                stdin,
                stdout,
                _child: child,
            },
            next_id: 0,
        };
        session.initialize().await?;
        Ok(session)
    }

    /// Complete the MCP handshake against an HTTP endpoint.
    pub async fn connect_http(url: &str, headers: &BTreeMap<String, String>) -> Result<Self> {
        let mut header_map = reqwest::header::HeaderMap::new();
        for (key, value) in headers {
            let name = reqwest::header::HeaderName::from_bytes(key.as_bytes())
                .with_context(|| format!("invalid header name '{key}'"))?;
            let value = reqwest::header::HeaderValue::from_str(value)
                .with_context(|| format!("invalid header value for '{key}'"))?;
            header_map.insert(name, value);
        }

        let mut session = Self {
            transport: Transport::Http {
                client: reqwest::Client::new(),
                url: url.to_string(),
                headers: header_map,
            },
            next_id: 0,
        };
        session.initialize().await?;
        Ok(session)
    }

    async fn initialize(&mut self) -> Result<()> {
        self.request(
            "initialize",
            Some(json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": "skillet",
                    "version": env!("CARGO_PKG_VERSION"),
                },
            })),
        )
        .await
        .context("MCP initialize failed")?;
        self.notify("notifications/initialized").await
    }

    /// List the tools the server offers.
    pub async fn list_tools(&mut self) -> Result<Vec<RemoteTool>> {
        let result = self.request("tools/list", None).await?;
        let tools = result
            .get("tools")
            .and_then(Value::as_array)
            .context("tools/list response missing 'tools' array")?;
        Ok(tools
            .iter()
            .map(|t| RemoteTool {
                name: t["name"].as_str().unwrap_or_default().to_string(),
                description: t["description"].as_str().unwrap_or_default().to_string(),
                input_schema: t
                    .get("inputSchema")
                    .cloned()
                    .unwrap_or_else(|| json!({"type": "object", "properties": {}})),
            })
            .collect())
    }

    /// Invoke a tool. Text content parts are joined with newlines; other
    /// parts are passed through as JSON. A result flagged `isError` becomes
    /// an `Err` carrying the same text.
    pub async fn call_tool(&mut self, name: &str, arguments: Value) -> Result<String> {
        let result = self
            .request("tools/call", Some(json!({"name": name, "arguments": arguments})))
            .await?;

        let text = result
            .get("content")
            .and_then(Value::as_array)
            .map(|parts| {
                parts
                    .iter()
                    .map(|part| match part.get("text").and_then(Value::as_str) {
                        Some(text) => text.to_string(),
                        None => part.to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .unwrap_or_default();

        if result.get("isError").and_then(Value::as_bool).unwrap_or(false) {
            bail!("{text}");
        }
        Ok(text)
    }

    async fn request(&mut self, method: &str, params: Option<Value>) -> Result<Value> {
        self.next_id += 1;
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id,
            method: method.to_string(),
            params,
        };
        debug!(method, id = self.next_id, "MCP request");

        let response: JsonRpcResponse = match &mut self.transport {
            Transport::Stdio { stdin, stdout, .. } => {
                let mut line = serde_json::to_string(&request)?;
                line.push('\n');
                stdin.write_all(line.as_bytes()).await?;
                stdin.flush().await?;

                // Servers may interleave their own notifications; skip
                // anything without an id.
                loop {
                    let mut reply = String::new();
                    let read = stdout.read_line(&mut reply).await?;
                    if read == 0 {
                        bail!("MCP server closed its stdout during '{method}'");
                    }
                    let reply = reply.trim();
                    if reply.is_empty() {
                        continue;
                    }
                    let value: Value = serde_json::from_str(reply)
                        .with_context(|| format!("invalid JSON-RPC reply to '{method}'"))?;
                    if value.get("id").is_some() {
                        break serde_json::from_value(value)?;
                    }
                }
            }
            Transport::Http {
                client,
                url,
                headers,
            } => {
                let http_response = client
                    .post(url.as_str())
                    .headers(headers.clone())
                    .json(&request)
                    .send()
                    .await?
                    .error_for_status()?;
                http_response.json().await?
            }
        };

        if let Some(error) = response.error {
            bail!("MCP error from '{method}': {error}");
        }
        response
            .result
            .with_context(|| format!("no result in response to '{method}'"))
    }

    async fn notify(&mut self, method: &str) -> Result<()> {
        let notification = json!({"jsonrpc": "2.0", "method": method});
        match &mut self.transport {
            Transport::Stdio { stdin, .. } => {
                let mut line = notification.to_string();
                line.push('\n');
                stdin.write_all(line.as_bytes()).await?;
                stdin.flush().await?;
            }
            Transport::Http {
                client,
                url,
                headers,
            } => {
                client
                    .post(url.as_str())
                    .headers(headers.clone())
                    .json(&notification)
                    .send()
                    .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rpc_result(id: u64, result: Value) -> Value {
        json!({"jsonrpc": "2.0", "id": id, "result": result})
    }

    #[test]
    fn test_request_serialization() {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: 7,
            method: "tools/list".into(),
            params: None,
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            value,
            json!({"jsonrpc": "2.0", "id": 7, "method": "tools/list"})
        );
    }

    async fn mock_handshake(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path("/mcp"))
            .and(body_partial_json(json!({"method": "initialize"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(rpc_result(
                1,
                json!({"protocolVersion": PROTOCOL_VERSION, "capabilities": {}}),
            )))
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path("/mcp"))
            .and(body_partial_json(
                json!({"method": "notifications/initialized"}),
            ))
            .respond_with(ResponseTemplate::new(202))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_http_list_tools() {
        let server = MockServer::start().await;
        mock_handshake(&server).await;
        Mock::given(method("POST"))
            .and(path("/mcp"))
            .and(body_partial_json(json!({"method": "tools/list"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(rpc_result(
                2,
                json!({"tools": [
                    {"name": "search", "description": "Search issues",
                     "inputSchema": {"type": "object", "properties": {"q": {"type": "string"}}}},
                    {"name": "bare"}
                ]}),
            )))
            .mount(&server)
            .await;

        let url = format!("{}/mcp", server.uri());
        let mut session = McpSession::connect_http(&url, &BTreeMap::new()).await.unwrap();
        let tools = session.list_tools().await.unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0].name, "search");
        assert_eq!(tools[1].input_schema["type"], "object");
    }

    #[tokio::test]
    async fn test_http_call_tool_joins_text_parts() {
        let server = MockServer::start().await;
        mock_handshake(&server).await;
        Mock::given(method("POST"))
            .and(path("/mcp"))
            .and(body_partial_json(
                json!({"method": "tools/call", "params": {"name": "search"}}),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(rpc_result(
                2,
                json!({"content": [
                    {"type": "text", "text": "line one"},
                    {"type": "text", "text": "line two"}
                ], "isError": false}),
            )))
            .mount(&server)
            .await;

        let url = format!("{}/mcp", server.uri());
        let mut session = McpSession::connect_http(&url, &BTreeMap::new()).await.unwrap();
        let output = session.call_tool("search", json!({"q": "bug"})).await.unwrap();
        assert_eq!(output, "line one\nline two");
    }

    #[tokio::test]
    async fn test_http_call_tool_error_flag() {
        let server = MockServer::start().await;
        mock_handshake(&server).await;
        Mock::given(method("POST"))
            .and(path("/mcp"))
            .and(body_partial_json(json!({"method": "tools/call"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(rpc_result(
                2,
                json!({"content": [{"type": "text", "text": "boom"}], "isError": true}),
            )))
            .mount(&server)
            .await;

        let url = format!("{}/mcp", server.uri());
        let mut session = McpSession::connect_http(&url, &BTreeMap::new()).await.unwrap();
        let err = session.call_tool("search", json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[tokio::test]
    async fn test_http_rpc_error_propagates() {
        let server = MockServer::start().await;
        mock_handshake(&server).await;
        Mock::given(method("POST"))
            .and(path("/mcp"))
            .and(body_partial_json(json!({"method": "tools/list"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                json!({"jsonrpc": "2.0", "id": 2, "error": {"code": -32601, "message": "nope"}}),
            ))
            .mount(&server)
            .await;

        let url = format!("{}/mcp", server.uri());
        let mut session = McpSession::connect_http(&url, &BTreeMap::new()).await.unwrap();
        let err = session.list_tools().await.unwrap_err();
        assert!(err.to_string().contains("tools/list"));
    }

    #[tokio::test]
    async fn test_http_sends_custom_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mcp"))
            .and(header("x-api-key", "sekrit"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(rpc_result(1, json!({"capabilities": {}}))),
            )
            .mount(&server)
            .await;

        let url = format!("{}/mcp", server.uri());
        let mut headers = BTreeMap::new();
        headers.insert("x-api-key".to_string(), "sekrit".to_string());
        // Handshake succeeding proves the header matcher was satisfied.
        McpSession::connect_http(&url, &headers).await.unwrap();
    }

    #[tokio::test]
    async fn test_stdio_spawn_failure() {
        let err = McpSession::connect_stdio(
            "definitely-not-a-real-binary-xyz",
            &[],
            &BTreeMap::new(),
        )
        .await
        .err()
        .unwrap();
        assert!(err.to_string().contains("failed to spawn"));
    }
}
