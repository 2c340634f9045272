//! Core types for Skillet — the typed chat-completions data model.
//!
//! Messages follow the OpenAI chat completions wire format. Each role is an
//! enum variant, so a malformed transcript is a compile error rather than an
//! API rejection three network hops later.

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────
// Messages (OpenAI chat completions format)
// ─────────────────────────────────────────────

/// A chat message, tagged by role.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "role")]
pub enum Message {
    #[serde(rename = "system")]
    System { content: String },

    #[serde(rename = "user")]
    User { content: String },

    #[serde(rename = "assistant")]
    Assistant {
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<ToolCall>>,
        /// Reasoning traces from models like DeepSeek-R1.
        #[serde(skip_serializing_if = "Option::is_none")]
        reasoning_content: Option<String>,
    },

    #[serde(rename = "tool")]
    Tool {
        content: String,
        tool_call_id: String,
    },
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Message::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Message::User {
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Message::Assistant {
            content: Some(content.into()),
            tool_calls: None,
            reasoning_content: None,
        }
    }

    /// A tool result addressed back to the call that produced it.
    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Message::Tool {
            content: content.into(),
            tool_call_id: tool_call_id.into(),
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Message::System { .. })
    }

    pub fn is_user(&self) -> bool {
        matches!(self, Message::User { .. })
    }

    /// Text content of the message, if any.
    pub fn content(&self) -> Option<&str> {
        match self {
            Message::System { content } => Some(content),
            Message::User { content } => Some(content),
            Message::Assistant { content, .. } => content.as_deref(),
            Message::Tool { content, .. } => Some(content),
        }
    }
}

// ─────────────────────────────────────────────
// Tool calls and definitions
// ─────────────────────────────────────────────

/// A tool invocation requested by the model.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            call_type: "function".to_string(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }
}

/// The function half of a tool call. `arguments` is a raw JSON string, as the
/// API delivers it.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

/// A tool definition advertised to the model.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDefinition,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

impl ToolDefinition {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            tool_type: "function".to_string(),
            function: FunctionDefinition {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }
}

// ─────────────────────────────────────────────
// Tool catalog
// ─────────────────────────────────────────────

/// Where a catalogued tool executes.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolSource {
    /// In-process, registered by the host application.
    Local,
    /// Served by a named MCP server.
    Remote { server: String },
}

impl std::fmt::Display for ToolSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolSource::Local => write!(f, "local"),
            ToolSource::Remote { server } => write!(f, "mcp:{server}"),
        }
    }
}

/// A catalog entry: one callable tool and its sanitized schema.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
    pub source: ToolSource,
}

impl ToolDescriptor {
    /// The model-facing definition for this entry.
    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition::new(&self.name, &self.description, self.parameters.clone())
    }
}

// ─────────────────────────────────────────────
// Completions
// ─────────────────────────────────────────────

/// One full model turn, already assembled from the wire (or from deltas).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Completion {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
    /// Reasoning traces, when the model emits them.
    pub reasoning: Option<String>,
    pub finish_reason: Option<String>,
    pub usage: Option<UsageInfo>,
}

impl Completion {
    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }

    /// Fold a streamed delta into this completion.
    ///
    /// Tool-call fragments are merged by `index`: the first fragment for an
    /// index carries `id` and `name`, later ones append `arguments` text.
    pub fn absorb(&mut self, delta: &CompletionDelta) {
        if let Some(text) = &delta.content {
            self.content.get_or_insert_with(String::new).push_str(text);
        }
        if let Some(text) = &delta.reasoning {
            self.reasoning.get_or_insert_with(String::new).push_str(text);
        }
        for tc in &delta.tool_calls {
            while self.tool_calls.len() <= tc.index {
                self.tool_calls.push(ToolCall::new("", "", ""));
            }
            let slot = &mut self.tool_calls[tc.index];
            if let Some(id) = &tc.id {
                slot.id = id.clone();
            }
            if let Some(name) = &tc.name {
                slot.function.name = name.clone();
            }
            slot.function.arguments.push_str(&tc.arguments);
        }
        if let Some(reason) = &delta.finish_reason {
            self.finish_reason = Some(reason.clone());
        }
    }
}

/// Token accounting reported by the API.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct UsageInfo {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

// ─────────────────────────────────────────────
// Streaming deltas
// ─────────────────────────────────────────────

/// One incremental chunk of a streamed completion.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompletionDelta {
    pub content: Option<String>,
    pub reasoning: Option<String>,
    pub tool_calls: Vec<ToolCallDelta>,
    pub finish_reason: Option<String>,
}

/// A fragment of a streamed tool call. Fragments sharing an `index` belong
/// to the same call.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolCallDelta {
    pub index: usize,
    pub id: Option<String>,
    pub name: Option<String>,
    pub arguments: String,
}

// ─────────────────────────────────────────────
// Agent surface types
// ─────────────────────────────────────────────

/// What an agent run hands back to the caller.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct AgentResponse {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// Progress events emitted during a streamed agent run.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Incremental reasoning text.
    Reasoning { text: String },
    /// Incremental answer text.
    Content { text: String },
    /// A tool is about to run.
    ToolCall { name: String },
    /// A tool finished; `content` is what the model will see.
    ToolResult { name: String, content: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_system_message_serialization() {
        let msg = Message::system("You are helpful.");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"role": "system", "content": "You are helpful."})
        );
    }

    #[test]
    fn test_assistant_skips_empty_fields() {
        let msg = Message::assistant("hi");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, json!({"role": "assistant", "content": "hi"}));
    }

    #[test]
    fn test_assistant_tool_calls_serialization() {
        let msg = Message::Assistant {
            content: None,
            tool_calls: Some(vec![ToolCall::new("call_1", "lookup", r#"{"key":"a"}"#)]),
            reasoning_content: None,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "assistant");
        assert_eq!(value["tool_calls"][0]["id"], "call_1");
        assert_eq!(value["tool_calls"][0]["type"], "function");
        assert_eq!(value["tool_calls"][0]["function"]["name"], "lookup");
        assert!(value.get("content").is_none());
    }

    #[test]
    fn test_tool_result_serialization() {
        let msg = Message::tool_result("call_1", "42");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"role": "tool", "content": "42", "tool_call_id": "call_1"})
        );
    }

    #[test]
    fn test_message_roundtrip() {
        let original = Message::Assistant {
            content: Some("thinking".into()),
            tool_calls: Some(vec![ToolCall::new("c1", "f", "{}")]),
            reasoning_content: None,
        };
        let text = serde_json::to_string(&original).unwrap();
        let parsed: Message = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, original);
    }

    #[test]
    fn test_tool_definition_shape() {
        let def = ToolDefinition::new("echo", "Echo input", json!({"type": "object"}));
        let value = serde_json::to_value(&def).unwrap();
        assert_eq!(value["type"], "function");
        assert_eq!(value["function"]["name"], "echo");
        assert_eq!(value["function"]["parameters"]["type"], "object");
    }

    #[test]
    fn test_tool_source_display() {
        assert_eq!(ToolSource::Local.to_string(), "local");
        assert_eq!(
            ToolSource::Remote {
                server: "jira".into()
            }
            .to_string(),
            "mcp:jira"
        );
    }

    #[test]
    fn test_descriptor_to_definition() {
        let desc = ToolDescriptor {
            name: "search".into(),
            description: "Search things".into(),
            parameters: json!({"type": "object", "properties": {}}),
            source: ToolSource::Remote {
                server: "web".into(),
            },
        };
        let def = desc.to_definition();
        assert_eq!(def.function.name, "search");
        assert_eq!(def.tool_type, "function");
    }

    #[test]
    fn test_absorb_content_and_reasoning() {
        let mut acc = Completion::default();
        acc.absorb(&CompletionDelta {
            reasoning: Some("hmm".into()),
            ..Default::default()
        });
        acc.absorb(&CompletionDelta {
            content: Some("Hello".into()),
            ..Default::default()
        });
        acc.absorb(&CompletionDelta {
            content: Some(", world".into()),
            finish_reason: Some("stop".into()),
            ..Default::default()
        });
        assert_eq!(acc.content.as_deref(), Some("Hello, world"));
        assert_eq!(acc.reasoning.as_deref(), Some("hmm"));
        assert_eq!(acc.finish_reason.as_deref(), Some("stop"));
        assert!(!acc.has_tool_calls());
    }

    #[test]
    fn test_absorb_merges_tool_calls_by_index() {
        let mut acc = Completion::default();
        acc.absorb(&CompletionDelta {
            tool_calls: vec![ToolCallDelta {
                index: 0,
                id: Some("call_9".into()),
                name: Some("lookup".into()),
                arguments: r#"{"ke"#.into(),
            }],
            ..Default::default()
        });
        acc.absorb(&CompletionDelta {
            tool_calls: vec![ToolCallDelta {
                index: 0,
                id: None,
                name: None,
                arguments: r#"y":1}"#.into(),
            }],
            ..Default::default()
        });
        assert_eq!(acc.tool_calls.len(), 1);
        assert_eq!(acc.tool_calls[0].id, "call_9");
        assert_eq!(acc.tool_calls[0].function.name, "lookup");
        assert_eq!(acc.tool_calls[0].function.arguments, r#"{"key":1}"#);
    }

    #[test]
    fn test_absorb_parallel_tool_calls() {
        let mut acc = Completion::default();
        acc.absorb(&CompletionDelta {
            tool_calls: vec![
                ToolCallDelta {
                    index: 1,
                    id: Some("b".into()),
                    name: Some("second".into()),
                    arguments: "{}".into(),
                },
                ToolCallDelta {
                    index: 0,
                    id: Some("a".into()),
                    name: Some("first".into()),
                    arguments: "{}".into(),
                },
            ],
            ..Default::default()
        });
        assert_eq!(acc.tool_calls.len(), 2);
        assert_eq!(acc.tool_calls[0].function.name, "first");
        assert_eq!(acc.tool_calls[1].function.name, "second");
    }

    #[test]
    fn test_stream_event_tagging() {
        let event = StreamEvent::ToolResult {
            name: "lookup".into(),
            content: "ok".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"type": "tool_result", "name": "lookup", "content": "ok"})
        );
    }
}
