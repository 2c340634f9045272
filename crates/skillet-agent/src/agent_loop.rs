//! The agentic loop — model ↔ tool round trips until a final answer.
//!
//! One loop serves every surface: blocking, structured, and streaming runs
//! differ only in whether an event sink is attached and whether a response
//! format is enforced on tool-free turns.
//!
//! Iteration accounting: only successful model calls consume the budget. A
//! context-window rejection prunes the transcript and retries the same
//! iteration for free.

use std::collections::HashMap;

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use skillet_core::types::{
    AgentResponse, Completion, Message, StreamEvent, ToolDefinition,
};
use skillet_providers::{CompletionClient, CompletionError};

use crate::context::{prune_aggressive, prune_if_needed};
use crate::skills::SkillManager;
use crate::tools::ToolManager;

// ─────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────

/// Per-run knobs for the loop.
#[derive(Clone, Debug)]
pub struct LoopConfig {
    /// Cap on successful model invocations.
    pub max_iterations: usize,
    /// `response_format` applied to tool-free turns, for typed agents.
    pub response_format: Option<Value>,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_iterations: 50,
            response_format: None,
        }
    }
}

// ─────────────────────────────────────────────
// Loop
// ─────────────────────────────────────────────

/// Run the loop until the model answers without tool calls, or the budget
/// runs out (which yields an empty response, never an error).
pub async fn run_agentic_loop(
    client: &dyn CompletionClient,
    skill_manager: &mut SkillManager,
    tool_manager: &ToolManager,
    system_prompt: &str,
    history: &[Message],
    config: &LoopConfig,
    events: Option<&UnboundedSender<StreamEvent>>,
) -> Result<AgentResponse, CompletionError> {
    let mut messages: Vec<Message> = Vec::with_capacity(history.len() + 1);
    messages.push(Message::system(system_prompt));
    messages.extend_from_slice(history);

    let mut iterations = 0;
    let mut reasoning = String::new();
    while iterations < config.max_iterations {
        messages = prune_if_needed(client, messages);

        let tools = visible_tools(skill_manager, tool_manager);
        let tool_slice = (!tools.is_empty()).then_some(tools.as_slice());
        // Structured output only constrains tool-free turns; during tool
        // calling the format would fight the tool_calls payload.
        let format = if tools.is_empty() {
            config.response_format.as_ref()
        } else {
            None
        };

        let result = match events {
            Some(sink) => stream_turn(client, &messages, tool_slice, format, sink).await,
            None => client.complete(&messages, tool_slice, format).await,
        };
        let completion = match result {
            Ok(completion) => completion,
            Err(CompletionError::ContextWindowExceeded(detail)) => {
                warn!(detail = %detail, "context window exceeded, pruning and retrying");
                messages = prune_aggressive(messages);
                continue;
            }
            Err(err) => return Err(err),
        };
        iterations += 1;

        // Reasoning surfaced on any turn belongs to the final response.
        if let Some(text) = completion.reasoning.as_deref() {
            if !reasoning.is_empty() {
                reasoning.push('\n');
            }
            reasoning.push_str(text);
        }

        if !completion.has_tool_calls() {
            debug!(iterations, "agent loop finished");
            return Ok(AgentResponse {
                content: completion.content.unwrap_or_default(),
                reasoning: (!reasoning.is_empty()).then(|| reasoning),
            });
        }

        let tool_calls = completion.tool_calls;
        messages.push(Message::Assistant {
            content: completion.content,
            tool_calls: Some(tool_calls.clone()),
            reasoning_content: completion.reasoning,
        });

        for call in &tool_calls {
            let name = call.function.name.as_str();
            // Malformed arguments degrade to an empty map; the tool's own
            // validation produces the model-facing error.
            let arguments: HashMap<String, Value> =
                serde_json::from_str(&call.function.arguments).unwrap_or_default();

            info!(tool = name, "dispatching tool call");
            emit(events, StreamEvent::ToolCall { name: name.to_string() });

            let result = match name {
                "load_skill" => {
                    skill_manager
                        .load_skill(str_arg(&arguments, "name"))
                        .content
                }
                "load_reference" => {
                    skill_manager
                        .load_reference(
                            str_arg(&arguments, "skill_name"),
                            str_arg(&arguments, "reference_name"),
                        )
                        .content
                }
                "load_script" => {
                    let loaded = skill_manager.load_script(
                        str_arg(&arguments, "skill_name"),
                        str_arg(&arguments, "script_name"),
                    );
                    if loaded.success {
                        // Fenced with the language so the model can hand it
                        // straight to a code interpreter.
                        format!("```{}\n{}\n```", loaded.language, loaded.content)
                    } else {
                        loaded.content
                    }
                }
                _ => tool_manager.call_tool(name, arguments).await,
            };

            emit(
                events,
                StreamEvent::ToolResult {
                    name: name.to_string(),
                    content: result.clone(),
                },
            );
            messages.push(Message::tool_result(&call.id, result));
        }
    }

    info!(max_iterations = config.max_iterations, "agent loop exhausted iteration budget");
    Ok(AgentResponse::default())
}

/// Compute the tool list for this turn (progressive disclosure).
fn visible_tools(skill_manager: &SkillManager, tool_manager: &ToolManager) -> Vec<ToolDefinition> {
    let mut tools = Vec::new();

    if !skill_manager.is_empty() {
        tools.push(skill_manager.load_skill_tool());
    }

    if skill_manager.has_loaded_skills() {
        if skill_manager.exposes_all_tools() {
            tools.extend(tool_manager.definitions());
        } else {
            tools.extend(tool_manager.definitions_for(&skill_manager.required_tools()));
        }
        if let Some(def) = skill_manager.load_reference_tool() {
            tools.push(def);
        }
        if let Some(def) = skill_manager.load_script_tool() {
            tools.push(def);
        }
    }

    tools
}

/// One streamed model turn, forwarding text deltas to the sink while
/// assembling the full completion.
async fn stream_turn(
    client: &dyn CompletionClient,
    messages: &[Message],
    tools: Option<&[ToolDefinition]>,
    format: Option<&Value>,
    sink: &UnboundedSender<StreamEvent>,
) -> Result<Completion, CompletionError> {
    let mut stream = client.complete_stream(messages, tools, format).await?;
    let mut completion = Completion::default();
    while let Some(delta) = stream.next().await {
        let delta = delta?;
        if let Some(text) = &delta.reasoning {
            let _ = sink.send(StreamEvent::Reasoning { text: text.clone() });
        }
        if let Some(text) = &delta.content {
            let _ = sink.send(StreamEvent::Content { text: text.clone() });
        }
        completion.absorb(&delta);
    }
    Ok(completion)
}

fn emit(events: Option<&UnboundedSender<StreamEvent>>, event: StreamEvent) {
    if let Some(sink) = events {
        let _ = sink.send(event);
    }
}

fn str_arg<'a>(arguments: &'a HashMap<String, Value>, key: &str) -> &'a str {
    arguments.get(key).and_then(Value::as_str).unwrap_or("")
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
