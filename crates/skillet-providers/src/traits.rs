//! Completion client trait — the model abstraction the agent loop drives.
//!
//! The `HttpCompletionClient` in `http.rs` covers all OpenAI-compatible APIs;
//! tests substitute a scripted mock.

use async_trait::async_trait;
use futures::stream::BoxStream;

use skillet_core::types::{Completion, CompletionDelta, Message, ToolDefinition};

/// Incremental deltas from a streamed completion.
pub type CompletionStream = BoxStream<'static, Result<CompletionDelta, CompletionError>>;

/// What can go wrong talking to a model.
#[derive(Debug, thiserror::Error)]
pub enum CompletionError {
    /// The prompt no longer fits the model's context window. The loop
    /// recovers from this by pruning and retrying.
    #[error("context window exceeded: {0}")]
    ContextWindowExceeded(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("network error")]
    Network(#[from] reqwest::Error),

    #[error("failed to parse response")]
    Parse(#[from] serde_json::Error),

    #[error("stream error: {0}")]
    Stream(String),
}

impl CompletionError {
    /// Whether a retry could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            CompletionError::Api { status, .. } => *status == 429 || *status >= 500,
            CompletionError::Network(_) => true,
            _ => false,
        }
    }
}

/// Trait that all model clients implement.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// Send a chat completion request and wait for the full turn.
    ///
    /// * `messages`        — full conversation, system prompt first
    /// * `tools`           — tool definitions visible this turn, if any
    /// * `response_format` — JSON-schema enforcement, if any
    async fn complete(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        response_format: Option<&serde_json::Value>,
    ) -> Result<Completion, CompletionError>;

    /// Same request, streamed as deltas.
    async fn complete_stream(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        response_format: Option<&serde_json::Value>,
    ) -> Result<CompletionStream, CompletionError>;

    /// Estimate of prompt tokens, used only to decide when to prune.
    /// Under-estimating is tolerated; the context-window recovery path
    /// catches what the estimate misses.
    fn count_tokens(&self, messages: &[Message]) -> usize {
        estimate_tokens(messages)
    }

    /// Context window size for this model.
    fn max_input_tokens(&self) -> usize {
        128_000
    }

    /// Model identifier, for logging.
    fn model(&self) -> &str;
}

/// Rough token estimate: four characters per token plus per-message framing.
pub fn estimate_tokens(messages: &[Message]) -> usize {
    messages
        .iter()
        .map(|m| {
            let chars = match m {
                Message::Assistant {
                    content,
                    tool_calls,
                    reasoning_content,
                } => {
                    content.as_deref().map_or(0, str::len)
                        + reasoning_content.as_deref().map_or(0, str::len)
                        + tool_calls.as_ref().map_or(0, |calls| {
                            calls
                                .iter()
                                .map(|c| c.function.name.len() + c.function.arguments.len())
                                .sum()
                        })
                }
                other => other.content().map_or(0, str::len),
            };
            chars / 4 + 4
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use skillet_core::types::ToolCall;

    #[test]
    fn test_estimate_counts_all_parts() {
        let plain = vec![Message::user("x".repeat(400))];
        assert_eq!(estimate_tokens(&plain), 104);

        let with_calls = vec![Message::Assistant {
            content: None,
            tool_calls: Some(vec![ToolCall::new("c1", "tool", "x".repeat(396))]),
            reasoning_content: None,
        }];
        assert_eq!(estimate_tokens(&with_calls), 104);
    }

    #[test]
    fn test_retryable_classification() {
        assert!(CompletionError::Api {
            status: 429,
            message: "slow down".into()
        }
        .is_retryable());
        assert!(CompletionError::Api {
            status: 503,
            message: "overloaded".into()
        }
        .is_retryable());
        assert!(!CompletionError::Api {
            status: 401,
            message: "bad key".into()
        }
        .is_retryable());
        assert!(!CompletionError::ContextWindowExceeded("too long".into()).is_retryable());
    }
}
