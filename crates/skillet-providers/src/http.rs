//! Generic HTTP client for OpenAI-compatible `/chat/completions` endpoints.
//!
//! Handles both blocking completions and SSE streaming, retries transient
//! failures with exponential backoff, and classifies context-window
//! rejections so the agent loop can prune and retry.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use skillet_core::config::schema::LlmSettings;
use skillet_core::types::{
    Completion, CompletionDelta, Message, ToolCall, ToolCallDelta, ToolDefinition, UsageInfo,
};

use crate::traits::{CompletionClient, CompletionError, CompletionStream};

/// Base delay for API retry backoff. Retry `n` waits `base * 2^n`.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Body substrings that mean "your prompt is too long", across providers.
const CONTEXT_WINDOW_MARKERS: &[&str] = &[
    "context_length_exceeded",
    "maximum context length",
    "context window",
];

// ─────────────────────────────────────────────
// Client
// ─────────────────────────────────────────────

/// A completion client for any OpenAI-compatible HTTP API.
pub struct HttpCompletionClient {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    model: String,
    temperature: Option<f64>,
    max_tokens: Option<u32>,
    max_retries: u32,
    max_input_tokens: usize,
}

impl std::fmt::Debug for HttpCompletionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCompletionClient")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .finish()
    }
}

impl HttpCompletionClient {
    /// Build a client from the agent's `llm:` settings. The API key is read
    /// from the environment variable named by `api_key_env`.
    pub fn from_settings(settings: &LlmSettings) -> Self {
        let api_key = settings
            .api_key_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .unwrap_or_default();
        let api_base = settings
            .api_base
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            api_base,
            api_key,
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            max_retries: settings.max_retries,
            max_input_tokens: settings.max_input_tokens,
        }
    }

    /// Build the full chat completions URL.
    fn completions_url(&self) -> String {
        let base = self.api_base.trim_end_matches('/');
        format!("{}/chat/completions", base)
    }

    fn request_body<'a>(
        &'a self,
        messages: &'a [Message],
        tools: Option<&'a [ToolDefinition]>,
        response_format: Option<&'a serde_json::Value>,
        stream: bool,
    ) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages,
            tools,
            tool_choice: tools.map(|_| "auto"),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            response_format,
            stream,
        }
    }

    /// POST the request and classify any failure.
    async fn send(&self, body: &ChatRequest<'_>) -> Result<reqwest::Response, CompletionError> {
        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "Failed to read error body".to_string());
        if CONTEXT_WINDOW_MARKERS.iter().any(|m| text.contains(m)) {
            return Err(CompletionError::ContextWindowExceeded(text));
        }
        Err(CompletionError::Api {
            status: status.as_u16(),
            message: text,
        })
    }

    /// Retry transient failures with exponential backoff.
    async fn send_with_retries(
        &self,
        body: &ChatRequest<'_>,
    ) -> Result<reqwest::Response, CompletionError> {
        let mut attempt: u32 = 0;
        loop {
            match self.send(body).await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() && attempt + 1 < self.max_retries.max(1) => {
                    let delay = RETRY_BASE_DELAY * 2u32.pow(attempt);
                    warn!(
                        model = %self.model,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "retrying model call"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        response_format: Option<&serde_json::Value>,
    ) -> Result<Completion, CompletionError> {
        debug!(
            model = %self.model,
            messages = messages.len(),
            tools = tools.map_or(0, |t| t.len()),
            structured = response_format.is_some(),
            "calling model"
        );

        let body = self.request_body(messages, tools, response_format, false);
        let response = self.send_with_retries(&body).await?;
        let parsed: ChatResponse = response.json().await?;

        let completion: Completion = parsed.into();
        debug!(
            model = %self.model,
            has_content = completion.content.is_some(),
            tool_calls = completion.tool_calls.len(),
            finish_reason = completion.finish_reason.as_deref().unwrap_or("?"),
            "model response received"
        );
        Ok(completion)
    }

    async fn complete_stream(
        &self,
        messages: &[Message],
        tools: Option<&[ToolDefinition]>,
        response_format: Option<&serde_json::Value>,
    ) -> Result<CompletionStream, CompletionError> {
        let body = self.request_body(messages, tools, response_format, true);
        let response = self.send_with_retries(&body).await?;

        // Parse the SSE body incrementally: buffer bytes, emit one delta per
        // complete `data:` line, stop at the `[DONE]` sentinel.
        let stream = futures::stream::unfold(
            (response.bytes_stream(), String::new(), false),
            |(mut bytes, mut buffer, done)| async move {
                if done {
                    return None;
                }
                loop {
                    if let Some(pos) = buffer.find('\n') {
                        let line = buffer[..pos].trim().to_string();
                        buffer.drain(..=pos);
                        let Some(payload) = line.strip_prefix("data:") else {
                            continue;
                        };
                        let payload = payload.trim_start();
                        if payload == "[DONE]" {
                            return None;
                        }
                        match parse_sse_chunk(payload) {
                            Ok(Some(delta)) => {
                                return Some((Ok(delta), (bytes, buffer, false)));
                            }
                            Ok(None) => continue,
                            Err(err) => return Some((Err(err), (bytes, buffer, true))),
                        }
                    }
                    match bytes.next().await {
                        Some(Ok(chunk)) => buffer.push_str(&String::from_utf8_lossy(&chunk)),
                        Some(Err(err)) => {
                            return Some((
                                Err(CompletionError::Network(err)),
                                (bytes, buffer, true),
                            ));
                        }
                        None => return None,
                    }
                }
            },
        );
        Ok(stream.boxed())
    }

    fn max_input_tokens(&self) -> usize {
        self.max_input_tokens
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// One SSE payload → one delta. Empty `choices` arrays (keep-alives) yield
/// `None`.
fn parse_sse_chunk(payload: &str) -> Result<Option<CompletionDelta>, CompletionError> {
    let chunk: ChatChunk = serde_json::from_str(payload)?;
    let Some(choice) = chunk.choices.into_iter().next() else {
        return Ok(None);
    };
    Ok(Some(CompletionDelta {
        content: choice.delta.content,
        reasoning: choice.delta.reasoning_content,
        tool_calls: choice
            .delta
            .tool_calls
            .into_iter()
            .map(|tc| ToolCallDelta {
                index: tc.index,
                id: tc.id,
                name: tc.function.name,
                arguments: tc.function.arguments.unwrap_or_default(),
            })
            .collect(),
        finish_reason: choice.finish_reason,
    }))
}

// ─────────────────────────────────────────────
// Wire format
// ─────────────────────────────────────────────

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<&'a [ToolDefinition]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<&'a serde_json::Value>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    usage: Option<UsageInfo>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
    #[serde(default)]
    reasoning_content: Option<String>,
}

impl From<ChatResponse> for Completion {
    fn from(response: ChatResponse) -> Self {
        let usage = response.usage;
        let Some(choice) = response.choices.into_iter().next() else {
            return Completion::default();
        };
        Completion {
            content: choice.message.content,
            tool_calls: choice.message.tool_calls.unwrap_or_default(),
            reasoning: choice.message.reasoning_content,
            finish_reason: choice.finish_reason,
            usage,
        }
    }
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    reasoning_content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ChunkToolCall>,
}

#[derive(Deserialize)]
struct ChunkToolCall {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: ChunkFunction,
}

#[derive(Default, Deserialize)]
struct ChunkFunction {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
