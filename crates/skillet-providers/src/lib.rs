//! Model client layer for Skillet.
//!
//! # Architecture
//!
//! - [`traits::CompletionClient`] — the trait the agent loop drives; one
//!   blocking call, one streaming call, and a token estimate for pruning
//! - [`http::HttpCompletionClient`] — generic client for any
//!   OpenAI-compatible `/chat/completions` endpoint, with SSE streaming

pub mod http;
pub mod traits;

pub use http::HttpCompletionClient;
pub use traits::{estimate_tokens, CompletionClient, CompletionError, CompletionStream};
