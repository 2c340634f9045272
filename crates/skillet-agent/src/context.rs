//! Context pruning — keeps long runs inside the model's window.
//!
//! Two levels: `prune_if_needed` runs before every model call and only acts
//! when the token estimate crosses the threshold; `prune_aggressive` is the
//! recovery path after the API rejects a prompt outright.

use tracing::debug;

use skillet_core::types::Message;
use skillet_providers::CompletionClient;

/// Fraction of the context window at which pruning kicks in.
pub const PRUNE_THRESHOLD: f64 = 0.8;

/// Conversations at or below this length are never pruned.
const MIN_PRUNE_LEN: usize = 12;

/// Trailing messages kept by aggressive pruning.
const KEEP_TAIL: usize = 10;

/// Prune when the estimated token count crosses the threshold.
pub fn prune_if_needed(client: &dyn CompletionClient, messages: Vec<Message>) -> Vec<Message> {
    let count = client.count_tokens(&messages);
    let threshold = (client.max_input_tokens() as f64 * PRUNE_THRESHOLD) as usize;
    if count < threshold {
        return messages;
    }
    debug!(tokens = count, threshold, "context near limit, pruning");
    prune_aggressive(messages)
}

/// Drop the middle of the conversation, keeping:
/// - the system prompt (when it leads the transcript)
/// - the first user message (the task)
/// - the last ten messages
///
/// Exact duplicates of already-kept messages are skipped, so the result is
/// bounded at twelve messages.
pub fn prune_aggressive(messages: Vec<Message>) -> Vec<Message> {
    if messages.len() <= MIN_PRUNE_LEN {
        return messages;
    }

    let mut pruned: Vec<Message> = Vec::new();
    if messages[0].is_system() {
        pruned.push(messages[0].clone());
    }
    if let Some((idx, first_user)) = messages.iter().enumerate().find(|(_, m)| m.is_user()) {
        if idx != 0 {
            pruned.push(first_user.clone());
        }
    }
    for msg in &messages[messages.len() - KEEP_TAIL..] {
        if !pruned.contains(msg) {
            pruned.push(msg.clone());
        }
    }

    debug!(before = messages.len(), after = pruned.len(), "pruned context");
    pruned
}
