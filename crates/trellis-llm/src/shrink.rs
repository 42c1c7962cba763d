use tracing::debug;

use trellis_core::error::{Result, TrellisError};
use trellis_core::types::ChatMessage;

use crate::tokenizer::Tokenizer;

/// Consecutive iterations without a token-count reduction tolerated before
/// the budget is declared unsatisfiable.
const MAX_STALLED_ITERATIONS: usize = 3;

/// Fit `messages` under `budget` total content tokens.
///
/// A list already within budget is returned unchanged, so the operation is
/// idempotent. Message order and roles are never altered; only content at
/// `shrink_idx` (and, once exhausted, the longest remaining message) loses
/// tokens, oldest first.
pub fn shrink_messages(
    tok: &Tokenizer,
    messages: Vec<ChatMessage>,
    shrink_idx: usize,
    budget: usize,
) -> Result<Vec<ChatMessage>> {
    let total = tok.count_messages(&messages);
    if total <= budget {
        return Ok(messages);
    }
    shrink_messages_by(tok, messages, shrink_idx, total - budget)
}

/// Remove `amount` tokens from `messages`, starting at `shrink_idx`.
///
/// Encode/decode is not guaranteed to be stable token-for-token, so actual
/// progress is measured every iteration; [`TrellisError::ShrinkStalled`]
/// is returned after [`MAX_STALLED_ITERATIONS`] iterations without any
/// reduction in total length.
///
/// # Panics
///
/// Panics if `shrink_idx` is out of bounds.
pub fn shrink_messages_by(
    tok: &Tokenizer,
    mut messages: Vec<ChatMessage>,
    mut shrink_idx: usize,
    mut amount: usize,
) -> Result<Vec<ChatMessage>> {
    assert!(
        shrink_idx < messages.len(),
        "Shrink index {} out of bounds for {} messages",
        shrink_idx,
        messages.len()
    );
    let mut stalled = 0;
    while amount > 0 {
        let before = tok.count_messages(&messages);
        debug!(amount, shrink_idx, "Shrinking messages");

        let mut tokens = tok.encode(&messages[shrink_idx].content);
        if tokens.len() < amount {
            // Target exhausted: retarget to the longest remaining message.
            shrink_idx = longest_message(tok, &messages);
            tokens = tok.encode(&messages[shrink_idx].content);
        }
        let cut = amount.min(tokens.len());
        messages[shrink_idx].content = tok.decode(tokens.split_off(cut))?;

        let after = tok.count_messages(&messages);
        let progress = before.saturating_sub(after);
        if progress == 0 {
            stalled += 1;
            if stalled >= MAX_STALLED_ITERATIONS {
                return Err(TrellisError::ShrinkStalled { remaining: amount });
            }
        } else {
            stalled = 0;
            amount = amount.saturating_sub(progress);
        }
    }
    Ok(messages)
}

fn longest_message(tok: &Tokenizer, messages: &[ChatMessage]) -> usize {
    messages
        .iter()
        .enumerate()
        .max_by_key(|(_, m)| tok.count(&m.content))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::types::Role;

    fn sample() -> Vec<ChatMessage> {
        vec![
            ChatMessage::system("You are a terse assistant."),
            ChatMessage::user(
                "one two three four five six seven eight nine ten \
                 eleven twelve thirteen fourteen fifteen sixteen",
            ),
            ChatMessage::user("What should I do next?"),
        ]
    }

    #[test]
    fn test_within_budget_is_noop() {
        let tok = Tokenizer::new();
        let messages = sample();
        let original: Vec<String> = messages.iter().map(|m| m.content.clone()).collect();
        let shrunk = shrink_messages(&tok, messages, 1, 10_000).unwrap();
        let kept: Vec<String> = shrunk.iter().map(|m| m.content.clone()).collect();
        assert_eq!(original, kept);
    }

    #[test]
    fn test_shrinks_under_budget() {
        let tok = Tokenizer::new();
        let budget = 15;
        let shrunk = shrink_messages(&tok, sample(), 1, budget).unwrap();
        assert!(tok.count_messages(&shrunk) <= budget);
    }

    #[test]
    fn test_idempotent_after_shrink() {
        let tok = Tokenizer::new();
        let budget = 15;
        let shrunk = shrink_messages(&tok, sample(), 1, budget).unwrap();
        let contents: Vec<String> = shrunk.iter().map(|m| m.content.clone()).collect();
        let again = shrink_messages(&tok, shrunk, 1, budget).unwrap();
        let contents_again: Vec<String> = again.iter().map(|m| m.content.clone()).collect();
        assert_eq!(contents, contents_again);
    }

    #[test]
    fn test_preserves_order_and_roles() {
        let tok = Tokenizer::new();
        let shrunk = shrink_messages(&tok, sample(), 1, 15).unwrap();
        assert_eq!(shrunk.len(), 3);
        assert_eq!(shrunk[0].role, Role::System);
        assert_eq!(shrunk[1].role, Role::User);
        assert_eq!(shrunk[2].role, Role::User);
    }

    #[test]
    fn test_drops_oldest_tokens_first() {
        let tok = Tokenizer::new();
        let shrunk = shrink_messages(&tok, sample(), 1, 30).unwrap();
        // The designated message loses its head, keeping the most recent tail.
        assert!(shrunk[1].content.contains("sixteen"));
        assert!(!shrunk[1].content.contains("one two"));
    }

    #[test]
    fn test_retargets_longest_when_exhausted() {
        let tok = Tokenizer::new();
        // Budget small enough that message 2 (a few tokens) cannot absorb
        // the whole cut on its own.
        let shrunk = shrink_messages(&tok, sample(), 2, 12).unwrap();
        assert!(tok.count_messages(&shrunk) <= 12);
    }

    #[test]
    fn test_stalls_on_unsatisfiable_cut() {
        let tok = Tokenizer::new();
        let messages = vec![ChatMessage::system(""), ChatMessage::user("")];
        let err = shrink_messages_by(&tok, messages, 1, 5).unwrap_err();
        assert!(matches!(err, TrellisError::ShrinkStalled { remaining: 5 }));
    }
}
