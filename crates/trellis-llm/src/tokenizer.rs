use std::sync::OnceLock;

use tiktoken_rs::CoreBPE;

use trellis_core::error::{Result, TrellisError};
use trellis_core::types::ChatMessage;

/// Get or initialize the shared cl100k_base encoder (GPT-4 family; close
/// enough for budget estimation on other providers).
fn bpe() -> &'static CoreBPE {
    static BPE: OnceLock<CoreBPE> = OnceLock::new();
    BPE.get_or_init(|| tiktoken_rs::cl100k_base().expect("Failed to load cl100k_base tokenizer"))
}

/// Encode/decode facade over the shared BPE.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tokenizer;

impl Tokenizer {
    pub fn new() -> Self {
        Self
    }

    pub fn encode(&self, text: &str) -> Vec<u32> {
        bpe().encode_ordinary(text)
    }

    pub fn decode(&self, tokens: Vec<u32>) -> Result<String> {
        bpe()
            .decode(tokens)
            .map_err(|e| TrellisError::Tokenizer(e.to_string()))
    }

    pub fn count(&self, text: &str) -> usize {
        self.encode(text).len()
    }

    /// Total token count of a message list (content only).
    pub fn count_messages(&self, messages: &[ChatMessage]) -> usize {
        messages.iter().map(|m| self.count(&m.content)).sum()
    }
}
