use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrellisError {
    // Model boundary errors
    #[error("Model request failed: {0}")]
    ModelRequest(String),

    #[error("Context window exceeded: prompt is {prompt_tokens} tokens, model maximum is {max_tokens}")]
    ContextOverflow {
        prompt_tokens: usize,
        max_tokens: usize,
    },

    #[error("Message shrinking stalled with {remaining} tokens left to cut")]
    ShrinkStalled { remaining: usize },

    #[error("Tokenizer error: {0}")]
    Tokenizer(String),

    // Graph errors
    #[error("Graph stalled with unevaluated nodes: {remaining:?}")]
    GraphStalled { remaining: Vec<String> },

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TrellisError>;

/// Typed failure raised by an after-query validator.
///
/// Recovered locally by the node retry loop, never propagated out of a
/// round. `diagnostic` is the internal description; `feedback` is shown to
/// the model as a corrective turn on the next attempt.
#[derive(Debug, Clone, Error)]
#[error("Validation failed: {diagnostic}")]
pub struct ValidationError {
    pub diagnostic: String,
    pub feedback: String,
}

impl ValidationError {
    pub fn new(diagnostic: impl Into<String>, feedback: impl Into<String>) -> Self {
        Self {
            diagnostic: diagnostic.into(),
            feedback: feedback.into(),
        }
    }
}
