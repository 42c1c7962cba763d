use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrellisError};

/// Model and context-window configuration for one invocation boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    pub model_id: String,
    /// Total context window in tokens. `None` falls back to the preset
    /// table, then to [`DEFAULT_CONTEXT_WINDOW`].
    #[serde(default)]
    pub context_window: Option<usize>,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl ModelConfig {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            provider: default_provider(),
            model_id: model_id.into(),
            context_window: None,
            max_output_tokens: default_max_output_tokens(),
            temperature: default_temperature(),
            retry: None,
        }
    }

    pub fn with_context_window(mut self, tokens: usize) -> Self {
        self.context_window = Some(tokens);
        self
    }

    pub fn with_max_output_tokens(mut self, tokens: u32) -> Self {
        self.max_output_tokens = tokens;
        self
    }

    /// Effective context window: explicit value, else the preset table,
    /// else a conservative default.
    pub fn effective_context_window(&self) -> usize {
        self.context_window
            .or_else(|| context_window_for(&self.model_id))
            .unwrap_or(DEFAULT_CONTEXT_WINDOW)
    }
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_max_output_tokens() -> u32 {
    1024
}
fn default_temperature() -> f32 {
    0.0
}

/// Context window assumed for models missing from the preset table.
pub const DEFAULT_CONTEXT_WINDOW: usize = 8_192;

/// Known context windows by model id prefix. Longest prefixes first so
/// `gpt-4-32k` wins over `gpt-4`.
const CONTEXT_WINDOWS: &[(&str, usize)] = &[
    ("gpt-4-1106-preview", 128_000),
    ("gpt-4-32k", 32_768),
    ("gpt-4", 8_192),
    ("gpt-3.5-turbo", 16_385),
    ("claude-3", 50_000),
    ("claude-2.1", 50_000),
    ("mistral-7b", 32_768),
    ("mixtral", 32_768),
];

/// Look up the context window for a model id by prefix match.
pub fn context_window_for(model_id: &str) -> Option<usize> {
    let id = model_id.to_lowercase();
    CONTEXT_WINDOWS
        .iter()
        .find(|(prefix, _)| id.starts_with(prefix))
        .map(|(_, max)| *max)
}

/// Retry configuration for transient provider failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_initial_backoff() -> u64 {
    1000
}
fn default_max_backoff() -> u64 {
    30000
}

/// Load a [`ModelConfig`] from a TOML file.
pub fn load_model_config(path: &Path) -> Result<ModelConfig> {
    if !path.exists() {
        return Err(TrellisError::ConfigNotFound(path.display().to_string()));
    }
    let text = std::fs::read_to_string(path)?;
    toml::from_str(&text).map_err(|e| TrellisError::Config(e.to_string()))
}
