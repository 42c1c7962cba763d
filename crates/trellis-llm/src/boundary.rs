use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use trellis_core::config::{ModelConfig, RetryConfig};
use trellis_core::error::{Result, TrellisError};
use trellis_core::traits::{ModelClient, UsageMeter};
use trellis_core::types::{ChatMessage, Completion, TokenUsage};

use crate::meter::NoopMeter;
use crate::shrink::{shrink_messages, shrink_messages_by};
use crate::tokenizer::Tokenizer;

/// The seam between the graph and an LLM provider.
///
/// Wraps an opaque [`ModelClient`] with the three recovery layers the
/// engine relies on: proactive message shrinking against the model's
/// context window, feedback-driven re-shrinking when the provider reports
/// its own (authoritative) overflow, and backoff retry on transient
/// failures. Usage is fed to the injected meter on every successful call.
pub struct ModelBoundary {
    client: Arc<dyn ModelClient>,
    config: ModelConfig,
    retry: RetryConfig,
    tokenizer: Tokenizer,
    meter: Arc<dyn UsageMeter>,
}

impl ModelBoundary {
    pub fn new(client: Arc<dyn ModelClient>, config: ModelConfig) -> Self {
        let retry = config.retry.clone().unwrap_or_default();
        Self {
            client,
            config,
            retry,
            tokenizer: Tokenizer::new(),
            meter: Arc::new(NoopMeter),
        }
    }

    pub fn with_meter(mut self, meter: Arc<dyn UsageMeter>) -> Self {
        self.meter = meter;
        self
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    /// Send a composed message sequence to the model and return its reply.
    ///
    /// Blocks the round for the duration of the call, including any
    /// internal backoff sleeps. `shrink_idx` marks the message truncated
    /// first if the sequence exceeds the context budget.
    pub async fn invoke(
        &self,
        messages: Vec<ChatMessage>,
        shrink_idx: usize,
    ) -> Result<Completion> {
        let budget = self
            .config
            .effective_context_window()
            .saturating_sub(self.config.max_output_tokens as usize);
        let mut messages = shrink_messages(&self.tokenizer, messages, shrink_idx, budget)?;

        let mut attempt = 0u32;
        loop {
            let call = self.client.complete(
                messages.clone(),
                self.config.max_output_tokens,
                self.config.temperature,
            );
            match call.await {
                Ok(mut completion) => {
                    if completion.usage.is_none() {
                        // Provider did not meter; estimate locally.
                        completion.usage = Some(TokenUsage {
                            prompt_tokens: self.tokenizer.count_messages(&messages) as u64,
                            completion_tokens: self.tokenizer.count(&completion.text) as u64,
                        });
                    }
                    if let Some(usage) = &completion.usage {
                        self.meter.record(&self.config.model_id, usage);
                    }
                    return Ok(completion);
                }
                Err(TrellisError::ContextOverflow {
                    prompt_tokens,
                    max_tokens,
                }) => {
                    // The server-side count is authoritative; cut exactly
                    // the reported overflow and go again.
                    let overflow = prompt_tokens.saturating_sub(max_tokens);
                    if overflow == 0 {
                        return Err(TrellisError::ContextOverflow {
                            prompt_tokens,
                            max_tokens,
                        });
                    }
                    warn!(
                        prompt_tokens,
                        max_tokens, "Provider reported context overflow, re-shrinking"
                    );
                    messages =
                        shrink_messages_by(&self.tokenizer, messages, shrink_idx, overflow)?;
                }
                Err(e) if is_transient(&e) && attempt < self.retry.max_retries => {
                    let backoff = calculate_backoff(attempt, &self.retry);
                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.retry.max_retries,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Retrying model request"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn is_transient(e: &TrellisError) -> bool {
    match e {
        TrellisError::ModelRequest(msg) => {
            msg.contains("429")
                || msg.contains("500")
                || msg.contains("502")
                || msg.contains("503")
                || msg.contains("timeout")
                || msg.contains("connection")
                || msg.contains("rate limit")
        }
        _ => false,
    }
}

fn calculate_backoff(attempt: u32, config: &RetryConfig) -> Duration {
    let ms = (config.initial_backoff_ms * 2u64.pow(attempt)).min(config.max_backoff_ms);
    // Add jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}
