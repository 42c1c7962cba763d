use futures::future::BoxFuture;

use crate::error::Result;
use crate::types::{ChatMessage, Completion, TokenUsage};

/// Opaque LLM provider capability.
///
/// The engine treats the provider as a black box that may block for the
/// duration of a network call. Implementations must surface a provider-side
/// context-window rejection as [`TrellisError::ContextOverflow`] carrying
/// the provider-reported token counts, so the invocation boundary can
/// shrink by the exact overflow and retry.
///
/// [`TrellisError::ContextOverflow`]: crate::error::TrellisError::ContextOverflow
pub trait ModelClient: Send + Sync + 'static {
    /// Send a chat request and wait for the full completion.
    fn complete(
        &self,
        messages: Vec<ChatMessage>,
        max_output_tokens: u32,
        temperature: f32,
    ) -> BoxFuture<'_, Result<Completion>>;
}

/// Token-usage accumulator injected into the invocation boundary.
///
/// Replaces process-global counters so tests can substitute a no-op or an
/// in-memory meter. A concurrent deployment must make `record` atomic; the
/// engine itself calls it from a single sequential round.
pub trait UsageMeter: Send + Sync + 'static {
    fn record(&self, model: &str, usage: &TokenUsage);
}
