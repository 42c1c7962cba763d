use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use trellis_core::error::Result;
use trellis_core::store::ContextStore;
use trellis_core::types::{ChatMessage, TokenUsage};
use trellis_llm::ModelBoundary;

use crate::after_query::AfterQuery;
use crate::compose::{ComposePrompt, DepSnapshot};
use crate::mutation::GraphMutation;

/// Result text used when validation still fails on the final attempt. The
/// round keeps moving; downstream composers see this sentinel instead of
/// an error.
pub const DEGRADED_RESULT: &str = "N/A";

const MAX_ATTEMPTS: usize = 3;

/// Per-node usage summary.
#[derive(Debug, Clone, Copy, Default)]
pub struct NodeUsage {
    pub calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// A unit of scheduled work: one prompt, producing one text result per
/// round.
///
/// Adjacency is stored as key lists on the node itself; the graph owns
/// all edge bookkeeping and the node never mutates it.
pub struct Node {
    key: String,
    prompt: String,
    pub(crate) adjacent_to: Vec<String>,
    pub(crate) adjacent_from: Vec<String>,
    pub(crate) evaluate_after: Vec<String>,
    result: Option<String>,
    rendered_prompt: Option<String>,
    skip_pending: bool,
    usage_log: Vec<TokenUsage>,
    composer: Box<dyn ComposePrompt>,
    after_query: Option<Box<dyn AfterQuery>>,
    model: Arc<ModelBoundary>,
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("key", &self.key)
            .field("adjacent_from", &self.adjacent_from)
            .field("evaluate_after", &self.evaluate_after)
            .field("has_result", &self.result.is_some())
            .field("skip_pending", &self.skip_pending)
            .finish()
    }
}

impl Node {
    pub fn new(
        key: impl Into<String>,
        prompt: impl Into<String>,
        composer: Box<dyn ComposePrompt>,
        model: Arc<ModelBoundary>,
    ) -> Self {
        Self {
            key: key.into(),
            prompt: prompt.into(),
            adjacent_to: Vec::new(),
            adjacent_from: Vec::new(),
            evaluate_after: Vec::new(),
            result: None,
            rendered_prompt: None,
            skip_pending: false,
            usage_log: Vec::new(),
            composer,
            after_query: None,
            model,
        }
    }

    pub fn with_after_query(mut self, after_query: Box<dyn AfterQuery>) -> Self {
        self.after_query = Some(after_query);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Last computed output; `None` until first evaluated.
    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }

    /// The prompt as last rendered by the composer.
    pub fn rendered_prompt(&self) -> Option<&str> {
        self.rendered_prompt.as_deref()
    }

    /// Accumulated token usage since construction.
    pub fn usage_totals(&self) -> NodeUsage {
        NodeUsage {
            calls: self.usage_log.len() as u64,
            prompt_tokens: self.usage_log.iter().map(|u| u.prompt_tokens).sum(),
            completion_tokens: self.usage_log.iter().map(|u| u.completion_tokens).sum(),
        }
    }

    /// Arm the one-shot skip flag: the next evaluation reuses the cached
    /// result without a model call.
    ///
    /// # Panics
    ///
    /// Panics if the node has never been evaluated.
    pub(crate) fn mark_skip(&mut self) {
        assert!(
            self.result.is_some(),
            "Attempting to skip node '{}' that has never been evaluated",
            self.key
        );
        self.skip_pending = true;
    }

    /// Compose, invoke, and validate, with at most [`MAX_ATTEMPTS`]
    /// attempts.
    ///
    /// Each retry rebuilds the request from the original composed
    /// messages plus exactly two repair turns (the rejected output and
    /// the validator's feedback), so every attempt is reproducible.
    /// Returns the result text together with any graph mutations the
    /// validator requested. The graph guarantees every dependency in
    /// `deps` already has a result.
    pub(crate) async fn evaluate(
        &mut self,
        deps: &[DepSnapshot],
        store: &mut ContextStore,
    ) -> Result<(String, Vec<GraphMutation>)> {
        if self.skip_pending {
            self.skip_pending = false;
            let cached = self
                .result
                .clone()
                .expect("skip flag set without a cached result");
            debug!(node = %self.key, "Skipping node, reusing previous result");
            return Ok((cached, Vec::new()));
        }

        let composed = self.composer.compose(deps, &self.prompt, store);
        self.rendered_prompt = Some(composed.rendered_prompt.clone());
        if !composed.lookups.is_empty() {
            debug!(node = %self.key, lookups = ?composed.lookups, "Resolved store placeholders");
        }

        let mut repair: Option<(String, String)> = None;
        for attempt in 1..=MAX_ATTEMPTS {
            let mut messages = composed.messages.clone();
            if let Some((prior, feedback)) = &repair {
                messages.push(ChatMessage::assistant(prior));
                messages.push(ChatMessage::user(feedback));
            }

            let completion = self.model.invoke(messages, composed.shrink_idx).await?;
            if let Some(usage) = completion.usage {
                self.usage_log.push(usage);
            }
            let raw = completion.text;
            self.result = Some(raw.clone());

            let Some(after_query) = &self.after_query else {
                return Ok((raw, Vec::new()));
            };
            match after_query.validate(&raw, store) {
                Ok(validated) => {
                    let text = validated.text.unwrap_or(raw);
                    self.result = Some(text.clone());
                    return Ok((text, validated.mutations));
                }
                Err(err) => {
                    debug!(
                        node = %self.key,
                        attempt,
                        error = %err.diagnostic,
                        "Validation failed"
                    );
                    if attempt == MAX_ATTEMPTS {
                        warn!(
                            node = %self.key,
                            error = %err.diagnostic,
                            "Validation failed on final attempt, degrading to sentinel"
                        );
                        self.result = Some(DEGRADED_RESULT.to_string());
                        return Ok((DEGRADED_RESULT.to_string(), Vec::new()));
                    }
                    repair = Some((raw, err.feedback));
                }
            }
        }
        unreachable!("attempt loop returns on every path")
    }
}
