use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;

use trellis_core::traits::UsageMeter;
use trellis_core::types::TokenUsage;

/// Meter that discards all usage.
#[derive(Debug, Default)]
pub struct NoopMeter;

impl UsageMeter for NoopMeter {
    fn record(&self, _model: &str, _usage: &TokenUsage) {}
}

/// Accumulated usage for one model.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct UsageTotals {
    pub calls: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
}

/// In-memory accumulator keyed by model id.
#[derive(Debug, Default)]
pub struct MemoryMeter {
    totals: Mutex<HashMap<String, UsageTotals>>,
}

impl MemoryMeter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> HashMap<String, UsageTotals> {
        self.totals.lock().expect("meter lock poisoned").clone()
    }
}

impl UsageMeter for MemoryMeter {
    fn record(&self, model: &str, usage: &TokenUsage) {
        let mut totals = self.totals.lock().expect("meter lock poisoned");
        let entry = totals.entry(model.to_string()).or_default();
        entry.calls += 1;
        entry.prompt_tokens += usage.prompt_tokens;
        entry.completion_tokens += usage.completion_tokens;
    }
}
