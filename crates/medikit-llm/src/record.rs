//! Structured generation records.
//!
//! Every LLM call emits one of these with stable field names; downstream
//! log processing keys on `trace_id`, `stage`, `latency_ms`, `tokens`,
//! `cache_hit`, and `error`.

use serde::{Deserialize, Serialize};
use tracing::info;

/// Rough token estimate used when the provider omits usage fields.
pub fn estimate_tokens(text: &str) -> u32 {
    (text.split_whitespace().count() as f64 * 1.3).round() as u32
}

/// Cost per 1K tokens in CNY, input and output priced alike.
const COST_PER_1K_TOKENS: f64 = 0.008;

/// One generation, cached or live.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRecord {
    pub trace_id: String,
    pub stage: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
    pub estimated_cost: f64,
    pub first_token_latency_ms: u64,
    pub latency_ms: u64,
    pub cache_hit: bool,
    pub error: bool,
}

impl GenerationRecord {
    pub fn new(trace_id: &str, stage: &str, model: &str) -> Self {
        Self {
            trace_id: trace_id.to_string(),
            stage: stage.to_string(),
            model: model.to_string(),
            temperature: 0.0,
            max_tokens: 0,
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
            estimated_cost: 0.0,
            first_token_latency_ms: 0,
            latency_ms: 0,
            cache_hit: false,
            error: false,
        }
    }

    /// Fill token and cost estimates from the request/response text.
    pub fn with_usage(mut self, input: &str, output: &str) -> Self {
        self.input_tokens = estimate_tokens(input);
        self.output_tokens = estimate_tokens(output);
        self.total_tokens = self.input_tokens + self.output_tokens;
        self.estimated_cost = f64::from(self.total_tokens) / 1000.0 * COST_PER_1K_TOKENS;
        self
    }

    /// Emit the record through the structured log layer.
    pub fn emit(&self) {
        info!(
            trace_id = %self.trace_id,
            stage = %self.stage,
            model = %self.model,
            temperature = self.temperature,
            max_tokens = self.max_tokens,
            tokens = self.total_tokens,
            input_tokens = self.input_tokens,
            output_tokens = self.output_tokens,
            estimated_cost = self.estimated_cost,
            first_token_latency_ms = self.first_token_latency_ms,
            latency_ms = self.latency_ms,
            cache_hit = self.cache_hit,
            error = self.error,
            "llm generation"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_estimate_scales_with_words() {
        assert_eq!(estimate_tokens("one two three four"), 5); // 4 * 1.3 ≈ 5
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn usage_fills_totals_and_cost() {
        let record =
            GenerationRecord::new("t-1", "llm.generate", "qwen-turbo").with_usage("a b c", "d e");
        assert_eq!(record.input_tokens, 4); // 3 * 1.3 ≈ 4
        assert_eq!(record.output_tokens, 3); // 2 * 1.3 ≈ 3
        assert_eq!(record.total_tokens, 7);
        assert!(record.estimated_cost > 0.0);
    }
}
