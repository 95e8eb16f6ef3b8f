use serde::{Deserialize, Serialize};

/// Per-call token usage as reported by the backend.
///
/// For the Anthropic family `input_tokens` excludes cached tokens, so the
/// four fields are disjoint and their sum is the context the call occupied.
/// The OpenAI converter splits cached prompt tokens out of `input_tokens`
/// to keep the same shape.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    #[serde(default)]
    pub cache_read_tokens: u32,
    #[serde(default)]
    pub cache_creation_tokens: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            ..Default::default()
        }
    }

    /// input + cache creation + cache read + output.
    pub fn total(&self) -> u64 {
        self.input_tokens as u64
            + self.cache_creation_tokens as u64
            + self.cache_read_tokens as u64
            + self.output_tokens as u64
    }

    pub fn is_zero(&self) -> bool {
        self.total() == 0
    }
}

/// Session-level totals, summed across calls.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AccumulatedUsage {
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_cache_read_tokens: u64,
    pub total_cache_creation_tokens: u64,
    pub total_cost_usd: f64,
    pub call_count: u32,
}

impl AccumulatedUsage {
    pub fn accumulate(&mut self, usage: &TokenUsage, cost_usd: f64) {
        self.total_input_tokens += usage.input_tokens as u64;
        self.total_output_tokens += usage.output_tokens as u64;
        self.total_cache_read_tokens += usage.cache_read_tokens as u64;
        self.total_cache_creation_tokens += usage.cache_creation_tokens as u64;
        self.total_cost_usd += cost_usd;
        self.call_count += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_sums_all_four_fields() {
        let usage = TokenUsage {
            input_tokens: 1000,
            output_tokens: 500,
            cache_read_tokens: 2000,
            cache_creation_tokens: 3000,
        };
        assert_eq!(usage.total(), 6500);
    }

    #[test]
    fn total_does_not_overflow_u32() {
        let usage = TokenUsage {
            input_tokens: u32::MAX,
            output_tokens: u32::MAX,
            cache_read_tokens: 0,
            cache_creation_tokens: 0,
        };
        assert_eq!(usage.total(), 2 * u32::MAX as u64);
    }

    #[test]
    fn default_is_zero() {
        assert!(TokenUsage::default().is_zero());
        assert!(!TokenUsage::new(1, 0).is_zero());
    }

    #[test]
    fn cache_fields_default_when_missing() {
        let usage: TokenUsage =
            serde_json::from_str(r#"{"input_tokens": 10, "output_tokens": 5}"#).unwrap();
        assert_eq!(usage.cache_read_tokens, 0);
        assert_eq!(usage.cache_creation_tokens, 0);
    }

    #[test]
    fn accumulated_multi_call() {
        let mut acc = AccumulatedUsage::default();
        acc.accumulate(
            &TokenUsage {
                input_tokens: 100,
                output_tokens: 50,
                cache_read_tokens: 200,
                cache_creation_tokens: 0,
            },
            0.01,
        );
        acc.accumulate(
            &TokenUsage {
                input_tokens: 150,
                output_tokens: 75,
                cache_read_tokens: 200,
                cache_creation_tokens: 50,
            },
            0.02,
        );
        assert_eq!(acc.total_input_tokens, 250);
        assert_eq!(acc.total_output_tokens, 125);
        assert_eq!(acc.total_cache_read_tokens, 400);
        assert_eq!(acc.total_cache_creation_tokens, 50);
        assert_eq!(acc.call_count, 2);
        assert!((acc.total_cost_usd - 0.03).abs() < 1e-9);
    }
}
