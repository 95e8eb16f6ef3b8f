use scout_core::tokens::TokenUsage;
use scout_settings::ProviderKind;

/// A model's context size and pricing (USD per million tokens).
#[derive(Clone, Debug)]
pub struct ModelInfo {
    pub name: &'static str,
    pub display_name: &'static str,
    pub provider: ProviderKind,
    pub context_window: usize,
    pub max_output: u32,
    pub input_cost_per_mtok: f64,
    pub output_cost_per_mtok: f64,
    pub cache_read_cost_per_mtok: f64,
    pub cache_write_cost_per_mtok: f64,
}

impl ModelInfo {
    pub fn calculate_cost(&self, usage: &TokenUsage) -> f64 {
        let per = |tokens: u32, rate: f64| tokens as f64 / 1_000_000.0 * rate;
        per(usage.input_tokens, self.input_cost_per_mtok)
            + per(usage.output_tokens, self.output_cost_per_mtok)
            + per(usage.cache_read_tokens, self.cache_read_cost_per_mtok)
            + per(usage.cache_creation_tokens, self.cache_write_cost_per_mtok)
    }
}

pub static CLAUDE_SONNET_4_5: ModelInfo = ModelInfo {
    name: "claude-sonnet-4-5-20250929",
    display_name: "Claude Sonnet 4.5",
    provider: ProviderKind::Anthropic,
    context_window: 200_000,
    max_output: 64_000,
    input_cost_per_mtok: 3.0,
    output_cost_per_mtok: 15.0,
    cache_read_cost_per_mtok: 0.3,
    cache_write_cost_per_mtok: 3.75,
};

pub static CLAUDE_OPUS_4_1: ModelInfo = ModelInfo {
    name: "claude-opus-4-1-20250805",
    display_name: "Claude Opus 4.1",
    provider: ProviderKind::Anthropic,
    context_window: 200_000,
    max_output: 32_000,
    input_cost_per_mtok: 15.0,
    output_cost_per_mtok: 75.0,
    cache_read_cost_per_mtok: 1.5,
    cache_write_cost_per_mtok: 18.75,
};

pub static CLAUDE_HAIKU_4_5: ModelInfo = ModelInfo {
    name: "claude-haiku-4-5-20251001",
    display_name: "Claude Haiku 4.5",
    provider: ProviderKind::Anthropic,
    context_window: 200_000,
    max_output: 64_000,
    input_cost_per_mtok: 1.0,
    output_cost_per_mtok: 5.0,
    cache_read_cost_per_mtok: 0.1,
    cache_write_cost_per_mtok: 1.25,
};

pub static GPT_4O: ModelInfo = ModelInfo {
    name: "gpt-4o",
    display_name: "GPT-4o",
    provider: ProviderKind::OpenAi,
    context_window: 128_000,
    max_output: 16_384,
    input_cost_per_mtok: 2.5,
    output_cost_per_mtok: 10.0,
    cache_read_cost_per_mtok: 1.25,
    cache_write_cost_per_mtok: 0.0,
};

pub static GPT_4O_MINI: ModelInfo = ModelInfo {
    name: "gpt-4o-mini",
    display_name: "GPT-4o mini",
    provider: ProviderKind::OpenAi,
    context_window: 128_000,
    max_output: 16_384,
    input_cost_per_mtok: 0.15,
    output_cost_per_mtok: 0.6,
    cache_read_cost_per_mtok: 0.075,
    cache_write_cost_per_mtok: 0.0,
};

pub static GPT_4_1: ModelInfo = ModelInfo {
    name: "gpt-4.1",
    display_name: "GPT-4.1",
    provider: ProviderKind::OpenAi,
    context_window: 1_047_576,
    max_output: 32_768,
    input_cost_per_mtok: 2.0,
    output_cost_per_mtok: 8.0,
    cache_read_cost_per_mtok: 0.5,
    cache_write_cost_per_mtok: 0.0,
};

static ALL_MODELS: &[&ModelInfo] = &[
    &CLAUDE_SONNET_4_5,
    &CLAUDE_OPUS_4_1,
    &CLAUDE_HAIKU_4_5,
    &GPT_4O,
    &GPT_4O_MINI,
    &GPT_4_1,
];

pub fn find_model(provider: ProviderKind, name: &str) -> Option<&'static ModelInfo> {
    ALL_MODELS
        .iter()
        .find(|m| m.provider == provider && m.name == name)
        .copied()
}

pub fn default_model(provider: ProviderKind) -> &'static ModelInfo {
    match provider {
        ProviderKind::Anthropic => &CLAUDE_SONNET_4_5,
        ProviderKind::OpenAi => &GPT_4O,
    }
}

/// Cost of one call. Models missing from the table cost nothing.
pub fn calculate_cost(provider: ProviderKind, model: &str, usage: &TokenUsage) -> f64 {
    find_model(provider, model).map_or(0.0, |m| m.calculate_cost(usage))
}

pub fn all_models() -> &'static [&'static ModelInfo] {
    ALL_MODELS
}
