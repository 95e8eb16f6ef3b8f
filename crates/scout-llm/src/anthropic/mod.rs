//! Anthropic Messages API backend.

pub mod converter;
mod provider;

pub use converter::OAUTH_SYSTEM_PREAMBLE;
pub use provider::{AnthropicProvider, DEFAULT_BASE_URL};
