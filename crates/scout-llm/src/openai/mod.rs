//! OpenAI chat-completions backend, also used for compatible servers.

pub mod converter;
mod provider;

pub use provider::{OpenAiProvider, DEFAULT_BASE_URL};
