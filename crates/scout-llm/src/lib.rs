pub mod anthropic;
pub mod credential;
mod http;
pub mod models;
pub mod openai;
pub mod reliable;
pub mod router;
pub mod validate;

pub mod mock;

pub use anthropic::AnthropicProvider;
pub use credential::Credential;
pub use mock::{MockProvider, MockResponse};
pub use openai::OpenAiProvider;
pub use reliable::{ReliableConfig, ReliableProvider};
pub use router::{query_llm, ProviderRouter};
