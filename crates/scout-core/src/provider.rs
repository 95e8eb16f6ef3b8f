use async_trait::async_trait;

use crate::errors::ProviderError;
use crate::messages::{AssistantMessage, Message};
use crate::tools::ToolDefinition;

/// A provider-agnostic completion call.
#[derive(Clone, Debug, Default)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    /// System prompt, one entry per block.
    pub system_prompt: Vec<String>,
    pub tools: Vec<ToolDefinition>,
    /// Extended-thinking budget. Zero disables thinking.
    pub max_thinking_tokens: u32,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>, system_prompt: Vec<String>) -> Self {
        Self {
            messages,
            system_prompt,
            ..Default::default()
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_thinking(mut self, max_thinking_tokens: u32) -> Self {
        self.max_thinking_tokens = max_thinking_tokens;
        self
    }
}

/// Implemented by each LLM backend (Anthropic, OpenAI-compatible).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;
    fn context_window(&self) -> usize;

    /// Send one request and return the full assistant turn.
    async fn complete(&self, request: &CompletionRequest)
        -> Result<AssistantMessage, ProviderError>;
}
