use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use scout_core::errors::ProviderError;
use scout_core::ids::ToolUseId;
use scout_core::messages::{AssistantContent, AssistantMessage, StopReason, ToolUseBlock};
use scout_core::provider::{CompletionRequest, LlmProvider};
use scout_core::tokens::TokenUsage;

/// Pre-programmed responses for deterministic testing without API calls.
pub enum MockResponse {
    Message(AssistantMessage),
    Error(ProviderError),
    /// Wait a duration, then produce the inner response.
    Delay(Duration, Box<MockResponse>),
    /// Never resolves. Useful for cancellation tests.
    Pending,
}

impl MockResponse {
    pub fn text(text: &str) -> Self {
        Self::Message(AssistantMessage::text(text))
    }

    /// An assistant turn requesting the given tools, in order.
    pub fn tool_uses(calls: Vec<(&str, &str, Value)>) -> Self {
        let content = calls
            .into_iter()
            .map(|(id, name, input)| {
                AssistantContent::ToolUse(ToolUseBlock {
                    id: ToolUseId::from_raw(id),
                    name: name.to_string(),
                    input,
                })
            })
            .collect();
        let mut msg = AssistantMessage::new(content);
        msg.stop_reason = Some(StopReason::ToolUse);
        Self::Message(msg)
    }

    /// Attach usage to a message response. No-op for other variants.
    pub fn with_usage(self, usage: TokenUsage) -> Self {
        match self {
            Self::Message(msg) => Self::Message(msg.with_usage(usage)),
            Self::Delay(d, inner) => Self::Delay(d, Box::new(inner.with_usage(usage))),
            other => other,
        }
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock provider that returns pre-programmed responses in sequence and
/// records every request it receives.
pub struct MockProvider {
    responses: Mutex<VecDeque<MockResponse>>,
    requests: Mutex<Vec<CompletionRequest>>,
    context_window: usize,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
            context_window: 200_000,
        }
    }

    pub fn with_context_window(mut self, context_window: usize) -> Self {
        self.context_window = context_window;
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    fn context_window(&self) -> usize {
        self.context_window
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<AssistantMessage, ProviderError> {
        let idx = {
            let mut requests = self.requests.lock();
            requests.push(request.clone());
            requests.len() - 1
        };

        let mut response = self.responses.lock().pop_front().ok_or_else(|| {
            ProviderError::InvalidRequest(format!(
                "MockProvider: no response configured for call {idx}"
            ))
        })?;

        loop {
            match response {
                MockResponse::Message(msg) => return Ok(msg),
                MockResponse::Error(e) => return Err(e),
                MockResponse::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    response = *inner;
                }
                MockResponse::Pending => return std::future::pending().await,
            }
        }
    }
}
