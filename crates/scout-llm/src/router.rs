//! Single entry point for LLM calls.
//!
//! The router owns one backend (picked from settings), wraps it with retries
//! and applies the same pre/post processing regardless of which wire format
//! sits underneath.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{info, instrument};

use scout_core::errors::ProviderError;
use scout_core::messages::{normalize_messages_for_api, AssistantMessage};
use scout_core::provider::{CompletionRequest, LlmProvider};
use scout_settings::{ProviderKind, ProviderSettings};

use crate::anthropic::AnthropicProvider;
use crate::credential::Credential;
use crate::models;
use crate::openai::OpenAiProvider;
use crate::reliable::{ReliableConfig, ReliableProvider};
use crate::validate::validate_messages;

pub struct ProviderRouter {
    kind: ProviderKind,
    backend: Arc<dyn LlmProvider>,
}

impl ProviderRouter {
    /// Wrap an already-built backend. No retry layer is added.
    pub fn new(kind: ProviderKind, backend: Arc<dyn LlmProvider>) -> Self {
        Self { kind, backend }
    }

    /// Build the backend named by `settings.kind`, wrapped in a
    /// [`ReliableProvider`].
    pub fn from_config(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        let timeout = Duration::from_secs(settings.request_timeout_secs);
        let model = settings.model.as_deref();

        let backend: Arc<dyn LlmProvider> = match settings.kind {
            ProviderKind::Anthropic => {
                let key = settings
                    .api_key
                    .clone()
                    .filter(|k| !k.is_empty())
                    .ok_or_else(|| {
                        ProviderError::AuthenticationFailed(format!(
                            "no API key configured (set {})",
                            ProviderKind::Anthropic.api_key_env()
                        ))
                    })?;
                let mut provider = AnthropicProvider::new(Credential::detect(key), model)?
                    .with_max_tokens(settings.max_tokens)
                    .with_request_timeout(timeout)?;
                if let Some(url) = &settings.base_url {
                    provider = provider.with_base_url(url);
                }
                Arc::new(provider)
            }
            ProviderKind::OpenAi => {
                let mut provider = OpenAiProvider::new(settings.api_key.clone(), model)?
                    .with_max_tokens(settings.max_tokens)
                    .with_request_timeout(timeout)?;
                if let Some(url) = &settings.base_url {
                    provider = provider.with_base_url(url);
                }
                Arc::new(provider)
            }
        };

        let reliable = ReliableProvider::new(
            backend,
            ReliableConfig {
                max_retries: settings.max_retries,
                ..Default::default()
            },
        );

        info!(
            provider = %settings.kind,
            model = reliable.model(),
            "provider router configured"
        );
        Ok(Self::new(settings.kind, Arc::new(reliable)))
    }

    pub fn kind(&self) -> ProviderKind {
        self.kind
    }

    /// Normalize and validate the history, call the backend, then stamp
    /// duration and cost on the result.
    #[instrument(skip_all, fields(provider = %self.kind, model = self.backend.model()))]
    pub async fn query(
        &self,
        request: &CompletionRequest,
    ) -> Result<AssistantMessage, ProviderError> {
        let messages = normalize_messages_for_api(&request.messages);
        validate_messages(&messages)?;

        let request = CompletionRequest {
            messages,
            ..request.clone()
        };

        let started = Instant::now();
        let mut msg = self.backend.complete(&request).await?;

        msg.duration_ms = started.elapsed().as_millis() as u64;
        msg.cost_usd = models::calculate_cost(self.kind, self.backend.model(), &msg.usage);
        msg.ensure_content();

        info!(
            duration_ms = msg.duration_ms,
            cost_usd = msg.cost_usd,
            tool_uses = msg.tool_uses().len(),
            "llm call complete"
        );
        Ok(msg)
    }
}

/// Free-function form of [`ProviderRouter::query`].
pub async fn query_llm(
    router: &ProviderRouter,
    request: &CompletionRequest,
) -> Result<AssistantMessage, ProviderError> {
    router.query(request).await
}

#[async_trait]
impl LlmProvider for ProviderRouter {
    fn name(&self) -> &str {
        self.backend.name()
    }

    fn model(&self) -> &str {
        self.backend.model()
    }

    fn context_window(&self) -> usize {
        self.backend.context_window()
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<AssistantMessage, ProviderError> {
        self.query(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockProvider, MockResponse};
    use scout_core::ids::ToolUseId;
    use scout_core::messages::{
        AssistantContent, Message, ToolResultBlock, ToolUseBlock, NO_CONTENT_MESSAGE,
    };
    use scout_core::tokens::TokenUsage;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn router(mock: Arc<MockProvider>) -> ProviderRouter {
        ProviderRouter::new(ProviderKind::Anthropic, mock)
    }

    #[tokio::test]
    async fn empty_response_gets_placeholder() {
        let mock = Arc::new(MockProvider::new(vec![MockResponse::Message(
            AssistantMessage::new(vec![]),
        )]));
        let msg = router(mock)
            .query(&CompletionRequest::new(vec![Message::user_text("hi")], vec![]))
            .await
            .unwrap();
        assert_eq!(msg.text_content(), NO_CONTENT_MESSAGE);
    }

    #[tokio::test]
    async fn history_is_normalized_before_send() {
        let mock = Arc::new(MockProvider::new(vec![MockResponse::text("ok")]));
        let history = vec![
            Message::user_text("go"),
            Message::Assistant(AssistantMessage::new(vec![
                AssistantContent::ToolUse(ToolUseBlock {
                    id: ToolUseId::from_raw("a"),
                    name: "X".into(),
                    input: json!({}),
                }),
                AssistantContent::ToolUse(ToolUseBlock {
                    id: ToolUseId::from_raw("b"),
                    name: "X".into(),
                    input: json!({}),
                }),
            ])),
            Message::tool_results(vec![ToolResultBlock::success("a".into(), "1")]),
            Message::progress("b".into(), "..."),
            Message::tool_results(vec![ToolResultBlock::success("b".into(), "2")]),
        ];
        router(mock.clone())
            .query(&CompletionRequest::new(history, vec![]))
            .await
            .unwrap();

        let sent = &mock.requests()[0].messages;
        assert_eq!(sent.len(), 3);
    }

    #[tokio::test]
    async fn empty_message_rejected_without_calling_backend() {
        let mock = Arc::new(MockProvider::new(vec![MockResponse::text("unused")]));
        let err = router(mock.clone())
            .query(&CompletionRequest::new(vec![Message::user_text("   ")], vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::EmptyContent { index: 0, role: "user" }));
        assert_eq!(mock.call_count(), 0);
    }

    #[tokio::test]
    async fn cost_from_price_table() {
        let mock = Arc::new(MockProvider::new(vec![
            MockResponse::text("ok").with_usage(TokenUsage::new(1_000_000, 0)),
        ]));
        // MockProvider reports "mock-model", which is not priced.
        let msg = router(mock)
            .query(&CompletionRequest::new(vec![Message::user_text("hi")], vec![]))
            .await
            .unwrap();
        assert_eq!(msg.cost_usd, 0.0);
    }

    #[test]
    fn anthropic_without_key_fails() {
        let settings = ProviderSettings::default();
        let err = ProviderRouter::from_config(&settings).err().unwrap();
        assert!(matches!(err, ProviderError::AuthenticationFailed(_)));
    }

    #[tokio::test]
    async fn from_config_routes_to_openai_backend() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({"model": "gpt-4o-mini"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "choices": [{"message": {"content": "routed"}, "finish_reason": "stop"}],
                "usage": {"prompt_tokens": 1_000_000, "completion_tokens": 0}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let settings = ProviderSettings {
            kind: ProviderKind::OpenAi,
            model: Some("gpt-4o-mini".into()),
            base_url: Some(server.uri()),
            ..Default::default()
        };
        let router = ProviderRouter::from_config(&settings).unwrap();
        assert_eq!(router.kind(), ProviderKind::OpenAi);

        let msg = query_llm(
            &router,
            &CompletionRequest::new(vec![Message::user_text("hi")], vec![]),
        )
        .await
        .unwrap();
        assert_eq!(msg.text_content(), "routed");
        assert!((msg.cost_usd - 0.15).abs() < 1e-9);
    }

    #[tokio::test]
    async fn from_config_routes_to_anthropic_backend() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "content": [{"type": "text", "text": "claude"}],
                "usage": {"input_tokens": 1, "output_tokens": 1}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let settings = ProviderSettings {
            api_key: Some("sk-ant-api03-x".into()),
            base_url: Some(server.uri()),
            ..Default::default()
        };
        let router = ProviderRouter::from_config(&settings).unwrap();
        assert_eq!(router.model(), "claude-sonnet-4-5-20250929");
        let msg = router
            .query(&CompletionRequest::new(vec![Message::user_text("hi")], vec![]))
            .await
            .unwrap();
        assert_eq!(msg.text_content(), "claude");
    }
}
