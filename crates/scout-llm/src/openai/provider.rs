use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, instrument};

use scout_core::errors::ProviderError;
use scout_core::messages::AssistantMessage;
use scout_core::provider::{CompletionRequest, LlmProvider};
use scout_settings::ProviderKind;

use super::converter;
use crate::http::{self, CONNECT_TIMEOUT};
use crate::models;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Fallback window for models missing from the table (local servers etc).
const UNKNOWN_MODEL_CONTEXT: usize = 128_000;

pub struct OpenAiProvider {
    client: Client,
    /// Optional: local compatible servers often run without auth.
    api_key: Option<SecretString>,
    base_url: String,
    model: String,
    context_window: usize,
    max_tokens: u32,
}

impl OpenAiProvider {
    pub fn new(api_key: Option<String>, model: Option<&str>) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        let model = model
            .map(str::to_owned)
            .unwrap_or_else(|| models::default_model(ProviderKind::OpenAi).name.to_owned());
        let context_window = models::find_model(ProviderKind::OpenAi, &model)
            .map_or(UNKNOWN_MODEL_CONTEXT, |m| m.context_window);

        Ok(Self {
            client,
            api_key: api_key.filter(|k| !k.is_empty()).map(SecretString::from),
            base_url: DEFAULT_BASE_URL.to_owned(),
            model,
            context_window,
            max_tokens: 8192,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_owned();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Result<Self, ProviderError> {
        self.client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;
        Ok(self)
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn context_window(&self) -> usize {
        self.context_window
    }

    #[instrument(skip(self, request), fields(model = %self.model, messages = request.messages.len()))]
    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<AssistantMessage, ProviderError> {
        let body = converter::build_request_body(request, &self.model, self.max_tokens);

        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key.expose_secret());
        }

        let resp = req.send().await.map_err(http::map_send_error)?;
        let text = http::read_success_body(resp).await?;
        let msg = converter::parse_response(&text)?;
        debug!(
            input_tokens = msg.usage.input_tokens,
            output_tokens = msg.usage.output_tokens,
            tool_calls = msg.tool_uses().len(),
            "openai response"
        );
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_core::messages::Message;
    use serde_json::json;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> CompletionRequest {
        CompletionRequest::new(vec![Message::user_text("hi")], vec![])
    }

    fn ok_body() -> serde_json::Value {
        json!({
            "choices": [{"message": {"role": "assistant", "content": "hey"}, "finish_reason": "stop"}],
            "usage": {"prompt_tokens": 5, "completion_tokens": 1}
        })
    }

    #[tokio::test]
    async fn sends_bearer_when_key_present() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
            .expect(1)
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new(Some("sk-test".into()), None)
            .unwrap()
            .with_base_url(server.uri());
        let msg = provider.complete(&request()).await.unwrap();
        assert_eq!(msg.text_content(), "hey");
        assert_eq!(provider.model(), "gpt-4o");
        assert_eq!(provider.context_window(), 128_000);
    }

    #[tokio::test]
    async fn keyless_compatible_server() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header_exists("authorization"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(ok_body()))
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new(None, Some("llama3"))
            .unwrap()
            .with_base_url(format!("{}/", server.uri()));
        let msg = provider.complete(&request()).await.unwrap();
        assert_eq!(msg.usage.input_tokens, 5);
        assert_eq!(provider.context_window(), UNKNOWN_MODEL_CONTEXT);
    }

    #[tokio::test]
    async fn server_error_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let provider = OpenAiProvider::new(None, None)
            .unwrap()
            .with_base_url(server.uri());
        let err = provider.complete(&request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::ServerError { status: 503, .. }));
        assert!(err.is_retryable());
    }
}
