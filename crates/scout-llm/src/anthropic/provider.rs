use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument};

use scout_core::errors::ProviderError;
use scout_core::messages::AssistantMessage;
use scout_core::provider::{CompletionRequest, LlmProvider};
use scout_settings::ProviderKind;

use super::converter;
use crate::credential::Credential;
use crate::http::{self, CONNECT_TIMEOUT};
use crate::models::{self, ModelInfo};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const OAUTH_BETA: &str = "oauth-2025-04-20";

pub struct AnthropicProvider {
    client: Client,
    credential: Credential,
    base_url: String,
    model: String,
    context_window: usize,
    max_tokens: u32,
}

impl AnthropicProvider {
    /// `model` of `None` selects the default Claude model.
    pub fn new(credential: Credential, model: Option<&str>) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::NetworkError(e.to_string()))?;

        let info: Option<&ModelInfo> = match model {
            Some(name) => models::find_model(ProviderKind::Anthropic, name),
            None => Some(models::default_model(ProviderKind::Anthropic)),
        };
        let model = model
            .map(str::to_owned)
            .or_else(|| info.map(|m| m.name.to_owned()))
            .unwrap_or_default();

        Ok(Self {
            client,
            credential,
            base_url: DEFAULT_BASE_URL.to_owned(),
            context_window: info.map_or(200_000, |m| m.context_window),
            max_tokens: 8192,
            model,
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

    fn build_request(&self, request: &CompletionRequest) -> reqwest::RequestBuilder {
        let is_oauth = self.credential.is_oauth();
        let body = converter::build_request_body(request, &self.model, self.max_tokens, is_oauth);

        let mut req = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json");

        req = match &self.credential {
            Credential::OAuthToken(_) => req
                .bearer_auth(self.credential.expose())
                .header("anthropic-beta", OAUTH_BETA),
            Credential::ApiKey(_) => req.header("x-api-key", self.credential.expose()),
        };

        req.json(&body)
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
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
        let resp = self
            .build_request(request)
            .send()
            .await
            .map_err(http::map_send_error)?;

        let body = http::read_success_body(resp).await?;
        let msg = converter::parse_response(&body)?;
        debug!(
            input_tokens = msg.usage.input_tokens,
            output_tokens = msg.usage.output_tokens,
            "anthropic response"
        );
        Ok(msg)
    }
}
