use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::warn;

use scout_core::errors::ProviderError;
use scout_core::messages::AssistantMessage;
use scout_core::provider::{CompletionRequest, LlmProvider};

/// Retry behavior for [`ReliableProvider`].
#[derive(Clone, Debug)]
pub struct ReliableConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter_factor: f64,
}

impl Default for ReliableConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.2,
        }
    }
}

/// Wraps an [`LlmProvider`] with retry logic.
///
/// - Retries retryable errors with exponential backoff + jitter
/// - Respects `retry_after` hints from rate limit responses
/// - Fatal and operational errors are returned immediately
pub struct ReliableProvider {
    inner: Arc<dyn LlmProvider>,
    config: ReliableConfig,
    total_retries: AtomicU64,
}

impl ReliableProvider {
    pub fn new(inner: Arc<dyn LlmProvider>, config: ReliableConfig) -> Self {
        Self {
            inner,
            config,
            total_retries: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(inner: Arc<dyn LlmProvider>) -> Self {
        Self::new(inner, ReliableConfig::default())
    }

    /// Delay before retry number `attempt` (zero-based).
    fn retry_delay(&self, attempt: u32, suggested: Option<Duration>) -> Duration {
        if let Some(delay) = suggested {
            return delay;
        }

        let exp_delay = self.config.base_delay.as_millis() as f64 * 2.0_f64.powi(attempt as i32);
        let capped = exp_delay.min(self.config.max_delay.as_millis() as f64);

        let jitter_range = capped * self.config.jitter_factor;
        let jitter = if jitter_range > 0.0 {
            rand::thread_rng().gen_range(-jitter_range..=jitter_range)
        } else {
            0.0
        };
        let final_ms = (capped + jitter).max(1.0);

        Duration::from_millis(final_ms as u64)
    }

    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl LlmProvider for ReliableProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }

    fn context_window(&self) -> usize {
        self.inner.context_window()
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<AssistantMessage, ProviderError> {
        let mut attempt = 0;
        loop {
            match self.inner.complete(request).await {
                Ok(msg) => return Ok(msg),
                Err(e) if !e.is_retryable() || attempt >= self.config.max_retries => {
                    return Err(e)
                }
                Err(e) => {
                    let delay = self.retry_delay(attempt, e.suggested_delay());
                    self.total_retries.fetch_add(1, Ordering::Relaxed);

                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.config.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after error"
                    );

                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockProvider, MockResponse};
    use scout_core::messages::Message;

    fn server_error() -> MockResponse {
        MockResponse::Error(ProviderError::ServerError {
            status: 500,
            body: "internal".into(),
        })
    }

    fn req() -> CompletionRequest {
        CompletionRequest::new(vec![Message::user_text("hi")], vec![])
    }

    fn fast_config(max_retries: u32) -> ReliableConfig {
        ReliableConfig {
            max_retries,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn success_on_first_try() {
        let mock = Arc::new(MockProvider::new(vec![MockResponse::text("hello")]));
        let reliable = ReliableProvider::with_defaults(mock.clone());

        let msg = reliable.complete(&req()).await.unwrap();
        assert_eq!(msg.text_content(), "hello");
        assert_eq!(reliable.total_retries(), 0);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_on_retryable_error() {
        let mock = Arc::new(MockProvider::new(vec![
            server_error(),
            server_error(),
            MockResponse::text("recovered"),
        ]));
        let reliable = ReliableProvider::new(mock.clone(), fast_config(3));

        let msg = reliable.complete(&req()).await.unwrap();
        assert_eq!(msg.text_content(), "recovered");
        assert_eq!(reliable.total_retries(), 2);
        assert_eq!(mock.call_count(), 3);
    }

    #[tokio::test]
    async fn fatal_error_not_retried() {
        let mock = Arc::new(MockProvider::new(vec![
            MockResponse::Error(ProviderError::AuthenticationFailed("bad key".into())),
            MockResponse::text("should not reach"),
        ]));
        let reliable = ReliableProvider::with_defaults(mock.clone());

        let err = reliable.complete(&req()).await.unwrap_err();
        assert!(matches!(err, ProviderError::AuthenticationFailed(_)));
        assert_eq!(reliable.total_retries(), 0);
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn max_retries_exhausted() {
        let mock = Arc::new(MockProvider::new(vec![
            server_error(),
            server_error(),
            server_error(),
            server_error(),
        ]));
        let reliable = ReliableProvider::new(mock.clone(), fast_config(3));

        let err = reliable.complete(&req()).await.unwrap_err();
        assert!(matches!(err, ProviderError::ServerError { status: 500, .. }));
        assert_eq!(reliable.total_retries(), 3);
        assert_eq!(mock.call_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn honors_retry_after() {
        let mock = Arc::new(MockProvider::new(vec![
            MockResponse::Error(ProviderError::RateLimited {
                retry_after: Some(Duration::from_secs(20)),
            }),
            MockResponse::text("ok"),
        ]));
        let reliable = ReliableProvider::new(mock, fast_config(1));

        let start = tokio::time::Instant::now();
        reliable.complete(&req()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(20));
    }

    #[test]
    fn retry_delay_exponential_backoff() {
        let config = ReliableConfig {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            jitter_factor: 0.0,
            ..Default::default()
        };
        let reliable = ReliableProvider::new(Arc::new(MockProvider::new(vec![])), config);

        assert_eq!(reliable.retry_delay(0, None).as_millis(), 100);
        assert_eq!(reliable.retry_delay(1, None).as_millis(), 200);
        assert_eq!(reliable.retry_delay(2, None).as_millis(), 400);
    }

    #[test]
    fn retry_delay_capped_at_max() {
        let config = ReliableConfig {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            jitter_factor: 0.0,
            ..Default::default()
        };
        let reliable = ReliableProvider::new(Arc::new(MockProvider::new(vec![])), config);
        assert_eq!(reliable.retry_delay(10, None).as_millis(), 5000);
    }

    #[test]
    fn jitter_stays_in_range() {
        let reliable = ReliableProvider::with_defaults(Arc::new(MockProvider::new(vec![])));
        for _ in 0..50 {
            let d = reliable.retry_delay(0, None).as_millis();
            assert!((800..=1200).contains(&d), "delay {d} outside jitter window");
        }
    }

    #[test]
    fn provider_delegates_properties() {
        let reliable = ReliableProvider::with_defaults(Arc::new(MockProvider::new(vec![])));
        assert_eq!(reliable.name(), "mock");
        assert_eq!(reliable.model(), "mock-model");
        assert_eq!(reliable.context_window(), 200_000);
    }
}
