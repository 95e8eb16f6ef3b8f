//! Shared HTTP plumbing for the backends.

use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::Response;
use tracing::warn;

use scout_core::errors::ProviderError;

pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn map_send_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::NetworkError(format!("request timed out: {e}"))
    } else {
        ProviderError::NetworkError(e.to_string())
    }
}

/// Return the body of a 2xx response, or classify the failure by status.
pub(crate) async fn read_success_body(resp: Response) -> Result<String, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return resp
            .text()
            .await
            .map_err(|e| ProviderError::NetworkError(e.to_string()));
    }

    let retry_after = parse_retry_after(&resp);
    let body = resp.text().await.unwrap_or_default();
    warn!(status = status.as_u16(), body = %body, "backend returned error status");
    Err(ProviderError::from_status(status.as_u16(), body).with_retry_after(retry_after))
}

fn parse_retry_after(resp: &Response) -> Option<Duration> {
    resp.headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
