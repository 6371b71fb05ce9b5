//! JSON-over-HTTP calls to remote providers with retry and backoff.
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors (including timeouts) → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;
use tracing::warn;

use crate::error::ProviderError;

pub(crate) fn client(timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

pub(crate) async fn post_json(
    client: &reqwest::Client,
    provider: &str,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
) -> Result<serde_json::Value, ProviderError> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut request = client
            .post(url)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(key) = bearer {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response
                        .json::<serde_json::Value>()
                        .await
                        .map_err(|e| ProviderError::invalid(provider, e));
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    warn!(provider, %status, attempt, "provider call failed, retrying");
                    last_err = Some(ProviderError::unreachable(
                        provider,
                        format!("API error {}: {}", status, body_text),
                    ));
                    continue;
                }

                return Err(ProviderError::invalid(
                    provider,
                    format!("API error {}: {}", status, body_text),
                ));
            }
            Err(e) => {
                warn!(provider, error = %e, attempt, "provider unreachable, retrying");
                last_err = Some(ProviderError::unreachable(provider, e));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| ProviderError::unreachable(provider, "failed after retries")))
}
