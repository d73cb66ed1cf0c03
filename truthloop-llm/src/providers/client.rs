//! JSON-over-HTTP client with rate limiting

use super::types::ApiError;
use crate::{invalid_response, rate_limited, request_failed};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use truthloop_core::TruthloopResult;

/// HTTP client for one provider endpoint.
pub struct HttpClient {
    client: Client,
    provider: String,
    endpoint: String,
    api_key: Option<String>,
    rate_limiter: Arc<Semaphore>,
    last_request: Arc<AtomicU64>,
    min_request_interval_ms: u64,
    start_time: Instant,
}

impl HttpClient {
    /// Create a new client.
    ///
    /// # Arguments
    /// * `provider` - Name used in errors and logs
    /// * `endpoint` - Full URL requests are posted to
    /// * `api_key` - Bearer token, if the endpoint needs one
    /// * `requests_per_minute` - Maximum requests per minute
    pub fn new(
        provider: impl Into<String>,
        endpoint: impl Into<String>,
        api_key: Option<String>,
        requests_per_minute: u32,
    ) -> Self {
        let rpm = requests_per_minute.max(1);
        let permits = rpm as usize;
        let min_interval_ms = (60_000 / rpm as u64).max(10);

        Self {
            client: Client::new(),
            provider: provider.into(),
            endpoint: endpoint.into(),
            api_key,
            rate_limiter: Arc::new(Semaphore::new(permits)),
            last_request: Arc::new(AtomicU64::new(0)),
            min_request_interval_ms: min_interval_ms,
            start_time: Instant::now(),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Post `body` to the endpoint with automatic rate limiting.
    pub async fn request<Req: Serialize + Sync, Res: DeserializeOwned>(
        &self,
        body: &Req,
    ) -> TruthloopResult<Res> {
        let _permit = self.rate_limiter.acquire().await.map_err(|e| {
            request_failed(&self.provider, 0, format!("Rate limiter error: {}", e))
        })?;

        let now_ms = self.start_time.elapsed().as_millis() as u64;
        let last_ms = self.last_request.load(Ordering::Relaxed);
        let elapsed = now_ms.saturating_sub(last_ms);

        if last_ms != 0 && elapsed < self.min_request_interval_ms {
            let wait_ms = self.min_request_interval_ms - elapsed;
            tokio::time::sleep(Duration::from_millis(wait_ms)).await;
        }

        self.last_request.store(now_ms.max(1), Ordering::Relaxed);

        let mut request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        tracing::debug!(provider = %self.provider, endpoint = %self.endpoint, "provider request");
        let response = request.send().await.map_err(|e| {
            request_failed(&self.provider, 0, format!("HTTP request failed: {}", e))
        })?;

        let status = response.status();
        let retry_after_ms = parse_retry_after_ms(response.headers()).unwrap_or(0);

        if status.is_success() {
            response.json().await.map_err(|e| {
                invalid_response(&self.provider, format!("Failed to parse response: {}", e))
            })
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            let error_msg = match serde_json::from_str::<ApiError>(&error_text) {
                Ok(api_error) => api_error.error.message,
                Err(_) => error_text,
            };

            Err(match status {
                StatusCode::TOO_MANY_REQUESTS => rate_limited(&self.provider, retry_after_ms),
                _ => request_failed(&self.provider, status.as_u16() as i32, error_msg),
            })
        }
    }
}

pub(crate) fn parse_retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<i64> {
    headers
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
        .map(|seconds| (seconds * 1000.0) as i64)
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("provider", &self.provider)
            .field("endpoint", &self.endpoint)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, HeaderValue};

    #[test]
    fn test_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("1.5"));
        assert_eq!(parse_retry_after_ms(&headers), Some(1500));
    }

    #[test]
    fn test_retry_after_missing_or_invalid() {
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after_ms(&headers), None);
        headers.insert("retry-after", HeaderValue::from_static("soon"));
        assert_eq!(parse_retry_after_ms(&headers), None);
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let client = HttpClient::new("reasoning", "http://localhost:1", Some("sk-secret".into()), 60);
        let debug = format!("{:?}", client);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("sk-secret"));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_request_failure() {
        let client = HttpClient::new("retrieval", "http://127.0.0.1:1/search", None, 60);
        let result: TruthloopResult<serde_json::Value> =
            client.request(&serde_json::json!({"query": "x"})).await;
        assert!(matches!(
            result,
            Err(truthloop_core::TruthloopError::Provider(
                truthloop_core::ProviderError::RequestFailed { status: 0, .. }
            ))
        ));
    }
}
