//! Exponential backoff retry policy

use super::{boxed, Next, Policy};
use crate::config::RetryConfig;
use crate::error::Result;
use crate::http::{HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use std::time::Duration;

/// Statuses that are worth another attempt
const RETRYABLE_STATUSES: &[u16] = &[408, 429, 500, 502, 503, 504];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryOptions {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(800),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl From<&RetryConfig> for RetryOptions {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl RetryOptions {
    /// `base * 2^attempt`, capped at `max_delay`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Re-runs the downstream stages on transient failures
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    options: RetryOptions,
}

impl RetryPolicy {
    pub fn new(options: RetryOptions) -> Self {
        Self { options }
    }
}

impl Policy for RetryPolicy {
    fn name(&self) -> &'static str {
        "retry"
    }

    fn process<'a>(
        &'a self,
        request: HttpRequest,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<HttpResponse>> {
        boxed(async move {
            let mut attempt = 0;
            loop {
                let result = next.run(request.clone()).await;
                let can_retry = attempt < self.options.max_retries;

                let delay = match &result {
                    Ok(response)
                        if can_retry && RETRYABLE_STATUSES.contains(&response.status.as_u16()) =>
                    {
                        Some(
                            retry_after(&response.headers)
                                .map(|requested| requested.min(self.options.max_delay))
                                .unwrap_or_else(|| self.options.backoff(attempt)),
                        )
                    }
                    Err(err) if can_retry && err.is_retryable() => {
                        Some(self.options.backoff(attempt))
                    }
                    _ => None,
                };
                let Some(delay) = delay else {
                    return result;
                };

                match &result {
                    Ok(response) => tracing::warn!(
                        "{} {} returned {}, retrying in {:?} (attempt {})",
                        request.method,
                        request.url,
                        response.status,
                        delay,
                        attempt + 1
                    ),
                    Err(err) => tracing::warn!(
                        "{} {} failed: {}, retrying in {:?} (attempt {})",
                        request.method,
                        request.url,
                        err,
                        delay,
                        attempt + 1
                    ),
                }
                drop(result);

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        })
    }
}

/// Server-requested delay from `retry-after-ms`, `x-ms-retry-after-ms` or `Retry-After`
///
/// The policy caps it at `max_delay`.
fn retry_after(headers: &HeaderMap) -> Option<Duration> {
    for name in ["retry-after-ms", "x-ms-retry-after-ms"] {
        if let Some(ms) = header_str(headers, name).and_then(|v| v.trim().parse::<u64>().ok()) {
            return Some(Duration::from_millis(ms));
        }
    }

    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    (at - Utc::now()).to_std().ok()
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, TransportError, TransportErrorKind};
    use crate::pipeline::testing::{get, MockTransport};
    use crate::pipeline::Pipeline;
    use reqwest::header::HeaderValue;
    use std::sync::Arc;

    fn fast() -> RetryOptions {
        RetryOptions {
            max_retries: 2,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        }
    }

    fn pipeline(transport: Arc<MockTransport>) -> Pipeline {
        Pipeline::builder()
            .policy(RetryPolicy::new(fast()))
            .transport_arc(transport)
            .build()
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let options = RetryOptions::default();
        assert_eq!(options.backoff(0), Duration::from_millis(800));
        assert_eq!(options.backoff(1), Duration::from_millis(1600));
        assert_eq!(options.backoff(3), Duration::from_millis(6400));
        assert_eq!(options.backoff(4), Duration::from_secs(8));
        assert_eq!(options.backoff(40), Duration::from_secs(8));
    }

    #[test]
    fn test_retry_after_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after-ms", HeaderValue::from_static("250"));
        assert_eq!(retry_after(&headers), Some(Duration::from_millis(250)));

        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("2"));
        assert_eq!(retry_after(&headers), Some(Duration::from_secs(2)));

        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"));
        assert_eq!(retry_after(&headers), None, "dates in the past give no delay");
    }

    #[tokio::test]
    async fn test_retries_throttled_then_succeeds() {
        let transport = Arc::new(
            MockTransport::new()
                .respond(429, "")
                .respond(503, "")
                .respond(200, "ok"),
        );
        let response = pipeline(transport.clone())
            .send(get("https://example.com/"))
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(transport.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let transport = Arc::new(
            MockTransport::new()
                .respond(500, "")
                .respond(500, "")
                .respond(500, "")
                .respond(200, "never reached"),
        );
        let response = pipeline(transport.clone())
            .send(get("https://example.com/"))
            .await
            .unwrap();
        assert_eq!(response.status, 500);
        assert_eq!(transport.requests().len(), 3);
    }

    #[tokio::test]
    async fn test_connect_errors_retry_but_body_errors_do_not() {
        let transport = Arc::new(
            MockTransport::new()
                .fail(TransportError::new(TransportErrorKind::Connect, "refused").into())
                .respond(200, "ok"),
        );
        let response = pipeline(transport.clone())
            .send(get("https://example.com/"))
            .await
            .unwrap();
        assert_eq!(response.status, 200);

        let transport = Arc::new(
            MockTransport::new()
                .fail(TransportError::new(TransportErrorKind::Body, "cut").into())
                .respond(200, "ok"),
        );
        let err = pipeline(transport.clone())
            .send(get("https://example.com/"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let transport = Arc::new(MockTransport::new().respond(404, "missing"));
        let response = pipeline(transport.clone())
            .send(get("https://example.com/"))
            .await
            .unwrap();
        assert_eq!(response.status, 404);
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_server_delay_is_capped_at_max_delay() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("86400"));
        let transport = Arc::new(
            MockTransport::new()
                .respond_with(503, headers, "")
                .respond(200, "ok"),
        );
        let response = tokio::time::timeout(
            Duration::from_secs(2),
            pipeline(transport.clone()).send(get("https://example.com/")),
        )
        .await
        .expect("retry slept for the full server delay")
        .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(transport.requests().len(), 2);
    }
}
