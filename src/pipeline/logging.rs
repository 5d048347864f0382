//! HTTP request/response logging

use super::{boxed, Next, Policy};
use crate::error::Result;
use crate::http::{HttpRequest, HttpResponse};
use futures::future::BoxFuture;
use reqwest::header::HeaderMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Instant;

/// Maximum length of a body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Headers whose values are logged verbatim unless configured otherwise
const DEFAULT_ALLOWED_HEADERS: &[&str] = &[
    "accept",
    "content-length",
    "content-type",
    "date",
    "docker-content-digest",
    "etag",
    "link",
    "location",
    "retry-after",
    "user-agent",
    "x-ms-client-request-id",
    "x-ms-request-id",
];

/// How much of each exchange is logged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HttpLogDetail {
    #[default]
    None,
    Basic,
    Headers,
    BodyAndHeaders,
}

impl HttpLogDetail {
    fn headers(self) -> bool {
        matches!(self, HttpLogDetail::Headers | HttpLogDetail::BodyAndHeaders)
    }

    fn body(self) -> bool {
        self == HttpLogDetail::BodyAndHeaders
    }
}

/// Sanitize a body for logging
/// Truncates long bodies and strips non-printable characters
pub fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// Logs each request and response at a configured detail level
#[derive(Debug, Clone)]
pub struct HttpLoggingPolicy {
    detail: HttpLogDetail,
    allowed_headers: BTreeSet<String>,
}

impl HttpLoggingPolicy {
    pub fn new(detail: HttpLogDetail, extra_allowed: impl IntoIterator<Item = String>) -> Self {
        let mut allowed_headers: BTreeSet<String> =
            DEFAULT_ALLOWED_HEADERS.iter().map(|h| h.to_string()).collect();
        allowed_headers.extend(extra_allowed.into_iter().map(|h| h.to_ascii_lowercase()));
        // Never log credentials
        allowed_headers.remove("authorization");
        Self {
            detail,
            allowed_headers,
        }
    }

    fn format_headers(&self, headers: &HeaderMap) -> String {
        headers
            .iter()
            .map(|(name, value)| {
                let shown = if self.allowed_headers.contains(name.as_str()) {
                    value.to_str().unwrap_or("<binary>")
                } else {
                    "REDACTED"
                };
                format!("{}: {}", name, shown)
            })
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl Policy for HttpLoggingPolicy {
    fn name(&self) -> &'static str {
        "http-logging"
    }

    fn process<'a>(
        &'a self,
        request: HttpRequest,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<HttpResponse>> {
        if self.detail == HttpLogDetail::None {
            return next.run(request);
        }

        boxed(async move {
            tracing::info!("--> {} {}", request.method, request.url);
            if self.detail.headers() {
                tracing::debug!("request headers: {}", self.format_headers(&request.headers));
            }
            if self.detail.body() {
                match request.body.as_bytes() {
                    Some(bytes) if !bytes.is_empty() => tracing::debug!(
                        "request body: {}",
                        sanitize_for_log(&String::from_utf8_lossy(bytes))
                    ),
                    Some(_) => {}
                    None => tracing::debug!("request body: <stream>"),
                }
            }

            let method = request.method.clone();
            let url = request.url.clone();
            let started = Instant::now();
            let result = next.run(request).await;
            let elapsed = started.elapsed();

            let mut response = match result {
                Ok(response) => response,
                Err(err) => {
                    tracing::error!("<-- {} {} failed after {:?}: {}", method, url, elapsed, err);
                    return Err(err);
                }
            };

            tracing::info!("<-- {} {} {} ({:?})", response.status, method, url, elapsed);
            if self.detail.headers() {
                tracing::debug!("response headers: {}", self.format_headers(&response.headers));
            }
            if self.detail.body() {
                let is_text = response.content_type().is_some_and(|ct| {
                    let ct = ct.to_ascii_lowercase();
                    ct.contains("json") || ct.contains("yaml") || ct.starts_with("text/")
                });
                if is_text {
                    let bytes = response.bytes().await?;
                    tracing::debug!(
                        "response body: {}",
                        sanitize_for_log(&String::from_utf8_lossy(&bytes))
                    );
                }
            }
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{get, MockTransport};
    use crate::pipeline::Pipeline;
    use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
    use std::sync::Arc;

    #[test]
    fn test_sanitize_for_log_truncates() {
        let long = "x".repeat(500);
        let sanitized = sanitize_for_log(&long);
        assert!(sanitized.starts_with(&"x".repeat(200)));
        assert!(sanitized.contains("[truncated, 500 bytes total]"));
        assert_eq!(sanitize_for_log("ok\n\tdone"), "okdone");
    }

    #[test]
    fn test_headers_are_redacted_unless_allowed() {
        let policy = HttpLoggingPolicy::new(
            HttpLogDetail::Headers,
            vec!["x-custom".to_string(), "Authorization".to_string()],
        );
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer secret"));
        headers.insert("x-custom", HeaderValue::from_static("visible"));
        headers.insert("x-other", HeaderValue::from_static("hidden"));

        let line = policy.format_headers(&headers);
        assert!(line.contains("authorization: REDACTED"));
        assert!(line.contains("x-custom: visible"));
        assert!(line.contains("x-other: REDACTED"));
        assert!(!line.contains("secret"));
    }

    #[tokio::test]
    async fn test_body_logging_keeps_body_readable() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let transport = Arc::new(MockTransport::new().respond_with(200, headers, r#"{"a":1}"#));
        let pipeline = Pipeline::builder()
            .policy(HttpLoggingPolicy::new(HttpLogDetail::BodyAndHeaders, Vec::new()))
            .transport_arc(transport)
            .build();

        let mut response = pipeline.send(get("https://reg.io/")).await.unwrap();
        assert_eq!(&response.bytes().await.unwrap()[..], br#"{"a":1}"#);
    }

    #[test]
    fn test_detail_from_yaml() {
        let detail: HttpLogDetail = serde_yaml::from_str("body_and_headers").unwrap();
        assert_eq!(detail, HttpLogDetail::BodyAndHeaders);
    }
}
