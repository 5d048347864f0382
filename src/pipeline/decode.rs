//! Marks responses as decodable

use super::{boxed, Next, Policy};
use crate::error::Result;
use crate::http::{DecodeHints, HttpRequest, HttpResponse};
use futures::future::BoxFuture;

/// Captures response headers for typed decoding
///
/// Without this policy in the pipeline, typed bodies cannot be decoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct DecodingPolicy;

impl Policy for DecodingPolicy {
    fn name(&self) -> &'static str {
        "decoding"
    }

    fn process<'a>(
        &'a self,
        request: HttpRequest,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<HttpResponse>> {
        boxed(async move {
            let mut response = next.run(request).await?;
            let hints = DecodeHints::from_headers(&response.headers);
            response.set_decode_hints(hints);
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testing::{get, MockTransport};
    use crate::pipeline::Pipeline;
    use reqwest::header::{HeaderMap, HeaderValue};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_hints_are_attached() {
        let mut headers = HeaderMap::new();
        headers.insert("Docker-Content-Digest", HeaderValue::from_static("sha256:1"));
        let transport = Arc::new(MockTransport::new().respond_with(200, headers, "{}"));
        let pipeline = Pipeline::builder()
            .policy(DecodingPolicy)
            .transport_arc(transport)
            .build();

        let response = pipeline.send(get("https://reg.io/v2/")).await.unwrap();
        let hints = response.decode_hints().unwrap();
        assert_eq!(hints.headers["docker-content-digest"], "sha256:1");
    }
}
