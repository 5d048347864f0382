//! Transport seam and the reqwest-backed implementation

use super::request::{Body, HttpRequest};
use super::response::{HttpResponse, ResponseBody};
use crate::error::{Result, TransportError};
use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt, TryStreamExt};
use reqwest::Client;
use std::time::Duration;

/// Sends a request over the network
///
/// Dropping the returned future must abandon the exchange and close the
/// underlying connection.
pub trait Transport: Send + Sync {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>>;
}

/// HTTP transport backed by `reqwest`
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Create a transport with a request timeout
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(TransportError::from)?;

        Ok(Self { client })
    }

    /// Wrap an already configured client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>> {
        async move {
            tracing::debug!("{} {}", request.method, request.url);

            let mut builder = self
                .client
                .request(request.method.clone(), request.url.clone())
                .headers(request.headers.clone());

            builder = match &request.body {
                Body::Empty => builder,
                Body::Bytes(bytes) => builder.body(bytes.clone()),
                Body::Text(text) => builder.body(text.clone()),
                Body::Stream(stream) => builder.body(reqwest::Body::wrap_stream(stream.open())),
            };

            let response = builder.send().await.map_err(TransportError::from)?;

            let status = response.status();
            let headers = response.headers().clone();
            let stream = response
                .bytes_stream()
                .map_err(TransportError::from)
                .boxed();

            Ok(HttpResponse::new(
                &request,
                status,
                headers,
                ResponseBody::Streaming(stream),
            ))
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, TransportErrorKind};
    use reqwest::Method;
    use url::Url;

    #[tokio::test]
    async fn test_connection_refused_is_a_connect_error() {
        let transport = ReqwestTransport::new(Duration::from_secs(2)).unwrap();
        // Port 9 (discard) is closed on test machines
        let request = HttpRequest::new(Method::GET, Url::parse("http://127.0.0.1:9/").unwrap());

        let err = transport.send(request).await.unwrap_err();
        match err {
            Error::Transport(err) => assert_eq!(err.kind(), TransportErrorKind::Connect),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
