//! Incoming response values

use super::request::HttpRequest;
use crate::error::TransportError;
use bytes::{Bytes, BytesMut};
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Method, StatusCode};
use serde_json::{Map, Value};
use std::fmt;
use url::Url;

/// Unbuffered response payload handed to callers that asked for a stream
pub type ResponseStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Response payload, either still on the wire or already in memory
pub enum ResponseBody {
    Buffered(Bytes),
    Streaming(ResponseStream),
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseBody::Buffered(bytes) => write!(f, "Buffered({} bytes)", bytes.len()),
            ResponseBody::Streaming(_) => f.write_str("Streaming"),
        }
    }
}

/// Header values captured by the decoding policy, keyed by lowercased name
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodeHints {
    pub headers: Map<String, Value>,
}

impl DecodeHints {
    /// Capture headers; repeated headers are joined with `,`
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let mut map = Map::new();
        for name in headers.keys() {
            let joined = headers
                .get_all(name)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .collect::<Vec<_>>()
                .join(",");
            map.insert(name.as_str().to_ascii_lowercase(), Value::String(joined));
        }
        Self { headers: map }
    }
}

/// A response travelling back up the pipeline
pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    body: ResponseBody,
    request_method: Method,
    request_url: Url,
    decode_hints: Option<DecodeHints>,
}

impl HttpResponse {
    pub fn new(
        request: &HttpRequest,
        status: StatusCode,
        headers: HeaderMap,
        body: ResponseBody,
    ) -> Self {
        Self {
            status,
            headers,
            body,
            request_method: request.method.clone(),
            request_url: request.url.clone(),
            decode_hints: None,
        }
    }

    /// Response whose body is already in memory
    pub fn buffered(
        request: &HttpRequest,
        status: StatusCode,
        headers: HeaderMap,
        body: impl Into<Bytes>,
    ) -> Self {
        Self::new(request, status, headers, ResponseBody::Buffered(body.into()))
    }

    pub fn request_method(&self) -> &Method {
        &self.request_method
    }

    pub fn request_url(&self) -> &Url {
        &self.request_url
    }

    /// First value of a header as text
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    pub fn content_length(&self) -> Option<u64> {
        self.headers
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    }

    pub fn is_buffered(&self) -> bool {
        matches!(self.body, ResponseBody::Buffered(_))
    }

    pub fn decode_hints(&self) -> Option<&DecodeHints> {
        self.decode_hints.as_ref()
    }

    pub fn set_decode_hints(&mut self, hints: DecodeHints) {
        self.decode_hints = Some(hints);
    }

    /// Read the whole body, buffering it so later reads see the same bytes
    pub async fn bytes(&mut self) -> Result<Bytes, TransportError> {
        let stream = match &mut self.body {
            ResponseBody::Buffered(bytes) => return Ok(bytes.clone()),
            ResponseBody::Streaming(stream) => stream,
        };
        let mut buffer = BytesMut::new();
        while let Some(chunk) = stream.try_next().await? {
            buffer.extend_from_slice(&chunk);
        }
        let bytes = buffer.freeze();
        self.body = ResponseBody::Buffered(bytes.clone());
        Ok(bytes)
    }

    /// Hand the body over unconsumed; dropping the stream releases the connection
    pub fn into_stream(self) -> ResponseStream {
        match self.body {
            ResponseBody::Buffered(bytes) => {
                futures::stream::once(async move { Ok(bytes) }).boxed()
            }
            ResponseBody::Streaming(stream) => stream,
        }
    }
}

impl fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("request_method", &self.request_method)
            .field("request_url", &self.request_url.as_str())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn request() -> HttpRequest {
        HttpRequest::new(Method::GET, Url::parse("https://example.com/v2/").unwrap())
    }

    #[tokio::test]
    async fn test_streaming_body_is_buffered_once() {
        let chunks = vec![Ok(Bytes::from_static(b"he")), Ok(Bytes::from_static(b"llo"))];
        let mut response = HttpResponse::new(
            &request(),
            StatusCode::OK,
            HeaderMap::new(),
            ResponseBody::Streaming(futures::stream::iter(chunks).boxed()),
        );

        assert!(!response.is_buffered());
        assert_eq!(response.bytes().await.unwrap(), Bytes::from_static(b"hello"));
        assert!(response.is_buffered());
        assert_eq!(response.bytes().await.unwrap(), Bytes::from_static(b"hello"));
    }

    #[test]
    fn test_decode_hints_join_repeated_headers() {
        let mut headers = HeaderMap::new();
        headers.append("X-Tag", HeaderValue::from_static("a"));
        headers.append("X-Tag", HeaderValue::from_static("b"));
        headers.insert("Docker-Content-Digest", HeaderValue::from_static("sha256:1"));

        let hints = DecodeHints::from_headers(&headers);
        assert_eq!(hints.headers["x-tag"], "a,b");
        assert_eq!(hints.headers["docker-content-digest"], "sha256:1");
    }
}
