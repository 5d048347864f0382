//! Outgoing request values

use bytes::Bytes;
use futures::Stream;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use url::Url;

/// Lazy request payload
pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send + Sync + 'static>>;

/// A streaming body that can be reopened, so retries can resend it
#[derive(Clone)]
pub struct StreamBody {
    factory: Arc<dyn Fn() -> ByteStream + Send + Sync>,
    length: Option<u64>,
}

impl StreamBody {
    pub fn new<F>(factory: F, length: Option<u64>) -> Self
    where
        F: Fn() -> ByteStream + Send + Sync + 'static,
    {
        Self {
            factory: Arc::new(factory),
            length,
        }
    }

    /// Open a fresh stream over the payload
    pub fn open(&self) -> ByteStream {
        (self.factory)()
    }

    /// Declared length, if known up front
    pub fn length(&self) -> Option<u64> {
        self.length
    }
}

impl fmt::Debug for StreamBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamBody")
            .field("length", &self.length)
            .finish_non_exhaustive()
    }
}

/// Request payload
#[derive(Debug, Clone, Default)]
pub enum Body {
    #[default]
    Empty,
    Bytes(Bytes),
    Text(String),
    Stream(StreamBody),
}

impl Body {
    /// Payload length, when it can be known without reading a stream
    pub fn len(&self) -> Option<u64> {
        match self {
            Body::Empty => Some(0),
            Body::Bytes(bytes) => Some(bytes.len() as u64),
            Body::Text(text) => Some(text.len() as u64),
            Body::Stream(stream) => stream.length(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Body::Empty)
    }

    /// In-memory payload bytes, if the body is not a stream
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Body::Empty => Some(&[]),
            Body::Bytes(bytes) => Some(bytes),
            Body::Text(text) => Some(text.as_bytes()),
            Body::Stream(_) => None,
        }
    }
}

/// A fully formed request, built fresh for every call
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Body,
}

impl HttpRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: Body::Empty,
        }
    }

    /// First value of a header as text
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Replace any existing values of a header
    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn test_stream_body_reopens_for_each_attempt() {
        let body = StreamBody::new(
            || Box::pin(futures::stream::iter(vec![Ok(Bytes::from_static(b"chunk"))])),
            Some(5),
        );
        let cloned = Body::Stream(body.clone());

        let first: Vec<_> = body.open().collect().await;
        let second: Vec<_> = body.open().collect().await;
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(cloned.len(), Some(5));
        assert!(cloned.as_bytes().is_none());
    }

    #[test]
    fn test_empty_body_has_zero_length() {
        assert_eq!(Body::Empty.len(), Some(0));
        assert!(Body::Empty.is_empty());
        assert_eq!(Body::Text("abc".into()).len(), Some(3));
    }
}
