//! Error taxonomy for the invocation engine
//!
//! Every failure a call can produce lands in one [`Error`] variant:
//!
//! - [`BuildError`] - malformed operation declarations and unresolvable
//!   arguments, raised before anything touches the network
//! - [`TransportError`] - connection, timeout and body-read failures
//! - [`HttpError`] - a response arrived but its status was not accepted
//! - [`DecodeError`] - the body could not be turned into the declared shape
//! - [`TokenError`] - no usable access token could be produced

use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Result alias used throughout the crate
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level error returned by every dispatcher call
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    UnexpectedStatus(Box<HttpError>),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Token(#[from] TokenError),

    /// Generic I/O category, used when a typed error cannot be constructed
    #[error("{message}")]
    Io {
        message: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("call was cancelled")]
    Cancelled,

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl Error {
    /// Whether a retry policy may re-run the downstream stages for this error
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Transport(err) => matches!(
                err.kind(),
                TransportErrorKind::Connect | TransportErrorKind::Timeout
            ),
            _ => false,
        }
    }

    /// Status code carried by the error, if it came from an HTTP response
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::UnexpectedStatus(err) => Some(err.status()),
            _ => None,
        }
    }

    /// Borrow the unexpected-status payload, if this is one
    pub fn as_http(&self) -> Option<&HttpError> {
        match self {
            Error::UnexpectedStatus(err) => Some(err),
            _ => None,
        }
    }
}

impl From<HttpError> for Error {
    fn from(err: HttpError) -> Self {
        Error::UnexpectedStatus(Box::new(err))
    }
}

/// Raised while parsing an operation declaration or building a request
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("malformed template `{template}`: {reason}")]
    MalformedTemplate { template: String, reason: String },

    #[error("placeholder `{name}` in `{template}` has no matching parameter binding")]
    UnboundPlaceholder { name: String, template: String },

    #[error("{kind} parameter `{name}` is never used by its template")]
    UnusedBinding { kind: &'static str, name: String },

    #[error("parameter `{0}` is declared more than once")]
    DuplicateParameter(String),

    #[error("operation `{0}` declares more than one body parameter")]
    MultipleBodies(String),

    #[error("unsupported HTTP verb `{0}`")]
    UnknownVerb(String),

    #[error("operation `{operation}` is invalid: {reason}")]
    InvalidOperation { operation: String, reason: String },

    #[error("missing required argument `{name}` for operation `{operation}`")]
    MissingArgument { operation: String, name: String },

    #[error("argument `{name}` cannot be used as a {kind} value")]
    ArgumentKind { name: String, kind: &'static str },

    #[error("invalid header `{name}`")]
    InvalidHeader { name: String },

    #[error("invalid url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to serialize request body: {0}")]
    Serialize(String),

    #[error("operation `{0}` is declared more than once")]
    DuplicateOperation(String),

    #[error("unknown operation `{0}`")]
    UnknownOperation(String),
}

/// Broad classification of a transport failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    Connect,
    Timeout,
    Body,
    Request,
    Other,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportErrorKind::Connect => "connect",
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Body => "body",
            TransportErrorKind::Request => "request",
            TransportErrorKind::Other => "transport",
        };
        f.write_str(name)
    }
}

/// Failure reported by a [`Transport`](crate::http::Transport)
#[derive(Debug, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct TransportError {
    kind: TransportErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        kind: TransportErrorKind,
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            TransportErrorKind::Timeout
        } else if err.is_connect() {
            TransportErrorKind::Connect
        } else if err.is_body() || err.is_decode() {
            TransportErrorKind::Body
        } else if err.is_request() || err.is_builder() {
            TransportErrorKind::Request
        } else {
            TransportErrorKind::Other
        };
        let message = err.to_string();
        TransportError::with_source(kind, message, err)
    }
}

/// Coarse category of an unexpected status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Unauthorized,
    NotFound,
    Conflict,
    Throttled,
    Server,
    Other,
}

/// A response whose status code the operation did not accept
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct HttpError {
    status: u16,
    message: String,
    headers: HeaderMap,
    error_type: String,
    body: Option<Value>,
}

impl HttpError {
    pub fn new(
        status: StatusCode,
        message: String,
        headers: HeaderMap,
        error_type: impl Into<String>,
        body: Option<Value>,
    ) -> Self {
        Self {
            status: status.as_u16(),
            message,
            headers,
            error_type: error_type.into(),
            body,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Tag of the error type selected for this status
    pub fn error_type(&self) -> &str {
        &self.error_type
    }

    /// Decoded error body, if the body could be decoded
    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    /// Re-read the decoded body as a concrete error model
    pub fn body_as<E: DeserializeOwned>(&self) -> Option<E> {
        self.body
            .as_ref()
            .and_then(|body| serde_json::from_value(body.clone()).ok())
    }

    pub fn kind(&self) -> ErrorKind {
        match self.status {
            401 | 403 => ErrorKind::Unauthorized,
            404 => ErrorKind::NotFound,
            409 | 412 => ErrorKind::Conflict,
            429 => ErrorKind::Throttled,
            500..=599 => ErrorKind::Server,
            _ => ErrorKind::Other,
        }
    }
}

/// Raised when an accepted response cannot be turned into its declared shape
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("response decoding is not configured for this pipeline; install a decoding policy")]
    NotConfigured,

    #[error("typed response headers were declared but no decoding policy populated them")]
    MissingDecodedHeaders,

    #[error("failed to decode {target}: {message}")]
    Body { target: &'static str, message: String },

    #[error("invalid base64url payload: {0}")]
    Base64(String),

    #[error("operation `{operation}` returns {declared}, not {requested}")]
    ShapeMismatch {
        operation: String,
        declared: &'static str,
        requested: &'static str,
    },

    #[error("error type `{0}` is not registered")]
    UnknownErrorType(String),
}

/// Failure to produce an access token
///
/// Cloneable so every caller waiting on a shared refresh sees the same error.
#[derive(Debug, Clone)]
pub struct TokenError {
    message: String,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl TokenError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    pub fn with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Arc::new(source)),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}: {}", self.message, source),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for TokenError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|err| err as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_connect_and_timeout_are_retryable() {
        let connect: Error = TransportError::new(TransportErrorKind::Connect, "refused").into();
        let timeout: Error = TransportError::new(TransportErrorKind::Timeout, "slow").into();
        let body: Error = TransportError::new(TransportErrorKind::Body, "cut").into();
        assert!(connect.is_retryable());
        assert!(timeout.is_retryable());
        assert!(!body.is_retryable());
        assert!(!Error::from(DecodeError::NotConfigured).is_retryable());
    }

    #[test]
    fn test_http_error_kind_follows_status() {
        let err = HttpError::new(
            StatusCode::NOT_FOUND,
            "Status code 404, (empty body)".to_string(),
            HeaderMap::new(),
            "default",
            None,
        );
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(Error::from(err).status(), Some(404));
    }

    #[test]
    fn test_token_error_display_includes_source() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        let err = TokenError::with_source("refresh failed", io);
        assert_eq!(err.to_string(), "refresh failed: boom");
        assert!(std::error::Error::source(&err).is_some());
    }
}
