//! HTTP value types and the transport seam
//!
//! Requests and responses are plain values so policies can inspect and
//! rewrite them freely. The [`Transport`] trait is the only place that
//! performs network I/O.
//!
//! - [`request`] - [`HttpRequest`] and its [`Body`]
//! - [`response`] - [`HttpResponse`] with a lazily buffered body
//! - [`transport`] - the [`Transport`] trait and the reqwest implementation

pub mod request;
pub mod response;
pub mod transport;

pub use request::{Body, ByteStream, HttpRequest, StreamBody};
pub use response::{DecodeHints, HttpResponse, ResponseBody, ResponseStream};
pub use transport::{ReqwestTransport, Transport};

/// MIME type for opaque byte payloads
pub const OCTET_STREAM: &str = "application/octet-stream";

/// MIME type for JSON payloads
pub const APPLICATION_JSON: &str = "application/json";
