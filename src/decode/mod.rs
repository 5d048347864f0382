//! Response decoding
//!
//! [`ResponseDecoder`] validates a response's status against the operation
//! and turns an accepted response into the declared [`ReturnShape`]:
//!
//! - `exists` - HEAD status mapped to a boolean; the body is never read
//! - `bytes` - whole body, base64url-decoded when that is the wire type
//! - `stream` - body handed over unbuffered
//! - `value` / `paged` - body deserialized through the serializer; this
//!   needs the decoding policy, and an empty body is "no value"
//!
//! - [`errors`] - unexpected-status errors and the error-type registry
//! - [`paging`] - [`Page`] and next-link discovery

pub mod errors;
pub mod paging;

pub use errors::ErrorTypes;
pub use paging::Page;

use crate::error::{DecodeError, Result};
use crate::http::{HttpResponse, ResponseStream};
use crate::operation::{OperationDescriptor, ReturnShape, WireType};
use crate::serializer::{from_value, Encoding, SerdeAdapter, SerializerAdapter};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// An accepted response in its declared shape
pub enum Decoded<T> {
    Void,
    Exists(bool),
    Bytes(Bytes),
    Stream(ResponseStream),
    Value(Option<T>),
    Page(Page<T>),
}

impl<T: fmt::Debug> fmt::Debug for Decoded<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decoded::Void => f.write_str("Void"),
            Decoded::Exists(exists) => f.debug_tuple("Exists").field(exists).finish(),
            Decoded::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Decoded::Stream(_) => f.write_str("Stream"),
            Decoded::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Decoded::Page(page) => f.debug_tuple("Page").field(page).finish(),
        }
    }
}

/// Status, headers and typed body of one response
#[derive(Debug, Clone)]
pub struct Response<T, H = ()> {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub value: Option<T>,
    /// Headers decoded into a declared type, when one was declared
    pub typed_headers: Option<H>,
}

/// Maps raw responses to declared shapes
#[derive(Clone)]
pub struct ResponseDecoder {
    serializer: Arc<dyn SerializerAdapter>,
    error_types: ErrorTypes,
}

impl Default for ResponseDecoder {
    fn default() -> Self {
        Self::new(Arc::new(SerdeAdapter), ErrorTypes::default())
    }
}

impl ResponseDecoder {
    pub fn new(serializer: Arc<dyn SerializerAdapter>, error_types: ErrorTypes) -> Self {
        Self {
            serializer,
            error_types,
        }
    }

    pub fn error_types(&self) -> &ErrorTypes {
        &self.error_types
    }

    /// Accept the response or turn it into an unexpected-status error
    pub async fn validate(
        &self,
        descriptor: &OperationDescriptor,
        response: HttpResponse,
        extra: &[u16],
    ) -> Result<HttpResponse> {
        if descriptor.accepts(response.status.as_u16(), extra) {
            return Ok(response);
        }
        Err(self
            .error_types
            .unexpected_status(descriptor, response, self.serializer.as_ref())
            .await)
    }

    /// Decode an accepted response into the operation's declared shape
    pub async fn decode<T: DeserializeOwned>(
        &self,
        descriptor: &OperationDescriptor,
        mut response: HttpResponse,
    ) -> Result<Decoded<T>> {
        match descriptor.returns() {
            ReturnShape::Void => Ok(Decoded::Void),
            ReturnShape::Exists => Ok(Decoded::Exists(
                *response.request_method() == Method::HEAD && response.status.is_success(),
            )),
            ReturnShape::Bytes => {
                let bytes = response.bytes().await?;
                match descriptor.wire_type() {
                    WireType::Base64url => Ok(Decoded::Bytes(decode_base64url(&bytes)?)),
                    _ => Ok(Decoded::Bytes(bytes)),
                }
            }
            ReturnShape::Stream => Ok(Decoded::Stream(response.into_stream())),
            ReturnShape::Value => {
                let value = self.read_value(&mut response).await?;
                Ok(Decoded::Value(value.map(typed).transpose()?))
            }
            ReturnShape::Paged(shape) => {
                let body = self.read_value(&mut response).await?;
                let page =
                    Page::from_parts(shape, body, &response.headers, response.request_url())?;
                Ok(Decoded::Page(page))
            }
        }
    }

    /// Decode status, headers and body together
    ///
    /// When the operation declares typed headers they are decoded into `H`;
    /// that requires the decoding policy to have captured them.
    pub async fn decode_envelope<T, H>(
        &self,
        descriptor: &OperationDescriptor,
        mut response: HttpResponse,
    ) -> Result<Response<T, H>>
    where
        T: DeserializeOwned,
        H: DeserializeOwned,
    {
        let typed_headers = match descriptor.envelope() {
            Some(envelope) if envelope.typed_headers => {
                let hints = response
                    .decode_hints()
                    .ok_or(DecodeError::MissingDecodedHeaders)?;
                let headers = serde_json::from_value(Value::Object(hints.headers.clone())).map_err(
                    |e| DecodeError::Body {
                        target: "response headers",
                        message: e.to_string(),
                    },
                )?;
                Some(headers)
            }
            _ => None,
        };

        let value = match descriptor.returns() {
            ReturnShape::Void | ReturnShape::Exists => None,
            _ => self.read_value(&mut response).await?.map(typed).transpose()?,
        };

        Ok(Response {
            status: response.status,
            headers: response.headers.clone(),
            value,
            typed_headers,
        })
    }

    /// Read and deserialize the body; `None` for an empty body
    async fn read_value(&self, response: &mut HttpResponse) -> Result<Option<Value>> {
        if response.decode_hints().is_none() {
            return Err(DecodeError::NotConfigured.into());
        }
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(None);
        }
        let encoding = response
            .content_type()
            .and_then(Encoding::from_content_type)
            .unwrap_or(Encoding::Json);
        let value = self
            .serializer
            .deserialize(&bytes, encoding)
            .map_err(|e| DecodeError::Body {
                target: "response body",
                message: e.to_string(),
            })?;
        Ok(Some(value))
    }
}

impl fmt::Debug for ResponseDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseDecoder")
            .field("error_types", &self.error_types)
            .finish_non_exhaustive()
    }
}

fn typed<T: DeserializeOwned>(value: Value) -> Result<T, DecodeError> {
    from_value(value).map_err(|e| DecodeError::Body {
        target: std::any::type_name::<T>(),
        message: e.message,
    })
}

/// Decode a base64url payload, tolerating JSON string quotes and padding
pub fn decode_base64url(raw: &[u8]) -> Result<Bytes, DecodeError> {
    let text = std::str::from_utf8(raw).map_err(|e| DecodeError::Base64(e.to_string()))?;
    let text = text.trim();
    let text = text
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(text)
        .trim_end_matches('=');
    URL_SAFE_NO_PAD
        .decode(text)
        .map(Bytes::from)
        .map_err(|e| DecodeError::Base64(e.to_string()))
}
