//! Pluggable body serialization
//!
//! The engine never names a serialization library directly; request and
//! response bodies go through a [`SerializerAdapter`] using
//! `serde_json::Value` as the interchange model.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;

/// Wire encodings understood by the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    Json,
    Yaml,
}

impl Encoding {
    /// Pick the encoding for a `Content-Type` value, ignoring parameters
    pub fn from_content_type(content_type: &str) -> Option<Self> {
        let mime = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if mime == "application/json" || mime == "text/json" || mime.ends_with("+json") {
            Some(Encoding::Json)
        } else if mime.ends_with("/yaml") || mime.ends_with("/x-yaml") || mime.ends_with("+yaml") {
            Some(Encoding::Yaml)
        } else {
            None
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Encoding::Json => "application/json",
            Encoding::Yaml => "application/yaml",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Encoding::Json => f.write_str("json"),
            Encoding::Yaml => f.write_str("yaml"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{encoding} serialization failed: {message}")]
pub struct SerializerError {
    pub encoding: Encoding,
    pub message: String,
}

impl SerializerError {
    fn new(encoding: Encoding, err: impl fmt::Display) -> Self {
        Self {
            encoding,
            message: err.to_string(),
        }
    }
}

/// Converts between in-memory values and wire bytes
pub trait SerializerAdapter: Send + Sync {
    fn serialize(&self, value: &Value, encoding: Encoding) -> Result<Bytes, SerializerError>;

    fn deserialize(&self, bytes: &[u8], encoding: Encoding) -> Result<Value, SerializerError>;
}

/// Default adapter backed by `serde_json` and `serde_yaml`
#[derive(Debug, Clone, Copy, Default)]
pub struct SerdeAdapter;

impl SerializerAdapter for SerdeAdapter {
    fn serialize(&self, value: &Value, encoding: Encoding) -> Result<Bytes, SerializerError> {
        match encoding {
            Encoding::Json => serde_json::to_vec(value)
                .map(Bytes::from)
                .map_err(|e| SerializerError::new(encoding, e)),
            Encoding::Yaml => serde_yaml::to_string(value)
                .map(Bytes::from)
                .map_err(|e| SerializerError::new(encoding, e)),
        }
    }

    fn deserialize(&self, bytes: &[u8], encoding: Encoding) -> Result<Value, SerializerError> {
        match encoding {
            Encoding::Json => {
                serde_json::from_slice(bytes).map_err(|e| SerializerError::new(encoding, e))
            }
            Encoding::Yaml => {
                serde_yaml::from_slice(bytes).map_err(|e| SerializerError::new(encoding, e))
            }
        }
    }
}

/// Lift a typed model into the interchange model
pub fn to_value<T: Serialize + ?Sized>(value: &T) -> Result<Value, SerializerError> {
    serde_json::to_value(value).map_err(|e| SerializerError::new(Encoding::Json, e))
}

/// Lower the interchange model into a typed model
pub fn from_value<T: DeserializeOwned>(value: Value) -> Result<T, SerializerError> {
    serde_json::from_value(value).map_err(|e| SerializerError::new(Encoding::Json, e))
}
