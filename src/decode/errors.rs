//! Unexpected-status errors
//!
//! Operations name their error model with a tag. [`ErrorTypes`] maps tags
//! to constructors that check a decoded error body against that model.

use crate::error::{DecodeError, Error, HttpError};
use crate::http::{HttpResponse, OCTET_STREAM};
use crate::operation::OperationDescriptor;
use crate::operation::descriptor::DEFAULT_ERROR_TYPE;
use crate::serializer::{Encoding, SerializerAdapter};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

type Constructor = Arc<dyn Fn(&Value) -> Result<(), String> + Send + Sync>;

/// Registry of error model tags
#[derive(Clone)]
pub struct ErrorTypes {
    constructors: HashMap<String, Constructor>,
}

impl Default for ErrorTypes {
    fn default() -> Self {
        let mut types = Self {
            constructors: HashMap::new(),
        };
        types.register_raw(DEFAULT_ERROR_TYPE, |_| Ok(()));
        types
    }
}

impl ErrorTypes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed error model; bodies that do not fit it are dropped
    pub fn register<E: DeserializeOwned + 'static>(mut self, tag: impl Into<String>) -> Self {
        self.register_raw(tag, |body| {
            serde_json::from_value::<E>(body.clone())
                .map(|_| ())
                .map_err(|e| e.to_string())
        });
        self
    }

    /// Register a tag that accepts any JSON body
    pub fn register_any(mut self, tag: impl Into<String>) -> Self {
        self.register_raw(tag, |_| Ok(()));
        self
    }

    fn register_raw<F>(&mut self, tag: impl Into<String>, constructor: F)
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        self.constructors.insert(tag.into(), Arc::new(constructor));
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.constructors.contains_key(tag)
    }

    /// Build the error for a response whose status was not accepted
    ///
    /// The body is read unless it is an octet stream. If the operation's
    /// error tag is not registered the result is a generic I/O error.
    pub async fn unexpected_status(
        &self,
        descriptor: &OperationDescriptor,
        mut response: HttpResponse,
        serializer: &dyn SerializerAdapter,
    ) -> Error {
        let status = response.status;
        let tag = descriptor.error_type_for(status.as_u16()).to_string();
        let is_octet_stream = response
            .content_type()
            .is_some_and(|ct| ct.to_ascii_lowercase().starts_with(OCTET_STREAM));

        let (summary, body) = if is_octet_stream {
            let length = response.content_length().unwrap_or(0);
            (format!("({length}-byte body)"), None)
        } else {
            match response.bytes().await {
                Ok(bytes) if bytes.is_empty() => ("(empty body)".to_string(), None),
                Ok(bytes) => {
                    let text = String::from_utf8_lossy(&bytes).into_owned();
                    let encoding = response
                        .content_type()
                        .and_then(Encoding::from_content_type)
                        .unwrap_or(Encoding::Json);
                    let decoded = serializer.deserialize(&bytes, encoding).ok();
                    (format!("\"{text}\""), decoded)
                }
                Err(err) => return err.into(),
            }
        };
        let message = format!("Status code {}, {}", status.as_u16(), summary);

        let Some(constructor) = self.constructors.get(&tag) else {
            return Error::Io {
                message,
                source: Box::new(DecodeError::UnknownErrorType(tag)),
            };
        };

        let body = body.filter(|value| match constructor(value) {
            Ok(()) => true,
            Err(reason) => {
                tracing::debug!("Error body does not match `{}`: {}", tag, reason);
                false
            }
        });

        HttpError::new(status, message, response.headers.clone(), tag, body).into()
    }
}

impl fmt::Debug for ErrorTypes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tags: Vec<_> = self.constructors.keys().collect();
        tags.sort();
        f.debug_struct("ErrorTypes").field("tags", &tags).finish()
    }
}
