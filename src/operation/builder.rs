//! Turning a descriptor plus arguments into an [`HttpRequest`]

use super::descriptor::{OperationDescriptor, ParamKind, ParameterBinding, WireType};
use crate::error::BuildError;
use crate::http::{Body, HttpRequest, StreamBody, APPLICATION_JSON, OCTET_STREAM};
use crate::serializer::{Encoding, SerializerAdapter};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bytes::Bytes;
use reqwest::header::{HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use serde::Serialize;
use serde_json::Value;
use url::Url;

/// One concrete argument value
#[derive(Debug, Clone)]
pub enum ArgValue {
    Text(String),
    /// Emitted as repeated query pairs, or comma-joined elsewhere
    List(Vec<String>),
    Bytes(Bytes),
    Json(Value),
    Stream(StreamBody),
}

impl ArgValue {
    /// Textual form used by host, path, query and header bindings
    fn as_text(&self, name: &str, kind: &'static str) -> Result<String, BuildError> {
        match self {
            ArgValue::Text(text) => Ok(text.clone()),
            ArgValue::List(items) => Ok(items.join(",")),
            ArgValue::Json(Value::String(s)) => Ok(s.clone()),
            ArgValue::Json(v @ (Value::Number(_) | Value::Bool(_))) => Ok(v.to_string()),
            _ => Err(BuildError::ArgumentKind {
                name: name.to_string(),
                kind,
            }),
        }
    }
}

impl From<&str> for ArgValue {
    fn from(value: &str) -> Self {
        ArgValue::Text(value.to_string())
    }
}

impl From<String> for ArgValue {
    fn from(value: String) -> Self {
        ArgValue::Text(value)
    }
}

impl From<Vec<String>> for ArgValue {
    fn from(value: Vec<String>) -> Self {
        ArgValue::List(value)
    }
}

impl From<Bytes> for ArgValue {
    fn from(value: Bytes) -> Self {
        ArgValue::Bytes(value)
    }
}

impl From<Vec<u8>> for ArgValue {
    fn from(value: Vec<u8>) -> Self {
        ArgValue::Bytes(Bytes::from(value))
    }
}

impl From<Value> for ArgValue {
    fn from(value: Value) -> Self {
        ArgValue::Json(value)
    }
}

impl From<StreamBody> for ArgValue {
    fn from(value: StreamBody) -> Self {
        ArgValue::Stream(value)
    }
}

impl From<u32> for ArgValue {
    fn from(value: u32) -> Self {
        ArgValue::Text(value.to_string())
    }
}

impl From<bool> for ArgValue {
    fn from(value: bool) -> Self {
        ArgValue::Text(value.to_string())
    }
}

/// Named arguments for a single call
#[derive(Debug, Clone, Default)]
pub struct Args {
    values: Vec<(String, ArgValue)>,
    allowed: Vec<u16>,
}

impl Args {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an argument
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ArgValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Serialize a typed model into a JSON argument
    pub fn with_json<T: Serialize + ?Sized>(
        self,
        name: impl Into<String>,
        value: &T,
    ) -> Result<Self, BuildError> {
        let value = serde_json::to_value(value).map_err(|e| BuildError::Serialize(e.to_string()))?;
        Ok(self.with(name, value))
    }

    /// Accept an extra status code for this call only
    pub fn allow_status(mut self, status: u16) -> Self {
        self.allowed.push(status);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<ArgValue>) {
        let name = name.into();
        let value = value.into();
        match self.values.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.values.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ArgValue> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn allowed_statuses(&self) -> &[u16] {
        &self.allowed
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(n, _)| n.as_str())
    }

    /// These arguments layered over `defaults`; explicit values win
    pub fn merged_over(&self, defaults: &Args) -> Args {
        let mut merged = defaults.clone();
        for (name, value) in &self.values {
            merged.set(name.clone(), value.clone());
        }
        merged.allowed.extend_from_slice(&self.allowed);
        merged
    }
}

/// Builds fresh requests; never mutates the descriptor it reads
pub struct RequestBuilder<'a> {
    serializer: &'a dyn SerializerAdapter,
}

impl<'a> RequestBuilder<'a> {
    pub fn new(serializer: &'a dyn SerializerAdapter) -> Self {
        Self { serializer }
    }

    pub fn build(
        &self,
        descriptor: &OperationDescriptor,
        args: &Args,
    ) -> Result<HttpRequest, BuildError> {
        let mut url = self.resolve_url(descriptor, args)?;
        append_query(&mut url, descriptor, args)?;

        let mut request = HttpRequest::new(descriptor.verb().clone(), url);

        for (name, value) in descriptor.static_headers() {
            request.headers.insert(name.clone(), value.clone());
        }

        let body_arg = descriptor
            .params_of(ParamKind::Body)
            .next()
            .and_then(|binding| args.get(&binding.name).map(|value| (binding, value)));

        match body_arg {
            Some((binding, value)) => {
                let (body, inferred) = self.encode_body(descriptor, binding, value)?;
                let content_type = match descriptor.content_type() {
                    Some(explicit) => explicit.clone(),
                    None => HeaderValue::from_static(inferred),
                };
                if let Some(len) = body.len() {
                    request.headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
                }
                request.headers.insert(CONTENT_TYPE, content_type);
                request.body = body;
            }
            None => {
                request
                    .headers
                    .insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
            }
        }

        // Header arguments go last so they override anything inferred
        for binding in descriptor.params_of(ParamKind::Header) {
            let Some(value) = args.get(&binding.name) else {
                continue;
            };
            let text = value.as_text(&binding.name, "header")?;
            let invalid = || BuildError::InvalidHeader {
                name: binding.name.clone(),
            };
            let name = HeaderName::from_bytes(binding.name.as_bytes()).map_err(|_| invalid())?;
            let value = HeaderValue::from_str(&text).map_err(|_| invalid())?;
            request.headers.insert(name, value);
        }

        Ok(request)
    }

    fn resolve_url(
        &self,
        descriptor: &OperationDescriptor,
        args: &Args,
    ) -> Result<Url, BuildError> {
        // Path is substituted first; a fully qualified argument replaces host and path
        let mut path_values = Vec::new();
        for binding in descriptor.params_of(ParamKind::Path) {
            let value = args
                .get(&binding.name)
                .ok_or_else(|| missing(descriptor, &binding.name))?
                .as_text(&binding.name, "path")?;
            if is_absolute_url(&value) {
                return parse_url(&value);
            }
            path_values.push((binding, value));
        }

        let path = descriptor
            .path()
            .render(|name| {
                path_values
                    .iter()
                    .find(|(b, _)| b.name == name)
                    .map(|(b, v)| encode_path_value(b, v))
            })
            .map_err(|name| missing(descriptor, &name))?;

        if descriptor.host().is_empty() {
            return Err(BuildError::InvalidUrl {
                url: path,
                reason: "relative url with no host template".to_string(),
            });
        }

        let mut host_error = None;
        let host = descriptor
            .host()
            .render(|name| match args.get(name) {
                Some(value) => match value.as_text(name, "host") {
                    Ok(text) => Some(text),
                    Err(err) => {
                        host_error = Some(err);
                        Some(String::new())
                    }
                },
                None => None,
            })
            .map_err(|name| missing(descriptor, &name))?;
        if let Some(err) = host_error {
            return Err(err);
        }

        let host = if host.contains("://") {
            host
        } else {
            format!("https://{host}")
        };
        let joined = match (host.ends_with('/'), path.starts_with('/')) {
            (true, true) => format!("{}{}", host.trim_end_matches('/'), path),
            (false, false) if !path.is_empty() => format!("{host}/{path}"),
            _ => format!("{host}{path}"),
        };
        parse_url(&joined)
    }

    fn encode_body(
        &self,
        descriptor: &OperationDescriptor,
        binding: &ParameterBinding,
        value: &ArgValue,
    ) -> Result<(Body, &'static str), BuildError> {
        let encoding = descriptor
            .content_type()
            .and_then(|ct| ct.to_str().ok())
            .and_then(Encoding::from_content_type)
            .unwrap_or(Encoding::Json);

        match value {
            ArgValue::Bytes(bytes) if descriptor.wire_type() == WireType::Base64url => {
                let encoded = Value::String(URL_SAFE_NO_PAD.encode(bytes));
                let body = self.serialize(&encoded, encoding)?;
                Ok((Body::Bytes(body), APPLICATION_JSON))
            }
            ArgValue::Bytes(bytes) => Ok((Body::Bytes(bytes.clone()), OCTET_STREAM)),
            ArgValue::Text(text) => Ok((Body::Text(text.clone()), OCTET_STREAM)),
            ArgValue::Stream(stream) => Ok((Body::Stream(stream.clone()), OCTET_STREAM)),
            ArgValue::Json(json) => {
                let body = self.serialize(json, encoding)?;
                Ok((Body::Bytes(body), APPLICATION_JSON))
            }
            ArgValue::List(_) => Err(BuildError::ArgumentKind {
                name: binding.name.clone(),
                kind: "body",
            }),
        }
    }

    fn serialize(&self, value: &Value, encoding: Encoding) -> Result<Bytes, BuildError> {
        self.serializer
            .serialize(value, encoding)
            .map_err(|e| BuildError::Serialize(e.to_string()))
    }
}

fn append_query(
    url: &mut Url,
    descriptor: &OperationDescriptor,
    args: &Args,
) -> Result<(), BuildError> {
    let mut pairs: Vec<String> = url
        .query()
        .filter(|q| !q.is_empty())
        .map(|q| vec![q.to_string()])
        .unwrap_or_default();

    for binding in descriptor.params_of(ParamKind::Query) {
        let Some(value) = args.get(&binding.name) else {
            continue;
        };
        let values = match value {
            ArgValue::List(items) => items.clone(),
            other => vec![other.as_text(&binding.name, "query")?],
        };
        for value in values {
            if binding.encoded {
                pairs.push(format!("{}={}", binding.name, value));
            } else {
                pairs.push(format!(
                    "{}={}",
                    urlencoding::encode(&binding.name),
                    urlencoding::encode(&value)
                ));
            }
        }
    }

    if !pairs.is_empty() {
        url.set_query(Some(&pairs.join("&")));
    }
    Ok(())
}

fn encode_path_value(binding: &ParameterBinding, value: &str) -> String {
    if binding.encoded {
        value.to_string()
    } else {
        urlencoding::encode(value).into_owned()
    }
}

fn is_absolute_url(value: &str) -> bool {
    match value.split_once("://") {
        Some((scheme, rest)) => {
            !rest.is_empty()
                && !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

fn parse_url(raw: &str) -> Result<Url, BuildError> {
    Url::parse(raw).map_err(|e| BuildError::InvalidUrl {
        url: raw.to_string(),
        reason: e.to_string(),
    })
}

fn missing(descriptor: &OperationDescriptor, name: &str) -> BuildError {
    BuildError::MissingArgument {
        operation: descriptor.name().to_string(),
        name: name.to_string(),
    }
}
