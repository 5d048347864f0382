//! Operation declarations and their validated, immutable descriptors
//!
//! An [`OperationDeclaration`] is the declarative contract for one remote
//! call: verb, host and path templates, parameter bindings, accepted
//! statuses and return shape. [`OperationDescriptor::parse`] validates it
//! once; the descriptor is then shared by every call of that operation.

use super::template::Template;
use crate::error::BuildError;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};

/// Argument name the continuation descriptor binds the next-page link to
pub const NEXT_LINK_ARG: &str = "nextLink";

/// Default error type tag
pub const DEFAULT_ERROR_TYPE: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Host,
    Path,
    Query,
    Header,
    Body,
}

impl ParamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKind::Host => "host",
            ParamKind::Path => "path",
            ParamKind::Query => "query",
            ParamKind::Header => "header",
            ParamKind::Body => "body",
        }
    }
}

/// How one named argument reaches the request
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ParameterBinding {
    pub kind: ParamKind,
    pub name: String,
    /// Value is already percent-encoded and is inserted verbatim
    #[serde(default)]
    pub encoded: bool,
}

impl ParameterBinding {
    pub fn new(kind: ParamKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            encoded: false,
        }
    }

    pub fn encoded(mut self) -> Self {
        self.encoded = true;
        self
    }
}

/// On-the-wire encoding of a body, distinct from its decoded type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WireType {
    #[default]
    Json,
    Base64url,
    RawBytes,
}

/// Where a paged response keeps the link to its next page
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextLink {
    /// A string field of the body
    Body(String),
    /// An RFC 8288 `Link: <...>; rel="next"` header
    LinkHeader,
}

impl Default for NextLink {
    fn default() -> Self {
        NextLink::Body("nextLink".to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PageShape {
    #[serde(default = "default_items_field")]
    pub items: String,
    #[serde(default)]
    pub next_link: NextLink,
}

fn default_items_field() -> String {
    "value".to_string()
}

impl Default for PageShape {
    fn default() -> Self {
        Self {
            items: default_items_field(),
            next_link: NextLink::default(),
        }
    }
}

/// Shape the caller expects back
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReturnShape {
    /// No body; the response is drained and dropped
    Void,
    /// HEAD request answered with a boolean
    Exists,
    /// Whole body as bytes
    Bytes,
    /// Body handed over unbuffered
    Stream,
    /// Body deserialized into a typed value
    #[default]
    Value,
    /// One page of items plus a continuation link
    Paged(PageShape),
}

impl ReturnShape {
    pub fn name(&self) -> &'static str {
        match self {
            ReturnShape::Void => "void",
            ReturnShape::Exists => "exists",
            ReturnShape::Bytes => "bytes",
            ReturnShape::Stream => "stream",
            ReturnShape::Value => "value",
            ReturnShape::Paged(_) => "paged",
        }
    }
}

/// Status + headers + body envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub struct EnvelopeShape {
    /// Headers are decoded into a declared type
    #[serde(default)]
    pub typed_headers: bool,
}

/// Error type tags selected by status code
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorMapping {
    #[serde(default = "default_error_type")]
    pub default: String,
    #[serde(default)]
    pub by_status: BTreeMap<u16, String>,
}

fn default_error_type() -> String {
    DEFAULT_ERROR_TYPE.to_string()
}

impl Default for ErrorMapping {
    fn default() -> Self {
        Self {
            default: default_error_type(),
            by_status: BTreeMap::new(),
        }
    }
}

fn default_host() -> String {
    "{endpoint}".to_string()
}

/// Declarative description of one operation, as written in a catalogue
/// or assembled in code
#[derive(Debug, Clone, Deserialize)]
pub struct OperationDeclaration {
    pub name: String,
    pub verb: String,
    /// Host template; its placeholders bind implicitly as host parameters
    #[serde(default = "default_host")]
    pub host: String,
    pub path: String,
    #[serde(default)]
    pub params: Vec<ParameterBinding>,
    /// Accepted statuses; empty means any 2xx
    #[serde(default)]
    pub expected: Vec<u16>,
    /// Extra statuses accepted on top of `expected`
    #[serde(default)]
    pub also_allowed: Vec<u16>,
    #[serde(default)]
    pub returns: ReturnShape,
    #[serde(default)]
    pub envelope: Option<EnvelopeShape>,
    #[serde(default)]
    pub errors: ErrorMapping,
    #[serde(default)]
    pub wire_type: WireType,
    /// Overrides the content type inferred from the body argument
    #[serde(default)]
    pub content_type: Option<String>,
    /// Static headers sent with every call
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl OperationDeclaration {
    pub fn new(name: impl Into<String>, verb: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            verb: verb.into(),
            host: default_host(),
            path: path.into(),
            params: Vec::new(),
            expected: Vec::new(),
            also_allowed: Vec::new(),
            returns: ReturnShape::default(),
            envelope: None,
            errors: ErrorMapping::default(),
            wire_type: WireType::default(),
            content_type: None,
            headers: BTreeMap::new(),
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn param(mut self, kind: ParamKind, name: impl Into<String>) -> Self {
        self.params.push(ParameterBinding::new(kind, name));
        self
    }

    pub fn binding(mut self, binding: ParameterBinding) -> Self {
        self.params.push(binding);
        self
    }

    pub fn expect(mut self, statuses: &[u16]) -> Self {
        self.expected.extend_from_slice(statuses);
        self
    }

    pub fn also_allow(mut self, statuses: &[u16]) -> Self {
        self.also_allowed.extend_from_slice(statuses);
        self
    }

    pub fn returns(mut self, shape: ReturnShape) -> Self {
        self.returns = shape;
        self
    }

    pub fn envelope(mut self, typed_headers: bool) -> Self {
        self.envelope = Some(EnvelopeShape { typed_headers });
        self
    }

    pub fn error_type(mut self, tag: impl Into<String>) -> Self {
        self.errors.default = tag.into();
        self
    }

    pub fn error_type_for(mut self, status: u16, tag: impl Into<String>) -> Self {
        self.errors.by_status.insert(status, tag.into());
        self
    }

    pub fn wire_type(mut self, wire_type: WireType) -> Self {
        self.wire_type = wire_type;
        self
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Validate into a descriptor
    pub fn build(self) -> Result<OperationDescriptor, BuildError> {
        OperationDescriptor::parse(self)
    }
}

/// Validated description of one remote operation
#[derive(Debug, Clone)]
pub struct OperationDescriptor {
    name: String,
    verb: Method,
    host: Template,
    path: Template,
    params: Vec<ParameterBinding>,
    expected: BTreeSet<u16>,
    also_allowed: BTreeSet<u16>,
    returns: ReturnShape,
    envelope: Option<EnvelopeShape>,
    errors: ErrorMapping,
    wire_type: WireType,
    content_type: Option<HeaderValue>,
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl OperationDescriptor {
    /// Validate a declaration; every template problem surfaces here, before
    /// any request exists
    pub fn parse(decl: OperationDeclaration) -> Result<Self, BuildError> {
        let verb = parse_verb(&decl.verb)?;
        let host = Template::parse(&decl.host)?;
        let path = Template::parse(&decl.path)?;
        let invalid = |reason: &str| BuildError::InvalidOperation {
            operation: decl.name.clone(),
            reason: reason.to_string(),
        };

        let mut params = decl.params.clone();
        let mut seen = BTreeSet::new();
        for binding in &params {
            if !seen.insert(binding.name.clone()) {
                return Err(BuildError::DuplicateParameter(binding.name.clone()));
            }
        }

        for name in host.placeholders() {
            match params.iter().find(|b| b.name == name) {
                Some(b) if b.kind == ParamKind::Host => {}
                Some(_) => {
                    return Err(BuildError::UnboundPlaceholder {
                        name: name.to_string(),
                        template: host.as_str().to_string(),
                    })
                }
                None => params.push(ParameterBinding::new(ParamKind::Host, name)),
            }
        }

        for name in path.placeholders() {
            if !params.iter().any(|b| b.kind == ParamKind::Path && b.name == name) {
                return Err(BuildError::UnboundPlaceholder {
                    name: name.to_string(),
                    template: path.as_str().to_string(),
                });
            }
        }

        for binding in &params {
            let used = match binding.kind {
                ParamKind::Host => host.contains(&binding.name),
                ParamKind::Path => path.contains(&binding.name),
                _ => true,
            };
            if !used {
                return Err(BuildError::UnusedBinding {
                    kind: binding.kind.as_str(),
                    name: binding.name.clone(),
                });
            }
        }

        if params.iter().filter(|b| b.kind == ParamKind::Body).count() > 1 {
            return Err(BuildError::MultipleBodies(decl.name.clone()));
        }

        if decl.returns == ReturnShape::Exists && verb != Method::HEAD {
            return Err(invalid("the exists shape is only valid for HEAD"));
        }

        for status in decl.expected.iter().chain(&decl.also_allowed) {
            if StatusCode::from_u16(*status).is_err() {
                return Err(invalid(&format!("invalid status code {status}")));
            }
        }

        let content_type = match &decl.content_type {
            Some(ct) => Some(HeaderValue::from_str(ct).map_err(|_| BuildError::InvalidHeader {
                name: "content-type".to_string(),
            })?),
            None => None,
        };

        let mut headers = Vec::with_capacity(decl.headers.len());
        for (name, value) in &decl.headers {
            let invalid_header = || BuildError::InvalidHeader { name: name.clone() };
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid_header())?;
            let value = HeaderValue::from_str(value).map_err(|_| invalid_header())?;
            headers.push((name, value));
        }

        Ok(Self {
            name: decl.name,
            verb,
            host,
            path,
            params,
            expected: decl.expected.into_iter().collect(),
            also_allowed: decl.also_allowed.into_iter().collect(),
            returns: decl.returns,
            envelope: decl.envelope,
            errors: decl.errors,
            wire_type: decl.wire_type,
            content_type,
            headers,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn verb(&self) -> &Method {
        &self.verb
    }

    pub fn host(&self) -> &Template {
        &self.host
    }

    pub fn path(&self) -> &Template {
        &self.path
    }

    pub fn params(&self) -> &[ParameterBinding] {
        &self.params
    }

    pub fn params_of(&self, kind: ParamKind) -> impl Iterator<Item = &ParameterBinding> {
        self.params.iter().filter(move |b| b.kind == kind)
    }

    pub fn binding(&self, name: &str) -> Option<&ParameterBinding> {
        self.params.iter().find(|b| b.name == name)
    }

    pub fn expected(&self) -> &BTreeSet<u16> {
        &self.expected
    }

    pub fn returns(&self) -> &ReturnShape {
        &self.returns
    }

    pub fn envelope(&self) -> Option<EnvelopeShape> {
        self.envelope
    }

    pub fn wire_type(&self) -> WireType {
        self.wire_type
    }

    pub fn content_type(&self) -> Option<&HeaderValue> {
        self.content_type.as_ref()
    }

    pub fn static_headers(&self) -> &[(HeaderName, HeaderValue)] {
        &self.headers
    }

    /// Whether a status is accepted, counting per-call extra statuses
    pub fn accepts(&self, status: u16, extra: &[u16]) -> bool {
        if self.expected.contains(&status)
            || self.also_allowed.contains(&status)
            || extra.contains(&status)
        {
            return true;
        }
        self.expected.is_empty() && (200..300).contains(&status)
    }

    /// Error type tag for an unexpected status
    pub fn error_type_for(&self, status: u16) -> &str {
        self.errors
            .by_status
            .get(&status)
            .unwrap_or(&self.errors.default)
    }

    /// Descriptor used to follow a next-page link
    ///
    /// GET on a `{nextLink}` path whose argument is always an absolute URL,
    /// keeping only the header bindings of the original.
    pub fn continuation(&self) -> OperationDescriptor {
        let mut params: Vec<_> = self.params_of(ParamKind::Header).cloned().collect();
        params.push(ParameterBinding::new(ParamKind::Path, NEXT_LINK_ARG).encoded());

        OperationDescriptor {
            name: format!("{}.next", self.name),
            verb: Method::GET,
            host: Template::empty(),
            path: Template::placeholder(NEXT_LINK_ARG),
            params,
            expected: self.expected.clone(),
            also_allowed: self.also_allowed.clone(),
            returns: self.returns.clone(),
            envelope: self.envelope,
            errors: self.errors.clone(),
            wire_type: self.wire_type,
            content_type: None,
            headers: self.headers.clone(),
        }
    }
}

fn parse_verb(verb: &str) -> Result<Method, BuildError> {
    match verb.to_ascii_uppercase().as_str() {
        "GET" => Ok(Method::GET),
        "PUT" => Ok(Method::PUT),
        "POST" => Ok(Method::POST),
        "PATCH" => Ok(Method::PATCH),
        "DELETE" => Ok(Method::DELETE),
        "HEAD" => Ok(Method::HEAD),
        "OPTIONS" => Ok(Method::OPTIONS),
        _ => Err(BuildError::UnknownVerb(verb.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn get_tags() -> OperationDeclaration {
        OperationDeclaration::new("getTags", "get", "/acr/v1/{name}/_tags")
            .param(ParamKind::Path, "name")
            .param(ParamKind::Query, "n")
            .expect(&[200])
    }

    #[test]
    fn test_host_placeholders_bind_implicitly() {
        let descriptor = get_tags().build().unwrap();
        assert_eq!(descriptor.verb(), &Method::GET);
        let host = descriptor.binding("endpoint").unwrap();
        assert_eq!(host.kind, ParamKind::Host);
    }

    #[test]
    fn test_unbound_path_placeholder_fails_at_build_time() {
        let decl =
            OperationDeclaration::new("getManifest", "GET", "/v2/{name}/manifests/{reference}")
                .param(ParamKind::Path, "name");
        let err = decl.build().unwrap_err();
        assert!(matches!(
            err,
            BuildError::UnboundPlaceholder { ref name, .. } if name == "reference"
        ));
    }

    #[test]
    fn test_unused_path_binding_is_rejected() {
        let decl = get_tags().param(ParamKind::Path, "digest");
        assert!(matches!(decl.build(), Err(BuildError::UnusedBinding { .. })));
    }

    #[test]
    fn test_two_bodies_are_rejected() {
        let decl = OperationDeclaration::new("put", "PUT", "/x")
            .param(ParamKind::Body, "a")
            .param(ParamKind::Body, "b");
        assert!(matches!(decl.build(), Err(BuildError::MultipleBodies(_))));
    }

    #[test]
    fn test_exists_requires_head() {
        let decl = OperationDeclaration::new("check", "GET", "/v2/").returns(ReturnShape::Exists);
        assert!(matches!(decl.build(), Err(BuildError::InvalidOperation { .. })));
    }

    #[test]
    fn test_unknown_verb() {
        let decl = OperationDeclaration::new("brew", "BREW", "/coffee");
        assert!(matches!(decl.build(), Err(BuildError::UnknownVerb(_))));
    }

    #[test]
    fn test_accepts_expected_extra_and_default_2xx() {
        let descriptor = get_tags().also_allow(&[404]).build().unwrap();
        assert!(descriptor.accepts(200, &[]));
        assert!(descriptor.accepts(404, &[]));
        assert!(!descriptor.accepts(201, &[]));
        assert!(descriptor.accepts(409, &[409]));

        let open = OperationDeclaration::new("any", "GET", "/").build().unwrap();
        assert!(open.accepts(204, &[]));
        assert!(!open.accepts(404, &[]));
    }

    #[test]
    fn test_error_type_by_status() {
        let descriptor = get_tags()
            .error_type("acr_error")
            .error_type_for(404, "not_found")
            .build()
            .unwrap();
        assert_eq!(descriptor.error_type_for(404), "not_found");
        assert_eq!(descriptor.error_type_for(500), "acr_error");
    }

    #[test]
    fn test_continuation_keeps_headers_only() {
        let descriptor = get_tags()
            .param(ParamKind::Header, "x-request-tag")
            .returns(ReturnShape::Paged(PageShape::default()))
            .build()
            .unwrap();
        let next = descriptor.continuation();
        assert_eq!(next.verb(), &Method::GET);
        assert!(next.binding("x-request-tag").is_some());
        assert!(next.binding("n").is_none());
        assert!(next.binding(NEXT_LINK_ARG).unwrap().encoded);
        assert_eq!(next.returns(), descriptor.returns());
    }

    #[test]
    fn test_declaration_from_yaml() {
        let yaml = r#"
name: listRepositories
verb: GET
path: /acr/v1/_catalog
params:
  - { kind: query, name: last }
expected: [200]
returns: { kind: paged, items: repositories, next_link: link_header }
errors: { default: acr_error, by_status: { 404: not_found } }
"#;
        let decl: OperationDeclaration = serde_yaml::from_str(yaml).unwrap();
        let descriptor = decl.build().unwrap();
        assert_eq!(
            descriptor.returns(),
            &ReturnShape::Paged(PageShape {
                items: "repositories".to_string(),
                next_link: NextLink::LinkHeader,
            })
        );
        assert_eq!(descriptor.error_type_for(404), "not_found");
    }
}
