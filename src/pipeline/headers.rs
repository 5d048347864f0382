//! Header-stamping policies

use super::{boxed, Next, Policy};
use crate::error::{BuildError, Error, Result};
use crate::http::{HttpRequest, HttpResponse};
use futures::future::BoxFuture;
use reqwest::header::{HeaderName, HeaderValue, USER_AGENT};
use std::collections::BTreeMap;

/// Default header carrying the client request id
pub const DEFAULT_REQUEST_ID_HEADER: &str = "x-ms-client-request-id";

/// Sets `User-Agent: [app-id ]cloudrest/<version> (<os>)`
#[derive(Debug, Clone)]
pub struct UserAgentPolicy {
    value: HeaderValue,
}

impl UserAgentPolicy {
    pub fn new(application_id: Option<&str>) -> Self {
        let base = format!(
            "cloudrest/{} ({}; {})",
            crate::VERSION,
            std::env::consts::OS,
            std::env::consts::ARCH
        );
        let full = match application_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => format!("{id} {base}"),
            None => base.clone(),
        };
        // Application ids with control characters fall back to the bare agent
        let value = HeaderValue::from_str(&full)
            .or_else(|_| HeaderValue::from_str(&base))
            .unwrap_or_else(|_| HeaderValue::from_static("cloudrest"));
        Self { value }
    }

    pub fn value(&self) -> &HeaderValue {
        &self.value
    }
}

impl Policy for UserAgentPolicy {
    fn name(&self) -> &'static str {
        "user-agent"
    }

    fn process<'a>(
        &'a self,
        mut request: HttpRequest,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<HttpResponse>> {
        request.set_header(USER_AGENT, self.value.clone());
        next.run(request)
    }
}

/// Stamps a fresh UUID v4 request id unless the caller supplied one
#[derive(Debug, Clone)]
pub struct RequestIdPolicy {
    header: HeaderName,
}

impl RequestIdPolicy {
    pub fn new(header: &str) -> Result<Self> {
        let header = HeaderName::from_bytes(header.as_bytes()).map_err(|_| {
            Error::from(BuildError::InvalidHeader {
                name: header.to_string(),
            })
        })?;
        Ok(Self { header })
    }
}

impl Default for RequestIdPolicy {
    fn default() -> Self {
        Self {
            header: HeaderName::from_static(DEFAULT_REQUEST_ID_HEADER),
        }
    }
}

impl Policy for RequestIdPolicy {
    fn name(&self) -> &'static str {
        "request-id"
    }

    fn process<'a>(
        &'a self,
        mut request: HttpRequest,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<HttpResponse>> {
        if !request.headers.contains_key(&self.header) {
            let id = uuid::Uuid::new_v4().to_string();
            if let Ok(value) = HeaderValue::from_str(&id) {
                request.set_header(self.header.clone(), value);
            }
        }
        next.run(request)
    }
}

/// Adds a fixed set of headers to every request
#[derive(Debug, Clone, Default)]
pub struct AddHeadersPolicy {
    headers: Vec<(HeaderName, HeaderValue)>,
}

impl AddHeadersPolicy {
    pub fn from_map(headers: &BTreeMap<String, String>) -> Result<Self> {
        let mut parsed = Vec::with_capacity(headers.len());
        for (name, value) in headers {
            let invalid = || {
                Error::from(BuildError::InvalidHeader {
                    name: name.clone(),
                })
            };
            let header = HeaderName::from_bytes(name.as_bytes()).map_err(|_| invalid())?;
            let value = HeaderValue::from_str(value).map_err(|_| invalid())?;
            parsed.push((header, value));
        }
        Ok(Self { headers: parsed })
    }
}

impl Policy for AddHeadersPolicy {
    fn name(&self) -> &'static str {
        "add-headers"
    }

    fn process<'a>(
        &'a self,
        mut request: HttpRequest,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<HttpResponse>> {
        boxed(async move {
            for (name, value) in &self.headers {
                request.set_header(name.clone(), value.clone());
            }
            next.run(request).await
        })
    }
}
