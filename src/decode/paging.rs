//! Paged responses and next-link discovery

use crate::error::DecodeError;
use crate::operation::{NextLink, PageShape};
use crate::serializer::from_value;
use reqwest::header::{HeaderMap, LINK};
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

/// One page of items plus the absolute URL of the next page
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub continuation: Option<String>,
}

impl<T> Page<T> {
    pub fn has_more(&self) -> bool {
        self.continuation.is_some()
    }
}

impl<T: DeserializeOwned> Page<T> {
    /// Split a decoded body into items and a next link
    pub(crate) fn from_parts(
        shape: &PageShape,
        body: Option<Value>,
        headers: &HeaderMap,
        request_url: &Url,
    ) -> Result<Self, DecodeError> {
        let mut body = body.unwrap_or(Value::Null);

        let items = match body.get_mut(shape.items.as_str()).map(Value::take) {
            None | Some(Value::Null) => Vec::new(),
            Some(items @ Value::Array(_)) => from_value(items).map_err(|e| DecodeError::Body {
                target: "page items",
                message: e.message,
            })?,
            Some(_) => {
                return Err(DecodeError::Body {
                    target: "page items",
                    message: format!("field `{}` is not an array", shape.items),
                })
            }
        };

        let link = match &shape.next_link {
            NextLink::Body(field) => body
                .get(field.as_str())
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            NextLink::LinkHeader => headers
                .get_all(LINK)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .find_map(next_from_link_header),
        };

        Ok(Self {
            items,
            continuation: link.and_then(|link| resolve(request_url, &link)),
        })
    }
}

/// Target of the `rel="next"` entry of an RFC 8288 `Link` header
pub fn next_from_link_header(header: &str) -> Option<String> {
    header.split(',').find_map(|entry| {
        let mut parts = entry.split(';');
        let target = parts.next()?.trim();
        let target = target.strip_prefix('<')?.strip_suffix('>')?;
        let is_next = parts.any(|param| {
            let Some((key, value)) = param.split_once('=') else {
                return false;
            };
            key.trim().eq_ignore_ascii_case("rel")
                && value
                    .trim()
                    .trim_matches('"')
                    .split_whitespace()
                    .any(|rel| rel.eq_ignore_ascii_case("next"))
        });
        is_next.then(|| target.to_string())
    })
}

/// Resolve a possibly relative link against the URL that produced it
fn resolve(base: &Url, link: &str) -> Option<String> {
    match base.join(link) {
        Ok(url) => Some(url.to_string()),
        Err(err) => {
            tracing::warn!("Ignoring unusable next link {}: {}", link, err);
            None
        }
    }
}
