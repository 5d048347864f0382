//! `WWW-Authenticate: Bearer realm="...",service="...",scope="..."` parsing

use super::TokenRequest;

/// A bearer challenge the client knows how to answer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerChallenge {
    pub realm: Option<String>,
    pub service: String,
    pub scope: String,
    pub error: Option<String>,
}

impl BearerChallenge {
    /// Parse a challenge header
    ///
    /// Returns `None` unless the scheme is `Bearer` and both `service` and
    /// `scope` are present as quoted values. Any unquoted or unterminated
    /// value makes the whole header unusable.
    pub fn parse(header: &str) -> Option<Self> {
        let header = header.trim();
        let (scheme, params) = header.split_once(char::is_whitespace)?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }

        let mut realm = None;
        let mut service = None;
        let mut scope = None;
        let mut error = None;

        let mut rest = params.trim_start();
        while !rest.is_empty() {
            let (key, after_key) = rest.split_once('=')?;
            let key = key.trim().to_ascii_lowercase();
            let after_key = after_key.trim_start().strip_prefix('"')?;
            let (value, after_value) = after_key.split_once('"')?;

            match key.as_str() {
                "realm" => realm = Some(value.to_string()),
                "service" => service = Some(value.to_string()),
                "scope" => scope = Some(value.to_string()),
                "error" => error = Some(value.to_string()),
                _ => {}
            }

            rest = after_value.trim_start();
            rest = rest.strip_prefix(',').unwrap_or(rest).trim_start();
        }

        Some(Self {
            realm,
            service: service?,
            scope: scope?,
            error,
        })
    }

    pub fn token_request(&self) -> TokenRequest {
        TokenRequest::new(self.service.clone(), self.scope.clone())
    }
}
