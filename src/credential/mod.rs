//! Access tokens and where they come from
//!
//! A [`CredentialSource`] is the upstream identity provider. The
//! [`TokenCache`] sits in front of one and is what the authentication policy
//! talks to.
//!
//! - [`cache`] - concurrent token cache with a single in-flight refresh
//! - [`challenge`] - `WWW-Authenticate: Bearer ...` parsing
//! - [`gcp`] - Application Default Credentials
//! - [`exchange`] - registry refresh-token exchange

pub mod cache;
pub mod challenge;
pub mod exchange;
pub mod gcp;

pub use cache::{TokenCache, TokenCacheOptions};
pub use challenge::BearerChallenge;
pub use exchange::RefreshTokenExchange;
pub use gcp::GcpCredential;

use crate::error::TokenError;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::time::Duration;

/// Bearer token plus the moment it stops being valid
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    token: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// Token valid for `ttl` from now
    pub fn expiring_in(token: impl Into<String>, ttl: Duration) -> Self {
        let expires_at = Utc::now()
            .checked_add_signed(to_time_delta(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self::new(token, expires_at)
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// Whether the token expires within `window` from now
    pub fn expires_within(&self, window: Duration) -> bool {
        match self.expires_at.checked_sub_signed(to_time_delta(window)) {
            Some(refresh_at) => refresh_at <= Utc::now(),
            None => true,
        }
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"REDACTED")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Credential context a token is requested for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TokenRequest {
    pub service: String,
    pub scope: String,
}

impl TokenRequest {
    pub fn new(service: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            scope: scope.into(),
        }
    }
}

/// Upstream identity provider
pub trait CredentialSource: Send + Sync {
    fn get_token<'a>(
        &'a self,
        request: &'a TokenRequest,
    ) -> BoxFuture<'a, Result<AccessToken, TokenError>>;
}

/// Always hands out the same token
#[derive(Clone)]
pub struct StaticCredential {
    token: AccessToken,
}

impl StaticCredential {
    pub fn new(token: AccessToken) -> Self {
        Self { token }
    }

    /// A token that never expires in practice
    pub fn from_token(token: impl Into<String>) -> Self {
        Self::new(AccessToken::new(token, DateTime::<Utc>::MAX_UTC))
    }
}

impl CredentialSource for StaticCredential {
    fn get_token<'a>(
        &'a self,
        _request: &'a TokenRequest,
    ) -> BoxFuture<'a, Result<AccessToken, TokenError>> {
        futures::future::ready(Ok(self.token.clone())).boxed()
    }
}

pub(crate) fn to_time_delta(duration: Duration) -> chrono::TimeDelta {
    chrono::TimeDelta::from_std(duration).unwrap_or(chrono::TimeDelta::MAX)
}
