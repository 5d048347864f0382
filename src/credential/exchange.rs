//! Registry refresh-token exchange
//!
//! Container registries that sit behind an identity provider hand out their
//! own tokens in two steps:
//!
//! 1. `POST /oauth2/exchange` trades an upstream access token for a registry
//!    refresh token
//! 2. `POST /oauth2/token` trades that refresh token for an access token
//!    bound to the challenged service and scope
//!
//! Both calls go through a bootstrap pipeline that has no authentication
//! policy of its own.

use super::{AccessToken, CredentialSource, TokenRequest};
use crate::config::PipelineConfig;
use crate::dispatch::Dispatcher;
use crate::error::{DecodeError, Error, Result, TokenError};
use crate::operation::{registry_error_types, Args, Catalog};
use crate::pipeline::Pipeline;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use url::form_urlencoded;

const EXCHANGE_OPERATION: &str = "exchangeAadAccessTokenForAcrRefreshToken";
const TOKEN_OPERATION: &str = "exchangeAcrRefreshTokenForAcrAccessToken";

/// Lifetime assumed when the access token carries no readable `exp` claim
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Deserialize)]
struct RefreshTokenResponse {
    refresh_token: String,
}

#[derive(Deserialize)]
struct AccessTokenResponse {
    access_token: String,
}

/// Credential source that runs the two-step registry exchange
pub struct RefreshTokenExchange {
    dispatcher: Dispatcher,
    upstream: Arc<dyn CredentialSource>,
    upstream_request: TokenRequest,
}

impl RefreshTokenExchange {
    /// `dispatcher` must not carry an authentication policy and must have
    /// the registry endpoint bound
    pub fn new(
        dispatcher: Dispatcher,
        upstream: Arc<dyn CredentialSource>,
        upstream_request: TokenRequest,
    ) -> Self {
        Self {
            dispatcher,
            upstream,
            upstream_request,
        }
    }

    /// Exchange against `endpoint` over a fresh bootstrap pipeline
    pub fn from_config(
        config: &PipelineConfig,
        endpoint: &str,
        upstream: Arc<dyn CredentialSource>,
        upstream_request: TokenRequest,
    ) -> Result<Self> {
        let pipeline = Pipeline::bootstrap_from_config(config)?;
        let dispatcher = Dispatcher::new(pipeline)
            .with_endpoint(endpoint)
            .with_error_types(registry_error_types());
        Ok(Self::new(dispatcher, upstream, upstream_request))
    }

    async fn exchange(&self, request: &TokenRequest) -> Result<AccessToken> {
        let catalog = Catalog::builtin();
        let exchange_op = catalog.require(EXCHANGE_OPERATION)?;
        let token_op = catalog.require(TOKEN_OPERATION)?;
        let upstream = self.upstream.get_token(&self.upstream_request).await?;

        let form = form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "access_token")
            .append_pair("service", &request.service)
            .append_pair("access_token", upstream.token())
            .finish();
        let refresh: RefreshTokenResponse = self
            .dispatcher
            .invoke(&exchange_op, &Args::new().with("form", form))
            .await?
            .ok_or_else(|| empty_body("refresh token response"))?;

        let form = form_urlencoded::Serializer::new(String::new())
            .append_pair("grant_type", "refresh_token")
            .append_pair("service", &request.service)
            .append_pair("scope", &request.scope)
            .append_pair("refresh_token", &refresh.refresh_token)
            .finish();
        let access: AccessTokenResponse = self
            .dispatcher
            .invoke(&token_op, &Args::new().with("form", form))
            .await?
            .ok_or_else(|| empty_body("access token response"))?;

        match jwt_expiry(&access.access_token) {
            Some(expires_at) => Ok(AccessToken::new(access.access_token, expires_at)),
            None => {
                tracing::debug!("Access token has no readable expiry, assuming one hour");
                Ok(AccessToken::expiring_in(access.access_token, DEFAULT_TOKEN_TTL))
            }
        }
    }
}

impl CredentialSource for RefreshTokenExchange {
    fn get_token<'a>(
        &'a self,
        request: &'a TokenRequest,
    ) -> BoxFuture<'a, Result<AccessToken, TokenError>> {
        async move {
            tracing::debug!(
                "Exchanging tokens for service {} scope {}",
                request.service,
                request.scope
            );
            self.exchange(request).await.map_err(|err| match err {
                Error::Token(err) => err,
                other => TokenError::with_source(
                    format!("token exchange for {} failed", request.service),
                    other,
                ),
            })
        }
        .boxed()
    }
}

fn empty_body(target: &'static str) -> Error {
    DecodeError::Body {
        target,
        message: "empty body".to_string(),
    }
    .into()
}

/// Expiry from the `exp` claim of a JWT, without verifying it
pub fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?.as_i64()?;
    DateTime::from_timestamp(exp, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jwt(claims: &str) -> String {
        format!(
            "{}.{}.sig",
            URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256"}"#),
            URL_SAFE_NO_PAD.encode(claims)
        )
    }

    #[test]
    fn test_jwt_expiry_reads_exp_claim() {
        let expiry = jwt_expiry(&jwt(r#"{"exp":1700000000,"aud":"reg"}"#)).unwrap();
        assert_eq!(expiry.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_jwt_expiry_rejects_opaque_tokens() {
        assert!(jwt_expiry("opaque-token").is_none());
        assert!(jwt_expiry(&jwt(r#"{"aud":"reg"}"#)).is_none());
        assert!(jwt_expiry("a.!!!.c").is_none());
    }
}
