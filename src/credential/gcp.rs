//! Google Cloud credentials
//!
//! Uses Application Default Credentials (ADC): a service account key named by
//! `GOOGLE_APPLICATION_CREDENTIALS`, gcloud user credentials, or the metadata
//! server.

use super::{AccessToken, CredentialSource, TokenRequest};
use crate::error::TokenError;
use futures::future::BoxFuture;
use futures::FutureExt;
use gcp_auth::TokenProvider;
use std::sync::Arc;
use std::time::Duration;

/// Default scopes for GCP API access
pub const DEFAULT_SCOPES: &[&str] = &["https://www.googleapis.com/auth/cloud-platform"];

/// Token expiry buffer - treat tokens as expired this much before they are
const TOKEN_EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// Default token TTL if we can't determine expiry (conservative: 30 minutes)
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(30 * 60);

/// Credential source backed by `gcp_auth`
#[derive(Clone)]
pub struct GcpCredential {
    provider: Arc<dyn TokenProvider>,
}

impl GcpCredential {
    /// Discover Application Default Credentials
    pub async fn new() -> Result<Self, TokenError> {
        let provider = gcp_auth::provider().await.map_err(|e| {
            TokenError::with_source(
                "Failed to initialize GCP authentication. Run 'gcloud auth application-default login'",
                e,
            )
        })?;
        Ok(Self { provider })
    }

    pub fn with_provider(provider: Arc<dyn TokenProvider>) -> Self {
        Self { provider }
    }
}

/// OAuth scopes carried by a token request; anything that is not a scope URL
/// falls back to the cloud-platform scope
fn scopes_for(request: &TokenRequest) -> Vec<&str> {
    let scopes: Vec<&str> = request
        .scope
        .split([' ', ','])
        .map(str::trim)
        .filter(|s| s.starts_with("https://"))
        .collect();
    if scopes.is_empty() {
        DEFAULT_SCOPES.to_vec()
    } else {
        scopes
    }
}

impl CredentialSource for GcpCredential {
    fn get_token<'a>(
        &'a self,
        request: &'a TokenRequest,
    ) -> BoxFuture<'a, Result<AccessToken, TokenError>> {
        async move {
            let scopes = scopes_for(request);
            let token = self
                .provider
                .token(&scopes)
                .await
                .map_err(|e| TokenError::with_source("Failed to get access token", e))?;

            // The provider's own expiry is not relied upon; use a conservative TTL
            let ttl = DEFAULT_TOKEN_TTL - TOKEN_EXPIRY_BUFFER;
            tracing::debug!("New GCP token issued, expires in ~{} minutes", ttl.as_secs() / 60);

            Ok(AccessToken::expiring_in(token.as_str(), ttl))
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scopes_for_registry_scope_fall_back() {
        let request = TokenRequest::new("reg", "repository:hello:pull");
        assert_eq!(scopes_for(&request), DEFAULT_SCOPES.to_vec());
    }

    #[test]
    fn test_scopes_for_explicit_scope_urls() {
        let request = TokenRequest::new(
            "storage",
            "https://www.googleapis.com/auth/devstorage.read_only https://www.googleapis.com/auth/logging.read",
        );
        assert_eq!(
            scopes_for(&request),
            vec![
                "https://www.googleapis.com/auth/devstorage.read_only",
                "https://www.googleapis.com/auth/logging.read"
            ]
        );
    }
}
