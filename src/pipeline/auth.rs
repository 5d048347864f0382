//! Challenge-based bearer authentication
//!
//! The request goes out with the cached token if there is one. A 401 that
//! carries a `WWW-Authenticate: Bearer` challenge with `service` and `scope`
//! triggers exactly one token request for that pair and one retry. Anything
//! else, including a second 401, is passed up unchanged.

use super::{boxed, Next, Policy};
use crate::credential::{AccessToken, BearerChallenge, TokenCache};
use crate::error::{Result, TokenError};
use crate::http::{HttpRequest, HttpResponse};
use futures::future::BoxFuture;
use reqwest::header::{HeaderValue, AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::StatusCode;
use std::sync::Arc;

/// Answers bearer challenges with tokens from a shared cache
#[derive(Debug, Clone)]
pub struct BearerChallengePolicy {
    tokens: Arc<TokenCache>,
}

impl BearerChallengePolicy {
    pub fn new(tokens: Arc<TokenCache>) -> Self {
        Self { tokens }
    }

    pub fn tokens(&self) -> &Arc<TokenCache> {
        &self.tokens
    }
}

fn authorize(request: &mut HttpRequest, token: &AccessToken) -> Result<()> {
    let mut value = HeaderValue::from_str(&format!("Bearer {}", token.token()))
        .map_err(|_| TokenError::new("access token is not a valid header value"))?;
    value.set_sensitive(true);
    request.set_header(AUTHORIZATION, value);
    Ok(())
}

fn challenge(response: &HttpResponse) -> Option<BearerChallenge> {
    response
        .headers
        .get_all(WWW_AUTHENTICATE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(BearerChallenge::parse)
}

impl Policy for BearerChallengePolicy {
    fn name(&self) -> &'static str {
        "bearer-challenge"
    }

    fn process<'a>(
        &'a self,
        request: HttpRequest,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<HttpResponse>> {
        boxed(async move {
            let mut first = request.clone();
            if let Some(token) = self.tokens.current_token() {
                authorize(&mut first, &token)?;
            }

            let response = next.run(first).await?;
            if response.status != StatusCode::UNAUTHORIZED {
                return Ok(response);
            }
            let Some(challenge) = challenge(&response) else {
                tracing::debug!("401 without a usable bearer challenge");
                return Ok(response);
            };
            drop(response);

            tracing::debug!(
                "Answering bearer challenge for service {} scope {}",
                challenge.service,
                challenge.scope
            );
            let token = self.tokens.get_token(&challenge.token_request()).await?;

            let mut retry = request;
            authorize(&mut retry, &token)?;
            next.run(retry).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{CredentialSource, TokenRequest};
    use crate::pipeline::testing::{get, MockTransport};
    use crate::pipeline::Pipeline;
    use reqwest::header::HeaderMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Issues `token-<service>-<scope>` and remembers what it was asked for
    #[derive(Default)]
    struct Recording {
        asked: Mutex<Vec<TokenRequest>>,
    }

    impl CredentialSource for Recording {
        fn get_token<'a>(
            &'a self,
            request: &'a TokenRequest,
        ) -> BoxFuture<'a, std::result::Result<AccessToken, TokenError>> {
            self.asked.lock().unwrap().push(request.clone());
            let token = format!("token-{}-{}", request.service, request.scope);
            Box::pin(async move { Ok(AccessToken::expiring_in(token, Duration::from_secs(3600))) })
        }
    }

    fn challenge_headers(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(WWW_AUTHENTICATE, HeaderValue::from_static(value));
        headers
    }

    fn pipeline(transport: Arc<MockTransport>, source: Arc<Recording>) -> Pipeline {
        Pipeline::builder()
            .policy(BearerChallengePolicy::new(Arc::new(TokenCache::new(source))))
            .transport_arc(transport)
            .build()
    }

    #[tokio::test]
    async fn test_challenge_is_answered_once() {
        let transport = Arc::new(
            MockTransport::new()
                .respond_with(
                    401,
                    challenge_headers(r#"Bearer service="reg",scope="repo:pull""#),
                    "",
                )
                .respond(200, "ok"),
        );
        let source = Arc::new(Recording::default());
        let response = pipeline(transport.clone(), source.clone())
            .send(get("https://reg.io/v2/"))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(*source.asked.lock().unwrap(), vec![TokenRequest::new("reg", "repo:pull")]);
        let seen = transport.requests();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].header("authorization"), None);
        assert_eq!(seen[1].header("authorization"), Some("Bearer token-reg-repo:pull"));
    }

    #[tokio::test]
    async fn test_second_unauthorized_is_not_retried() {
        let challenge = r#"Bearer service="reg",scope="repo:push""#;
        let transport = Arc::new(
            MockTransport::new()
                .respond_with(401, challenge_headers(challenge), "")
                .respond_with(401, challenge_headers(challenge), ""),
        );
        let response = pipeline(transport.clone(), Arc::new(Recording::default()))
            .send(get("https://reg.io/v2/"))
            .await
            .unwrap();
        assert_eq!(response.status, 401);
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_challenge_surfaces_401() {
        let transport = Arc::new(
            MockTransport::new().respond_with(401, challenge_headers("Bearer service=reg"), ""),
        );
        let source = Arc::new(Recording::default());
        let response = pipeline(transport.clone(), source.clone())
            .send(get("https://reg.io/v2/"))
            .await
            .unwrap();
        assert_eq!(response.status, 401);
        assert!(source.asked.lock().unwrap().is_empty());
        assert_eq!(transport.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_cached_token_is_sent_up_front() {
        let transport = Arc::new(
            MockTransport::new()
                .respond_with(
                    401,
                    challenge_headers(r#"Bearer service="reg",scope="repo:pull""#),
                    "",
                )
                .respond(200, "")
                .respond(200, ""),
        );
        let pipeline = pipeline(transport.clone(), Arc::new(Recording::default()));
        pipeline.send(get("https://reg.io/v2/a")).await.unwrap();
        pipeline.send(get("https://reg.io/v2/b")).await.unwrap();

        let seen = transport.requests();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[2].header("authorization"), Some("Bearer token-reg-repo:pull"));
    }
}
