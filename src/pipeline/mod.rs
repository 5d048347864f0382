//! Policy pipeline
//!
//! A [`Pipeline`] is an ordered, immutable list of [`Policy`] values wrapped
//! around a [`Transport`]. Policies see the request in construction order on
//! the way out and the response in reverse order on the way back. A policy
//! that retries calls [`Next::run`] again, re-running only the stages below
//! it.
//!
//! - [`headers`] - user agent, request id and static headers
//! - [`retry`] - exponential backoff for transient failures
//! - [`cookie`] - per-host cookie jar
//! - [`auth`] - bearer challenge authentication
//! - [`logging`] - request/response logging
//! - [`decode`] - marks responses as decodable

pub mod auth;
pub mod cookie;
pub mod decode;
pub mod headers;
pub mod logging;
pub mod retry;

pub use auth::BearerChallengePolicy;
pub use cookie::CookiePolicy;
pub use decode::DecodingPolicy;
pub use headers::{AddHeadersPolicy, RequestIdPolicy, UserAgentPolicy};
pub use logging::{HttpLogDetail, HttpLoggingPolicy};
pub use retry::{RetryOptions, RetryPolicy};

use crate::config::PipelineConfig;
use crate::credential::TokenCache;
use crate::error::Result;
use crate::http::{HttpRequest, HttpResponse, ReqwestTransport, Transport};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// One request/response interceptor
pub trait Policy: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    fn process<'a>(
        &'a self,
        request: HttpRequest,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<HttpResponse>>;
}

/// The remaining stages below a policy
#[derive(Clone, Copy)]
pub struct Next<'a> {
    policies: &'a [Arc<dyn Policy>],
    transport: &'a dyn Transport,
}

impl<'a> Next<'a> {
    /// Run the remaining stages; may be called more than once
    pub fn run(self, request: HttpRequest) -> BoxFuture<'a, Result<HttpResponse>> {
        match self.policies.split_first() {
            Some((policy, rest)) => policy.process(
                request,
                Next {
                    policies: rest,
                    transport: self.transport,
                },
            ),
            None => self.transport.send(request),
        }
    }
}

/// Immutable policy chain shared by any number of concurrent calls
#[derive(Clone)]
pub struct Pipeline {
    policies: Arc<[Arc<dyn Policy>]>,
    transport: Arc<dyn Transport>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Default chain for authenticated calls
    pub fn from_config(config: &PipelineConfig, tokens: Option<Arc<TokenCache>>) -> Result<Self> {
        let transport = ReqwestTransport::new(Duration::from_secs(config.timeout_secs))?;
        Self::with_transport(config, tokens, Arc::new(transport))
    }

    /// Default chain without authentication, for token acquisition
    pub fn bootstrap_from_config(config: &PipelineConfig) -> Result<Self> {
        Self::from_config(config, None)
    }

    /// Default chain over a caller-supplied transport
    pub fn with_transport(
        config: &PipelineConfig,
        tokens: Option<Arc<TokenCache>>,
        transport: Arc<dyn Transport>,
    ) -> Result<Self> {
        config.validate()?;

        let mut builder = Pipeline::builder()
            .policy(UserAgentPolicy::new(config.user_agent.as_deref()))
            .policy(RequestIdPolicy::new(&config.request_id_header)?)
            .policy(AddHeadersPolicy::from_map(&config.headers)?)
            .policy(RetryPolicy::new(RetryOptions::from(&config.retry)));

        if config.cookies {
            builder = builder.policy(CookiePolicy::new());
        }
        if let Some(tokens) = tokens {
            builder = builder.policy(BearerChallengePolicy::new(tokens));
        }
        builder = builder.policy(HttpLoggingPolicy::new(
            config.logging.level,
            config.logging.allowed_headers.iter().cloned(),
        ));
        if config.decode {
            builder = builder.policy(DecodingPolicy);
        }

        Ok(builder.transport_arc(transport).build())
    }

    /// Send a request through every policy and the transport
    pub fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse>> {
        Next {
            policies: &self.policies,
            transport: self.transport.as_ref(),
        }
        .run(request)
    }

    pub fn policy_names(&self) -> Vec<&'static str> {
        self.policies.iter().map(|p| p.name()).collect()
    }

    pub fn has_policy(&self, name: &str) -> bool {
        self.policies.iter().any(|p| p.name() == name)
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("policies", &self.policy_names())
            .finish_non_exhaustive()
    }
}

/// Assembles a pipeline in any order
#[derive(Default)]
pub struct PipelineBuilder {
    policies: Vec<Arc<dyn Policy>>,
    transport: Option<Arc<dyn Transport>>,
}

impl PipelineBuilder {
    pub fn policy(mut self, policy: impl Policy + 'static) -> Self {
        self.policies.push(Arc::new(policy));
        self
    }

    pub fn policy_arc(mut self, policy: Arc<dyn Policy>) -> Self {
        self.policies.push(policy);
        self
    }

    pub fn transport(self, transport: impl Transport + 'static) -> Self {
        self.transport_arc(Arc::new(transport))
    }

    pub fn transport_arc(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Finish the chain; without an explicit transport a default reqwest one is used
    pub fn build(self) -> Pipeline {
        let transport = self
            .transport
            .unwrap_or_else(|| Arc::new(ReqwestTransport::with_client(reqwest::Client::new())));
        Pipeline {
            policies: self.policies.into(),
            transport,
        }
    }
}

/// Wrap a boxed future; shorthand used by policy implementations
pub(crate) fn boxed<'a, F>(future: F) -> BoxFuture<'a, Result<HttpResponse>>
where
    F: std::future::Future<Output = Result<HttpResponse>> + Send + 'a,
{
    future.boxed()
}
