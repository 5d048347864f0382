//! Concurrent access-token cache
//!
//! Many callers may ask for a token at once; at most one refresh against the
//! [`CredentialSource`] is ever in flight. The in-flight refresh lives in a
//! single slot as a [`Shared`] future: the caller that fills the slot drives
//! it, everyone else clones the handle and awaits the same result.
//!
//! Per request the cache goes through these states:
//!
//! 1. Context change - the requested service differs from the one the
//!    cached token was issued for. The cached token is discarded and a
//!    refresh runs right away.
//! 2. Fresh hit - the cached token is outside the proactive refresh window
//!    and is returned without touching the network.
//! 3. Soft near-expiry - the token is inside the window but not expired. It
//!    is refreshed if the retry delay has elapsed, otherwise served as is.
//!    A failed refresh falls back to it.
//! 4. Hard miss - no token, or an expired one. A refresh runs, deferred
//!    until the retry delay elapses if the last attempt was recent.
//!
//! Every completed refresh, successful or not, pushes the next allowed
//! attempt out by the retry delay.

use super::{to_time_delta, AccessToken, CredentialSource, TokenRequest};
use crate::config::TokenConfig;
use crate::error::TokenError;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

type RefreshFuture = Shared<BoxFuture<'static, Result<AccessToken, TokenError>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenCacheOptions {
    /// Refresh proactively when the token expires within this window
    pub refresh_offset: Duration,
    /// Minimum spacing between refresh attempts
    pub retry_delay: Duration,
}

impl Default for TokenCacheOptions {
    fn default() -> Self {
        Self {
            refresh_offset: Duration::from_secs(5 * 60),
            retry_delay: Duration::from_secs(30),
        }
    }
}

impl From<&TokenConfig> for TokenCacheOptions {
    fn from(config: &TokenConfig) -> Self {
        Self {
            refresh_offset: Duration::from_secs(config.refresh_offset_secs),
            retry_delay: Duration::from_secs(config.retry_delay_secs),
        }
    }
}

struct InFlight {
    generation: u64,
    request: TokenRequest,
    refresh: RefreshFuture,
}

#[derive(Default)]
struct CacheState {
    cached: Option<AccessToken>,
    /// Context the cached token was issued for
    context: Option<TokenRequest>,
    /// Earliest time another refresh may start
    next_refresh: Option<DateTime<Utc>>,
    in_flight: Option<InFlight>,
    generation: u64,
}

/// What a caller does once it has looked at the state
enum Step {
    Done(AccessToken),
    /// Await a refresh and use its result
    Join {
        generation: u64,
        refresh: RefreshFuture,
        fallback: Option<AccessToken>,
    },
    /// Another context is refreshing; wait for it, then look again
    Wait {
        generation: u64,
        refresh: RefreshFuture,
    },
}

/// Serves valid tokens to any number of concurrent callers
pub struct TokenCache {
    source: Arc<dyn CredentialSource>,
    options: TokenCacheOptions,
    state: Mutex<CacheState>,
}

impl TokenCache {
    pub fn new(source: Arc<dyn CredentialSource>) -> Self {
        Self::with_options(source, TokenCacheOptions::default())
    }

    pub fn with_options(source: Arc<dyn CredentialSource>, options: TokenCacheOptions) -> Self {
        Self {
            source,
            options,
            state: Mutex::new(CacheState::default()),
        }
    }

    pub fn options(&self) -> TokenCacheOptions {
        self.options
    }

    /// Cached token, if one exists and has not expired
    pub fn current_token(&self) -> Option<AccessToken> {
        self.lock().cached.clone().filter(|t| !t.is_expired())
    }

    /// Get a valid token for `request`, refreshing when needed
    pub async fn get_token(&self, request: &TokenRequest) -> Result<AccessToken, TokenError> {
        loop {
            match self.next_step(request) {
                Step::Done(token) => return Ok(token),
                Step::Wait {
                    generation,
                    refresh,
                } => {
                    // The caller that filled the slot may be gone; whoever
                    // observes the result first records it
                    let result = refresh.await;
                    self.complete(generation, &result);
                }
                Step::Join {
                    generation,
                    refresh,
                    fallback,
                } => {
                    let result = refresh.await;
                    self.complete(generation, &result);
                    return match result {
                        Ok(token) => Ok(token),
                        Err(err) => match fallback.filter(|t| !t.is_expired()) {
                            Some(stale) => {
                                tracing::warn!(
                                    "Token refresh failed, serving cached token: {}",
                                    err
                                );
                                Ok(stale)
                            }
                            None => Err(err),
                        },
                    };
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn next_step(&self, request: &TokenRequest) -> Step {
        let mut state = self.lock();
        let now = Utc::now();

        if let Some(in_flight) = &state.in_flight {
            if in_flight.request.service != request.service {
                return Step::Wait {
                    generation: in_flight.generation,
                    refresh: in_flight.refresh.clone(),
                };
            }
            let usable = state
                .cached
                .as_ref()
                .filter(|t| !t.is_expired() && same_service(&state.context, request));
            if let Some(token) = usable {
                return Step::Done(token.clone());
            }
            return Step::Join {
                generation: in_flight.generation,
                refresh: in_flight.refresh.clone(),
                fallback: None,
            };
        }

        if !same_service(&state.context, request) {
            if state.context.is_some() {
                tracing::debug!("Token context changed to {}, forcing refresh", request.service);
            }
            state.cached = None;
            return self.start_refresh(&mut state, request, None, None);
        }

        let retry_allowed = state.next_refresh.map_or(true, |at| at <= now);
        match state.cached.clone() {
            Some(token) if !token.expires_within(self.options.refresh_offset) => Step::Done(token),
            Some(token) if !token.is_expired() => {
                if retry_allowed {
                    tracing::debug!("Token near expiry, refreshing");
                    self.start_refresh(&mut state, request, None, Some(token))
                } else {
                    Step::Done(token)
                }
            }
            _ => {
                let defer_until = if retry_allowed { None } else { state.next_refresh };
                self.start_refresh(&mut state, request, defer_until, None)
            }
        }
    }

    /// Fill the single refresh slot; the caller must hold the state lock
    fn start_refresh(
        &self,
        state: &mut CacheState,
        request: &TokenRequest,
        defer_until: Option<DateTime<Utc>>,
        fallback: Option<AccessToken>,
    ) -> Step {
        let source = self.source.clone();
        let owned = request.clone();
        let refresh = async move {
            if let Some(at) = defer_until {
                if let Ok(wait) = (at - Utc::now()).to_std() {
                    tracing::debug!("Deferring token refresh for {:?}", wait);
                    tokio::time::sleep(wait).await;
                }
            }
            source.get_token(&owned).await
        }
        .boxed()
        .shared();

        state.generation += 1;
        state.in_flight = Some(InFlight {
            generation: state.generation,
            request: request.clone(),
            refresh: refresh.clone(),
        });

        Step::Join {
            generation: state.generation,
            refresh,
            fallback,
        }
    }

    /// Record a finished refresh; only the first caller to finish applies it
    fn complete(&self, generation: u64, result: &Result<AccessToken, TokenError>) {
        let mut state = self.lock();
        let matches = state
            .in_flight
            .as_ref()
            .is_some_and(|f| f.generation == generation);
        if !matches {
            return;
        }

        let Some(in_flight) = state.in_flight.take() else {
            return;
        };
        let now = Utc::now();
        state.next_refresh = now.checked_add_signed(to_time_delta(self.options.retry_delay));
        match result {
            Ok(token) => {
                tracing::debug!(
                    "Token refreshed for {}, expires at {}",
                    in_flight.request.service,
                    token.expires_at()
                );
                state.cached = Some(token.clone());
                state.context = Some(in_flight.request);
            }
            Err(err) => {
                tracing::warn!("Token refresh for {} failed: {}", in_flight.request.service, err);
                // A refresh for a new context already discarded the old token
                if !same_service(&state.context, &in_flight.request) {
                    state.context = Some(in_flight.request);
                }
            }
        }
    }
}

fn same_service(context: &Option<TokenRequest>, request: &TokenRequest) -> bool {
    context.as_ref().is_some_and(|c| c.service == request.service)
}

impl fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("TokenCache")
            .field("options", &self.options)
            .field("cached", &state.cached)
            .field("context", &state.context)
            .field("refreshing", &state.in_flight.is_some())
            .finish()
    }
}
