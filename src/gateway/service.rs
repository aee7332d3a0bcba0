//! Enforcement of rate limit decisions on HTTP requests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http::{Request, Response, StatusCode};
use thiserror::Error;
use tracing::{debug, error, instrument};

use super::classifier::{Caller, Classifier};
use super::routes::{route, text_response, ResponseBody};
use crate::config::FailureMode;
use crate::ratelimit::{RateLimiter, StoreError};

/// Body sent to rejected callers.
pub const RATE_LIMITED_MESSAGE: &str =
    "you have reached the maximum number of requests or actions allowed within a certain time frame";

/// Reasons an admission decision could not be made.
#[derive(Debug, Error)]
pub enum DecisionError {
    /// The limiter store returned an error
    #[error("limiter store failed: {0}")]
    Store(#[from] StoreError),

    /// The decision did not finish within the configured bound
    #[error("limiter decision timed out after {0:?}")]
    Timeout(Duration),
}

/// Puts the rate limiter in front of the service routes.
pub struct RateLimitService {
    limiter: Arc<RateLimiter>,
    classifier: Classifier,
    decision_timeout: Duration,
    failure_mode: FailureMode,
}

impl RateLimitService {
    /// Create a new service enforcing `limiter`.
    pub fn new(
        limiter: Arc<RateLimiter>,
        classifier: Classifier,
        decision_timeout: Duration,
        failure_mode: FailureMode,
    ) -> Self {
        Self {
            limiter,
            classifier,
            decision_timeout,
            failure_mode,
        }
    }

    /// Handle a request received from `peer`.
    ///
    /// Admitted requests are routed. Denied requests get `429 Too Many
    /// Requests`. When no decision can be made, the failure mode picks
    /// between the two.
    #[instrument(skip(self, req), fields(method = %req.method(), path = %req.uri().path()))]
    pub async fn handle<B>(&self, req: Request<B>, peer: SocketAddr) -> Response<ResponseBody> {
        let caller = self.classifier.classify(&req, peer);

        match self.admit(&caller).await {
            Ok(true) => route(&req),
            Ok(false) => {
                debug!(
                    identifier = %caller.identifier,
                    privileged = caller.privileged,
                    "Request rejected by rate limiter"
                );
                rate_limited()
            }
            Err(e) => {
                error!(
                    identifier = %caller.identifier,
                    error = %e,
                    failure_mode = ?self.failure_mode,
                    "Rate limit decision failed"
                );
                match self.failure_mode {
                    FailureMode::Deny => rate_limited(),
                    FailureMode::Allow => route(&req),
                }
            }
        }
    }

    /// Ask the limiter about a caller, bounded by the decision timeout.
    pub async fn admit(&self, caller: &Caller) -> Result<bool, DecisionError> {
        let decision = self
            .limiter
            .decide(&caller.identifier, caller.privileged);

        match tokio::time::timeout(self.decision_timeout, decision).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(DecisionError::Timeout(self.decision_timeout)),
        }
    }
}

fn rate_limited() -> Response<ResponseBody> {
    text_response(StatusCode::TOO_MANY_REQUESTS, RATE_LIMITED_MESSAGE)
}
