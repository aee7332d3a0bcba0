//! Request classification.

use std::collections::HashSet;
use std::net::SocketAddr;

use http::header::HeaderName;
use http::Request;
use tracing::debug;

use crate::config::ClassifierConfig;
use crate::error::{RatewallError, Result};

/// Who a request is counted against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    /// API token, or the peer IP address when no token applies
    pub identifier: String,
    /// Whether the caller gets the token ceiling
    pub privileged: bool,
}

/// Maps inbound requests to callers.
///
/// A request carrying a non-empty token header is counted against that
/// token and gets the privileged ceiling. When `allowed_tokens` is set, only
/// those tokens qualify; any other request is counted against its peer IP.
#[derive(Debug, Clone)]
pub struct Classifier {
    token_header: HeaderName,
    allowed_tokens: HashSet<String>,
}

impl Classifier {
    /// Create a classifier from configuration.
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        let token_header = HeaderName::from_bytes(config.token_header.as_bytes()).map_err(|e| {
            RatewallError::Config(format!(
                "Invalid token header {:?}: {}",
                config.token_header, e
            ))
        })?;

        Ok(Self {
            token_header,
            allowed_tokens: config.allowed_tokens.iter().cloned().collect(),
        })
    }

    /// Classify a request received from `peer`.
    pub fn classify<B>(&self, req: &Request<B>, peer: SocketAddr) -> Caller {
        let token = req
            .headers()
            .get(&self.token_header)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|token| !token.is_empty());

        match token {
            Some(token) if self.accepts(token) => Caller {
                identifier: token.to_string(),
                privileged: true,
            },
            other => {
                if other.is_some() {
                    debug!(peer = %peer, "Ignoring unrecognized API token");
                }
                Caller {
                    identifier: peer.ip().to_string(),
                    privileged: false,
                }
            }
        }
    }

    fn accepts(&self, token: &str) -> bool {
        self.allowed_tokens.is_empty() || self.allowed_tokens.contains(token)
    }
}
