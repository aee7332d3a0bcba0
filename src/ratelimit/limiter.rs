//! Core rate limiter implementation.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::backend::{LimiterStore, StoreError};
use super::key::LimiterKey;

/// Length of the counting window.
pub const WINDOW: Duration = Duration::from_secs(1);

/// Limits applied to every caller.
///
/// Set once at startup and never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Maximum requests per window for callers identified by address
    pub ip_limit: u64,
    /// Maximum requests per window for callers presenting a token
    pub token_limit: u64,
    /// How long a caller stays blocked after exceeding its limit
    pub block_duration: Duration,
}

impl RateLimitPolicy {
    /// The ceiling that applies to a caller.
    pub fn limit_for(&self, privileged: bool) -> u64 {
        if privileged {
            self.token_limit
        } else {
            self.ip_limit
        }
    }
}

/// The decision engine that admits or rejects requests.
///
/// Holds nothing but the immutable policy and a handle to the store, so it
/// can be shared across tasks behind an `Arc`.
pub struct RateLimiter {
    store: Arc<dyn LimiterStore>,
    policy: RateLimitPolicy,
}

impl RateLimiter {
    /// Create a new rate limiter over `store`.
    pub fn new(store: Arc<dyn LimiterStore>, policy: RateLimitPolicy) -> Self {
        Self { store, policy }
    }

    /// Decide whether a request from `identifier` may proceed.
    ///
    /// A blocked caller is rejected without touching its counter, so probing
    /// never extends a block. Otherwise the request is counted, and the
    /// caller is blocked once the count goes past its ceiling. The ceiling
    /// itself is still allowed.
    ///
    /// Store errors abort the decision and are returned unchanged.
    pub async fn decide(&self, identifier: &str, privileged: bool) -> Result<bool, StoreError> {
        let key = LimiterKey::new(identifier);

        if self.store.is_blocked(&key).await? {
            trace!(key = %key, "Caller is blocked");
            return Ok(false);
        }

        let limit = self.policy.limit_for(privileged);
        let count = self.store.increment_key(&key, WINDOW).await?;

        trace!(
            key = %key,
            count = count,
            limit = limit,
            privileged = privileged,
            "Checked rate limit"
        );

        if count > limit {
            self.store.block_key(&key, self.policy.block_duration).await?;
            debug!(
                key = %key,
                count = count,
                limit = limit,
                block_secs = self.policy.block_duration.as_secs(),
                "Rate limit exceeded, caller blocked"
            );
            return Ok(false);
        }

        Ok(true)
    }

    /// The policy this limiter enforces.
    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::clock::MockClock;
    use crate::ratelimit::MemoryStore;
    use async_trait::async_trait;
    use std::time::Instant;

    fn test_policy() -> RateLimitPolicy {
        RateLimitPolicy {
            ip_limit: 5,
            token_limit: 10,
            block_duration: Duration::from_secs(5),
        }
    }

    fn create_test_limiter() -> (RateLimiter, Arc<MemoryStore>, MockClock) {
        let clock = MockClock::new(Instant::now());
        let store = Arc::new(MemoryStore::with_clock(Arc::new(clock.clone())));
        let limiter = RateLimiter::new(store.clone(), test_policy());
        (limiter, store, clock)
    }

    /// Store whose every operation fails.
    struct FailingStore;

    #[async_trait]
    impl LimiterStore for FailingStore {
        async fn increment_key(&self, _: &LimiterKey, _: Duration) -> Result<u64, StoreError> {
            Err(io_error())
        }

        async fn block_key(&self, _: &LimiterKey, _: Duration) -> Result<(), StoreError> {
            Err(io_error())
        }

        async fn is_blocked(&self, _: &LimiterKey) -> Result<bool, StoreError> {
            Err(io_error())
        }
    }

    fn io_error() -> StoreError {
        StoreError::Redis(redis::RedisError::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        )))
    }

    #[test]
    fn test_policy_selects_limit() {
        let policy = test_policy();

        assert_eq!(policy.limit_for(false), 5);
        assert_eq!(policy.limit_for(true), 10);
    }

    #[tokio::test]
    async fn test_requests_up_to_limit_are_allowed() {
        let (limiter, _store, _clock) = create_test_limiter();

        for i in 1..=5 {
            assert!(limiter.decide("192.168.0.1", false).await.unwrap(), "Request {} should be allowed", i);
        }

        // The 6th request should be rejected
        assert!(!limiter.decide("192.168.0.1", false).await.unwrap());
    }

    #[tokio::test]
    async fn test_privileged_limit() {
        let (limiter, _store, _clock) = create_test_limiter();

        for i in 1..=10 {
            assert!(limiter.decide("token-abc", true).await.unwrap(), "Request {} should be allowed", i);
        }

        assert!(!limiter.decide("token-abc", true).await.unwrap());
    }

    #[tokio::test]
    async fn test_block_and_recovery_scenario() {
        let (limiter, store, clock) = create_test_limiter();
        let key = LimiterKey::new("K");

        for _ in 0..5 {
            assert!(limiter.decide("K", false).await.unwrap());
        }
        assert!(!limiter.decide("K", false).await.unwrap());

        // Still blocked two seconds later, although the window has reset.
        clock.advance(Duration::from_secs(2));
        assert!(!limiter.decide("K", false).await.unwrap());

        // Six seconds after the sixth call the block has lapsed.
        clock.advance(Duration::from_secs(4));
        assert!(limiter.decide("K", false).await.unwrap());
        assert_eq!(store.current_count(&key), Some(1));
    }

    #[tokio::test]
    async fn test_blocked_probes_do_not_extend_block() {
        let (limiter, _store, clock) = create_test_limiter();

        for _ in 0..6 {
            limiter.decide("prober", false).await.unwrap();
        }

        for _ in 0..4 {
            clock.advance(Duration::from_millis(1200));
            assert!(!limiter.decide("prober", false).await.unwrap());
        }

        clock.advance(Duration::from_millis(200));
        assert!(limiter.decide("prober", false).await.unwrap());
    }

    #[tokio::test]
    async fn test_short_block_starts_fresh_window() {
        let clock = MockClock::new(Instant::now());
        let store = Arc::new(MemoryStore::with_clock(Arc::new(clock.clone())));
        let policy = RateLimitPolicy {
            block_duration: Duration::from_millis(500),
            ..test_policy()
        };
        let limiter = RateLimiter::new(store.clone(), policy);
        let key = LimiterKey::new("K");

        for _ in 0..5 {
            assert!(limiter.decide("K", false).await.unwrap());
        }
        assert!(!limiter.decide("K", false).await.unwrap());

        // Block lapses well inside the window the sixth call was counted in.
        clock.advance(Duration::from_millis(600));
        assert!(limiter.decide("K", false).await.unwrap());
        assert_eq!(store.current_count(&key), Some(1));
    }

    #[tokio::test]
    async fn test_window_reset_allows_more_requests() {
        let (limiter, _store, clock) = create_test_limiter();

        for _ in 0..5 {
            assert!(limiter.decide("10.1.1.1", false).await.unwrap());
        }
        clock.advance(WINDOW);

        for _ in 0..5 {
            assert!(limiter.decide("10.1.1.1", false).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_token_and_address_tracked_separately() {
        let (limiter, _store, _clock) = create_test_limiter();

        for _ in 0..6 {
            limiter.decide("10.0.0.9", false).await.unwrap();
        }
        assert!(!limiter.decide("10.0.0.9", false).await.unwrap());

        // Same client, now presenting a token: fresh key, higher ceiling.
        for _ in 0..10 {
            assert!(limiter.decide("token-xyz", true).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_store_errors_are_propagated() {
        let limiter = RateLimiter::new(Arc::new(FailingStore), test_policy());

        let result = limiter.decide("10.0.0.1", false).await;
        assert!(matches!(result, Err(StoreError::Redis(_))));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_decisions_respect_limit() {
        let (limiter, store, _clock) = create_test_limiter();
        let limiter = Arc::new(limiter);

        let tasks = (0..50).map(|_| {
            let limiter = Arc::clone(&limiter);
            tokio::spawn(async move { limiter.decide("burst", true).await.unwrap() })
        });
        let allowed = futures::future::join_all(tasks)
            .await
            .into_iter()
            .filter(|res| *res.as_ref().unwrap())
            .count();

        // Every call up to the ceiling is admitted. A call that passed the
        // block check just before the block replaced the counter may start
        // the next count, so the total can exceed the ceiling slightly.
        assert!(allowed >= 10, "allowed {} of 50", allowed);
        assert!(allowed < 50);
        assert!(store.is_blocked(&LimiterKey::new("burst")).await.unwrap());
    }
}
