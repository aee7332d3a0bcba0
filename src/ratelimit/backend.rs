//! Storage trait for abstracting in-memory and Redis-backed limiter state.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use super::key::LimiterKey;

/// Errors raised by a limiter store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The Redis server was unreachable or answered with an error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Trait for limiter state storage.
///
/// Every operation must be atomic per key. The `RateLimiter` works with any
/// implementation through `Arc<dyn LimiterStore>`.
#[async_trait]
pub trait LimiterStore: Send + Sync {
    /// Increment the request counter for a key and return the new count.
    ///
    /// When no live counter exists, a new one starts at 1 and expires one
    /// `window` from now.
    async fn increment_key(&self, key: &LimiterKey, window: Duration) -> Result<u64, StoreError>;

    /// Block a key for `duration`, overwriting any prior state for it.
    ///
    /// The counter is discarded along with the old block, so the first
    /// request after the block lapses starts a new window.
    async fn block_key(&self, key: &LimiterKey, duration: Duration) -> Result<(), StoreError>;

    /// Whether a live block exists for a key.
    async fn is_blocked(&self, key: &LimiterKey) -> Result<bool, StoreError>;
}
