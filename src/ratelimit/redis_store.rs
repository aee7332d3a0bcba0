//! Redis-backed limiter store.
//!
//! Lets several service instances share one set of limits. Redis owns both
//! atomicity and expiration, so this store keeps no local state:
//!
//! - Counter: `limiter:<id>`, created with a one-window TTL and bumped
//!   with `INCR`.
//! - Block marker: `limiter:<id>:blocked`, set to `BLOCKED` with the block
//!   duration as TTL. Installing it deletes the counter in the same
//!   transaction.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, RedisError};
use tracing::{info, trace};

use super::backend::{LimiterStore, StoreError};
use super::key::LimiterKey;

/// Value stored under a block marker.
const BLOCKED_SENTINEL: &str = "BLOCKED";

/// Limiter store backed by a Redis server.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore").finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connect to Redis at a `redis://` URL.
    ///
    /// # Errors
    /// Returns error if the URL is invalid or the server is unreachable.
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;

        Ok(Self { connection })
    }

    /// Connect using a `host:port` address and an optional password.
    pub async fn connect_addr(addr: &str, password: &str) -> crate::error::Result<Self> {
        let store = Self::connect(&connection_url(addr, password))
            .await
            .map_err(StoreError::from)?;
        info!(addr = %addr, "Connected to Redis");
        Ok(store)
    }

    fn block_marker(key: &LimiterKey) -> String {
        format!("{}:blocked", key)
    }
}

/// Build a `redis://` URL from an address and password.
fn connection_url(addr: &str, password: &str) -> String {
    if password.is_empty() {
        format!("redis://{}/", addr)
    } else {
        format!("redis://:{}@{}/", password, addr)
    }
}

/// Milliseconds for a `PX` argument. Redis rejects a zero expiry.
fn expiry_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl LimiterStore for RedisStore {
    async fn increment_key(&self, key: &LimiterKey, window: Duration) -> Result<u64, StoreError> {
        let mut conn = self.connection.clone();

        // SET NX only creates the counter (with its TTL) when it is absent;
        // INCR keeps the TTL already attached.
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(key.as_str())
            .arg(0)
            .arg("PX")
            .arg(expiry_millis(window))
            .arg("NX")
            .ignore()
            .incr(key.as_str(), 1)
            .query_async(&mut conn)
            .await?;

        trace!(key = %key, count = count, "Incremented Redis counter");
        Ok(count)
    }

    async fn block_key(&self, key: &LimiterKey, duration: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();

        // SET replaces any earlier marker along with its TTL; the counter is
        // dropped so the first request after the block starts a new window.
        let _: () = redis::pipe()
            .atomic()
            .cmd("SET")
            .arg(Self::block_marker(key))
            .arg(BLOCKED_SENTINEL)
            .arg("PX")
            .arg(expiry_millis(duration))
            .ignore()
            .del(key.as_str())
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(())
    }

    async fn is_blocked(&self, key: &LimiterKey) -> Result<bool, StoreError> {
        let mut conn = self.connection.clone();
        let value: Option<String> = conn.get(Self::block_marker(key)).await?;

        Ok(value.as_deref() == Some(BLOCKED_SENTINEL))
    }
}
