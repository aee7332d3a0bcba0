//! In-process limiter store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, trace};

use super::backend::{LimiterStore, StoreError};
use super::clock::{Clock, SystemClock};
use super::key::LimiterKey;

/// Counter and block state tracked for a single key.
#[derive(Debug, Clone)]
struct Entry {
    /// Requests seen in the current window
    count: u64,
    /// When the current window ends
    window_expires_at: Instant,
    /// When the block ends, if one was installed
    blocked_until: Option<Instant>,
}

impl Entry {
    fn is_blocked(&self, now: Instant) -> bool {
        self.blocked_until.is_some_and(|until| now < until)
    }

    fn is_stale(&self, now: Instant) -> bool {
        now >= self.window_expires_at && !self.is_blocked(now)
    }
}

/// Limiter store keeping all state in a single mutex-guarded map.
///
/// Every operation holds the lock for its full duration, so increments are
/// linearizable per key. Expiration is checked lazily against the clock on
/// access; `purge_expired` reclaims entries nobody touches anymore.
///
/// State is local to the process. Use `RedisStore` to share limits across
/// instances.
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Create a new store backed by the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a new store reading time from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Drop every entry whose window has ended and which is not blocked.
    ///
    /// Returns the number of entries removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_stale(now));
        let removed = before - entries.len();

        if removed > 0 {
            debug!(removed = removed, remaining = entries.len(), "Purged expired limiter entries");
        }
        removed
    }

    /// Run `purge_expired` every `period` on the tokio runtime.
    ///
    /// The task holds only a weak reference and exits once the store is
    /// dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let store = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let Some(store) = store.upgrade() else {
                    break;
                };
                store.purge_expired();
            }
            debug!("Memory store dropped, sweeper exiting");
        })
    }

    /// Number of entries currently held, expired or not.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// The count in the live window for a key, if any.
    pub fn current_count(&self, key: &LimiterKey) -> Option<u64> {
        let now = self.clock.now();
        self.entries
            .lock()
            .get(key.as_str())
            .filter(|entry| now < entry.window_expires_at)
            .map(|entry| entry.count)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LimiterStore for MemoryStore {
    async fn increment_key(&self, key: &LimiterKey, window: Duration) -> Result<u64, StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        let entry = entries.entry(key.as_str().to_string()).or_insert(Entry {
            count: 0,
            window_expires_at: now,
            blocked_until: None,
        });

        if now >= entry.window_expires_at {
            // Window lapsed; a block marker, if any, survives the reset.
            entry.count = 1;
            entry.window_expires_at = now + window;
        } else {
            entry.count += 1;
        }

        trace!(key = %key, count = entry.count, "Incremented memory counter");
        Ok(entry.count)
    }

    async fn block_key(&self, key: &LimiterKey, duration: Duration) -> Result<(), StoreError> {
        let now = self.clock.now();
        let mut entries = self.entries.lock();

        // Replaces the whole record: the counter restarts once the block lapses.
        entries.insert(
            key.as_str().to_string(),
            Entry {
                count: 0,
                window_expires_at: now,
                blocked_until: Some(now + duration),
            },
        );
        Ok(())
    }

    async fn is_blocked(&self, key: &LimiterKey) -> Result<bool, StoreError> {
        let now = self.clock.now();
        Ok(self
            .entries
            .lock()
            .get(key.as_str())
            .is_some_and(|entry| entry.is_blocked(now)))
    }
}
