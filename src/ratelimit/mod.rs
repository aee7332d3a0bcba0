//! Rate limiting logic and state management.

mod backend;
mod clock;
mod key;
mod limiter;
mod memory_store;
mod redis_store;

pub use backend::{LimiterStore, StoreError};
pub use clock::{Clock, SystemClock};
pub use key::{LimiterKey, KEY_PREFIX};
pub use limiter::{RateLimitPolicy, RateLimiter, WINDOW};
pub use memory_store::MemoryStore;
pub use redis_store::RedisStore;
