//! Time source for the in-memory store.

use std::time::Instant;

/// Source of the current instant.
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> Instant;
}

/// System clock implementation using `Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
///
/// All clones share the same underlying instant.
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct MockClock {
    current: std::sync::Arc<parking_lot::Mutex<Instant>>,
}

#[cfg(test)]
impl MockClock {
    pub fn new(start: Instant) -> Self {
        Self {
            current: std::sync::Arc::new(parking_lot::Mutex::new(start)),
        }
    }

    pub fn advance(&self, duration: std::time::Duration) {
        *self.current.lock() += duration;
    }
}

#[cfg(test)]
impl Clock for MockClock {
    fn now(&self) -> Instant {
        *self.current.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_system_clock_moves_forward() {
        let clock = SystemClock;
        let t1 = clock.now();
        std::thread::sleep(Duration::from_millis(5));

        assert!(clock.now() > t1);
    }

    #[test]
    fn test_mock_clock_clones_share_time() {
        let start = Instant::now();
        let clock = MockClock::new(start);
        let other = clock.clone();

        other.advance(Duration::from_secs(3));

        assert_eq!(clock.now(), start + Duration::from_secs(3));
    }
}
