//! Time provider abstraction for visibility-timeout bookkeeping
//!
//! Stores stamp `last_ack` from a `TimeProvider` instead of reading the clock
//! directly, so expiry can be driven deterministically in tests.

#[cfg(test)]
use std::sync::Mutex;
#[cfg(test)]
use std::time::Duration;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Abstraction over system time
pub trait TimeProvider: Send + Sync + std::fmt::Debug {
    /// Current monotonic time (for measuring intervals)
    fn now(&self) -> Instant;

    /// Current system time (for timestamps)
    fn system_time(&self) -> SystemTime;

    /// Milliseconds since the Unix epoch, the unit of `WorkItem::last_ack`
    fn epoch_millis(&self) -> i64 {
        self.system_time()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0) // clock before 1970
    }
}

/// Production time provider using actual system time
#[derive(Debug, Default, Clone)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Mock time provider for deterministic testing
#[cfg(test)]
#[derive(Debug)]
pub struct MockTimeProvider {
    current_instant: Mutex<Instant>,
    current_system_time: Mutex<SystemTime>,
}

#[cfg(test)]
impl MockTimeProvider {
    pub fn new() -> Self {
        Self {
            current_instant: Mutex::new(Instant::now()),
            current_system_time: Mutex::new(SystemTime::now()),
        }
    }

    /// Advance both monotonic and system time by the given duration
    pub fn advance_time(&self, duration: Duration) {
        *self.current_instant.lock().unwrap() += duration;
        *self.current_system_time.lock().unwrap() += duration;
    }
}

#[cfg(test)]
impl TimeProvider for MockTimeProvider {
    fn now(&self) -> Instant {
        *self.current_instant.lock().unwrap()
    }

    fn system_time(&self) -> SystemTime {
        *self.current_system_time.lock().unwrap()
    }
}
