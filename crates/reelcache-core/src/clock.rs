//! Time source used for freshness and eviction decisions.

use std::time::SystemTime;

/// Source of the current wall-clock time.
/// This trait allows for mocking in tests.
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    /// The current time.
    fn now(&self) -> SystemTime;
}

/// Clock backed by [`SystemTime::now`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}
