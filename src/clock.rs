//! Time source for span timestamps.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Epoch-microsecond time source used for span start and finish timestamps.
///
/// The tracer consumes this as a capability so tests and hosts with managed
/// clocks can substitute their own. Implementations must be safe to call
/// from many threads.
pub trait Clock: Send + Sync + fmt::Debug {
    /// Current time in microseconds since the unix epoch.
    fn current_time_micros(&self) -> u64;
}

/// Default [`Clock`] reading the system wall clock.
#[derive(Clone, Debug, Default)]
pub struct SystemClock {
    _private: (),
}

impl SystemClock {
    /// Create a new system clock.
    pub fn new() -> Self {
        SystemClock::default()
    }
}

impl Clock for SystemClock {
    fn current_time_micros(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0)
    }
}
