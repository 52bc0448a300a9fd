//! Time source for samples and pulls
//!
//! Every timestamp handed to the recorder and the accumulators comes from one
//! [`Clock`] so that pulls see non-decreasing time.

use std::time::Instant;

/// The `Clock` used for sampling and pulling
pub trait Clock {
    /// Milliseconds elapsed since the clock was created.
    fn now_millis(&self) -> i64;
}

#[derive(Debug, Clone, Copy)]
/// A clock that operates with respect to real-clock time.
pub struct RealClock {
    start: Instant,
}

impl Default for RealClock {
    fn default() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Clock for RealClock {
    fn now_millis(&self) -> i64 {
        i64::try_from(self.start.elapsed().as_millis()).unwrap_or(i64::MAX)
    }
}
