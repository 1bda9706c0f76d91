//! Injectable monotonic time sources.

use std::thread;
use std::time::{Duration, Instant};

/// A source of monotonic time.
///
/// The clock graph reads all of its time through one of these, so the whole
/// tree can be driven from a virtual source in tests. Readings are seconds as
/// `f64`; precision is whatever the underlying source delivers.
pub trait MonotonicTimeSource: Send + Sync {
    /// Current monotonic time in seconds.
    fn now(&self) -> f64;

    /// Block for at least `secs` seconds of this source's time.
    fn sleep(&self, secs: f64);
}

/// Monotonic time source backed by [`std::time::Instant`].
///
/// Readings are seconds since the source was created.
pub struct SystemTimeSource {
    origin: Instant,
}

impl SystemTimeSource {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemTimeSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MonotonicTimeSource for SystemTimeSource {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }

    fn sleep(&self, secs: f64) {
        if secs > 0.0 && secs.is_finite() {
            thread::sleep(Duration::from_secs_f64(secs));
        }
    }
}
