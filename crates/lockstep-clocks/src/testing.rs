//! Test support: a manually driven monotonic time source and a recording
//! clock observer.
//!
//! These live in the library (rather than `#[cfg(test)]`) so that the tests
//! of every protocol crate can drive clock trees deterministically.

use std::sync::{Arc, Mutex};

use crate::clock::{Clock, ClockObserver};
use crate::source::MonotonicTimeSource;

struct MockState {
    now: f64,
    auto_increment: Option<AutoIncrement>,
}

struct AutoIncrement {
    amount: f64,
    reads_between: u32,
    reads_since: u32,
}

/// A monotonic time source whose reading is set by the test.
///
/// With auto-increment enabled, every `reads_between` reads advance the
/// reading by a fixed amount, which is how precision measurement at system
/// clock construction observes a non-zero tick difference.
pub struct MockTimeSource {
    state: Mutex<MockState>,
}

impl MockTimeSource {
    pub fn new(start: f64) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState {
                now: start,
                auto_increment: None,
            }),
        })
    }

    /// Set the current reading.
    pub fn set_now(&self, now: f64) {
        self.state.lock().unwrap().now = now;
    }

    /// Advance the current reading by `delta` seconds.
    pub fn advance(&self, delta: f64) {
        self.state.lock().unwrap().now += delta;
    }

    /// Advance the reading by `amount` after every `reads_between` reads.
    pub fn enable_auto_increment(&self, amount: f64, reads_between: u32) {
        self.state.lock().unwrap().auto_increment = Some(AutoIncrement {
            amount,
            reads_between: reads_between.max(1),
            reads_since: 0,
        });
    }

    pub fn disable_auto_increment(&self) {
        self.state.lock().unwrap().auto_increment = None;
    }
}

impl MonotonicTimeSource for MockTimeSource {
    fn now(&self) -> f64 {
        let mut state = self.state.lock().unwrap();
        let now = state.now;
        if let Some(auto) = &mut state.auto_increment {
            auto.reads_since += 1;
            if auto.reads_since >= auto.reads_between {
                auto.reads_since = 0;
                let amount = auto.amount;
                state.now += amount;
            }
        }
        now
    }

    /// Sleeping on a mock source advances mock time instead of blocking.
    fn sleep(&self, secs: f64) {
        if secs > 0.0 {
            self.advance(secs);
        }
    }
}

/// An observer that records each notification cause, for assertions.
#[derive(Default)]
pub struct RecordingObserver {
    causes: Mutex<Vec<Arc<Clock>>>,
}

impl RecordingObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The causes recorded so far, in notification order.
    pub fn causes(&self) -> Vec<Arc<Clock>> {
        self.causes.lock().unwrap().clone()
    }

    pub fn notification_count(&self) -> usize {
        self.causes.lock().unwrap().len()
    }

    pub fn clear(&self) {
        self.causes.lock().unwrap().clear();
    }

    /// Whether the recorded causes are exactly `expected`, by identity.
    pub fn causes_are(&self, expected: &[&Arc<Clock>]) -> bool {
        let causes = self.causes.lock().unwrap();
        causes.len() == expected.len()
            && causes
                .iter()
                .zip(expected)
                .all(|(got, want)| Arc::ptr_eq(got, want))
    }
}

impl ClockObserver for RecordingObserver {
    fn clock_changed(&self, cause: &Arc<Clock>) {
        self.causes.lock().unwrap().push(cause.clone());
    }
}
