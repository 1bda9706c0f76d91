//! # lockstep-scheduler: run code when a clock reaches a tick value
//!
//! Sleep and scheduling primitives driven by [`lockstep_clocks`] clocks.
//! A scheduled task tracks adjustments to its clock (correlation, speed or
//! tick rate changes anywhere in the ancestry) so that it fires when the
//! clock actually reaches the target tick value, not when it was originally
//! predicted to.
//!
//! Scheduling happens on a single worker thread. Keep [`run_at`] callbacks
//! small; a slow callback delays every other task.
//!
//! ```no_run
//! use std::sync::Arc;
//! use lockstep_clocks::{Clock, SystemTimeSource};
//!
//! let source = Arc::new(SystemTimeSource::new());
//! let clock = Clock::system(source, 1000.0).unwrap();
//!
//! // Block for 500 ticks (half a second at this tick rate).
//! lockstep_scheduler::sleep_for(&clock, 500.0);
//!
//! // Fire a callback 2000 ticks from now.
//! let at = clock.ticks() + 2000.0;
//! lockstep_scheduler::run_at(&clock, at, || println!("time!"));
//! ```

mod event;
mod scheduler;

pub use event::TaskEvent;
pub use scheduler::Scheduler;

use std::sync::{Arc, OnceLock};

use lockstep_clocks::Clock;

static SCHEDULER: OnceLock<Scheduler> = OnceLock::new();

/// The process-wide scheduler, started on first use.
pub fn scheduler() -> &'static Scheduler {
    SCHEDULER.get_or_init(Scheduler::new)
}

/// Set `event` when `clock` reaches (or passes) `ticks`.
pub fn schedule_event(clock: &Arc<Clock>, ticks: f64, event: &Arc<TaskEvent>) {
    scheduler().schedule_event(clock, ticks, event);
}

/// Call `callback` on the scheduler thread when `clock` reaches (or passes)
/// `ticks`.
pub fn run_at<F>(clock: &Arc<Clock>, ticks: f64, callback: F)
where
    F: FnOnce() + Send + 'static,
{
    scheduler().run_at(clock, ticks, callback);
}

/// Block until `clock` reaches `ticks`.
pub fn sleep_until(clock: &Arc<Clock>, ticks: f64) {
    let event = TaskEvent::new();
    schedule_event(clock, ticks, &event);
    event.wait();
}

/// Block while `clock` advances by `delta_ticks`.
pub fn sleep_for(clock: &Arc<Clock>, delta_ticks: f64) {
    sleep_until(clock, clock.ticks() + delta_ticks);
}
