//! # lockstep-clocks: hierarchical software clocks
//!
//! Software-synthesised clocks that can be chained into dependency trees.
//! A clock counts in ticks at a tick rate; dependent clocks derive their tick
//! value from their parent through a correlation, a rate ratio and a speed
//! multiplier. The tree bottoms out at a system clock reading an injectable
//! monotonic time source.
//!
//! The model carries everything a synchronisation protocol needs:
//!
//! - **Conversion**: map tick values between any two clocks that share a
//!   common ancestor ([`Clock::to_other_clock_ticks`]).
//! - **Availability**: a clock is only effectively available while it and all
//!   of its ancestors are available ([`Clock::is_available`]).
//! - **Dispersion**: the accumulated error envelope of a clock estimate, in
//!   seconds, growing linearly away from the point of correlation
//!   ([`Clock::dispersion_at_time`]).
//! - **Change notification**: observers bound to a clock are told
//!   synchronously whenever the timing relationship changes
//!   ([`Clock::bind`]).
//!
//! Conversions that are undefined (a zero-speed clock queried away from its
//! correlation point) yield `f64::NAN` rather than an error, so tick
//! arithmetic composes without branching.

mod clock;
mod correlation;
mod error;
mod source;
pub mod testing;

pub use clock::{Clock, ClockKind, ClockObserver, measure_precision};
pub use correlation::Correlation;
pub use error::{ClockError, ClockResult};
pub use source::{MonotonicTimeSource, SystemTimeSource};

/// Default assumed maximum frequency error of the local oscillator, in parts
/// per million, when the caller does not provide a better estimate.
pub const DEFAULT_MAX_FREQ_ERROR_PPM: f64 = 500.0;
