//! # lockstep-ts: the timeline synchronization protocol
//!
//! A WebSocket protocol that keeps a companion's media timeline clock in
//! lock-step with a television's playback.
//!
//! The [`TsServer`] serves timelines provided by pluggable
//! [`TimelineSource`]s. A client opens a connection, states which timeline
//! of which content it wants (`SetupData`), and from then on receives a
//! Control Timestamp whenever the `(contentTime, wallClockTime, speed)`
//! relationship changes.
//!
//! The [`TsClientController`] maintains such a connection and drives a
//! correlated clock from the received Control Timestamps, so application
//! code can simply read the clock (and observe its availability) instead of
//! handling protocol messages.

mod client;
mod server;
mod source;

pub use client::{TsClientConfig, TsClientController, TsClientObserver};
pub use server::{TsServer, TsServerObserver};
pub use source::{ClockTimelineSource, SimpleTimelineSource, TimelineSource};

use num_bigint::BigInt;
use num_traits::FromPrimitive;

/// Clock tick values are `f64`; protocol tick values are arbitrary
/// precision integers. Rounds to the nearest whole tick.
pub(crate) fn bigint_from_ticks(ticks: f64) -> BigInt {
    BigInt::from_f64(ticks.round()).unwrap_or_default()
}
