//! # Lockstep
//!
//! A companion-screen synchronization library: everything a second-screen
//! application (or the television serving it) needs to agree on a wall
//! clock to sub-millisecond precision over an unreliable link and track a
//! media timeline that advances in lock-step with playback.
//!
//! # Architecture
//!
//! ```text
//!                         ┌────────────┐
//!   discovery state  ←──  │  CSS-CII   │  WebSocket, JSON state + diffs
//!                         └────────────┘
//!                         ┌────────────┐
//!   wall clock       ←──  │  CSS-WC    │  UDP, 32-byte request/response
//!                         └────────────┘
//!                         ┌────────────┐
//!   media timeline   ←──  │  CSS-TS    │  WebSocket, Control Timestamps
//!                         └────────────┘
//!                                │
//!                     ┌──────────┴──────────┐
//!                     │     clock graph     │  rate/speed/correlation/
//!                     │   (+ scheduler)     │  availability/dispersion
//!                     └─────────────────────┘
//! ```
//!
//! The CII client surfaces the URLs of a television's wall-clock and
//! timeline endpoints. The wall-clock client disciplines a correlated
//! clock to the television's wall clock, carrying explicit error bounds
//! (dispersion). The TS client then drives a timeline clock from Control
//! Timestamps expressed against that wall clock. The task scheduler can
//! run callbacks at tick values of any clock in the graph, re-scheduling
//! itself whenever a clock is adjusted.
//!
//! # Quick start (companion side)
//!
//! ```no_run
//! use std::sync::Arc;
//! use lockstep::{Clock, Correlation, SystemTimeSource};
//! use lockstep::wallclock::{algorithm::LowestDispersionCandidate, WallClockClient,
//!     WallClockClientConfig};
//!
//! let source = Arc::new(SystemTimeSource::new());
//! let sys = Clock::system(source, 1e9).unwrap();
//! let wall_clock = Clock::correlated(&sys, 1e9, Correlation::new(0.0, 0.0)).unwrap();
//!
//! let algorithm = LowestDispersionCandidate::new(wall_clock.clone(), 1.0, 0.2);
//! let config = WallClockClientConfig {
//!     server_addr: "192.168.1.5:6677".parse().unwrap(),
//!     ..WallClockClientConfig::default()
//! };
//! let client = WallClockClient::start(config, wall_clock.clone(), Box::new(algorithm))
//!     .unwrap();
//! // wall_clock now tracks the television; hang timeline clocks off it.
//! ```

pub use lockstep_clocks::{
    measure_precision, Clock, ClockError, ClockKind, ClockObserver, ClockResult, Correlation,
    MonotonicTimeSource, SystemTimeSource, DEFAULT_MAX_FREQ_ERROR_PPM,
};

/// Clock-driven task scheduling.
pub mod scheduler {
    pub use lockstep_scheduler::{
        run_at, schedule_event, scheduler, sleep_for, sleep_until, Scheduler, TaskEvent,
    };
}

/// Protocol message types and codecs.
pub mod wire {
    pub use lockstep_wire::*;
}

/// Wall-clock synchronization engines.
pub mod wallclock {
    pub use lockstep_wallclock::*;
}

/// WebSocket endpoint glue shared by the CII and TS protocols.
pub mod ws {
    pub use lockstep_ws::*;
}

/// The content identification (CII) protocol.
pub mod cii {
    pub use lockstep_cii::*;
}

/// The timeline synchronization (TS) protocol.
pub mod ts {
    pub use lockstep_ts::*;
}
