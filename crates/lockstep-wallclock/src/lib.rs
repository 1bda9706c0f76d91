//! # lockstep-wallclock: UDP wall-clock synchronization
//!
//! Client and server engines for the wall-clock protocol: 32-byte
//! request/response datagrams that let a companion estimate a television's
//! wall clock to sub-millisecond precision, with explicit error bounds.
//!
//! The [`WallClockServer`] answers requests using a served clock. The
//! [`WallClockClient`] sends requests, turns each usable response into a
//! measurement [`lockstep_wire::Candidate`], and hands it to a pluggable
//! [`WallClockAlgorithm`] which disciplines a correlated clock:
//!
//! ```no_run
//! use std::sync::Arc;
//! use lockstep_clocks::{Clock, Correlation, SystemTimeSource};
//! use lockstep_wallclock::{
//!     algorithm::LowestDispersionCandidate, WallClockClient, WallClockClientConfig,
//! };
//!
//! let source = Arc::new(SystemTimeSource::new());
//! let sys = Clock::system(source, 1e9).unwrap();
//! let wall_clock = Clock::correlated(&sys, 1e9, Correlation::new(0.0, 0.0)).unwrap();
//!
//! let config = WallClockClientConfig {
//!     server_addr: "192.168.1.5:6677".parse().unwrap(),
//!     ..WallClockClientConfig::default()
//! };
//! let algorithm = LowestDispersionCandidate::new(wall_clock.clone(), 1.0, 0.2);
//! let client = WallClockClient::start(config, wall_clock, Box::new(algorithm)).unwrap();
//! // ... the clock is now being disciplined in the background ...
//! # client.stop();
//! ```

pub mod algorithm;
mod client;
mod config;
mod error;
mod server;

pub use algorithm::WallClockAlgorithm;
pub use client::WallClockClient;
pub use config::{WallClockClientConfig, WallClockServerConfig};
pub use error::{WallClockError, WallClockResult};
pub use server::WallClockServer;

/// Default wall-clock protocol port.
pub const DEFAULT_WALL_CLOCK_PORT: u16 = 6677;
