//! # lockstep-wire: protocol message codecs
//!
//! The three message families of the companion synchronization protocols:
//!
//! - **Wall clock** ([`WallClockMessage`], [`Candidate`]): fixed-layout
//!   32-byte UDP request/response frames, and the measurement candidate
//!   derived from a request/response exchange.
//! - **CII** ([`Cii`], [`TimelineOption`]): the content-identification state
//!   record, a JSON object whose fields distinguish *absent*, *null* and
//!   *present*, with field-wise diff and combine.
//! - **TS** ([`SetupData`], [`ControlTimestamp`], [`AptEptLpt`]): timeline
//!   synchronization messages. Tick values are arbitrary-precision integers
//!   carried as JSON strings; wall-clock limits may be ±infinity.
//!
//! Codec failures are typed [`WireError`] values returned to the caller;
//! nothing here panics on malformed input.

mod cii;
mod error;
mod transformers;
mod ts;
mod wallclock;

pub use cii::{Cii, ContentIdStatus, Field, TimelineOption, CII_FIELD_NAMES};
pub use error::{WireError, WireResult};
pub use transformers::{
    decode_int_string, decode_list_of, decode_one_of, decode_private, decode_uri,
    encode_int_string, encode_private,
};
pub use ts::{AptEptLpt, ControlTimestamp, SetupData, Timestamp, WallClockTime};
pub use wallclock::{
    decode_max_freq_error, decode_precision, encode_max_freq_error, encode_precision, Candidate,
    WallClockMessage, WallClockMessageType, WALL_CLOCK_MESSAGE_SIZE,
};
