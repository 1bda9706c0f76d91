//! The 32-byte wall-clock protocol frame and the measurement candidate
//! derived from a request/response exchange.

use std::sync::Arc;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use lockstep_clocks::{Clock, Correlation};

use crate::error::{WireError, WireResult};

/// Exact size of every wall-clock protocol frame.
pub const WALL_CLOCK_MESSAGE_SIZE: usize = 32;

const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// Wall-clock message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WallClockMessageType {
    Request,
    /// Response with no follow-up to come.
    Response,
    /// Response that will be followed by a follow-up carrying a more
    /// accurate transmit time.
    ResponseWithFollowUp,
    FollowUp,
}

impl WallClockMessageType {
    pub fn from_wire(value: u8) -> WireResult<Self> {
        match value {
            0 => Ok(Self::Request),
            1 => Ok(Self::Response),
            2 => Ok(Self::ResponseWithFollowUp),
            3 => Ok(Self::FollowUp),
            other => Err(WireError::BadMessageType(other)),
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            Self::Request => 0,
            Self::Response => 1,
            Self::ResponseWithFollowUp => 2,
            Self::FollowUp => 3,
        }
    }

    /// Whether this is any of the three response types.
    pub fn is_response(self) -> bool {
        !matches!(self, Self::Request)
    }
}

/// A wall-clock protocol message.
///
/// All three timevalues are integer nanoseconds. A server echoes the
/// originate timevalue of the request verbatim; if the received encoding
/// carried a nanoseconds field of 10⁹ or more, the original `(seconds,
/// nanos)` pair is preserved in `original_originate` and re-emitted on
/// [`WallClockMessage::pack`] so the echo round-trips byte-for-byte.
#[derive(Debug, Clone, PartialEq)]
pub struct WallClockMessage {
    pub message_type: WallClockMessageType,
    /// Precision of the sender's clock, encoded as log₂ seconds.
    pub precision: i8,
    /// Maximum frequency error of the sender's clock, in units of 1/256 ppm.
    pub max_freq_error: u32,
    pub originate_nanos: u64,
    pub receive_nanos: u64,
    pub transmit_nanos: u64,
    /// Original `(seconds, nanos)` encoding of the originate timevalue when
    /// it did not normalise (nanos ≥ 10⁹). Takes precedence when packing.
    pub original_originate: Option<(u32, u32)>,
}

impl WallClockMessage {
    /// A client request originated at the given local time.
    pub fn request(originate_nanos: u64) -> Self {
        Self {
            message_type: WallClockMessageType::Request,
            precision: 0,
            max_freq_error: 0,
            originate_nanos,
            receive_nanos: 0,
            transmit_nanos: 0,
            original_originate: None,
        }
    }

    /// Pack into the 32-byte wire form.
    pub fn pack(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(WALL_CLOCK_MESSAGE_SIZE);
        buf.put_u8(0); // version
        buf.put_u8(self.message_type.to_wire());
        buf.put_i8(self.precision);
        buf.put_u8(0); // reserved
        buf.put_u32(self.max_freq_error);
        match self.original_originate {
            Some((secs, nanos)) => {
                buf.put_u32(secs);
                buf.put_u32(nanos);
            }
            None => {
                buf.put_u32((self.originate_nanos / NANOS_PER_SECOND) as u32);
                buf.put_u32((self.originate_nanos % NANOS_PER_SECOND) as u32);
            }
        }
        buf.put_u32((self.receive_nanos / NANOS_PER_SECOND) as u32);
        buf.put_u32((self.receive_nanos % NANOS_PER_SECOND) as u32);
        buf.put_u32((self.transmit_nanos / NANOS_PER_SECOND) as u32);
        buf.put_u32((self.transmit_nanos % NANOS_PER_SECOND) as u32);
        buf.freeze()
    }

    /// Unpack a received frame, validating length, version and type.
    pub fn unpack(data: &[u8]) -> WireResult<Self> {
        if data.len() != WALL_CLOCK_MESSAGE_SIZE {
            return Err(WireError::WrongLength(data.len()));
        }
        let mut buf = data;
        let version = buf.get_u8();
        if version != 0 {
            return Err(WireError::BadVersion(version));
        }
        let message_type = WallClockMessageType::from_wire(buf.get_u8())?;
        let precision = buf.get_i8();
        let _reserved = buf.get_u8();
        let max_freq_error = buf.get_u32();
        let originate_secs = buf.get_u32();
        let originate_subsec = buf.get_u32();
        let receive_secs = buf.get_u32();
        let receive_subsec = buf.get_u32();
        let transmit_secs = buf.get_u32();
        let transmit_subsec = buf.get_u32();

        // Senders may legitimately put more than 10⁹ in the nanos field;
        // remember the original encoding so an echo round-trips.
        let original_originate = if u64::from(originate_subsec) >= NANOS_PER_SECOND {
            Some((originate_secs, originate_subsec))
        } else {
            None
        };

        Ok(Self {
            message_type,
            precision,
            max_freq_error,
            originate_nanos: u64::from(originate_secs) * NANOS_PER_SECOND
                + u64::from(originate_subsec),
            receive_nanos: u64::from(receive_secs) * NANOS_PER_SECOND
                + u64::from(receive_subsec),
            transmit_nanos: u64::from(transmit_secs) * NANOS_PER_SECOND
                + u64::from(transmit_subsec),
            original_originate,
        })
    }

    /// The precision field as seconds.
    pub fn precision_secs(&self) -> f64 {
        decode_precision(self.precision)
    }

    /// Set the precision field from a value in seconds.
    pub fn set_precision_secs(&mut self, secs: f64) {
        self.precision = encode_precision(secs);
    }

    /// The maximum frequency error field as ppm.
    pub fn max_freq_error_ppm(&self) -> f64 {
        decode_max_freq_error(self.max_freq_error)
    }

    /// Set the maximum frequency error field from a value in ppm.
    pub fn set_max_freq_error_ppm(&mut self, ppm: f64) {
        self.max_freq_error = encode_max_freq_error(ppm);
    }
}

/// Encode a precision in seconds as the wire form `⌈log₂ s⌉`, saturating to
/// the `i8` range.
pub fn encode_precision(secs: f64) -> i8 {
    let encoded = secs.log2().ceil();
    encoded.clamp(f64::from(i8::MIN), f64::from(i8::MAX)) as i8
}

/// Decode a wire precision to seconds (`2^p`).
pub fn decode_precision(precision: i8) -> f64 {
    2.0f64.powi(i32::from(precision))
}

/// Encode a maximum frequency error in ppm as `⌈ppm × 256⌉`.
pub fn encode_max_freq_error(ppm: f64) -> u32 {
    (ppm * 256.0).ceil().clamp(0.0, f64::from(u32::MAX)) as u32
}

/// Decode a wire maximum frequency error to ppm.
pub fn decode_max_freq_error(value: u32) -> f64 {
    f64::from(value) / 256.0
}

/// A measurement candidate: the result of one request/response exchange.
///
/// `t1` is the client send time, `t2` the server receive time, `t3` the
/// server transmit time and `t4` the client receive time, all in
/// nanoseconds. `t1`/`t4` are readings of the clock that was measured (the
/// parent of the clock being disciplined); `t2`/`t3` are readings of the
/// server's wall clock.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub t1: u64,
    pub t2: u64,
    pub t3: u64,
    pub t4: u64,
    /// Server↔client clock offset estimate, in nanoseconds.
    pub offset_nanos: i64,
    /// Round-trip time, in nanoseconds.
    pub rtt_nanos: i64,
    /// Precision reported by the server, in seconds.
    pub precision_secs: f64,
    /// Maximum frequency error reported by the server, in ppm.
    pub max_freq_error_ppm: f64,
    /// The response message this candidate was derived from.
    pub message: WallClockMessage,
}

impl Candidate {
    /// Derive a candidate from a response message and the local time, in
    /// nanoseconds, at which that response was received.
    pub fn from_response(message: WallClockMessage, received_nanos: u64) -> WireResult<Self> {
        if !message.message_type.is_response() {
            return Err(WireError::NotAResponse);
        }
        let t1 = message.originate_nanos;
        let t2 = message.receive_nanos;
        let t3 = message.transmit_nanos;
        let t4 = received_nanos;
        let offset_nanos =
            ((i128::from(t3) + i128::from(t2)) - (i128::from(t4) + i128::from(t1))) / 2;
        let rtt_nanos =
            (i128::from(t4) - i128::from(t1)) - (i128::from(t3) - i128::from(t2));
        Ok(Self {
            t1,
            t2,
            t3,
            t4,
            offset_nanos: offset_nanos as i64,
            rtt_nanos: rtt_nanos as i64,
            precision_secs: message.precision_secs(),
            max_freq_error_ppm: message.max_freq_error_ppm(),
            message,
        })
    }

    /// The correlation a correlated clock should adopt so that it models the
    /// server's wall clock, given this measurement.
    ///
    /// `clock` is the clock being disciplined; its parent must be the clock
    /// from which `t1` and `t4` were read. `local_max_freq_error_ppm`
    /// overrides the root clock's maximum frequency error when given.
    ///
    /// Returns `None` when `clock` has no parent.
    ///
    /// The correlation is:
    ///
    /// - `parent_ticks` = (t1′ + t4′) / 2, `child_ticks` = (t2′ + t3′) / 2
    ///   (primed values converted to ticks of the parent and of `clock`);
    /// - `initial_error` = precision + (rtt/2 + mfeC·(t4−t1) + mfeS·(t3−t2));
    /// - `error_growth_rate` = mfeC + mfeS, with both mfe terms as fractions.
    pub fn correlation_for(
        &self,
        clock: &Arc<Clock>,
        local_max_freq_error_ppm: Option<f64>,
    ) -> Option<Correlation> {
        let parent = clock.parent()?;
        let t1 = parent.nanos_to_ticks(self.t1 as f64);
        let t4 = parent.nanos_to_ticks(self.t4 as f64);
        let t2 = clock.nanos_to_ticks(self.t2 as f64);
        let t3 = clock.nanos_to_ticks(self.t3 as f64);

        let mfe_client =
            local_max_freq_error_ppm.unwrap_or_else(|| clock.root_max_freq_error()) / 1e6;
        let mfe_server = self.max_freq_error_ppm / 1e6;

        let initial_error = self.precision_secs
            + (self.rtt_nanos as f64 / 2.0
                + mfe_client * (self.t4 as f64 - self.t1 as f64)
                + mfe_server * (self.t3 as f64 - self.t2 as f64))
                / 1e9;

        Some(Correlation::with_error(
            (t1 + t4) / 2.0,
            (t2 + t3) / 2.0,
            initial_error,
            mfe_client + mfe_server,
        ))
    }
}
