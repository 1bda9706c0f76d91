//! The wall-clock client engine: a request/response loop feeding
//! measurement candidates to a pluggable algorithm.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use lockstep_clocks::Clock;
use lockstep_wire::{Candidate, WallClockMessage, WallClockMessageType, WALL_CLOCK_MESSAGE_SIZE};
use tracing::{debug, warn};

use crate::algorithm::WallClockAlgorithm;
use crate::config::WallClockClientConfig;
use crate::error::{WallClockError, WallClockResult};

/// A wall-clock protocol client.
///
/// Each measurement round sends one request stamped with the *parent* of
/// the disciplined clock, then collects responses until the algorithm's
/// timeout, keeping the best-scoring one. A best response that really came
/// from the server becomes a [`Candidate`] (using the local receive time of
/// that specific response) and is handed to the algorithm; a timeout hands
/// it nothing. Either way the algorithm returns the next round's timeout.
///
/// Runs on its own thread; [`WallClockClient::stop`] joins it.
pub struct WallClockClient {
    stop_flag: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl WallClockClient {
    /// Bind a socket and start measuring. `clock` is the clock the
    /// algorithm disciplines; measurements are taken from its parent.
    pub fn start(
        config: WallClockClientConfig,
        clock: Arc<Clock>,
        algorithm: Box<dyn WallClockAlgorithm>,
    ) -> WallClockResult<Self> {
        let measured = clock.parent().ok_or(WallClockError::NoParentClock)?;
        let socket = UdpSocket::bind(config.bind_addr)?;

        let stop_flag = Arc::new(AtomicBool::new(false));
        let thread_stop = stop_flag.clone();
        let handle = std::thread::Builder::new()
            .name("lockstep-wc-client".into())
            .spawn(move || {
                run_rounds(
                    &socket,
                    config.server_addr,
                    &measured,
                    algorithm,
                    &thread_stop,
                );
            })?;

        Ok(Self {
            stop_flag,
            thread: Mutex::new(Some(handle)),
        })
    }

    /// Stop the client and wait for its thread to finish.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WallClockClient {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_rounds(
    socket: &UdpSocket,
    server: SocketAddr,
    measured: &Arc<Clock>,
    mut algorithm: Box<dyn WallClockAlgorithm>,
    stop_flag: &AtomicBool,
) {
    let mut timeout_secs = algorithm.first_timeout();
    while !stop_flag.load(Ordering::SeqCst) {
        match measure_round(socket, server, measured, timeout_secs) {
            Ok(Some(candidate)) => {
                debug!(
                    offset_nanos = candidate.offset_nanos,
                    rtt_nanos = candidate.rtt_nanos,
                    "measurement candidate"
                );
                timeout_secs = algorithm.on_candidate(&candidate);
            }
            Ok(None) => {
                debug!("measurement round timed out");
                timeout_secs = algorithm.on_timeout();
            }
            Err(e) => {
                warn!(error = %e, "measurement round failed");
                std::thread::sleep(Duration::from_millis(200));
            }
        }
    }
}

/// One request/response round. Returns the best candidate, or `None` on
/// timeout or when the best response came from somewhere other than the
/// server.
fn measure_round(
    socket: &UdpSocket,
    server: SocketAddr,
    measured: &Arc<Clock>,
    timeout_secs: f64,
) -> WallClockResult<Option<Candidate>> {
    let request = WallClockMessage::request(measured.nanos() as u64);
    socket.send_to(&request.pack(), server)?;

    let deadline = Instant::now() + Duration::from_secs_f64(timeout_secs.max(0.0));
    let mut best: Option<(i32, WallClockMessage, u64, SocketAddr)> = None;
    let mut buf = [0u8; WALL_CLOCK_MESSAGE_SIZE];

    // Keep listening until the deadline, or stop early once a response that
    // cannot be improved on (a final or follow-up response) arrives.
    while best.as_ref().map_or(true, |(quality, ..)| *quality < 3) {
        let remaining = match deadline.checked_duration_since(Instant::now()) {
            Some(remaining) if !remaining.is_zero() => remaining,
            _ => break,
        };
        socket.set_read_timeout(Some(remaining))?;
        let (len, src) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                break;
            }
            Err(e) => return Err(e.into()),
        };
        // The receive timestamp belongs to this specific response.
        let received_nanos = measured.nanos() as u64;

        let response = match WallClockMessage::unpack(&buf[..len]) {
            Ok(message) => message,
            Err(e) => {
                warn!(%src, error = %e, "ignoring malformed datagram");
                continue;
            }
        };
        if !response.message_type.is_response() {
            continue;
        }

        let quality = response_quality(&request, &response);
        if best
            .as_ref()
            .map_or(true, |(best_quality, ..)| quality >= *best_quality)
        {
            best = Some((quality, response, received_nanos, src));
        }
    }

    match best {
        Some((_, response, received_nanos, src)) if src == server => {
            Ok(Some(Candidate::from_response(response, received_nanos)?))
        }
        _ => Ok(None),
    }
}

/// How good a response is. A final response scores 3, a
/// response-with-follow-up 2, a follow-up 4; a response whose originate
/// timevalue does not echo our outstanding request is penalised by 10 (it
/// belongs to an earlier round, but is still usable if nothing better
/// arrives).
fn response_quality(request: &WallClockMessage, response: &WallClockMessage) -> i32 {
    let offset = if request.originate_nanos == response.originate_nanos {
        0
    } else {
        -10
    };
    offset
        + match response.message_type {
            WallClockMessageType::Response => 3,
            WallClockMessageType::ResponseWithFollowUp => 2,
            WallClockMessageType::FollowUp => 4,
            WallClockMessageType::Request => 0,
        }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn message(message_type: WallClockMessageType, originate: u64) -> WallClockMessage {
        WallClockMessage {
            message_type,
            precision: 0,
            max_freq_error: 0,
            originate_nanos: originate,
            receive_nanos: 0,
            transmit_nanos: 0,
            original_originate: None,
        }
    }

    #[test_case(WallClockMessageType::Response, true, 3)]
    #[test_case(WallClockMessageType::ResponseWithFollowUp, true, 2)]
    #[test_case(WallClockMessageType::FollowUp, true, 4)]
    #[test_case(WallClockMessageType::Response, false, -7)]
    #[test_case(WallClockMessageType::FollowUp, false, -6)]
    fn quality_scoring(
        message_type: WallClockMessageType,
        originate_matches: bool,
        expected: i32,
    ) {
        let request = WallClockMessage::request(1000);
        let originate = if originate_matches { 1000 } else { 999 };
        assert_eq!(
            response_quality(&request, &message(message_type, originate)),
            expected
        );
    }

    #[test]
    fn follow_up_beats_first_response() {
        let request = WallClockMessage::request(42);
        let first = message(WallClockMessageType::ResponseWithFollowUp, 42);
        let follow_up = message(WallClockMessageType::FollowUp, 42);
        assert!(response_quality(&request, &follow_up) > response_quality(&request, &first));
    }

    #[test]
    fn stale_response_loses_to_current_one() {
        let request = WallClockMessage::request(42);
        let stale = message(WallClockMessageType::Response, 41);
        let current = message(WallClockMessageType::ResponseWithFollowUp, 42);
        assert!(response_quality(&request, &current) > response_quality(&request, &stale));
    }
}
