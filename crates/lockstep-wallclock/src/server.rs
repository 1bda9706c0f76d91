//! The wall-clock server engine.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use lockstep_clocks::Clock;
use lockstep_wire::{WallClockMessage, WallClockMessageType, WALL_CLOCK_MESSAGE_SIZE};
use tracing::{debug, warn};

use crate::config::WallClockServerConfig;
use crate::error::WallClockResult;

/// How often the receive loop wakes to observe the stop flag.
const RECEIVE_TIMEOUT: Duration = Duration::from_secs(1);

/// A wall-clock protocol server.
///
/// Answers every request datagram with a response timestamped from the
/// served clock; the originate timevalue is echoed verbatim, including a
/// non-normalised nanoseconds field. With `follow_up` configured, each
/// response is type 2 and is followed by a type-3 follow-up carrying a
/// fresh transmit time.
///
/// Runs on its own thread; [`WallClockServer::stop`] joins it.
pub struct WallClockServer {
    stop_flag: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
    local_addr: SocketAddr,
}

impl WallClockServer {
    /// Bind the socket and start serving `clock`.
    pub fn start(config: WallClockServerConfig, clock: Arc<Clock>) -> WallClockResult<Self> {
        let socket = UdpSocket::bind(config.bind_addr)?;
        socket.set_read_timeout(Some(RECEIVE_TIMEOUT))?;
        let local_addr = socket.local_addr()?;

        let stop_flag = Arc::new(AtomicBool::new(false));
        let thread_stop = stop_flag.clone();
        let handle = std::thread::Builder::new()
            .name("lockstep-wc-server".into())
            .spawn(move || serve(&socket, &clock, &config, &thread_stop))?;

        Ok(Self {
            stop_flag,
            thread: Mutex::new(Some(handle)),
            local_addr,
        })
    }

    /// The address the server socket is actually bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop the server and wait for its thread to finish.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WallClockServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn serve(
    socket: &UdpSocket,
    clock: &Arc<Clock>,
    config: &WallClockServerConfig,
    stop_flag: &AtomicBool,
) {
    let mut buf = [0u8; WALL_CLOCK_MESSAGE_SIZE];
    while !stop_flag.load(Ordering::SeqCst) {
        let (len, src) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => {
                warn!(error = %e, "receive failed");
                continue;
            }
        };

        // Timestamp reception before doing anything else.
        let t2_ticks = clock.ticks();

        let request = match WallClockMessage::unpack(&buf[..len]) {
            Ok(message) => message,
            Err(e) => {
                warn!(%src, error = %e, "dropping malformed datagram");
                continue;
            }
        };
        if request.message_type != WallClockMessageType::Request {
            warn!(%src, message_type = ?request.message_type, "dropping non-request message");
            continue;
        }

        let mut reply = make_reply(&request, t2_ticks, clock, config);
        reply.transmit_nanos = clock.nanos() as u64;
        if let Err(e) = socket.send_to(&reply.pack(), src) {
            warn!(%src, error = %e, "failed to send response");
            continue;
        }
        debug!(%src, originate = request.originate_nanos, "answered request");

        if config.follow_up {
            let mut follow_up = reply.clone();
            follow_up.message_type = WallClockMessageType::FollowUp;
            follow_up.transmit_nanos = clock.nanos() as u64;
            if let Err(e) = socket.send_to(&follow_up.pack(), src) {
                warn!(%src, error = %e, "failed to send follow-up");
            }
        }
    }
}

/// Build the response to a request, except for the transmit timestamp which
/// is filled in immediately before each send.
fn make_reply(
    request: &WallClockMessage,
    t2_ticks: f64,
    clock: &Arc<Clock>,
    config: &WallClockServerConfig,
) -> WallClockMessage {
    let mut reply = request.clone();
    reply.message_type = if config.follow_up {
        WallClockMessageType::ResponseWithFollowUp
    } else {
        WallClockMessageType::Response
    };
    reply.receive_nanos = (t2_ticks * 1e9 / clock.tick_rate()) as u64;
    reply.set_precision_secs(
        config
            .precision_override
            .unwrap_or_else(|| clock.dispersion_at_time(t2_ticks)),
    );
    reply.set_max_freq_error_ppm(
        config
            .max_freq_error_override
            .unwrap_or_else(|| clock.root_max_freq_error()),
    );
    reply
}
