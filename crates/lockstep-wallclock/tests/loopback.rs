//! End-to-end measurement over a real UDP socket pair on the loopback
//! interface.

use std::sync::Arc;
use std::time::Duration;

use lockstep_clocks::{Clock, Correlation, SystemTimeSource};
use lockstep_wallclock::algorithm::MostRecent;
use lockstep_wallclock::{
    WallClockClient, WallClockClientConfig, WallClockServer, WallClockServerConfig,
};

fn run_session(follow_up: bool) {
    let server_source = Arc::new(SystemTimeSource::new());
    let server_clock = Clock::system(server_source, 1e9).unwrap();
    let server = WallClockServer::start(
        WallClockServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            follow_up,
            ..WallClockServerConfig::default()
        },
        server_clock.clone(),
    )
    .unwrap();

    let client_source = Arc::new(SystemTimeSource::new());
    let sys = Clock::system(client_source, 1e9).unwrap();
    // Start five seconds out; measurements must pull the estimate in.
    let wall_clock =
        Clock::correlated(&sys, 1e9, Correlation::new(0.0, -5_000_000_000.0)).unwrap();

    let client = WallClockClient::start(
        WallClockClientConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            server_addr: server.local_addr(),
        },
        wall_clock.clone(),
        Box::new(MostRecent::new(wall_clock.clone(), 0.05, 0.5)),
    )
    .unwrap();

    let mut converged = false;
    for _ in 0..100 {
        std::thread::sleep(Duration::from_millis(100));
        let diff_nanos = (wall_clock.ticks() - server_clock.ticks()).abs();
        if diff_nanos < 100_000_000.0 {
            converged = true;
            break;
        }
    }
    client.stop();
    server.stop();
    assert!(converged, "wall clock did not converge to the server clock");
}

#[test]
fn client_converges_against_live_server() {
    run_session(false);
}

#[test]
fn client_converges_when_server_sends_follow_ups() {
    run_session(true);
}
