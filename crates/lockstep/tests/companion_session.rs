//! A full companion session against a simulated television, end to end over
//! real sockets: discover the endpoints via CII, discipline a wall clock
//! over UDP, then drive a timeline clock over the TS protocol.

use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use lockstep::cii::{CiiClient, CiiClientObserver, CiiServer};
use lockstep::ts::{ClockTimelineSource, TsClientConfig, TsClientController, TsClientObserver, TsServer};
use lockstep::wallclock::{
    algorithm::LowestDispersionCandidate, WallClockClient, WallClockClientConfig, WallClockServer,
    WallClockServerConfig,
};
use lockstep::wire::{Cii, Field};
use lockstep::ws::{parse_udp_url, parse_ws_url, WsServerConfig};
use lockstep::{Clock, Correlation, SystemTimeSource};

const PTS: &str = "urn:dvb:css:timeline:pts";
const CONTENT_ID: &str = "dvb://233a.1004.1080";

struct NoopCiiObserver;
impl CiiClientObserver for NoopCiiObserver {}

struct TimelineEvents {
    available: mpsc::Sender<()>,
}
impl TsClientObserver for TimelineEvents {
    fn on_timeline_available(&mut self) {
        let _ = self.available.send(());
    }
}

fn loopback_ws_config() -> WsServerConfig {
    WsServerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        ..WsServerConfig::default()
    }
}

#[test]
fn companion_discovers_synchronises_and_tracks_the_timeline() {
    // ------------------------------------------------------------------
    // Television side.
    // ------------------------------------------------------------------
    let tv_source = Arc::new(SystemTimeSource::new());
    let tv_sys = Clock::system(tv_source, 1e9).unwrap();
    let tv_wall_clock = Clock::correlated(&tv_sys, 1e9, Correlation::new(0.0, 0.0)).unwrap();

    // A PTS timeline that started two seconds ago at normal speed.
    let tv_pts = Clock::correlated(
        &tv_wall_clock,
        90_000.0,
        Correlation::new(tv_wall_clock.ticks() - 2e9, 0.0),
    )
    .unwrap();

    let wc_server = WallClockServer::start(
        WallClockServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..WallClockServerConfig::default()
        },
        tv_wall_clock.clone(),
    )
    .unwrap();

    let ts_server = TsServer::start(
        loopback_ws_config(),
        Some(CONTENT_ID.to_string()),
        tv_wall_clock.clone(),
    )
    .unwrap();
    ts_server.attach_timeline_source(ClockTimelineSource::new(
        PTS,
        tv_wall_clock.clone(),
        tv_pts.clone(),
    ));

    let cii_server = CiiServer::start(
        loopback_ws_config(),
        Cii {
            protocol_version: Field::Value("1.1".into()),
            content_id: Field::Value(CONTENT_ID.into()),
            wc_url: Field::Value(format!("udp://{}", wc_server.local_addr())),
            ts_url: Field::Value(format!("ws://{}", ts_server.local_addr())),
            ..Cii::default()
        },
    )
    .unwrap();

    // ------------------------------------------------------------------
    // Companion side: discovery.
    // ------------------------------------------------------------------
    let cii_client = CiiClient::connect(
        &format!("ws://{}", cii_server.local_addr()),
        Box::new(NoopCiiObserver),
    )
    .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let (wc_url, ts_url) = loop {
        let state = cii_client.cii();
        if let (Field::Value(wc), Field::Value(ts)) = (&state.wc_url, &state.ts_url) {
            break (wc.clone(), ts.clone());
        }
        assert!(Instant::now() < deadline, "CII state never arrived");
        std::thread::sleep(Duration::from_millis(20));
    };
    let wc_addr = parse_udp_url(&wc_url).unwrap();
    parse_ws_url(&ts_url).unwrap();

    // ------------------------------------------------------------------
    // Companion side: wall clock discipline.
    // ------------------------------------------------------------------
    let source = Arc::new(SystemTimeSource::new());
    let sys = Clock::system(source, 1e9).unwrap();
    // Deliberately three seconds out to start with.
    let wall_clock =
        Clock::correlated(&sys, 1e9, Correlation::new(0.0, -3_000_000_000.0)).unwrap();

    let wc_client = WallClockClient::start(
        WallClockClientConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            server_addr: wc_addr,
        },
        wall_clock.clone(),
        Box::new(LowestDispersionCandidate::new(wall_clock.clone(), 0.05, 0.5)),
    )
    .unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let skew_nanos = (wall_clock.ticks() - tv_wall_clock.ticks()).abs();
        if skew_nanos < 50_000_000.0 {
            break;
        }
        assert!(
            Instant::now() < deadline,
            "wall clock never converged, skew {skew_nanos} ns"
        );
        std::thread::sleep(Duration::from_millis(100));
    }

    // ------------------------------------------------------------------
    // Companion side: timeline.
    // ------------------------------------------------------------------
    let timeline = Clock::correlated(&wall_clock, 90_000.0, Correlation::new(0.0, 0.0)).unwrap();
    timeline.set_availability(false).unwrap();

    let (available_tx, available_rx) = mpsc::channel();
    let ts_client = TsClientController::connect(
        &ts_url,
        TsClientConfig::new("dvb://", PTS),
        timeline.clone(),
        Box::new(TimelineEvents {
            available: available_tx,
        }),
    )
    .unwrap();

    available_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("timeline never became available");
    assert!(timeline.is_available());

    // The companion's timeline now tracks the television's PTS position to
    // within the wall-clock sync error plus a little transport slack.
    let position_error_secs = (timeline.ticks() - tv_pts.ticks()).abs() / 90_000.0;
    assert!(
        position_error_secs < 0.5,
        "timeline position error {position_error_secs}s"
    );

    ts_client.disconnect();
    cii_client.disconnect();
    wc_client.stop();
    ts_server.stop();
    cii_server.stop();
    wc_server.stop();
}
