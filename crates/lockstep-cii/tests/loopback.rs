//! CII server/client session over a real socket.

use std::sync::mpsc::{self, Sender};
use std::time::Duration;

use lockstep_cii::{CiiClient, CiiClientObserver, CiiServer};
use lockstep_wire::{Cii, ContentIdStatus, Field};
use lockstep_ws::WsServerConfig;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

struct ChangeRecorder {
    changes: Sender<Vec<&'static str>>,
}

impl CiiClientObserver for ChangeRecorder {
    fn on_change(&mut self, changed: &[&'static str], _state: &Cii) {
        let _ = self.changes.send(changed.to_vec());
    }
}

#[test]
fn client_mirrors_state_and_sees_diffs() {
    let initial = Cii {
        protocol_version: Field::Value("1.1".into()),
        content_id: Field::Value("dvb://233a.1004.1080".into()),
        content_id_status: Field::Value(ContentIdStatus::Partial),
        ..Cii::default()
    };
    let server = CiiServer::start(
        WsServerConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            ..WsServerConfig::default()
        },
        initial.clone(),
    )
    .unwrap();

    let (tx, rx) = mpsc::channel();
    let client = CiiClient::connect(
        &format!("ws://{}", server.local_addr()),
        Box::new(ChangeRecorder { changes: tx }),
    )
    .unwrap();

    // Initial full state lands as one change notification.
    let first = rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(first, vec!["protocolVersion", "contentId", "contentIdStatus"]);
    assert_eq!(client.cii(), initial);

    // A content id change travels as a diff with the status forced in.
    server.update_cii(|cii| {
        cii.content_id = Field::Value("dvb://233a.1004.1080;21af".into());
        cii.content_id_status = Field::Value(ContentIdStatus::Final);
    });
    server.update_clients(true, false);

    let second = rx.recv_timeout(RECV_TIMEOUT).unwrap();
    assert_eq!(second, vec!["contentId", "contentIdStatus"]);
    assert_eq!(
        client.cii().content_id,
        Field::Value("dvb://233a.1004.1080;21af".to_string())
    );
    assert_eq!(
        client.cii().content_id_status,
        Field::Value(ContentIdStatus::Final)
    );

    // No change: nothing is pushed (give any stray message time to arrive).
    server.update_clients(true, false);
    assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());

    client.disconnect();
    server.stop();
}
