use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::json;
use tokio::sync::mpsc;
use xdcstore_catalog::DataLayout;
use xdcstore_core::{StatusUpdate, StorePayload};
use xdcstore_import::{import_manifest, install_frontend, ImportOptions, NoProgress};

use super::*;

static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_root(label: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    path.push(format!(
        "xdcstore-sync-tests-{label}-{}-{}-{}",
        std::process::id(),
        nanos,
        TEST_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    path
}

struct Fixture {
    source: PathBuf,
    data: PathBuf,
}

impl Fixture {
    fn new(frontend_tag: &str) -> Self {
        let fixture = Self {
            source: test_root("source"),
            data: test_root("data"),
        };
        fs::create_dir_all(&fixture.source).expect("must create source dir");
        fixture.install_frontend(frontend_tag);
        fixture
    }

    fn layout(&self) -> DataLayout {
        DataLayout::new(&self.data)
    }

    fn install_frontend(&self, tag_name: &str) {
        let bundle = self.source.join("store.xdc");
        fs::write(&bundle, format!("frontend:{tag_name}")).expect("must write frontend");
        install_frontend(&self.layout(), &bundle, tag_name, None).expect("must install frontend");
    }

    fn service(&self) -> StoreService {
        StoreService::open(self.layout(), "xdcstore test").expect("must open service")
    }

    /// Publishes `apps` as `(app_id, tag_name, description)` rows.
    fn publish(&self, service: &StoreService, apps: &[(&str, &str, &str)]) {
        let mut lock = String::new();
        for (app_id, tag_name, description) in apps {
            fs::write(
                self.source.join(format!("{app_id}.xdc")),
                bundle_bytes(app_id, tag_name),
            )
            .expect("must write bundle");
            lock.push_str(&format!(
                "[{app_id}]\napp_id = \"{app_id}\"\ntag_name = \"{tag_name}\"\nname = \"{app_id}\"\ndescription = \"{description}\"\ncache_relname = \"{app_id}.xdc\"\n\n"
            ));
        }
        fs::write(self.source.join("sources.lock"), lock).expect("must write lock");
        import_manifest(
            service.store(),
            &self.source,
            ImportOptions { prune: false },
            &mut NoProgress,
        )
        .expect("import must succeed");
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.source);
        let _ = fs::remove_dir_all(&self.data);
    }
}

fn bundle_bytes(app_id: &str, tag_name: &str) -> Vec<u8> {
    format!("bundle:{app_id}:{tag_name}").into_bytes()
}

fn four_apps() -> [(&'static str, &'static str, &'static str); 4] {
    [
        ("webxdc-2048", "v1.0.0", "tiles"),
        ("calendar", "v1.0.0", "dates"),
        ("hextris", "v1.0.0", "hex"),
        ("poll", "v1.0.0", "votes"),
    ]
}

fn request(payload: serde_json::Value) -> Inbound {
    Inbound::StatusUpdate(json!({ "payload": payload }))
}

fn payloads(outbox: &[Outbound]) -> Vec<StorePayload> {
    outbox
        .iter()
        .filter_map(|message| match message {
            Outbound::StatusUpdate(update) => Some(update.payload.clone()),
            _ => None,
        })
        .collect()
}

fn open(service: &StoreService, session_id: &str) -> (SessionState, Vec<Outbound>) {
    let mut outbox = Vec::new();
    let state = service
        .open_session(session_id, &mut outbox)
        .expect("must open session");
    (state, outbox)
}

fn send(service: &StoreService, state: &mut SessionState, message: Inbound) -> Vec<Outbound> {
    let mut outbox = Vec::new();
    service
        .handle(state, message, &mut outbox)
        .expect("must handle message");
    outbox
}

fn update_parts(payload: &StorePayload) -> (Vec<String>, u64, u64, Vec<String>) {
    match payload {
        StorePayload::Update {
            app_infos,
            serial,
            old_serial,
            updating,
        } => (
            app_infos.iter().map(|info| info.app_id.clone()).collect(),
            *serial,
            *old_serial,
            updating.clone(),
        ),
        other => panic!("expected Update, got {other:?}"),
    }
}

#[test]
fn new_session_on_empty_catalog_gets_empty_snapshot_and_frontend() {
    let fixture = Fixture::new("v1");
    let service = fixture.service();

    let (_, outbox) = open(&service, "alice");
    assert_eq!(outbox.len(), 2);
    assert_eq!(
        outbox[0],
        Outbound::StatusUpdate(StatusUpdate::new(StorePayload::Update {
            app_infos: Vec::new(),
            serial: 0,
            old_serial: 0,
            updating: Vec::new(),
        }))
    );
    assert_eq!(
        outbox[1],
        Outbound::Artifact(ArtifactPush {
            name: "store.xdc".to_string(),
            tag_name: "v1".to_string(),
            bytes: b"frontend:v1".to_vec(),
        })
    );
}

#[test]
fn update_request_on_empty_catalog_returns_empty_update() {
    let fixture = Fixture::new("v1");
    let service = fixture.service();
    let (mut state, _) = open(&service, "alice");

    let outbox = send(
        &service,
        &mut state,
        request(json!({ "type": "UpdateRequest", "serial": 0, "apps": [] })),
    );
    assert_eq!(
        payloads(&outbox),
        vec![StorePayload::Update {
            app_infos: Vec::new(),
            serial: 0,
            old_serial: 0,
            updating: Vec::new(),
        }]
    );
}

#[test]
fn full_catalog_and_download_after_import() {
    let fixture = Fixture::new("v1");
    let service = fixture.service();
    fixture.publish(&service, &four_apps());
    let (mut state, hydration) = open(&service, "alice");

    let (ids, serial, old_serial, updating) = update_parts(&payloads(&hydration)[0]);
    assert_eq!(ids.len(), 4);
    assert_eq!(serial, 1);
    assert_eq!(old_serial, 0);
    assert!(updating.is_empty());

    let outbox = send(
        &service,
        &mut state,
        request(json!({ "type": "Download", "app_id": "webxdc-2048" })),
    );
    assert_eq!(
        payloads(&outbox),
        vec![StorePayload::DownloadOkay {
            app_id: "webxdc-2048".to_string(),
            name: "webxdc-2048".to_string(),
            data: BASE64.encode(bundle_bytes("webxdc-2048", "v1.0.0")),
        }]
    );
}

#[test]
fn download_of_unknown_app_reports_error_without_reason() {
    let fixture = Fixture::new("v1");
    let service = fixture.service();
    let (mut state, _) = open(&service, "alice");

    let outbox = send(
        &service,
        &mut state,
        request(json!({ "type": "Download", "app_id": "missing" })),
    );
    assert_eq!(
        payloads(&outbox),
        vec![StorePayload::DownloadError {
            app_id: "missing".to_string(),
            error: None,
        }]
    );
}

#[test]
fn stale_installed_apps_are_listed_and_pushed() {
    let fixture = Fixture::new("v1");
    let service = fixture.service();
    fixture.publish(&service, &four_apps());
    let (mut state, _) = open(&service, "alice");

    fixture.publish(
        &service,
        &[
            ("webxdc-2048", "v1.0.0", "tiles"),
            ("calendar", "v1.1.0", "dates"),
            ("hextris", "v2.0.0", "hex"),
            ("poll", "v1.0.0", "votes"),
        ],
    );

    let outbox = send(
        &service,
        &mut state,
        request(json!({
            "type": "UpdateRequest",
            "serial": 1,
            "apps": [
                ["calendar", "v1.0.0"],
                ["hextris", "v1.0.0"],
                ["poll", "v1.0.0"],
                ["calendar", "v1.0.0"],
                ["unknown-app", "v0.1.0"]
            ]
        })),
    );
    let payloads = payloads(&outbox);
    assert_eq!(payloads.len(), 3);

    let (ids, serial, old_serial, updating) = update_parts(&payloads[0]);
    assert_eq!(ids, vec!["calendar".to_string(), "hextris".to_string()]);
    assert_eq!(serial, 2);
    assert_eq!(old_serial, 1);
    assert_eq!(updating, vec!["calendar".to_string(), "hextris".to_string()]);

    assert_eq!(
        payloads[1],
        StorePayload::DownloadOkay {
            app_id: "calendar".to_string(),
            name: "calendar".to_string(),
            data: BASE64.encode(bundle_bytes("calendar", "v1.1.0")),
        }
    );
    assert!(matches!(
        &payloads[2],
        StorePayload::DownloadOkay { app_id, .. } if app_id == "hextris"
    ));
}

#[test]
fn caught_up_client_gets_empty_update() {
    let fixture = Fixture::new("v1");
    let service = fixture.service();
    fixture.publish(&service, &four_apps());
    let (mut state, _) = open(&service, "alice");

    for serial in [1, 7] {
        let outbox = send(
            &service,
            &mut state,
            request(json!({ "type": "UpdateRequest", "serial": serial })),
        );
        let (ids, current, old_serial, updating) = update_parts(&payloads(&outbox)[0]);
        assert!(ids.is_empty());
        assert_eq!(current, 1);
        assert_eq!(old_serial, serial);
        assert!(updating.is_empty());
    }
}

#[test]
fn outdated_frontend_must_upgrade_before_updates() {
    let fixture = Fixture::new("v1");
    {
        let service = fixture.service();
        fixture.publish(&service, &four_apps());
        open(&service, "alice");
    }

    fixture.install_frontend("v2");
    let service = fixture.service();
    let (mut state, resumed) = open(&service, "alice");
    assert!(resumed.is_empty());
    assert_eq!(state.guard().delivered_tag(), "v1");

    let update_request = || request(json!({ "type": "UpdateRequest", "serial": 1 }));

    let outbox = send(&service, &mut state, update_request());
    assert_eq!(
        payloads(&outbox),
        vec![StorePayload::Outdated {
            tag_name: "v2".to_string(),
            critical: true,
        }]
    );
    assert_eq!(state.guard().mode(), GuardMode::AwaitingUpgrade);

    let outbox = send(&service, &mut state, request(json!({ "type": "UpdateWebxdc" })));
    assert_eq!(outbox.len(), 2);
    assert_eq!(
        outbox[0],
        Outbound::StatusUpdate(StatusUpdate::new(StorePayload::UpdateSent))
    );
    assert!(matches!(
        &outbox[1],
        Outbound::Artifact(push) if push.tag_name == "v2" && push.bytes == b"frontend:v2"
    ));
    assert_eq!(state.guard().mode(), GuardMode::Serving);

    let outbox = send(&service, &mut state, update_request());
    update_parts(&payloads(&outbox)[0]);

    // the upgrade is remembered across restarts
    let service = fixture.service();
    let (state, resumed) = open(&service, "alice");
    assert!(resumed.is_empty());
    assert_eq!(state.guard().delivered_tag(), "v2");
}

#[test]
fn downloads_see_imports_committed_by_another_handle() {
    let fixture = Fixture::new("v1");
    let serving = fixture.service();
    fixture.publish(&serving, &four_apps());
    let (mut state, _) = open(&serving, "alice");

    let importer = fixture.service();
    fixture.publish(
        &importer,
        &[("calendar", "v1.1.0", "dates"), ("chess", "v1.0.0", "board")],
    );

    for (app_id, tag_name) in [("calendar", "v1.1.0"), ("chess", "v1.0.0")] {
        let outbox = send(
            &serving,
            &mut state,
            request(json!({ "type": "Download", "app_id": app_id })),
        );
        assert_eq!(
            payloads(&outbox),
            vec![StorePayload::DownloadOkay {
                app_id: app_id.to_string(),
                name: app_id.to_string(),
                data: BASE64.encode(bundle_bytes(app_id, tag_name)),
            }]
        );
    }
}

#[test]
fn awaiting_upgrade_still_serves_other_requests() {
    let fixture = Fixture::new("v1");
    {
        let service = fixture.service();
        fixture.publish(&service, &four_apps());
        open(&service, "alice");
    }
    fixture.install_frontend("v2");
    let service = fixture.service();
    let (mut state, _) = open(&service, "alice");
    let update_request = || request(json!({ "type": "UpdateRequest", "serial": 0 }));
    let outdated = vec![StorePayload::Outdated {
        tag_name: "v2".to_string(),
        critical: true,
    }];

    assert_eq!(payloads(&send(&service, &mut state, update_request())), outdated);

    let outbox = send(
        &service,
        &mut state,
        request(json!({ "type": "Download", "app_id": "poll" })),
    );
    assert_eq!(
        payloads(&outbox),
        vec![StorePayload::DownloadOkay {
            app_id: "poll".to_string(),
            name: "poll".to_string(),
            data: BASE64.encode(bundle_bytes("poll", "v1.0.0")),
        }]
    );
    assert_eq!(state.guard().mode(), GuardMode::AwaitingUpgrade);

    assert_eq!(payloads(&send(&service, &mut state, update_request())), outdated);
    assert_eq!(state.guard().mode(), GuardMode::AwaitingUpgrade);
}

#[test]
fn upgrade_request_while_serving_is_ignored() {
    let fixture = Fixture::new("v1");
    let service = fixture.service();
    let (mut state, _) = open(&service, "alice");

    let outbox = send(&service, &mut state, request(json!({ "type": "UpdateWebxdc" })));
    assert!(outbox.is_empty());
}

#[test]
fn malformed_and_server_only_payloads_are_ignored() {
    let fixture = Fixture::new("v1");
    let service = fixture.service();
    let (mut state, _) = open(&service, "alice");

    for message in [
        Inbound::StatusUpdate(json!({ "nonsense": true })),
        request(json!({ "type": "Bogus" })),
        request(json!({ "type": "UpdateSent" })),
        request(json!({ "type": "Download" })),
    ] {
        assert!(send(&service, &mut state, message).is_empty());
    }
}

#[test]
fn text_commands_answer_version_or_hint() {
    let fixture = Fixture::new("v1");
    let service = fixture.service();
    let (mut state, _) = open(&service, "alice");

    let outbox = send(&service, &mut state, Inbound::Text("version".to_string()));
    assert_eq!(outbox, vec![Outbound::Text("xdcstore test".to_string())]);

    let outbox = send(&service, &mut state, Inbound::Text("hello".to_string()));
    assert!(matches!(
        &outbox[..],
        [Outbound::Text(text)] if text.contains(VERSION_COMMAND)
    ));
}

#[test]
fn missing_frontend_fails_service_start() {
    let data = test_root("no-frontend");
    let err = StoreService::open(DataLayout::new(&data), "xdcstore test")
        .expect_err("service must need a frontend");
    assert!(format!("{err:#}").contains("xdcstore frontend"));
    let _ = fs::remove_dir_all(&data);
}

#[test]
fn guard_only_accepts_upgrade_after_outdated_verdict() {
    let mut guard = SelfUpdateGuard::new("v1");
    assert!(!guard.on_upgrade_request("v2"));
    assert_eq!(guard.on_update_request("v1"), GuardVerdict::Proceed);
    assert_eq!(
        guard.on_update_request("v2"),
        GuardVerdict::Outdated {
            tag_name: "v2".to_string()
        }
    );
    assert!(guard.on_upgrade_request("v2"));
    assert_eq!(guard.delivered_tag(), "v2");
    assert_eq!(guard.on_update_request("v2"), GuardVerdict::Proceed);
}

#[test]
fn ledger_persists_session_tags() {
    let data = test_root("ledger");
    let layout = DataLayout::new(&data);
    layout.ensure_base_dirs().expect("must create dirs");

    let ledger = SessionLedger::open(&layout).expect("must open ledger");
    assert_eq!(ledger.frontend_tag("bob").expect("must read"), None);
    ledger.record("bob", "v3").expect("must record");

    let reopened = SessionLedger::open(&layout).expect("must reopen ledger");
    assert_eq!(
        reopened.frontend_tag("bob").expect("must read"),
        Some("v3".to_string())
    );
    let _ = fs::remove_dir_all(&data);
}

#[tokio::test(flavor = "multi_thread")]
async fn run_session_answers_over_channels() {
    let fixture = Fixture::new("v1");
    let service = Arc::new(fixture.service());
    fixture.publish(&service, &four_apps());

    let (inbound_tx, inbound_rx) = mpsc::channel(8);
    let (outbound_tx, mut outbound_rx) = mpsc::channel(8);
    let task = tokio::spawn(run_session(
        service.clone(),
        "carol".to_string(),
        inbound_rx,
        outbound_tx,
    ));

    let hydration = outbound_rx.recv().await.expect("must hydrate");
    assert!(matches!(
        hydration,
        Outbound::StatusUpdate(StatusUpdate {
            payload: StorePayload::Update { serial: 1, .. }
        })
    ));
    assert!(matches!(
        outbound_rx.recv().await,
        Some(Outbound::Artifact(_))
    ));

    inbound_tx
        .send(request(json!({ "type": "Download", "app_id": "poll" })))
        .await
        .expect("must send request");
    let reply = outbound_rx.recv().await.expect("must reply");
    assert!(matches!(
        reply,
        Outbound::StatusUpdate(StatusUpdate {
            payload: StorePayload::DownloadOkay { ref app_id, .. }
        }) if app_id == "poll"
    ));

    drop(inbound_tx);
    task.await
        .expect("session task must join")
        .expect("session must end cleanly");
}

