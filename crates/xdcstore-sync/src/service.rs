//! Request handling for store sessions.

use anyhow::Result;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::{debug, info, warn};
use xdcstore_catalog::{DataLayout, Store, StoreError};
use xdcstore_core::{StatusUpdate, StorePayload};

use crate::frontend::FrontendPackage;
use crate::guard::{GuardMode, GuardVerdict, SelfUpdateGuard};
use crate::ledger::SessionLedger;
use crate::session::{ArtifactPush, Inbound, Outbound, Outbox};

pub const VERSION_COMMAND: &str = "version";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    session_id: String,
    guard: SelfUpdateGuard,
}

impl SessionState {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn guard(&self) -> &SelfUpdateGuard {
        &self.guard
    }
}

/// Shared, read-mostly state behind every session.
#[derive(Debug)]
pub struct StoreService {
    store: Store,
    frontend: FrontendPackage,
    ledger: SessionLedger,
    version: String,
}

impl StoreService {
    pub fn new(
        store: Store,
        frontend: FrontendPackage,
        ledger: SessionLedger,
        version: impl Into<String>,
    ) -> Self {
        Self {
            store,
            frontend,
            ledger,
            version: version.into(),
        }
    }

    pub fn open(layout: DataLayout, version: impl Into<String>) -> Result<Self> {
        let store = Store::open(layout.clone())?;
        let frontend = FrontendPackage::load(&layout)?;
        let ledger = SessionLedger::open(&layout)?;
        info!(
            frontend_tag = %frontend.tag_name,
            serial = store.catalog().serial()?,
            "store service ready"
        );
        Ok(Self::new(store, frontend, ledger, version))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn frontend(&self) -> &FrontendPackage {
        &self.frontend
    }

    /// Unknown sessions get the catalog snapshot and the frontend bundle;
    /// known sessions resume pinned to the tag they were given last.
    pub fn open_session(&self, session_id: &str, outbox: &mut dyn Outbox) -> Result<SessionState> {
        if let Some(frontend_tag) = self.ledger.frontend_tag(session_id)? {
            debug!(%frontend_tag, "resuming session");
            return Ok(SessionState {
                session_id: session_id.to_string(),
                guard: SelfUpdateGuard::new(frontend_tag),
            });
        }

        self.store.catalog().reload_if_changed()?;
        let changes = self.store.catalog().changes_since(0)?;
        info!(
            apps = changes.app_infos.len(),
            serial = changes.serial,
            "hydrating new session"
        );
        send_payload(
            outbox,
            StorePayload::Update {
                app_infos: changes.app_infos,
                serial: changes.serial,
                old_serial: 0,
                updating: Vec::new(),
            },
        )?;
        outbox.send(Outbound::Artifact(self.frontend_push()))?;
        self.ledger.record(session_id, &self.frontend.tag_name)?;

        Ok(SessionState {
            session_id: session_id.to_string(),
            guard: SelfUpdateGuard::new(self.frontend.tag_name.clone()),
        })
    }

    pub fn handle(
        &self,
        state: &mut SessionState,
        message: Inbound,
        outbox: &mut dyn Outbox,
    ) -> Result<()> {
        match message {
            Inbound::Text(text) => self.handle_text(&text, outbox),
            Inbound::StatusUpdate(value) => match StatusUpdate::parse_request(value) {
                Ok(payload) => self.handle_payload(state, payload, outbox),
                Err(err) => {
                    warn!("ignoring status update: {err}");
                    Ok(())
                }
            },
        }
    }

    fn handle_text(&self, text: &str, outbox: &mut dyn Outbox) -> Result<()> {
        let reply = if text.trim().eq_ignore_ascii_case(VERSION_COMMAND) {
            self.version.clone()
        } else {
            format!("Unknown command. Send `{VERSION_COMMAND}` to see the store version.")
        };
        outbox.send(Outbound::Text(reply))
    }

    fn handle_payload(
        &self,
        state: &mut SessionState,
        payload: StorePayload,
        outbox: &mut dyn Outbox,
    ) -> Result<()> {
        match payload {
            StorePayload::UpdateRequest { serial, apps } => {
                self.handle_update_request(state, serial, apps, outbox)
            }
            StorePayload::Download { app_id } => {
                info!(%app_id, "handling download");
                send_payload(outbox, self.download(app_id))
            }
            StorePayload::UpdateWebxdc => self.handle_upgrade_request(state, outbox),
            other => {
                debug!(kind = other.kind(), "ignoring unexpected payload");
                Ok(())
            }
        }
    }

    fn handle_update_request(
        &self,
        state: &mut SessionState,
        serial: u64,
        apps: Vec<(String, String)>,
        outbox: &mut dyn Outbox,
    ) -> Result<()> {
        if let GuardVerdict::Outdated { tag_name } =
            state.guard.on_update_request(&self.frontend.tag_name)
        {
            info!(
                delivered = %state.guard.delivered_tag(),
                current = %tag_name,
                "session frontend is outdated"
            );
            return send_payload(
                outbox,
                StorePayload::Outdated {
                    tag_name,
                    critical: true,
                },
            );
        }

        self.store.catalog().reload_if_changed()?;
        let snapshot = self.store.catalog().snapshot()?;
        let mut updating: Vec<String> = Vec::new();
        for (app_id, known_tag_name) in apps {
            if updating.contains(&app_id) {
                continue;
            }
            if snapshot.staleness(&app_id, &known_tag_name) {
                updating.push(app_id);
            }
        }

        let changes = snapshot.changes_since(serial);
        info!(
            old_serial = serial,
            serial = changes.serial,
            changed = changes.app_infos.len(),
            ?updating,
            "handling update request"
        );
        send_payload(
            outbox,
            StorePayload::Update {
                app_infos: changes.app_infos,
                serial: changes.serial,
                old_serial: serial,
                updating: updating.clone(),
            },
        )?;

        for app_id in updating {
            send_payload(outbox, self.download(app_id))?;
        }
        Ok(())
    }

    fn handle_upgrade_request(
        &self,
        state: &mut SessionState,
        outbox: &mut dyn Outbox,
    ) -> Result<()> {
        if state.guard.mode() != GuardMode::AwaitingUpgrade {
            debug!("ignoring frontend upgrade request while serving");
            return Ok(());
        }

        send_payload(outbox, StorePayload::UpdateSent)?;
        outbox.send(Outbound::Artifact(self.frontend_push()))?;
        state.guard.on_upgrade_request(&self.frontend.tag_name);
        self.ledger
            .record(&state.session_id, &self.frontend.tag_name)?;
        info!(tag_name = %self.frontend.tag_name, "pushed upgraded frontend");
        Ok(())
    }

    /// Picks up commits made by another process first, so an app that was
    /// just imported elsewhere is served from the new catalog.
    fn download(&self, app_id: String) -> StorePayload {
        if let Err(err) = self.store.catalog().reload_if_changed() {
            warn!(%app_id, "failed reloading catalog for download: {err:#}");
            return StorePayload::DownloadError {
                app_id,
                error: Some(format!("{err:#}")),
            };
        }
        match self.store.get(&app_id) {
            Ok(artifact) => StorePayload::DownloadOkay {
                name: artifact.info.name,
                data: BASE64.encode(&artifact.bytes),
                app_id,
            },
            Err(StoreError::NotFound { .. }) => {
                debug!(%app_id, "download for unknown app");
                StorePayload::DownloadError {
                    app_id,
                    error: None,
                }
            }
            Err(err) => {
                warn!(%app_id, "failed serving download: {err}");
                StorePayload::DownloadError {
                    app_id,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    fn frontend_push(&self) -> ArtifactPush {
        ArtifactPush {
            name: self.frontend.name.clone(),
            tag_name: self.frontend.tag_name.clone(),
            bytes: self.frontend.bytes.clone(),
        }
    }
}

fn send_payload(outbox: &mut dyn Outbox, payload: StorePayload) -> Result<()> {
    outbox.send(Outbound::StatusUpdate(StatusUpdate::new(payload)))
}
