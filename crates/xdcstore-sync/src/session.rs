use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, warn, Span};
use xdcstore_core::StatusUpdate;

use crate::service::StoreService;

/// Frontend bundle pushed to a session as a new top-level message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPush {
    pub name: String,
    pub tag_name: String,
    pub bytes: Vec<u8>,
}

/// Something the transport received for a session.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    StatusUpdate(serde_json::Value),
    Text(String),
}

/// Something the transport must deliver to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    StatusUpdate(StatusUpdate),
    Artifact(ArtifactPush),
    Text(String),
}

pub trait Outbox {
    fn send(&mut self, message: Outbound) -> Result<()>;
}

impl Outbox for Vec<Outbound> {
    fn send(&mut self, message: Outbound) -> Result<()> {
        self.push(message);
        Ok(())
    }
}

/// Blocking adapter over the transport channel; use from blocking threads only.
pub struct ChannelOutbox {
    sender: mpsc::Sender<Outbound>,
}

impl ChannelOutbox {
    pub fn new(sender: mpsc::Sender<Outbound>) -> Self {
        Self { sender }
    }
}

impl Outbox for ChannelOutbox {
    fn send(&mut self, message: Outbound) -> Result<()> {
        self.sender
            .blocking_send(message)
            .map_err(|_| anyhow!("session outbox closed"))
    }
}

/// Drives one session: hydrates or resumes it, then answers inbound
/// messages strictly one at a time so responses never interleave.
#[tracing::instrument(name = "session", skip_all, fields(session_id = %session_id))]
pub async fn run_session(
    service: Arc<StoreService>,
    session_id: String,
    mut inbound: mpsc::Receiver<Inbound>,
    outbound: mpsc::Sender<Outbound>,
) -> Result<()> {
    let span = Span::current();
    let mut state = {
        let service = service.clone();
        let sender = outbound.clone();
        let span = span.clone();
        tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            service.open_session(&session_id, &mut ChannelOutbox::new(sender))
        })
        .await
        .context("session open task failed")??
    };

    while let Some(message) = inbound.recv().await {
        let service = service.clone();
        let sender = outbound.clone();
        let span = span.clone();
        let (returned, result) = tokio::task::spawn_blocking(move || {
            let _entered = span.enter();
            let mut state = state;
            let result = service.handle(&mut state, message, &mut ChannelOutbox::new(sender));
            (state, result)
        })
        .await
        .context("session handler task failed")?;
        state = returned;

        if let Err(err) = result {
            if outbound.is_closed() {
                debug!("transport closed, ending session");
                break;
            }
            warn!("failed handling session message: {err:#}");
        }
    }

    debug!("session finished");
    Ok(())
}
