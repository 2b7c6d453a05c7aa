//! Newline-delimited JSON over TCP. Each connection is one session: the
//! client opens with a `hello` frame and the server answers with the
//! session id it will use.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use xdcstore_core::StatusUpdate;
use xdcstore_sync::{run_session, Inbound, Outbound, StoreService};

const CHANNEL_CAPACITY: usize = 32;

static SESSION_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClientFrame {
    Hello {
        #[serde(default)]
        session_id: Option<String>,
    },
    StatusUpdate {
        update: serde_json::Value,
    },
    Text {
        text: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerFrame {
    Session {
        session_id: String,
    },
    StatusUpdate {
        update: StatusUpdate,
    },
    Artifact {
        name: String,
        tag_name: String,
        data: String,
    },
    Text {
        text: String,
    },
}

impl From<Outbound> for ServerFrame {
    fn from(message: Outbound) -> Self {
        match message {
            Outbound::StatusUpdate(update) => Self::StatusUpdate { update },
            Outbound::Artifact(push) => Self::Artifact {
                name: push.name,
                tag_name: push.tag_name,
                data: BASE64.encode(&push.bytes),
            },
            Outbound::Text(text) => Self::Text { text },
        }
    }
}

pub fn generate_session_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or_default();
    format!(
        "s-{nanos:x}-{}-{}",
        std::process::id(),
        SESSION_COUNTER.fetch_add(1, Ordering::Relaxed)
    )
}

/// Accepts connections until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    service: Arc<StoreService>,
    shutdown: impl Future<Output = ()>,
) -> Result<()> {
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "accepted connection");
                        let service = service.clone();
                        tokio::spawn(async move {
                            if let Err(err) = handle_connection(stream, service).await {
                                warn!(%peer, "connection failed: {err:#}");
                            }
                        });
                    }
                    Err(err) => error!("accept error: {err}"),
                }
            }
            () = &mut shutdown => {
                info!("shutting down listener");
                return Ok(());
            }
        }
    }
}

async fn handle_connection(stream: TcpStream, service: Arc<StoreService>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    let session_id = loop {
        let Some(line) = lines.next_line().await.context("failed reading hello")? else {
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<ClientFrame>(&line) {
            Ok(ClientFrame::Hello { session_id }) => {
                break session_id
                    .filter(|id| !id.trim().is_empty())
                    .unwrap_or_else(generate_session_id);
            }
            Ok(_) => anyhow::bail!("first frame must be hello"),
            Err(err) => anyhow::bail!("malformed hello frame: {err}"),
        }
    };

    write_frame(
        &mut writer,
        &ServerFrame::Session {
            session_id: session_id.clone(),
        },
    )
    .await?;

    let (inbound_tx, inbound_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<Outbound>(CHANNEL_CAPACITY);
    let session = tokio::spawn(run_session(service, session_id, inbound_rx, outbound_tx));
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            write_frame(&mut writer, &ServerFrame::from(message)).await?;
        }
        writer.shutdown().await.context("failed closing connection")
    });

    while let Some(line) = lines.next_line().await.context("failed reading frame")? {
        if line.trim().is_empty() {
            continue;
        }
        let inbound = match serde_json::from_str::<ClientFrame>(&line) {
            Ok(ClientFrame::StatusUpdate { update }) => Inbound::StatusUpdate(update),
            Ok(ClientFrame::Text { text }) => Inbound::Text(text),
            Ok(ClientFrame::Hello { .. }) => {
                debug!("ignoring repeated hello");
                continue;
            }
            Err(err) => {
                warn!("ignoring malformed frame: {err}");
                continue;
            }
        };
        if inbound_tx.send(inbound).await.is_err() {
            break;
        }
    }

    drop(inbound_tx);
    session.await.context("session task panicked")??;
    writer_task.await.context("writer task panicked")??;
    Ok(())
}

async fn write_frame<W>(writer: &mut W, frame: &ServerFrame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(frame).context("failed serializing frame")?;
    line.push(b'\n');
    writer
        .write_all(&line)
        .await
        .context("failed writing frame")
}
