//! Status-update payloads exchanged with the store frontend.
//!
//! Every update is a JSON object with a `payload` field whose `type` selects
//! the message kind.

use serde::{Deserialize, Serialize};

use crate::app_info::AppInfo;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed status update: {reason}")]
    Malformed { reason: String },
    #[error("unexpected '{kind}' payload from client")]
    UnexpectedKind { kind: &'static str },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum StorePayload {
    Update {
        app_infos: Vec<AppInfo>,
        serial: u64,
        old_serial: u64,
        updating: Vec<String>,
    },
    UpdateRequest {
        serial: u64,
        #[serde(default)]
        apps: Vec<(String, String)>,
    },
    Download {
        app_id: String,
    },
    DownloadOkay {
        app_id: String,
        name: String,
        data: String,
    },
    DownloadError {
        app_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Outdated {
        tag_name: String,
        critical: bool,
    },
    UpdateWebxdc,
    UpdateSent,
}

impl StorePayload {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Update { .. } => "Update",
            Self::UpdateRequest { .. } => "UpdateRequest",
            Self::Download { .. } => "Download",
            Self::DownloadOkay { .. } => "DownloadOkay",
            Self::DownloadError { .. } => "DownloadError",
            Self::Outdated { .. } => "Outdated",
            Self::UpdateWebxdc => "UpdateWebxdc",
            Self::UpdateSent => "UpdateSent",
        }
    }

    /// Whether a client is allowed to send this kind.
    pub fn is_client_request(&self) -> bool {
        matches!(
            self,
            Self::UpdateRequest { .. } | Self::Download { .. } | Self::UpdateWebxdc
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusUpdate {
    pub payload: StorePayload,
}

impl StatusUpdate {
    pub fn new(payload: StorePayload) -> Self {
        Self { payload }
    }

    pub fn from_value(value: serde_json::Value) -> Result<Self, ProtocolError> {
        serde_json::from_value(value).map_err(|err| ProtocolError::Malformed {
            reason: err.to_string(),
        })
    }

    /// Parses an update sent by a client, rejecting server-only kinds.
    pub fn parse_request(value: serde_json::Value) -> Result<StorePayload, ProtocolError> {
        let update = Self::from_value(value)?;
        if !update.payload.is_client_request() {
            return Err(ProtocolError::UnexpectedKind {
                kind: update.payload.kind(),
            });
        }
        Ok(update.payload)
    }
}
