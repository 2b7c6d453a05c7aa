use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use xdcstore_catalog::{write_atomic, DataLayout};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionRecord {
    pub frontend_tag: String,
    pub updated_at_unix: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct LedgerFile {
    version: u32,
    #[serde(default)]
    sessions: BTreeMap<String, SessionRecord>,
}

/// Remembers which frontend tag each session was last given, so the
/// self-update check survives restarts.
#[derive(Debug)]
pub struct SessionLedger {
    path: PathBuf,
    tmp_dir: PathBuf,
    sessions: Mutex<BTreeMap<String, SessionRecord>>,
}

impl SessionLedger {
    pub fn open(layout: &DataLayout) -> Result<Self> {
        let path = layout.sessions_path();
        let sessions = match fs::read_to_string(&path) {
            Ok(content) => {
                let file: LedgerFile = serde_json::from_str(&content)
                    .with_context(|| format!("failed parsing session ledger {}", path.display()))?;
                if file.version != 1 {
                    anyhow::bail!(
                        "unsupported session ledger version {} in {}",
                        file.version,
                        path.display()
                    );
                }
                file.sessions
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed reading session ledger {}", path.display()));
            }
        };

        Ok(Self {
            path,
            tmp_dir: layout.tmp_dir(),
            sessions: Mutex::new(sessions),
        })
    }

    pub fn frontend_tag(&self, session_id: &str) -> Result<Option<String>> {
        Ok(self
            .lock()?
            .get(session_id)
            .map(|record| record.frontend_tag.clone()))
    }

    pub fn record(&self, session_id: &str, frontend_tag: &str) -> Result<()> {
        let mut sessions = self.lock()?;
        sessions.insert(
            session_id.to_string(),
            SessionRecord {
                frontend_tag: frontend_tag.to_string(),
                updated_at_unix: current_unix_timestamp(),
            },
        );
        let file = LedgerFile {
            version: 1,
            sessions: sessions.clone(),
        };
        let content = serde_json::to_string_pretty(&file)
            .with_context(|| format!("failed serializing session ledger {}", self.path.display()))?;
        write_atomic(&self.path, &self.tmp_dir, content.as_bytes())
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, SessionRecord>>> {
        self.sessions
            .lock()
            .map_err(|_| anyhow!("session ledger lock poisoned"))
    }
}

fn current_unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
