use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use xdcstore_core::{validate_app_id, AppInfo};

/// Content reference for one stored bundle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactRef {
    pub sha256: String,
    pub size: u64,
    pub tag_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogRecord {
    #[serde(flatten)]
    pub info: AppInfo,
    pub updated_serial: u64,
    pub artifact: ArtifactRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CatalogFile {
    version: u32,
    serial: u64,
    #[serde(default)]
    apps: Vec<CatalogRecord>,
}

pub(crate) fn catalog_file_version() -> u32 {
    1
}

/// In-memory catalog contents keyed by app id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogState {
    pub(crate) serial: u64,
    pub(crate) records: BTreeMap<String, CatalogRecord>,
}

impl CatalogState {
    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn records(&self) -> impl Iterator<Item = &CatalogRecord> {
        self.records.values()
    }

    pub fn get(&self, app_id: &str) -> Option<&CatalogRecord> {
        self.records.get(app_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

pub(crate) fn parse_catalog_file(content: &str) -> Result<CatalogState> {
    let file: CatalogFile = serde_json::from_str(content).context("failed parsing catalog")?;
    let expected = catalog_file_version();
    if file.version != expected {
        anyhow::bail!(
            "unsupported catalog version {} (expected {}): re-import into a fresh data directory",
            file.version,
            expected
        );
    }

    let mut records = BTreeMap::new();
    for record in file.apps {
        validate_app_id(&record.info.app_id)?;
        if record.updated_serial > file.serial {
            anyhow::bail!(
                "catalog row '{}' has serial {} newer than catalog serial {}",
                record.info.app_id,
                record.updated_serial,
                file.serial
            );
        }
        let app_id = record.info.app_id.clone();
        if records.insert(app_id.clone(), record).is_some() {
            anyhow::bail!("duplicate app id '{app_id}' in catalog");
        }
    }

    Ok(CatalogState {
        serial: file.serial,
        records,
    })
}

pub(crate) fn load_catalog_file(path: &Path) -> Result<CatalogState> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(CatalogState::default());
        }
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed reading catalog: {}", path.display()));
        }
    };
    parse_catalog_file(&content).with_context(|| format!("invalid catalog: {}", path.display()))
}

pub(crate) fn save_catalog_file(path: &Path, tmp_dir: &Path, state: &CatalogState) -> Result<()> {
    let file = CatalogFile {
        version: catalog_file_version(),
        serial: state.serial,
        apps: state.records.values().cloned().collect(),
    };
    let content = serde_json::to_string_pretty(&file)
        .with_context(|| format!("failed serializing catalog: {}", path.display()))?;
    write_atomic(path, tmp_dir, content.as_bytes())
}

/// Writes into `tmp_dir` first and renames into place, so readers observe
/// either the previous or the new content.
pub fn write_atomic(path: &Path, tmp_dir: &Path, bytes: &[u8]) -> Result<()> {
    fs::create_dir_all(tmp_dir)
        .with_context(|| format!("failed creating {}", tmp_dir.display()))?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    let staged = tmp_dir.join(format!(
        ".{file_name}-{}-{}-{}",
        std::process::id(),
        unique_suffix(),
        WRITE_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    fs::write(&staged, bytes)
        .with_context(|| format!("failed writing {}", staged.display()))?;
    if let Err(err) = fs::rename(&staged, path) {
        let _ = fs::remove_file(&staged);
        return Err(err).with_context(|| format!("failed replacing {}", path.display()));
    }
    Ok(())
}

static WRITE_COUNTER: AtomicU64 = AtomicU64::new(0);

pub(crate) fn unique_suffix() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos()
}
