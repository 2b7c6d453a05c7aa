//! Lock-manifest ingestion.
//!
//! Every entry is read and validated before the catalog is touched; the
//! whole manifest is then committed as one batch.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};
use xdcstore_catalog::{CatalogWriteLock, ChangeKind, Store, StoreError};
use xdcstore_core::{LockEntry, LockManifest};

use crate::progress::ImportProgress;

#[derive(Debug, thiserror::Error)]
pub enum IngestionError {
    #[error("invalid manifest {}: {reason}", path.display())]
    Manifest { path: PathBuf, reason: String },
    #[error("entry '{key}' ({app_id}): {reason}")]
    Entry {
        key: String,
        app_id: String,
        reason: String,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportOptions {
    /// Drop previously ingested apps the manifest no longer lists.
    pub prune: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub added: Vec<String>,
    pub updated: Vec<String>,
    pub unchanged: Vec<String>,
    pub removed: Vec<String>,
    pub previous_serial: u64,
    pub serial: u64,
}

struct StagedEntry {
    entry: LockEntry,
    bytes: Vec<u8>,
}

pub fn import_manifest(
    store: &Store,
    source_dir: &Path,
    options: ImportOptions,
    progress: &mut dyn ImportProgress,
) -> Result<ImportReport, IngestionError> {
    let lock_path = source_dir.join(LockManifest::FILE_NAME);
    let content = fs::read_to_string(&lock_path).map_err(|err| IngestionError::Manifest {
        path: lock_path.clone(),
        reason: err.to_string(),
    })?;
    let manifest =
        LockManifest::from_toml_str(&content).map_err(|err| IngestionError::Manifest {
            path: lock_path.clone(),
            reason: format!("{err:#}"),
        })?;

    progress.start(manifest.entries.len());
    let mut staged = Vec::with_capacity(manifest.entries.len());
    for entry in &manifest.entries {
        progress.entry(&entry.app_id);
        staged.push(materialize(source_dir, entry)?);
    }

    let _lock = CatalogWriteLock::acquire(store.layout())?;
    store.catalog().reload_if_changed().map_err(StoreError::from)?;

    let result = apply_staged(store, &manifest, &staged, options);
    progress.finish();
    if result.is_err() {
        discard_staged_artifacts(store);
    }
    result
}

fn materialize(source_dir: &Path, entry: &LockEntry) -> Result<StagedEntry, IngestionError> {
    let path = entry.source_path(source_dir);
    let bytes = fs::read(&path).map_err(|err| IngestionError::Entry {
        key: entry.key.clone(),
        app_id: entry.app_id.clone(),
        reason: format!("failed reading {}: {err}", path.display()),
    })?;
    if bytes.is_empty() {
        return Err(IngestionError::Entry {
            key: entry.key.clone(),
            app_id: entry.app_id.clone(),
            reason: format!("source {} is empty", path.display()),
        });
    }
    Ok(StagedEntry {
        entry: entry.clone(),
        bytes,
    })
}

fn apply_staged(
    store: &Store,
    manifest: &LockManifest,
    staged: &[StagedEntry],
    options: ImportOptions,
) -> Result<ImportReport, IngestionError> {
    let mut batch = store.catalog().begin_batch().map_err(StoreError::from)?;
    let mut report = ImportReport::default();

    for StagedEntry { entry, bytes } in staged {
        let artifact = store
            .artifacts()
            .put(&entry.app_id, &entry.tag_name, bytes)?;
        match batch.apply_change(entry.app_info(bytes.len() as u64), artifact) {
            ChangeKind::Added => report.added.push(entry.app_id.clone()),
            ChangeKind::Updated => report.updated.push(entry.app_id.clone()),
            ChangeKind::Unchanged => report.unchanged.push(entry.app_id.clone()),
        }
    }

    if options.prune {
        report.removed = batch.retain_only(&manifest.app_ids());
    }

    let outcome = store.commit(batch)?;
    report.previous_serial = outcome.previous_serial;
    report.serial = outcome.serial;
    info!(
        added = report.added.len(),
        updated = report.updated.len(),
        unchanged = report.unchanged.len(),
        removed = report.removed.len(),
        serial = report.serial,
        "import finished"
    );
    Ok(report)
}

fn discard_staged_artifacts(store: &Store) {
    let cleanup = store
        .catalog()
        .snapshot()
        .and_then(|snapshot| store.artifacts().collect_garbage(&snapshot));
    if let Err(err) = cleanup {
        warn!("failed discarding staged artifacts: {err:#}");
    }
}
