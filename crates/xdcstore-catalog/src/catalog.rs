use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs;
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;

use anyhow::{anyhow, Context, Result};
use tracing::{debug, info, warn};
use xdcstore_core::AppInfo;

use crate::state::{load_catalog_file, save_catalog_file, ArtifactRef, CatalogRecord, CatalogState};
use crate::{DataLayout, StoreError};

/// Result of [`Catalog::changes_since`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    pub app_infos: Vec<AppInfo>,
    pub serial: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Updated,
    Unchanged,
}

impl ChangeKind {
    pub fn is_changed(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitOutcome {
    pub previous_serial: u64,
    pub serial: u64,
    pub changed: Vec<String>,
    pub removed: Vec<String>,
}

impl CommitOutcome {
    pub fn advanced(&self) -> bool {
        self.serial > self.previous_serial
    }
}

impl CatalogState {
    /// Every app touched by a batch committed after `serial`, plus the
    /// current serial. `serial == 0` yields the full catalog.
    pub fn changes_since(&self, serial: u64) -> ChangeSet {
        if serial > self.serial {
            debug!(
                client_serial = serial,
                serial = self.serial,
                "client serial is ahead of catalog"
            );
        }
        let app_infos = self
            .records()
            .filter(|record| record.updated_serial > serial)
            .map(|record| record.info.clone())
            .collect();
        ChangeSet {
            app_infos,
            serial: self.serial,
        }
    }

    /// True iff the catalog holds `app_id` under a different tag. Apps the
    /// catalog does not know are never stale.
    pub fn staleness(&self, app_id: &str, known_tag_name: &str) -> bool {
        self.get(app_id)
            .map(|record| record.info.tag_name != known_tag_name)
            .unwrap_or(false)
    }
}

/// A staged set of catalog mutations that becomes visible all at once on
/// [`Catalog::commit`].
#[derive(Debug, Clone)]
pub struct CatalogBatch {
    base_serial: u64,
    records: BTreeMap<String, CatalogRecord>,
    changed: BTreeSet<String>,
    removed: BTreeSet<String>,
    artifacts_replaced: bool,
}

impl CatalogBatch {
    pub fn base_serial(&self) -> u64 {
        self.base_serial
    }

    /// Stages `info` and its artifact. Identical metadata reports
    /// [`ChangeKind::Unchanged`] and does not count towards the serial, even
    /// when the artifact bytes were replaced.
    pub fn apply_change(&mut self, info: AppInfo, artifact: ArtifactRef) -> ChangeKind {
        let app_id = info.app_id.clone();
        match self.records.get_mut(&app_id) {
            Some(existing) if existing.info == info => {
                if existing.artifact != artifact {
                    existing.artifact = artifact;
                    self.artifacts_replaced = true;
                }
                ChangeKind::Unchanged
            }
            Some(existing) => {
                existing.info = info;
                existing.artifact = artifact;
                self.changed.insert(app_id);
                ChangeKind::Updated
            }
            None => {
                self.records.insert(
                    app_id.clone(),
                    CatalogRecord {
                        info,
                        updated_serial: self.base_serial,
                        artifact,
                    },
                );
                self.removed.remove(&app_id);
                self.changed.insert(app_id);
                ChangeKind::Added
            }
        }
    }

    /// Drops every staged app whose id is not in `keep`, returning the dropped ids.
    pub fn retain_only(&mut self, keep: &HashSet<&str>) -> Vec<String> {
        let dropped: Vec<String> = self
            .records
            .keys()
            .filter(|app_id| !keep.contains(app_id.as_str()))
            .cloned()
            .collect();
        for app_id in &dropped {
            self.records.remove(app_id);
            self.changed.remove(app_id);
            self.removed.insert(app_id.clone());
        }
        dropped
    }

    pub fn has_changes(&self) -> bool {
        !self.changed.is_empty() || !self.removed.is_empty()
    }

    fn is_dirty(&self) -> bool {
        self.has_changes() || self.artifacts_replaced
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
}

#[derive(Debug)]
struct LoadedCatalog {
    state: Arc<CatalogState>,
    stamp: Option<FileStamp>,
}

/// The authoritative app table. Reads share a lock; a commit holds it
/// exclusively so no reader observes a half-applied batch.
#[derive(Debug)]
pub struct Catalog {
    layout: DataLayout,
    inner: RwLock<LoadedCatalog>,
}

impl Catalog {
    pub fn open(layout: DataLayout) -> Result<Self> {
        let path = layout.catalog_path();
        let state = load_catalog_file(&path)?;
        let stamp = file_stamp(&path)?;
        debug!(serial = state.serial, apps = state.len(), "loaded catalog");
        Ok(Self {
            layout,
            inner: RwLock::new(LoadedCatalog {
                state: Arc::new(state),
                stamp,
            }),
        })
    }

    pub fn snapshot(&self) -> Result<Arc<CatalogState>> {
        Ok(self.read()?.state.clone())
    }

    pub fn serial(&self) -> Result<u64> {
        Ok(self.read()?.state.serial)
    }

    pub fn changes_since(&self, serial: u64) -> Result<ChangeSet> {
        Ok(self.snapshot()?.changes_since(serial))
    }

    pub fn staleness(&self, app_id: &str, known_tag_name: &str) -> Result<bool> {
        Ok(self.snapshot()?.staleness(app_id, known_tag_name))
    }

    pub fn record(&self, app_id: &str) -> Result<Option<CatalogRecord>> {
        Ok(self.snapshot()?.get(app_id).cloned())
    }

    pub fn begin_batch(&self) -> Result<CatalogBatch> {
        let state = self.snapshot()?;
        Ok(CatalogBatch {
            base_serial: state.serial,
            records: state.records.clone(),
            changed: BTreeSet::new(),
            removed: BTreeSet::new(),
            artifacts_replaced: false,
        })
    }

    /// Applies the whole batch. The serial advances by exactly one when any
    /// app was added, updated or removed.
    pub fn commit(&self, batch: CatalogBatch) -> Result<CommitOutcome, StoreError> {
        let mut guard = self.write()?;
        let current = guard.state.serial;
        if batch.base_serial != current {
            return Err(StoreError::Conflict {
                base: batch.base_serial,
                current,
            });
        }

        let mut outcome = CommitOutcome {
            previous_serial: current,
            serial: current,
            changed: batch.changed.iter().cloned().collect(),
            removed: batch.removed.iter().cloned().collect(),
        };
        if !batch.is_dirty() {
            debug!(serial = current, "catalog batch had no effect");
            return Ok(outcome);
        }

        let serial = if batch.has_changes() {
            current + 1
        } else {
            current
        };
        let mut records = batch.records;
        for app_id in &batch.changed {
            if let Some(record) = records.get_mut(app_id) {
                record.updated_serial = serial;
            }
        }
        let state = CatalogState { serial, records };

        let path = self.layout.catalog_path();
        save_catalog_file(&path, &self.layout.tmp_dir(), &state)?;
        guard.stamp = file_stamp(&path)?;
        guard.state = Arc::new(state);
        outcome.serial = serial;

        info!(
            previous_serial = current,
            serial,
            changed = outcome.changed.len(),
            removed = outcome.removed.len(),
            "committed catalog batch"
        );
        Ok(outcome)
    }

    /// Picks up a batch committed by another process. Returns whether the
    /// in-memory catalog was replaced.
    pub fn reload_if_changed(&self) -> Result<bool> {
        let path = self.layout.catalog_path();
        let stamp = file_stamp(&path)?;
        if self.read()?.stamp == stamp {
            return Ok(false);
        }

        let state = load_catalog_file(&path)?;
        let mut guard = self.write()?;
        guard.stamp = stamp;
        if state.serial < guard.state.serial {
            warn!(
                on_disk = state.serial,
                loaded = guard.state.serial,
                "ignoring catalog on disk with an older serial"
            );
            return Ok(false);
        }
        info!(
            previous_serial = guard.state.serial,
            serial = state.serial,
            "reloaded catalog from disk"
        );
        guard.state = Arc::new(state);
        Ok(true)
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, LoadedCatalog>> {
        self.inner
            .read()
            .map_err(|_| anyhow!("catalog lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, LoadedCatalog>> {
        self.inner
            .write()
            .map_err(|_| anyhow!("catalog lock poisoned"))
    }
}

fn file_stamp(path: &Path) -> Result<Option<FileStamp>> {
    match fs::metadata(path) {
        Ok(metadata) => Ok(Some(FileStamp {
            modified: metadata.modified().ok(),
            len: metadata.len(),
        })),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => {
            Err(err).with_context(|| format!("failed reading metadata: {}", path.display()))
        }
    }
}
