mod artifacts;
mod catalog;
mod digest;
mod error;
mod layout;
mod state;
mod write_lock;

use anyhow::Result;
use xdcstore_core::AppInfo;

pub use artifacts::ArtifactStore;
pub use catalog::{Catalog, CatalogBatch, ChangeKind, ChangeSet, CommitOutcome};
pub use digest::{sha256_hex, verify_sha256};
pub use error::StoreError;
pub use layout::{default_data_dir, DataLayout};
pub use state::{write_atomic, ArtifactRef, CatalogRecord, CatalogState};
pub use write_lock::CatalogWriteLock;

/// Bytes of an app's current artifact together with its catalog row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub info: AppInfo,
    pub bytes: Vec<u8>,
}

/// Catalog plus artifact blobs rooted at one data directory.
#[derive(Debug)]
pub struct Store {
    layout: DataLayout,
    catalog: Catalog,
    artifacts: ArtifactStore,
}

impl Store {
    pub fn open(layout: DataLayout) -> Result<Self> {
        layout.ensure_base_dirs()?;
        let catalog = Catalog::open(layout.clone())?;
        let artifacts = ArtifactStore::new(layout.clone());
        Ok(Self {
            layout,
            catalog,
            artifacts,
        })
    }

    pub fn layout(&self) -> &DataLayout {
        &self.layout
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// Current artifact for `app_id`. The catalog lock is released before
    /// the blob is read.
    pub fn get(&self, app_id: &str) -> Result<StoredArtifact, StoreError> {
        let record = self
            .catalog
            .record(app_id)?
            .ok_or_else(|| StoreError::NotFound {
                app_id: app_id.to_string(),
            })?;
        let bytes = self.artifacts.read(app_id, &record.artifact)?;
        Ok(StoredArtifact {
            info: record.info,
            bytes,
        })
    }

    /// Commits `batch` and drops blobs the new catalog no longer references.
    pub fn commit(&self, batch: CatalogBatch) -> Result<CommitOutcome, StoreError> {
        let outcome = self.catalog.commit(batch)?;
        let snapshot = self.catalog.snapshot()?;
        if let Err(err) = self.artifacts.collect_garbage(&snapshot) {
            tracing::warn!("failed collecting unreferenced artifacts: {err:#}");
        }
        Ok(outcome)
    }
}
