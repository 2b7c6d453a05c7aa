use std::collections::HashSet;
use std::fs;

use anyhow::Context;
use tracing::{debug, warn};
use xdcstore_core::validate_app_id;

use crate::digest::{sha256_hex, verify_sha256};
use crate::state::{write_atomic, ArtifactRef, CatalogState};
use crate::{DataLayout, StoreError};

/// Immutable bundle blobs, stored per app under their sha256.
///
/// A blob only becomes the current artifact for its app once a catalog batch
/// referencing it is committed; blobs no longer referenced are removed by
/// [`ArtifactStore::collect_garbage`].
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    layout: DataLayout,
}

impl ArtifactStore {
    pub fn new(layout: DataLayout) -> Self {
        Self { layout }
    }

    pub fn put(
        &self,
        app_id: &str,
        tag_name: &str,
        bytes: &[u8],
    ) -> Result<ArtifactRef, StoreError> {
        validate_app_id(app_id)?;
        let sha256 = sha256_hex(bytes);
        let path = self.layout.artifact_path(app_id, &sha256);
        if !path.is_file() {
            let dir = self.layout.app_artifacts_dir(app_id);
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed creating {}", dir.display()))?;
            write_atomic(&path, &self.layout.tmp_dir(), bytes)?;
        }
        debug!(app_id, tag_name, %sha256, size = bytes.len(), "stored artifact");
        Ok(ArtifactRef {
            sha256,
            size: bytes.len() as u64,
            tag_name: tag_name.to_string(),
        })
    }

    /// Reads the blob and checks it still hashes to `artifact.sha256`.
    pub fn read(&self, app_id: &str, artifact: &ArtifactRef) -> Result<Vec<u8>, StoreError> {
        let path = self.layout.artifact_path(app_id, &artifact.sha256);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!(app_id, path = %path.display(), "catalog references a missing artifact");
                return Err(StoreError::NotFound {
                    app_id: app_id.to_string(),
                });
            }
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("failed reading artifact {}", path.display()))
                    .into());
            }
        };

        if !verify_sha256(&bytes, &artifact.sha256) {
            return Err(StoreError::Corrupt {
                app_id: app_id.to_string(),
                expected: artifact.sha256.clone(),
                actual: sha256_hex(&bytes),
            });
        }
        Ok(bytes)
    }

    /// Removes every blob not referenced by `live`. Returns the number of
    /// removed files.
    pub fn collect_garbage(&self, live: &CatalogState) -> anyhow::Result<usize> {
        let root = self.layout.artifacts_dir();
        if !root.exists() {
            return Ok(0);
        }

        let referenced: HashSet<(String, String)> = live
            .records()
            .map(|record| {
                (
                    record.info.app_id.clone(),
                    format!("{}.xdc", record.artifact.sha256),
                )
            })
            .collect();

        let mut removed = 0;
        for app_dir in fs::read_dir(&root)
            .with_context(|| format!("failed reading {}", root.display()))?
        {
            let app_dir = app_dir?;
            if !app_dir.file_type()?.is_dir() {
                continue;
            }
            let app_id = app_dir.file_name().to_string_lossy().to_string();
            for blob in fs::read_dir(app_dir.path())
                .with_context(|| format!("failed reading {}", app_dir.path().display()))?
            {
                let blob = blob?;
                let file_name = blob.file_name().to_string_lossy().to_string();
                if referenced.contains(&(app_id.clone(), file_name)) {
                    continue;
                }
                fs::remove_file(blob.path()).with_context(|| {
                    format!("failed removing artifact {}", blob.path().display())
                })?;
                removed += 1;
            }
            if fs::read_dir(app_dir.path())?.next().is_none() {
                let _ = fs::remove_dir(app_dir.path());
            }
        }

        if removed > 0 {
            debug!(removed, "removed unreferenced artifacts");
        }
        Ok(removed)
    }
}
