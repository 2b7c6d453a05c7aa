use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::Context;

use crate::{DataLayout, StoreError};

/// Exclusive catalog writer marker. Held for the duration of an ingestion run
/// so two operators cannot commit batches into the same data directory.
#[derive(Debug)]
pub struct CatalogWriteLock {
    path: PathBuf,
}

impl CatalogWriteLock {
    pub fn acquire(layout: &DataLayout) -> Result<Self, StoreError> {
        let path = layout.catalog_lock_path();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let mut file = match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                let detail = fs::read_to_string(&path)
                    .ok()
                    .map(|owner| owner.trim().to_string())
                    .filter(|owner| !owner.is_empty())
                    .map(|owner| format!(" (pid={owner}); remove {} if stale", path.display()))
                    .unwrap_or_default();
                return Err(StoreError::Locked { detail });
            }
            Err(err) => {
                return Err(anyhow::Error::new(err)
                    .context(format!("failed to claim catalog lock: {}", path.display()))
                    .into());
            }
        };

        file.write_all(format!("{}\n", std::process::id()).as_bytes())
            .with_context(|| format!("failed to write catalog lock: {}", path.display()))?;
        Ok(Self { path })
    }
}

impl Drop for CatalogWriteLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
