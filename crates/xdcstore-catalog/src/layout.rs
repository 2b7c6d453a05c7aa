use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Paths inside the service-owned data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.root.join("catalog.json")
    }

    pub fn catalog_lock_path(&self) -> PathBuf {
        self.root.join("catalog.lock")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.root.join("artifacts")
    }

    pub fn app_artifacts_dir(&self, app_id: &str) -> PathBuf {
        self.artifacts_dir().join(app_id)
    }

    pub fn artifact_path(&self, app_id: &str, sha256: &str) -> PathBuf {
        self.app_artifacts_dir(app_id).join(format!("{sha256}.xdc"))
    }

    pub fn frontend_dir(&self) -> PathBuf {
        self.root.join("frontend")
    }

    pub fn frontend_bundle_path(&self, sha256: &str) -> PathBuf {
        self.frontend_dir().join(format!("{sha256}.xdc"))
    }

    pub fn frontend_manifest_path(&self) -> PathBuf {
        self.frontend_dir().join("store.toml")
    }

    pub fn sessions_path(&self) -> PathBuf {
        self.root.join("sessions.json")
    }

    pub fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp")
    }

    pub fn ensure_base_dirs(&self) -> Result<()> {
        for dir in [
            self.root.clone(),
            self.artifacts_dir(),
            self.frontend_dir(),
            self.tmp_dir(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
        }
        Ok(())
    }
}

pub fn default_data_dir() -> PathBuf {
    PathBuf::from("bot-data")
}
