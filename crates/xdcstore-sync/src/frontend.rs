use std::fs;

use anyhow::{Context, Result};
use xdcstore_catalog::{verify_sha256, DataLayout};
use xdcstore_core::FrontendManifest;

/// The store frontend bundle, read once when the service starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontendPackage {
    pub name: String,
    pub tag_name: String,
    pub bytes: Vec<u8>,
}

impl FrontendPackage {
    pub fn load(layout: &DataLayout) -> Result<Self> {
        let manifest_path = layout.frontend_manifest_path();
        let content = fs::read_to_string(&manifest_path).with_context(|| {
            format!(
                "failed reading frontend manifest {}; install one with `xdcstore frontend`",
                manifest_path.display()
            )
        })?;
        let manifest = FrontendManifest::from_toml_str(&content)
            .with_context(|| format!("invalid frontend manifest {}", manifest_path.display()))?;

        let bundle_path = layout.frontend_bundle_path(&manifest.sha256);
        let bytes = fs::read(&bundle_path).with_context(|| {
            format!("failed reading frontend bundle {}", bundle_path.display())
        })?;
        if bytes.is_empty() {
            anyhow::bail!("frontend bundle {} is empty", bundle_path.display());
        }
        if !verify_sha256(&bytes, &manifest.sha256) {
            anyhow::bail!(
                "frontend bundle {} does not match its manifest digest",
                bundle_path.display()
            );
        }

        Ok(Self {
            name: manifest.name,
            tag_name: manifest.tag_name,
            bytes,
        })
    }
}
