use anyhow::{anyhow, Context};
use serde::{Deserialize, Serialize};

/// Sidecar metadata for the store frontend bundle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FrontendManifest {
    #[serde(default = "default_frontend_name")]
    pub name: String,
    pub tag_name: String,
    /// Digest of the bundle; names the bundle file under `frontend/`.
    pub sha256: String,
}

impl FrontendManifest {
    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        let manifest: Self =
            toml::from_str(input).context("failed to parse frontend manifest")?;
        if manifest.tag_name.trim().is_empty() {
            return Err(anyhow!("frontend manifest has an empty tag_name"));
        }
        let digest = &manifest.sha256;
        if digest.len() != 64 || !digest.chars().all(|ch| ch.is_ascii_hexdigit()) {
            return Err(anyhow!(
                "frontend manifest has an invalid sha256 '{}'",
                manifest.sha256
            ));
        }
        Ok(manifest)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        toml::to_string(self).context("failed to serialize frontend manifest")
    }
}

fn default_frontend_name() -> String {
    "store.xdc".to_string()
}
