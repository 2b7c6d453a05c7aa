use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::{info, warn};
use xdcstore_catalog::{sha256_hex, write_atomic, DataLayout};
use xdcstore_core::FrontendManifest;

/// Installs the store frontend bundle. Running services keep serving the
/// bundle they loaded at start until restarted.
///
/// The bundle lands under its digest first; renaming `store.toml` into place
/// is the single step that switches a starting service to the new bundle.
pub fn install_frontend(
    layout: &DataLayout,
    bundle: &Path,
    tag_name: &str,
    name: Option<&str>,
) -> Result<FrontendManifest> {
    if tag_name.trim().is_empty() {
        anyhow::bail!("frontend tag name must not be empty");
    }
    let bytes = fs::read(bundle)
        .with_context(|| format!("failed reading frontend bundle {}", bundle.display()))?;
    if bytes.is_empty() {
        anyhow::bail!("frontend bundle {} is empty", bundle.display());
    }

    let manifest = FrontendManifest {
        name: name
            .map(str::to_string)
            .or_else(|| {
                bundle
                    .file_name()
                    .map(|file_name| file_name.to_string_lossy().to_string())
            })
            .unwrap_or_else(|| "store.xdc".to_string()),
        tag_name: tag_name.to_string(),
        sha256: sha256_hex(&bytes),
    };

    layout.ensure_base_dirs()?;
    let bundle_path = layout.frontend_bundle_path(&manifest.sha256);
    write_atomic(&bundle_path, &layout.tmp_dir(), &bytes)?;
    write_atomic(
        &layout.frontend_manifest_path(),
        &layout.tmp_dir(),
        manifest.to_toml_string()?.as_bytes(),
    )?;
    if let Err(err) = remove_stale_bundles(layout, &bundle_path) {
        warn!("failed removing previous frontend bundles: {err:#}");
    }
    info!(tag_name, size = bytes.len(), "installed frontend bundle");
    Ok(manifest)
}

fn remove_stale_bundles(layout: &DataLayout, current: &Path) -> Result<()> {
    let dir = layout.frontend_dir();
    for entry in fs::read_dir(&dir)
        .with_context(|| format!("failed reading frontend dir {}", dir.display()))?
    {
        let path = entry?.path();
        let is_bundle = path.extension().is_some_and(|ext| ext == "xdc");
        if is_bundle && path != current {
            fs::remove_file(&path)
                .with_context(|| format!("failed removing {}", path.display()))?;
        }
    }
    Ok(())
}
