use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, Context};
use chrono::DateTime;
use serde::Deserialize;

use crate::app_info::{validate_app_id, AppInfo};

/// Parsed `sources.lock`: the operator's list of apps to ingest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockManifest {
    pub entries: Vec<LockEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockEntry {
    pub key: String,
    pub app_id: String,
    pub tag_name: String,
    pub name: String,
    pub description: String,
    pub source_code_url: Option<String>,
    pub submitter_uri: Option<String>,
    pub date: Option<i64>,
    pub cache_relname: PathBuf,
}

#[derive(Debug, Deserialize)]
struct RawLockEntry {
    app_id: String,
    tag_name: String,
    name: String,
    description: String,
    source_code_url: Option<String>,
    submitter_uri: Option<String>,
    /// RFC 3339, e.g. `2024-03-01T12:00:00Z`.
    date: Option<String>,
    cache_relname: PathBuf,
}

impl LockManifest {
    pub const FILE_NAME: &'static str = "sources.lock";

    pub fn from_toml_str(input: &str) -> anyhow::Result<Self> {
        let raw: BTreeMap<String, RawLockEntry> =
            toml::from_str(input).context("failed to parse sources.lock")?;

        let mut seen_app_ids = HashSet::new();
        let mut entries = Vec::with_capacity(raw.len());
        for (key, entry) in raw {
            validate_app_id(&entry.app_id)
                .with_context(|| format!("invalid entry '{key}' in sources.lock"))?;
            if entry.tag_name.trim().is_empty() {
                return Err(anyhow!("entry '{key}' has an empty tag_name"));
            }
            if entry.name.trim().is_empty() {
                return Err(anyhow!("entry '{key}' has an empty name"));
            }
            let date = entry
                .date
                .as_deref()
                .map(|date| {
                    DateTime::parse_from_rfc3339(date.trim())
                        .map(|parsed| parsed.timestamp())
                        .with_context(|| format!("entry '{key}' has an invalid date '{date}'"))
                })
                .transpose()?;
            validate_relative_source(&entry.cache_relname)
                .with_context(|| format!("invalid cache_relname for entry '{key}'"))?;
            if !seen_app_ids.insert(entry.app_id.clone()) {
                return Err(anyhow!(
                    "duplicate app id '{}' in sources.lock (entry '{key}')",
                    entry.app_id
                ));
            }

            entries.push(LockEntry {
                key,
                app_id: entry.app_id,
                tag_name: entry.tag_name,
                name: entry.name,
                description: entry.description,
                source_code_url: entry.source_code_url,
                submitter_uri: entry.submitter_uri,
                date,
                cache_relname: entry.cache_relname,
            });
        }

        Ok(Self { entries })
    }

    pub fn app_ids(&self) -> HashSet<&str> {
        self.entries
            .iter()
            .map(|entry| entry.app_id.as_str())
            .collect()
    }
}

impl LockEntry {
    /// Catalog row for this entry once its bundle is `size` bytes long.
    pub fn app_info(&self, size: u64) -> AppInfo {
        AppInfo {
            app_id: self.app_id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            tag_name: self.tag_name.clone(),
            source_code_url: self.source_code_url.clone(),
            submitter_uri: self.submitter_uri.clone(),
            date: self.date,
            size: Some(size),
        }
    }

    pub fn source_path(&self, source_root: &Path) -> PathBuf {
        source_root.join(&self.cache_relname)
    }
}

fn validate_relative_source(path: &Path) -> anyhow::Result<()> {
    if path.as_os_str().is_empty() {
        return Err(anyhow!("source path must not be empty"));
    }
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(anyhow!(
                    "source path must stay inside the source directory: {}",
                    path.display()
                ))
            }
        }
    }
    Ok(())
}
