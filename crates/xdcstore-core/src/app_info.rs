use anyhow::anyhow;
use serde::{Deserialize, Serialize};

/// Metadata row for one published app as clients see it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppInfo {
    pub app_id: String,
    pub name: String,
    pub description: String,
    pub tag_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_code_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submitter_uri: Option<String>,
    /// Release date as a unix timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<i64>,
    /// Byte length of the bundle.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

pub fn validate_app_id(app_id: &str) -> anyhow::Result<()> {
    if app_id.is_empty() || app_id.len() > 128 {
        return Err(anyhow!("invalid app id: must be 1-128 characters"));
    }

    let mut chars = app_id.chars();
    let Some(first) = chars.next() else {
        return Err(anyhow!("invalid app id: '{app_id}'"));
    };
    if !first.is_ascii_alphanumeric() {
        return Err(anyhow!(
            "invalid app id: '{app_id}' must start with an ASCII letter or digit"
        ));
    }
    if chars.any(|ch| !(ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.')) {
        return Err(anyhow!(
            "invalid app id: '{app_id}' contains invalid character(s)"
        ));
    }

    Ok(())
}
