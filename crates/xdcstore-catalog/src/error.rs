#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("app '{app_id}' not found")]
    NotFound { app_id: String },
    #[error("artifact for '{app_id}' is corrupt: expected sha256 {expected}, found {actual}")]
    Corrupt {
        app_id: String,
        expected: String,
        actual: String,
    },
    #[error("catalog is locked by another writer{detail}")]
    Locked { detail: String },
    #[error("catalog changed since batch started (base serial {base}, current {current})")]
    Conflict { base: u64, current: u64 },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
