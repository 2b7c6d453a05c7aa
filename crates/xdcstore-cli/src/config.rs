use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use xdcstore_catalog::{default_data_dir, DataLayout};

pub const DEFAULT_LISTEN: &str = "127.0.0.1:7380";

pub fn version_string() -> String {
    format!("xdcstore {}", env!("CARGO_PKG_VERSION"))
}

pub fn resolve_layout(data_dir: Option<PathBuf>) -> DataLayout {
    DataLayout::new(data_dir.unwrap_or_else(default_data_dir))
}

pub fn parse_listen_addr(value: &str) -> Result<SocketAddr> {
    value
        .trim()
        .parse()
        .with_context(|| format!("invalid listen address '{value}' (expected HOST:PORT)"))
}
