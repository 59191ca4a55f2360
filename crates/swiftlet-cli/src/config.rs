//! Optional TOML configuration.
//!
//! Everything here can also be given on the command line; flags win over
//! the file.

use std::net::SocketAddr;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

/// On-disk configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// UDP port to seed on
    pub port: Option<u16>,
    /// Chunk size in bytes
    pub chunk_size: Option<u32>,
    /// Per-peer inactivity timeout in seconds
    pub timeout_secs: Option<u64>,
    /// Alternative seeders, advertised (seeding) or tried on failover
    /// (leeching)
    #[serde(default)]
    pub alt_seeders: Vec<SocketAddr>,
}

impl Config {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Load the file when given, defaults otherwise.
    pub fn load_if_given(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }
}
