//! Node configuration: JSON file plus command-line overrides.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

fn default_name() -> String {
    "node".to_string()
}

fn default_bind() -> SocketAddr {
    "127.0.0.1:5000".parse().expect("static addr")
}

fn default_replica_factor() -> usize {
    3
}

fn default_chunk_buffer_size() -> usize {
    4 * 1024 * 1024
}

fn default_capacity() -> u64 {
    10 * 1024 * 1024 * 1024
}

fn default_root() -> String {
    "./data".to_string()
}

fn default_meta_root() -> String {
    "./meta".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_name")]
    pub name: String,
    /// UDP gossip bind address; the HTTP port is this port plus the fixed
    /// offset.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    #[serde(default)]
    pub seeds: Vec<SocketAddr>,
    #[serde(default = "default_replica_factor")]
    pub replica_factor: usize,
    /// Pooled-buffer size; transfers above it spill to temp files.
    #[serde(default = "default_chunk_buffer_size")]
    pub chunk_buffer_size: usize,
    #[serde(default = "default_capacity")]
    pub capacity: u64,
    #[serde(default = "default_root")]
    pub root: String,
    #[serde(default = "default_meta_root")]
    pub meta_root: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: default_name(),
            bind: default_bind(),
            seeds: Vec::new(),
            replica_factor: default_replica_factor(),
            chunk_buffer_size: default_chunk_buffer_size(),
            capacity: default_capacity(),
            root: default_root(),
            meta_root: default_meta_root(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}
