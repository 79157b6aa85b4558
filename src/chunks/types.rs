use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

pub fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Per-hash metadata record, one per distinct content hash on a node.
///
/// `ref_count` is the number of logical stores pointing at the single
/// physical copy; a record with `ref_count == 0` never exists (it is deleted
/// synchronously when the count reaches zero).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkInfo {
    #[serde(with = "hex::serde")]
    pub hash: Vec<u8>,
    pub name: String,
    /// Storage sub-path relative to the store root.
    pub path: String,
    pub size: u64,
    pub ref_count: i64,
    pub mod_time: u64,
    pub create_time: u64,
}

impl ChunkInfo {
    pub fn hex_hash(&self) -> String {
        hex::encode(&self.hash)
    }
}

#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("chunk {0} not found")]
    NotFound(String),

    #[error("store is full: occupied {occupied} + incoming {incoming} exceeds capacity {capacity}")]
    Full {
        occupied: u64,
        incoming: u64,
        capacity: u64,
    },

    #[error("size mismatch: declared {declared} bytes, received {received}")]
    SizeMismatch { declared: u64, received: u64 },

    /// Invariant violation inside the engine. Reported, never a panic, so
    /// the node keeps serving other keys.
    #[error("internal chunk store error: {0}")]
    Internal(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("metadata db error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("metadata encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

pub type ChunkResult<T> = Result<T, ChunkError>;
