use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One chunk of a stored file: which content hash holds which byte range.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkRef {
    #[serde(with = "hex::serde")]
    pub hash: Vec<u8>,
    pub size: u64,
    pub offset: u64,
}

/// Per-file metadata record, persisted as a `.meta` JSON file inside the
/// space tree. The chunk list is what maps a file back to the chunk store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileMetadata {
    #[serde(with = "hex::serde")]
    pub file_hash: Vec<u8>,
    pub filename: String,
    pub size: u64,
    pub mod_time: u64,
    pub chunks: Vec<ChunkRef>,
}

/// A directory listing entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
}

/// Capacity accounting for one space, persisted as `"<capacity>,<occupied>"`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpaceStat {
    pub capacity: u64,
    pub occupied: u64,
}

impl SpaceStat {
    pub fn encode(&self) -> String {
        format!("{},{}", self.capacity, self.occupied)
    }

    pub fn decode(raw: &str) -> Result<Self, MetaError> {
        let mut parts = raw.trim().split(',');
        let capacity = parts
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| MetaError::CorruptStat(raw.to_string()))?;
        let occupied = parts
            .next()
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| MetaError::CorruptStat(raw.to_string()))?;
        if parts.next().is_some() {
            return Err(MetaError::CorruptStat(raw.to_string()));
        }
        Ok(Self { capacity, occupied })
    }
}

#[derive(Debug, Error)]
pub enum MetaError {
    #[error("space not found: {0}")]
    SpaceNotFound(String),

    #[error("space already exists: {0}")]
    SpaceExists(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Path components may not escape the space tree.
    #[error("invalid name: {0:?}")]
    InvalidName(String),

    #[error("space {space} full: occupied {occupied} + incoming {incoming} > capacity {capacity}")]
    Full {
        space: String,
        occupied: u64,
        incoming: u64,
        capacity: u64,
    },

    #[error("corrupt space stat file: {0:?}")]
    CorruptStat(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Encoding(#[from] serde_json::Error),
}

pub type MetaResult<T> = Result<T, MetaError>;
