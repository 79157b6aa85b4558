use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempPath;
use thiserror::Error;
use tokio::io::AsyncReadExt;

use crate::membership::types::{Node, NodeId};

/// Placement record for one replicated object.
///
/// `all_node_ids[0]` is by convention the master/primary holder. Only the
/// adjustment algorithm mutates this; every holder persists a copy beside
/// the chunk it describes. `custom` is a caller-defined payload carried
/// opaquely through the wire and the metadata log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplicaInfo<T> {
    #[serde(with = "hex::serde")]
    pub key: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub checksum: Vec<u8>,
    pub expected_count: usize,
    pub all_node_ids: Vec<NodeId>,
    pub custom: T,
}

impl<T> ReplicaInfo<T> {
    pub fn primary(&self) -> Option<&NodeId> {
        self.all_node_ids.first()
    }

    pub fn hex_key(&self) -> String {
        hex::encode(&self.key)
    }
}

#[derive(Debug, Error)]
pub enum ReplicaError {
    #[error("no available replica for key {0}")]
    NoAvailableReplica(String),

    #[error("insufficient cluster size: need {need} nodes, have {have}")]
    InsufficientNodes { need: usize, have: usize },

    /// The addressed node does not hold the object. Tolerated by the
    /// adjustment delete phase, fatal elsewhere.
    #[error("no such replica on node")]
    NotFound,

    #[error("node {0} is not a known member")]
    UnknownNode(NodeId),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("size mismatch: sent {sent} bytes, declared {declared}")]
    SizeMismatch { sent: u64, declared: u64 },

    #[error("remote error: {0}")]
    Remote(String),
}

/// Aggregate of per-node failures from an adjustment pass. Preserves every
/// underlying error; presence of errors does not mean total failure.
#[derive(Debug, Default)]
pub struct ErrorList(pub Vec<ReplicaError>);

impl ErrorList {
    pub fn push(&mut self, err: ReplicaError) {
        self.0.push(err);
    }

    pub fn merge(&mut self, other: ErrorList) {
        self.0.extend(other.0);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_result(self) -> Result<(), ErrorList> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl std::fmt::Display for ErrorList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} replica error(s): ", self.0.len())?;
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorList {}

/// Rewindable transfer source for chunk bytes.
///
/// "Re-seek before each push" is expressed as cheap re-materialization: a
/// memory source clones its bytes, a file source is reopened from the start
/// for every send. A spilled download keeps its temp file alive through the
/// shared `TempPath`, which deletes the file when the last clone drops.
#[derive(Clone)]
pub enum ChunkSource {
    Memory(Bytes),
    File {
        path: PathBuf,
        size: u64,
        temp: Option<Arc<TempPath>>,
    },
}

impl ChunkSource {
    pub fn from_file(path: PathBuf, size: u64) -> Self {
        Self::File {
            path,
            size,
            temp: None,
        }
    }

    pub fn size(&self) -> u64 {
        match self {
            Self::Memory(bytes) => bytes.len() as u64,
            Self::File { size, .. } => *size,
        }
    }

    /// Reads the whole source into memory. Used by local stores and tests;
    /// the wire path streams instead.
    pub async fn read_all(&self) -> std::io::Result<Bytes> {
        match self {
            Self::Memory(bytes) => Ok(bytes.clone()),
            Self::File { path, .. } => {
                let mut file = tokio::fs::File::open(path).await?;
                let mut buf = Vec::new();
                file.read_to_end(&mut buf).await?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

impl std::fmt::Debug for ChunkSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory(bytes) => write!(f, "ChunkSource::Memory({} bytes)", bytes.len()),
            Self::File { path, size, .. } => {
                write!(f, "ChunkSource::File({:?}, {} bytes)", path, size)
            }
        }
    }
}

/// The injected per-node operations the replica service drives. Implemented
/// over HTTP by the cluster transport and by in-memory fakes in tests.
#[async_trait]
pub trait ReplicaClient<T: Send + Sync + 'static>: Send + Sync {
    /// Pushes object bytes plus the placement record to one node.
    async fn put(
        &self,
        node: &Node,
        info: &ReplicaInfo<T>,
        source: &ChunkSource,
    ) -> Result<(), ReplicaError>;

    /// Fetches object bytes from one node.
    async fn fetch(&self, node: &Node, key: &[u8]) -> Result<ChunkSource, ReplicaError>;

    /// Removes the object from one node. `ReplicaError::NotFound` means the
    /// node no longer holds it.
    async fn delete(&self, node: &Node, info: &ReplicaInfo<T>) -> Result<(), ReplicaError>;

    /// Whether one node holds the object.
    async fn check(&self, node: &Node, key: &[u8]) -> Result<bool, ReplicaError>;

    /// Pushes an updated placement record without bytes.
    async fn update_info(&self, node: &Node, info: &ReplicaInfo<T>) -> Result<(), ReplicaError>;
}
