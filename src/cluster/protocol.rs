//! Chunk Transfer Network Protocol
//!
//! Defines the endpoints, header names and Data Transfer Objects used for
//! internode chunk and replica traffic.
//!
//! Chunk bytes travel as raw streamed HTTP bodies so a large chunk is never
//! held in memory whole; the describing metadata (`ChunkInfo`,
//! `ReplicaInfo`) rides in JSON-encoded headers. Write operations answer
//! with an explicit error-string reply (empty string = success) rather than
//! relying on transport status alone.

use serde::{Deserialize, Serialize};

// --- API Endpoints ---

/// Public chunk access (routed to the owning node).
pub const ENDPOINT_CHUNK: &str = "/chunk";
/// Owner-side chunk access (no further routing; misses trigger healing).
pub const ENDPOINT_CHUNK_INTERNAL: &str = "/internal/chunk";
/// Replica object transfer between nodes.
pub const ENDPOINT_REPLICA: &str = "/internal/replica";
/// Replica existence probe.
pub const ENDPOINT_REPLICA_CHECK: &str = "/internal/replica/check";
/// Replica placement-record update.
pub const ENDPOINT_REPLICA_INFO: &str = "/internal/replica/info";
/// Node and cluster status.
pub const ENDPOINT_STATUS: &str = "/status";

// --- Header names ---

/// JSON-encoded `ChunkInfo`, sent first on every chunk read.
pub const HEADER_CHUNK_INFO: &str = "x-chunk-info";
/// JSON-encoded `ReplicaInfo<ReplicaMeta>` on replica transfers.
pub const HEADER_REPLICA_INFO: &str = "x-replica-info";
/// Chunk name on uploads.
pub const HEADER_CHUNK_NAME: &str = "x-chunk-name";
/// Declared payload size on uploads; the receiver fails the call when the
/// streamed byte count differs.
pub const HEADER_CHUNK_SIZE: &str = "x-chunk-size";

// --- Data Transfer Objects ---

/// Standard acknowledgment for write operations: an explicit error frame,
/// empty string meaning success.
#[derive(Debug, Serialize, Deserialize)]
pub struct OpReply {
    pub error: String,
}

impl OpReply {
    pub fn ok() -> Self {
        Self {
            error: String::new(),
        }
    }

    pub fn err(error: impl std::fmt::Display) -> Self {
        Self {
            error: error.to_string(),
        }
    }
}

/// Reply to a replica existence probe.
#[derive(Debug, Serialize, Deserialize)]
pub struct CheckReply {
    pub exists: bool,
    pub error: String,
}

/// The caller-defined payload `chunkmesh` carries in its replica records:
/// enough to recreate the chunk record on a receiving node.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplicaMeta {
    pub name: String,
    pub size: u64,
}

/// Node status snapshot served by `/status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusReply {
    pub node_id: String,
    pub name: String,
    pub alive_members: usize,
    pub ring_members: usize,
    pub capacity: u64,
    pub occupied: u64,
}
