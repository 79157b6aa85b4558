//! Local Hash Chunk System
//!
//! Content-addressed, deduplicated, capacity-bounded blob store: the unit of
//! storage within a single node.
//!
//! ## Core Concepts
//! - **Dedup by refcount**: one physical copy per content hash; repeated stores
//!   increment a reference count, deletes only free bytes at refcount zero.
//! - **Layout**: chunk files live under a dated, hash-prefixed directory tree
//!   (`year/month/day/hash[0..3]/hash[3..6]`), injectable per deployment.
//! - **Accounting**: capacity and occupied bytes are atomic counters persisted
//!   in the metadata db, so a restart recovers accounting.
//! - **Metadata log**: `ChunkInfo` records (and per-object replica metadata)
//!   are kept in an embedded sqlite db keyed by content hash.

pub mod db;
pub mod local;
pub mod types;

pub use local::{ChunkWriter, HashChunkSystem};
pub use types::{ChunkError, ChunkInfo, ChunkResult};
