//! Distributed Chunk Front Module
//!
//! Glues the local store, the ring and the replica engine into one
//! cluster-wide chunk system served over HTTP.
//!
//! ## Core Concepts
//! - **Routing**: Every key has one owner on the ring; public calls are forwarded there.
//! - **Healing**: An owner-side miss pulls the chunk back from a surviving holder before answering.
//! - **Transport**: Metadata rides in JSON headers, chunk bytes stream as raw HTTP bodies.
//! - **Buffering**: Small transfers borrow pooled buffers, large ones spill to temp files.

pub mod buffer;
pub mod client;
pub mod handlers;
pub mod protocol;
pub mod system;

pub use buffer::BufferPool;
pub use client::{ChunkClient, TransportError};
pub use protocol::{OpReply, ReplicaMeta, StatusReply};
pub use system::{ClusterError, ClusterResult, DistributedChunkSystem};
