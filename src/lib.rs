//! Distributed Chunk Storage Library
//!
//! This library crate defines the core modules that make up the chunkmesh
//! node. It serves as the foundation for the binary executable (`main.rs`).
//!
//! ## Architecture Modules
//! The system is composed of six loosely coupled subsystems:
//!
//! - **`ring`**: The consistent-hash ring. Maps arbitrary byte keys to cluster
//!   members through virtual-node hashing; knows nothing about networking or storage.
//! - **`membership`**: The cluster coordination layer. Uses a UDP-based Gossip protocol
//!   (SWIM-like) to manage node discovery, failure detection, and cluster topology,
//!   mirroring every transition into the ring.
//! - **`chunks`**: The single-node engine. An on-disk, content-addressed blob store
//!   with reference counting and capacity accounting.
//! - **`replica`**: The generic replica placement and recovery algorithm. Keeps N
//!   copies of an object on the ring-selected nodes as membership changes.
//! - **`cluster`**: The distributed front and its HTTP transport. Routes requests to
//!   the owning node, heals local misses, and streams chunk bytes between nodes.
//! - **`meta`**: The space-scoped metadata tree that maps files to chunk hashes.

pub mod chunks;
pub mod cluster;
pub mod config;
pub mod membership;
pub mod meta;
pub mod replica;
pub mod ring;
