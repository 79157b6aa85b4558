//! Replica Placement & Recovery Module
//!
//! Keeps `expected_count` copies of each object on the nodes the ring selects,
//! across membership changes, without a durable coordinator.
//!
//! ## Core Concepts
//! - **Ring-derived placement**: the owning node set for a key is always
//!   `pick_n(key, count)` at the time of the operation, never pinned. When
//!   membership changes the desired set silently shifts, and an asynchronous
//!   adjustment pass reconciles stored copies with it ("diff and converge").
//! - **Protocol-agnostic**: every per-node operation goes through an injected
//!   [`types::ReplicaClient`]; the service owns no storage and no transport.
//! - **Partial success is normal**: adjustment aggregates every per-node error
//!   and reports the surviving copy count independently, so callers inspect
//!   the count rather than short-circuiting on the first failure.

pub mod service;
pub mod types;

pub use service::ReplicaService;
pub use types::{ChunkSource, ErrorList, ReplicaClient, ReplicaError, ReplicaInfo};

#[cfg(test)]
mod tests;
