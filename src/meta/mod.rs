//! Metadata Tree Module
//!
//! Space-scoped directory trees and per-file metadata records: the surface
//! the upload/download flow uses to find which chunk hashes make up a file.
//!
//! ## Core Concepts
//! - **Space**: a named, capacity-bounded namespace; its accounting lives in a stat file.
//! - **Records**: per-file `.meta` JSON documents listing the file's chunk hashes.
//! - **Opaque collaborator**: the chunk engine only sees the [`MetaStore`] trait.

pub mod handlers;
pub mod protocol;
pub mod service;
pub mod types;

pub use service::{FsMetaStore, MetaStore};
pub use types::{ChunkRef, DirEntry, FileMetadata, MetaError, MetaResult, SpaceStat};

#[cfg(test)]
mod tests;
