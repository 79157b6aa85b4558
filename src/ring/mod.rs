//! Consistent-Hash Ring
//!
//! Maps arbitrary byte keys to cluster members with minimal remapping when
//! membership changes.
//!
//! ## Core Concepts
//! - **Virtual nodes**: each real node is inserted at several positions on the
//!   ring to smooth key distribution.
//! - **Placement**: a key is owned by the first ring entry at or after its
//!   hash, wrapping around; `get_n` walks forward to collect distinct real
//!   nodes in ring order (primary first, then backups).
//! - **Stability**: the default hash is zero-key SipHash-2-4, so placement
//!   survives process restarts; a custom hash can be injected.

pub mod hashring;

pub use hashring::{HashRing, RingHasher, sip64};

#[cfg(test)]
mod tests;
