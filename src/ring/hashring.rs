use siphasher::sip::SipHasher24;
use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::RwLock;

use crate::membership::types::{Node, NodeId};

/// Injectable ring hash. Must be stable across process restarts so that
/// every node computes the same placement for the same key.
pub type RingHasher = fn(&[u8]) -> u64;

/// Zero-key SipHash-2-4 of a byte slice, as a 64-bit ring token.
pub fn sip64(data: &[u8]) -> u64 {
    let mut hasher = SipHasher24::new();
    hasher.write(data);
    hasher.finish()
}

/// One position on the ring. Virtual slots carry the id of the real node
/// they stand in for; resolution goes through the flat node list, never
/// through back-references.
#[derive(Debug, Clone)]
struct RingSlot {
    node_id: NodeId,
    is_virtual: bool,
}

#[derive(Default)]
struct RingState {
    /// Ring positions, always sorted. Lookups binary-search this.
    hashes: Vec<u64>,
    /// Position -> slot (real or virtual).
    slots: HashMap<u64, RingSlot>,
    /// Flat list of real nodes, for enumeration and id resolution.
    nodes: Vec<Node>,
}

/// Consistent-hash ring with virtual nodes.
///
/// Mutation (`add`/`remove`) takes the write lock; lookups take the read
/// lock and never observe a partially sorted ring.
pub struct HashRing {
    replicas: usize,
    hasher: RingHasher,
    state: RwLock<RingState>,
}

impl HashRing {
    pub fn new(replicas: usize) -> Self {
        Self::with_hasher(replicas, sip64)
    }

    pub fn with_hasher(replicas: usize, hasher: RingHasher) -> Self {
        Self {
            replicas,
            hasher,
            state: RwLock::new(RingState::default()),
        }
    }

    /// Ring positions for one node: one hash for the real entry plus
    /// `replicas` virtual entries keyed by `hash(i ‖ node_id)`.
    fn positions_for(&self, node_id: &NodeId) -> Vec<(u64, bool)> {
        let mut positions = Vec::with_capacity(self.replicas + 1);
        positions.push(((self.hasher)(node_id.0.as_bytes()), false));
        for i in 0..self.replicas {
            let tagged = format!("{}{}", i, node_id.0);
            positions.push(((self.hasher)(tagged.as_bytes()), true));
        }
        positions
    }

    /// Inserts a node. Idempotent: re-adding a node that is already on the
    /// ring is a no-op, so membership callbacks can fire repeatedly.
    pub fn add(&self, node: Node) {
        self.add_all(vec![node]);
    }

    /// Inserts a batch of nodes with a single sort-and-commit.
    ///
    /// Per-node position hashing runs on scoped threads before the write
    /// lock is taken; the ring is re-sorted exactly once.
    pub fn add_all(&self, nodes: Vec<Node>) {
        let mut fresh: Vec<Node> = Vec::with_capacity(nodes.len());
        {
            let state = self.state.read().expect("ring lock poisoned");
            for node in nodes {
                let known = state.nodes.iter().any(|n| n.id == node.id)
                    || fresh.iter().any(|n| n.id == node.id);
                if !known {
                    fresh.push(node);
                }
            }
        }
        if fresh.is_empty() {
            return;
        }

        let mut hashed: Vec<(Node, Vec<(u64, bool)>)> = Vec::with_capacity(fresh.len());
        std::thread::scope(|scope| {
            let handles: Vec<_> = fresh
                .into_iter()
                .map(|node| {
                    scope.spawn(move || {
                        let positions = self.positions_for(&node.id);
                        (node, positions)
                    })
                })
                .collect();
            for handle in handles {
                hashed.push(handle.join().expect("ring hashing thread panicked"));
            }
        });

        let mut state = self.state.write().expect("ring lock poisoned");
        for (node, positions) in hashed {
            // A second idempotency check under the write lock, in case two
            // callers raced the same node past the read-lock check above.
            if state.nodes.iter().any(|n| n.id == node.id) {
                continue;
            }
            for (hash, is_virtual) in positions {
                if state.slots.contains_key(&hash) {
                    tracing::warn!(
                        "Ring hash collision at {} for node {:?}, slot skipped",
                        hash,
                        node.id
                    );
                    continue;
                }
                state.slots.insert(
                    hash,
                    RingSlot {
                        node_id: node.id.clone(),
                        is_virtual,
                    },
                );
                state.hashes.push(hash);
            }
            state.nodes.push(node);
        }
        state.hashes.sort_unstable();
    }

    /// Removes a node's real and virtual entries. The flat list entry is
    /// removed by id equality.
    pub fn remove(&self, node_id: &NodeId) {
        let mut state = self.state.write().expect("ring lock poisoned");
        if !state.nodes.iter().any(|n| &n.id == node_id) {
            return;
        }
        let RingState {
            hashes,
            slots,
            nodes,
        } = &mut *state;
        hashes.retain(|hash| {
            slots
                .get(hash)
                .map(|slot| &slot.node_id != node_id)
                .unwrap_or(true)
        });
        slots.retain(|_, slot| &slot.node_id != node_id);
        nodes.retain(|n| &n.id != node_id);
    }

    /// Index of the first ring position >= `hash`, wrapping to 0.
    fn search(hashes: &[u64], hash: u64) -> usize {
        match hashes.binary_search(&hash) {
            Ok(idx) => idx,
            Err(idx) => {
                if idx == hashes.len() {
                    0
                } else {
                    idx
                }
            }
        }
    }

    /// Resolves a key to its owning node. Returns `None` on an empty ring.
    pub fn get(&self, key: &[u8]) -> Option<Node> {
        let state = self.state.read().expect("ring lock poisoned");
        if state.hashes.is_empty() {
            return None;
        }
        let idx = Self::search(&state.hashes, (self.hasher)(key));
        let slot = &state.slots[&state.hashes[idx]];
        state.nodes.iter().find(|n| n.id == slot.node_id).cloned()
    }

    /// Walks the ring forward from the key's position collecting up to `n`
    /// distinct real nodes in ring order. The first entry is the primary.
    /// Returns fewer than `n` when the cluster is smaller than `n`.
    pub fn get_n(&self, key: &[u8], n: usize) -> Vec<Node> {
        let state = self.state.read().expect("ring lock poisoned");
        if state.hashes.is_empty() || n == 0 {
            return Vec::new();
        }
        let start = Self::search(&state.hashes, (self.hasher)(key));
        let mut picked: Vec<Node> = Vec::with_capacity(n.min(state.nodes.len()));
        for offset in 0..state.hashes.len() {
            let hash = state.hashes[(start + offset) % state.hashes.len()];
            let slot = &state.slots[&hash];
            if picked.iter().any(|node| node.id == slot.node_id) {
                continue;
            }
            if let Some(node) = state.nodes.iter().find(|node| node.id == slot.node_id) {
                picked.push(node.clone());
            }
            if picked.len() == n {
                break;
            }
        }
        picked
    }

    /// All real nodes currently on the ring.
    pub fn nodes(&self) -> Vec<Node> {
        self.state.read().expect("ring lock poisoned").nodes.clone()
    }

    pub fn len(&self) -> usize {
        self.state.read().expect("ring lock poisoned").nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
