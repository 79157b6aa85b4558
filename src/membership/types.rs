use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Instant;

use crate::ring::sip64;

/// Gossip port + this offset = chunk transfer (HTTP) port.
pub const HTTP_PORT_OFFSET: u16 = 1000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub String);

impl NodeId {
    /// Derives the id deterministically from the node's name and gossip
    /// address, so a restarted node re-joins under the same identity.
    pub fn derive(name: &str, gossip_addr: SocketAddr) -> Self {
        let seed = format!("{}@{}", name, gossip_addr);
        Self(format!("{:016x}", sip64(seed.as_bytes())))
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum NodeState {
    Alive,
    Suspect,
    Dead,
}

/// Represents a single member in the cluster.
///
/// Contains identity, network addressing, and current lifecycle state.
/// The `incarnation` field is a logical clock used to order updates and resolve
/// conflicts (e.g., refuting a false "Suspect" claim). The id is immutable and
/// compared by value, never by pointer identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub gossip_addr: SocketAddr,
    pub http_addr: SocketAddr,
    pub state: NodeState,
    pub incarnation: u64,

    #[serde(skip)]
    pub last_seen: Option<Instant>,
}

impl Node {
    pub fn new(name: &str, gossip_addr: SocketAddr) -> Self {
        let http_addr = SocketAddr::new(
            gossip_addr.ip(),
            gossip_addr.port().wrapping_add(HTTP_PORT_OFFSET),
        );
        Self {
            id: NodeId::derive(name, gossip_addr),
            name: name.to_string(),
            gossip_addr,
            http_addr,
            state: NodeState::Alive,
            incarnation: 1,
            last_seen: Some(Instant::now()),
        }
    }
}

/// The wire protocol for inter-node gossip.
///
/// - `Ping/Ack`: Used for liveness checks and state synchronization.
/// - `Join`: Sent by new nodes to seed nodes to enter the cluster.
/// - `Suspect/Alive`: Disseminates changes in node health.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GossipMessage {
    Ping {
        from: NodeId,
        incarnation: u64,
    },

    Ack {
        from: NodeId,
        incarnation: u64,
        members: Vec<Node>,
    },

    Join {
        node: Node,
    },

    Suspect {
        node_id: NodeId,
        incarnation: u64,
    },

    Alive {
        node_id: NodeId,
        incarnation: u64,
    },
}
