use anyhow::Result;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use std::{net::SocketAddr, time::Duration};
use tokio::net::UdpSocket;
use tokio::sync::RwLock;
use tracing::info;

use super::types::{GossipMessage, Node, NodeId, NodeState};
use crate::ring::HashRing;

const GOSSIP_INTERVAL: Duration = Duration::from_millis(500);
const FAILURE_DETECTION_INTERVAL: Duration = Duration::from_secs(2);
const SUSPECT_TIMEOUT: Duration = Duration::from_secs(5);
const DEAD_TIMEOUT: Duration = Duration::from_secs(10);
const PRUNE_TIMEOUT: Duration = Duration::from_secs(30);

/// Cluster membership service: SWIM-like UDP gossip plus failure detection.
///
/// Every membership transition is mirrored into the consistent-hash ring:
/// join/alive inserts the node (idempotent), dead removes it. Downstream
/// components never touch the ring directly; they get a [`ClusterView`].
pub struct MembershipService {
    pub local_node: Node,
    pub members: Arc<DashMap<NodeId, Node>>,
    ring: Arc<HashRing>,
    socket: Arc<UdpSocket>,
    incarnation: Arc<RwLock<u64>>,
}

impl MembershipService {
    pub async fn new(
        name: &str,
        bind_addr: SocketAddr,
        seed_nodes: Vec<SocketAddr>,
        ring: Arc<HashRing>,
    ) -> Result<Arc<Self>> {
        let socket = UdpSocket::bind(bind_addr).await?;
        // Bind with port 0 picks a free port; the node identity must use the
        // resolved address so peers can reach us.
        let actual_addr = socket.local_addr()?;
        let incarnation_counter = Arc::new(RwLock::new(1));
        let local_node = Node::new(name, actual_addr);

        let members = Arc::new(DashMap::new());
        members.insert(local_node.id.clone(), local_node.clone());
        ring.add(local_node.clone());

        if !seed_nodes.is_empty() {
            info!("Joining cluster via {} seed node(s)", seed_nodes.len());

            for seed_node in seed_nodes.iter() {
                let msg = GossipMessage::Join {
                    node: local_node.clone(),
                };

                let encoded = bincode::serialize(&msg)?;
                socket.send_to(&encoded, seed_node).await?;
                info!("Sent join request to {}", seed_node);
            }
        }

        Ok(Arc::new(Self {
            local_node,
            members,
            ring,
            socket: Arc::new(socket),
            incarnation: incarnation_counter,
        }))
    }

    pub async fn start(self: Arc<Self>) {
        tracing::info!("Starting membership service...");

        let _gossip_handle = {
            let service = self.clone();
            tokio::spawn(async move {
                service.gossip_loop().await;
            })
        };

        let _receive_handle = {
            let service = self.clone();
            tokio::spawn(async move {
                service.receive_loop().await;
            })
        };

        let _failure_detection_handle = {
            let service = self.clone();
            tokio::spawn(async move {
                service.failure_detection_loop().await;
            })
        };

        tracing::info!("All background tasks started");
    }

    /// Read-only capability handed to placement and storage components.
    pub fn view(&self) -> ClusterView {
        ClusterView {
            local_node: self.local_node.clone(),
            members: self.members.clone(),
            ring: self.ring.clone(),
        }
    }

    pub fn get_member(&self, id: &NodeId) -> Option<Node> {
        self.members.get(id).map(|entry| entry.value().clone())
    }

    pub fn get_alive_members(&self) -> Vec<Node> {
        self.members
            .iter()
            .filter(|entry| entry.value().state == NodeState::Alive)
            .map(|entry| entry.value().clone())
            .collect()
    }

    async fn gossip_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(GOSSIP_INTERVAL);

        loop {
            interval.tick().await;

            let alive_members: Vec<Node> = self
                .members
                .iter()
                .filter(|entry| {
                    entry.value().id != self.local_node.id
                        && entry.value().state == NodeState::Alive
                })
                .map(|entry| entry.value().clone())
                .collect();

            if alive_members.is_empty() {
                continue;
            }

            use rand::Rng;
            let idx = rand::thread_rng().gen_range(0..alive_members.len());
            let target = &alive_members[idx];

            let incarnation = *self.incarnation.read().await;
            let msg = GossipMessage::Ping {
                from: self.local_node.id.clone(),
                incarnation,
            };

            if let Ok(encoded) = bincode::serialize(&msg) {
                if let Err(e) = self.socket.send_to(&encoded, target.gossip_addr).await {
                    tracing::warn!("Failed to send ping to {:?}: {}", target.id, e);
                } else {
                    tracing::debug!("Sent ping to {:?}", target.id);
                }
            } else {
                tracing::error!("Failed to serialize GossipMessage::Ping");
            }
        }
    }

    async fn receive_loop(self: Arc<Self>) {
        let mut buf = vec![0u8; 65536];

        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, src)) => match bincode::deserialize::<GossipMessage>(&buf[..len]) {
                    Ok(msg) => {
                        if let Err(e) = self.handle_message(msg, src).await {
                            tracing::error!("Error handling message from {}: {}", src, e);
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Failed to deserialize message from {}: {}", src, e);
                    }
                },
                Err(e) => {
                    tracing::error!("Failed to receive UDP packet: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn handle_message(&self, msg: GossipMessage, src: SocketAddr) -> Result<()> {
        match msg {
            GossipMessage::Ping { from, incarnation } => {
                self.handle_ping(from, incarnation, src).await?;
            }

            GossipMessage::Ack {
                from,
                incarnation,
                members,
            } => {
                self.handle_ack(from, incarnation, members).await?;
            }

            GossipMessage::Join { node } => {
                self.handle_join(node).await?;
            }

            GossipMessage::Suspect {
                node_id,
                incarnation,
            } => {
                self.handle_suspect(node_id, incarnation).await?;
            }

            GossipMessage::Alive {
                node_id,
                incarnation,
            } => {
                self.handle_alive(node_id, incarnation).await?;
            }
        }

        Ok(())
    }

    async fn handle_ping(
        &self,
        from: NodeId,
        from_incarnation: u64,
        src: SocketAddr,
    ) -> Result<()> {
        tracing::debug!("Received ping from {:?}", from);

        if let Some(mut member) = self.members.get_mut(&from) {
            member.last_seen = Some(Instant::now());

            if from_incarnation > member.incarnation {
                member.incarnation = from_incarnation;
            }
        } else {
            tracing::debug!("Ping from unknown node {:?} at {}, awaiting join", from, src);
        }

        let all_members: Vec<Node> = self
            .members
            .iter()
            .map(|entry| entry.value().clone())
            .collect();

        let my_incarnation = *self.incarnation.read().await;
        let reply = GossipMessage::Ack {
            from: self.local_node.id.clone(),
            incarnation: my_incarnation,
            members: all_members,
        };

        let encoded = bincode::serialize(&reply)?;
        self.socket.send_to(&encoded, src).await?;

        tracing::debug!("Sent ack to {:?} with {} members", from, self.members.len());

        Ok(())
    }

    async fn handle_ack(
        &self,
        from: NodeId,
        from_incarnation: u64,
        members: Vec<Node>,
    ) -> Result<()> {
        tracing::debug!(
            "Received ack from {:?} (inc={}) with {} members",
            from,
            from_incarnation,
            members.len()
        );

        if let Some(mut member) = self.members.get_mut(&from)
            && from_incarnation > member.incarnation
        {
            member.incarnation = from_incarnation;
            member.last_seen = Some(Instant::now());
        }

        for member in members {
            self.merge_member(member).await;
        }

        Ok(())
    }

    async fn merge_member(&self, new_member: Node) {
        if new_member.id == self.local_node.id {
            return;
        }
        match self.members.get_mut(&new_member.id) {
            Some(mut existing) => {
                if new_member.incarnation > existing.incarnation {
                    tracing::debug!(
                        "Updating {:?}: inc {} -> {}",
                        new_member.id,
                        existing.incarnation,
                        new_member.incarnation,
                    );

                    let was_dead = existing.state == NodeState::Dead;
                    existing.state = new_member.state.clone();
                    existing.incarnation = new_member.incarnation;
                    existing.last_seen = Some(Instant::now());
                    let id = existing.id.clone();
                    let node = existing.value().clone();
                    drop(existing);

                    match new_member.state {
                        NodeState::Dead => self.ring.remove(&id),
                        _ if was_dead => self.ring.add(node),
                        _ => {}
                    }
                } else if new_member.incarnation == existing.incarnation
                    && new_member.state == NodeState::Alive
                    && existing.state == NodeState::Suspect
                {
                    tracing::info!("{:?} refuted suspicion", new_member.id);
                    existing.state = NodeState::Alive;
                    existing.last_seen = Some(Instant::now());
                }
            }
            None => {
                tracing::info!(
                    "Discovered new member: {:?} at {}",
                    new_member.id,
                    new_member.gossip_addr
                );

                let mut member_with_timestamp = new_member;
                member_with_timestamp.last_seen = Some(Instant::now());

                if member_with_timestamp.state != NodeState::Dead {
                    // Ring insertion dedups by id, so a re-discovered node
                    // never duplicates virtual entries.
                    self.ring.add(member_with_timestamp.clone());
                }
                self.members
                    .insert(member_with_timestamp.id.clone(), member_with_timestamp);
            }
        }
    }

    async fn handle_suspect(&self, node_id: NodeId, incarnation: u64) -> Result<()> {
        match self.members.get_mut(&node_id) {
            Some(mut existing) => {
                if incarnation > existing.incarnation {
                    if node_id == self.local_node.id {
                        tracing::info!(
                            "Refuting suspicion of self ({:?} at {})",
                            existing.id,
                            existing.gossip_addr
                        );
                        let my_incarnation = {
                            let mut inc = self.incarnation.write().await;
                            *inc += 1;
                            *inc
                        };

                        let msg = GossipMessage::Alive {
                            node_id: node_id.clone(),
                            incarnation: my_incarnation,
                        };

                        self.broadcast_message(msg).await;

                        existing.incarnation = my_incarnation;
                        existing.state = NodeState::Alive;
                        existing.last_seen = Some(Instant::now());
                    } else {
                        tracing::info!(
                            "Node {:?} at {} suspected",
                            existing.id,
                            existing.gossip_addr
                        );
                        existing.state = NodeState::Suspect;
                        existing.incarnation = incarnation;
                        existing.last_seen = Some(Instant::now());
                    }
                }
            }
            None => {
                tracing::debug!("Suspected node {:?} doesn't exist", node_id);
            }
        }

        Ok(())
    }

    async fn handle_alive(&self, node_id: NodeId, incarnation: u64) -> Result<()> {
        match self.members.get_mut(&node_id) {
            Some(mut existing) => {
                if incarnation > existing.incarnation {
                    tracing::info!(
                        "Node {:?} at {} is now Alive (inc={})",
                        existing.id,
                        existing.gossip_addr,
                        incarnation
                    );
                    let was_dead = existing.state == NodeState::Dead;
                    existing.state = NodeState::Alive;
                    existing.incarnation = incarnation;
                    existing.last_seen = Some(Instant::now());
                    if was_dead {
                        let node = existing.value().clone();
                        drop(existing);
                        self.ring.add(node);
                    }
                } else if incarnation == existing.incarnation
                    && existing.state == NodeState::Suspect
                {
                    tracing::info!(
                        "Node {:?} at {} successfully refuted suspicion",
                        existing.id,
                        existing.gossip_addr,
                    );
                    existing.state = NodeState::Alive;
                    existing.incarnation = incarnation;
                    existing.last_seen = Some(Instant::now());
                }
            }
            None => {
                tracing::debug!("Alive message for unknown node {:?}", node_id);
            }
        }

        Ok(())
    }

    async fn handle_join(&self, mut node: Node) -> Result<()> {
        tracing::info!("Node {:?} joining cluster at {}", node.id, node.gossip_addr);

        node.last_seen = Some(Instant::now());
        node.state = NodeState::Alive;

        self.ring.add(node.clone());
        self.members.insert(node.id.clone(), node.clone());

        tracing::info!("Cluster size now: {}", self.members.len());

        // Answer with the full member list so the joiner learns the
        // topology without waiting for the next gossip round.
        let all_members: Vec<Node> = self
            .members
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        let my_incarnation = *self.incarnation.read().await;
        let reply = GossipMessage::Ack {
            from: self.local_node.id.clone(),
            incarnation: my_incarnation,
            members: all_members,
        };
        let encoded = bincode::serialize(&reply)?;
        self.socket.send_to(&encoded, node.gossip_addr).await?;

        Ok(())
    }

    async fn failure_detection_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(FAILURE_DETECTION_INTERVAL);

        loop {
            interval.tick().await;
            let now = Instant::now();

            let mut messages_to_broadcast = Vec::new();
            let mut newly_dead: Vec<NodeId> = Vec::new();
            let mut to_prune: Vec<NodeId> = Vec::new();

            for mut entry in self.members.iter_mut() {
                let member = entry.value_mut();

                if member.id == self.local_node.id {
                    continue;
                }

                if let Some(last_seen) = member.last_seen {
                    let elapsed = now.duration_since(last_seen);

                    match member.state {
                        NodeState::Alive => {
                            if elapsed > SUSPECT_TIMEOUT {
                                tracing::warn!(
                                    "Node {:?} suspected (no contact for {:?})",
                                    member.id,
                                    elapsed
                                );

                                member.state = NodeState::Suspect;

                                let msg = GossipMessage::Suspect {
                                    node_id: member.id.clone(),
                                    incarnation: member.incarnation,
                                };

                                messages_to_broadcast.push(msg);
                            }
                        }

                        NodeState::Suspect => {
                            if elapsed > DEAD_TIMEOUT {
                                tracing::warn!(
                                    "Node {:?} declared DEAD (no contact for {:?})",
                                    member.id,
                                    elapsed
                                );

                                member.state = NodeState::Dead;
                                newly_dead.push(member.id.clone());
                            }
                        }

                        NodeState::Dead => {
                            if elapsed > PRUNE_TIMEOUT {
                                to_prune.push(member.id.clone());
                            }
                        }
                    }
                } else {
                    member.last_seen = Some(now);
                }
            }

            for id in &newly_dead {
                self.ring.remove(id);
            }
            if !newly_dead.is_empty() {
                tracing::info!(
                    "Cluster size now: {} alive nodes",
                    self.get_alive_members().len()
                );
            }
            for id in to_prune {
                tracing::debug!("Pruning dead node {:?} from member table", id);
                self.members.remove(&id);
            }

            for msg in messages_to_broadcast {
                self.broadcast_message(msg).await;
            }
        }
    }

    async fn broadcast_message(&self, msg: GossipMessage) {
        if let Ok(encoded) = bincode::serialize(&msg) {
            for entry in self.members.iter() {
                let member = entry.value();

                if member.id == self.local_node.id {
                    continue;
                }

                if member.state == NodeState::Alive
                    && let Err(e) = self.socket.send_to(&encoded, member.gossip_addr).await
                {
                    tracing::warn!("Failed to broadcast to {:?}: {}", member.id, e);
                }
            }
        }
    }
}

/// Read-only view of the cluster: placement lookups and member resolution,
/// no ring mutation. Cheap to clone; all state is shared.
#[derive(Clone)]
pub struct ClusterView {
    local_node: Node,
    members: Arc<DashMap<NodeId, Node>>,
    ring: Arc<HashRing>,
}

impl ClusterView {
    /// Assembles a view directly from parts. Used by the membership service
    /// and by tests that build a topology without running gossip.
    pub fn new(local_node: Node, members: Arc<DashMap<NodeId, Node>>, ring: Arc<HashRing>) -> Self {
        Self {
            local_node,
            members,
            ring,
        }
    }

    pub fn self_node(&self) -> &Node {
        &self.local_node
    }

    pub fn is_self(&self, id: &NodeId) -> bool {
        self.local_node.id == *id
    }

    /// The node owning `key` per the ring, or `None` on an empty ring.
    pub fn pick(&self, key: &[u8]) -> Option<Node> {
        self.ring.get(key)
    }

    /// Up to `n` distinct owners in ring order, primary first.
    pub fn pick_n(&self, key: &[u8], n: usize) -> Vec<Node> {
        self.ring.get_n(key, n)
    }

    /// The first distinct node after the owner of `key`.
    pub fn pick_next(&self, key: &[u8]) -> Option<Node> {
        self.ring.get_n(key, 2).into_iter().nth(1)
    }

    pub fn get_member(&self, id: &NodeId) -> Option<Node> {
        self.members.get(id).map(|entry| entry.value().clone())
    }

    pub fn alive_members(&self) -> Vec<Node> {
        self.members
            .iter()
            .filter(|entry| entry.value().state == NodeState::Alive)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn ring_len(&self) -> usize {
        self.ring.len()
    }
}
