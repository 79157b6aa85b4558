//! Membership Module Tests
//!
//! Validates node identity, the gossip wire format and the cluster view.
//!
//! ## Test Scopes
//! - **Identity**: Deterministic id derivation, HTTP port offsetting.
//! - **Wire format**: Gossip messages survive a bincode round trip.
//! - **View**: Placement lookups against a hand-built topology.
//!
//! *Note: Multi-node gossip convergence is exercised in integration tests.*

#[cfg(test)]
mod tests {
    use dashmap::DashMap;
    use std::net::SocketAddr;
    use std::sync::Arc;

    use crate::membership::service::{ClusterView, MembershipService};
    use crate::membership::types::{GossipMessage, HTTP_PORT_OFFSET, Node, NodeId, NodeState};
    use crate::ring::HashRing;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    fn build_view(names: &[&str]) -> ClusterView {
        let nodes: Vec<Node> = names
            .iter()
            .enumerate()
            .map(|(i, name)| Node::new(name, addr(6000 + i as u16)))
            .collect();
        let members = Arc::new(DashMap::new());
        for node in &nodes {
            members.insert(node.id.clone(), node.clone());
        }
        let ring = Arc::new(HashRing::new(20));
        ring.add_all(nodes.clone());
        ClusterView::new(nodes[0].clone(), members, ring)
    }

    // ============================================================
    // IDENTITY TESTS
    // ============================================================

    #[test]
    fn test_node_id_is_deterministic() {
        let a = NodeId::derive("alpha", addr(5000));
        let b = NodeId::derive("alpha", addr(5000));
        assert_eq!(a, b, "same name and address must derive the same id");
    }

    #[test]
    fn test_node_id_depends_on_name_and_addr() {
        let base = NodeId::derive("alpha", addr(5000));
        assert_ne!(base, NodeId::derive("beta", addr(5000)));
        assert_ne!(base, NodeId::derive("alpha", addr(5001)));
    }

    #[test]
    fn test_http_addr_is_offset_from_gossip() {
        let node = Node::new("alpha", addr(5000));
        assert_eq!(node.gossip_addr.port(), 5000);
        assert_eq!(node.http_addr.port(), 5000 + HTTP_PORT_OFFSET);
        assert_eq!(node.gossip_addr.ip(), node.http_addr.ip());

        // Gossip ports near the top of the range wrap instead of panicking.
        let high = Node::new("omega", addr(65000));
        assert_eq!(
            high.http_addr.port(),
            65000u16.wrapping_add(HTTP_PORT_OFFSET)
        );
    }

    // ============================================================
    // WIRE FORMAT TESTS
    // ============================================================

    #[test]
    fn test_gossip_messages_round_trip() {
        let node = Node::new("alpha", addr(5000));
        let messages = vec![
            GossipMessage::Ping {
                from: node.id.clone(),
                incarnation: 7,
            },
            GossipMessage::Ack {
                from: node.id.clone(),
                incarnation: 7,
                members: vec![node.clone()],
            },
            GossipMessage::Join { node: node.clone() },
            GossipMessage::Suspect {
                node_id: node.id.clone(),
                incarnation: 8,
            },
            GossipMessage::Alive {
                node_id: node.id.clone(),
                incarnation: 9,
            },
        ];

        for msg in messages {
            let encoded = bincode::serialize(&msg).expect("encode");
            let decoded: GossipMessage = bincode::deserialize(&encoded).expect("decode");
            match (&msg, &decoded) {
                (GossipMessage::Ping { from: a, .. }, GossipMessage::Ping { from: b, .. }) => {
                    assert_eq!(a, b)
                }
                (
                    GossipMessage::Ack { members: a, .. },
                    GossipMessage::Ack { members: b, .. },
                ) => {
                    assert_eq!(a.len(), b.len());
                    assert_eq!(a[0].id, b[0].id);
                    assert_eq!(a[0].state, b[0].state);
                }
                (GossipMessage::Join { node: a }, GossipMessage::Join { node: b }) => {
                    assert_eq!(a.id, b.id);
                    assert_eq!(a.http_addr, b.http_addr);
                }
                (
                    GossipMessage::Suspect { node_id: a, .. },
                    GossipMessage::Suspect { node_id: b, .. },
                ) => assert_eq!(a, b),
                (
                    GossipMessage::Alive { node_id: a, .. },
                    GossipMessage::Alive { node_id: b, .. },
                ) => assert_eq!(a, b),
                _ => panic!("variant changed across round trip"),
            }
        }
    }

    // ============================================================
    // SERVICE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_service_registers_itself() {
        let ring = Arc::new(HashRing::new(20));
        let service = MembershipService::new("solo", addr(0), vec![], ring.clone())
            .await
            .expect("bind");

        assert_eq!(service.members.len(), 1);
        assert_eq!(ring.len(), 1);
        assert_eq!(service.local_node.state, NodeState::Alive);
        // Bound to port 0: the identity must carry the resolved port.
        assert_ne!(service.local_node.gossip_addr.port(), 0);
    }

    #[tokio::test]
    async fn test_solo_view_picks_self() {
        let ring = Arc::new(HashRing::new(20));
        let service = MembershipService::new("solo", addr(0), vec![], ring)
            .await
            .expect("bind");
        let view = service.view();

        let owner = view.pick(b"any-key").expect("owner");
        assert!(view.is_self(&owner.id));
        assert!(view.pick_next(b"any-key").is_none(), "no second node exists");
    }

    // ============================================================
    // VIEW TESTS
    // ============================================================

    #[test]
    fn test_view_pick_n_distinct_in_ring_order() {
        let view = build_view(&["a", "b", "c", "d", "e"]);

        for i in 0..100u32 {
            let key = i.to_be_bytes();
            let picked = view.pick_n(&key, 3);
            assert_eq!(picked.len(), 3);
            assert_eq!(picked[0].id, view.pick(&key).expect("owner").id);

            let next = view.pick_next(&key).expect("successor");
            assert_eq!(next.id, picked[1].id);
            assert_ne!(picked[0].id, picked[1].id);
        }
    }

    #[test]
    fn test_view_resolves_members() {
        let view = build_view(&["a", "b", "c"]);
        let owner = view.pick(b"key").expect("owner");

        let resolved = view.get_member(&owner.id).expect("member");
        assert_eq!(resolved.id, owner.id);
        assert_eq!(view.alive_members().len(), 3);
        assert_eq!(view.ring_len(), 3);

        let stranger = NodeId::derive("stranger", addr(9999));
        assert!(view.get_member(&stranger).is_none());
    }
}
