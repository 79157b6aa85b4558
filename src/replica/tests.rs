//! Replica Module Tests
//!
//! Validates placement, fallback reads and the diff-and-converge adjustment
//! against an in-memory fake transport.
//!
//! ## Test Scopes
//! - **Placement**: Objects land on the ring-selected node set, primary first.
//! - **Fallback**: Reads survive unreachable holders.
//! - **Convergence**: Adjustment restores the replica count after membership changes.

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use bytes::Bytes;
    use dashmap::DashMap;
    use std::collections::HashSet;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::sync::Mutex;

    use crate::membership::service::ClusterView;
    use crate::membership::types::{Node, NodeId};
    use crate::replica::service::ReplicaService;
    use crate::replica::types::{ChunkSource, ReplicaClient, ReplicaError, ReplicaInfo};
    use crate::ring::HashRing;

    /// In-memory stand-in for the HTTP transport: per-node object and
    /// record tables, plus a set of nodes forced to fail.
    #[derive(Default)]
    struct FakeTransport {
        objects: DashMap<(NodeId, Vec<u8>), Bytes>,
        records: DashMap<(NodeId, Vec<u8>), ReplicaInfo<String>>,
        down: Mutex<HashSet<NodeId>>,
    }

    impl FakeTransport {
        fn take_down(&self, id: &NodeId) {
            self.down.lock().unwrap().insert(id.clone());
        }

        fn is_down(&self, id: &NodeId) -> bool {
            self.down.lock().unwrap().contains(id)
        }

        fn holders(&self, key: &[u8]) -> Vec<NodeId> {
            let mut ids: Vec<NodeId> = self
                .objects
                .iter()
                .filter(|entry| entry.key().1 == key)
                .map(|entry| entry.key().0.clone())
                .collect();
            ids.sort();
            ids
        }

        fn seed(&self, id: &NodeId, key: &[u8], bytes: &[u8]) {
            self.objects
                .insert((id.clone(), key.to_vec()), Bytes::copy_from_slice(bytes));
        }
    }

    #[async_trait]
    impl ReplicaClient<String> for FakeTransport {
        async fn put(
            &self,
            node: &Node,
            info: &ReplicaInfo<String>,
            source: &ChunkSource,
        ) -> Result<(), ReplicaError> {
            if self.is_down(&node.id) {
                return Err(ReplicaError::Transport("node down".into()));
            }
            let bytes = source
                .read_all()
                .await
                .map_err(|e| ReplicaError::Transport(e.to_string()))?;
            self.objects
                .insert((node.id.clone(), info.key.clone()), bytes);
            self.records
                .insert((node.id.clone(), info.key.clone()), info.clone());
            Ok(())
        }

        async fn fetch(&self, node: &Node, key: &[u8]) -> Result<ChunkSource, ReplicaError> {
            if self.is_down(&node.id) {
                return Err(ReplicaError::Transport("node down".into()));
            }
            self.objects
                .get(&(node.id.clone(), key.to_vec()))
                .map(|entry| ChunkSource::Memory(entry.value().clone()))
                .ok_or(ReplicaError::NotFound)
        }

        async fn delete(
            &self,
            node: &Node,
            info: &ReplicaInfo<String>,
        ) -> Result<(), ReplicaError> {
            if self.is_down(&node.id) {
                return Err(ReplicaError::Transport("node down".into()));
            }
            self.records.remove(&(node.id.clone(), info.key.clone()));
            self.objects
                .remove(&(node.id.clone(), info.key.clone()))
                .map(|_| ())
                .ok_or(ReplicaError::NotFound)
        }

        async fn check(&self, node: &Node, key: &[u8]) -> Result<bool, ReplicaError> {
            if self.is_down(&node.id) {
                return Err(ReplicaError::Transport("node down".into()));
            }
            Ok(self.objects.contains_key(&(node.id.clone(), key.to_vec())))
        }

        async fn update_info(
            &self,
            node: &Node,
            info: &ReplicaInfo<String>,
        ) -> Result<(), ReplicaError> {
            if self.is_down(&node.id) {
                return Err(ReplicaError::Transport("node down".into()));
            }
            self.records
                .insert((node.id.clone(), info.key.clone()), info.clone());
            Ok(())
        }
    }

    struct Cluster {
        view: ClusterView,
        ring: Arc<HashRing>,
        members: Arc<DashMap<NodeId, Node>>,
    }

    fn build_cluster(n: u16) -> Cluster {
        let nodes: Vec<Node> = (0..n)
            .map(|i| {
                Node::new(
                    &format!("node-{}", i),
                    format!("127.0.0.1:{}", 7000 + i).parse::<SocketAddr>().unwrap(),
                )
            })
            .collect();
        let members = Arc::new(DashMap::new());
        for node in &nodes {
            members.insert(node.id.clone(), node.clone());
        }
        let ring = Arc::new(HashRing::new(20));
        ring.add_all(nodes.clone());
        let view = ClusterView::new(nodes[0].clone(), members.clone(), ring.clone());
        Cluster {
            view,
            ring,
            members,
        }
    }

    fn service(
        cluster: &Cluster,
        count: usize,
        transport: Arc<FakeTransport>,
    ) -> ReplicaService<String, FakeTransport> {
        ReplicaService::new(cluster.view.clone(), count, transport)
    }

    // ============================================================
    // PLACEMENT TESTS
    // ============================================================

    #[tokio::test]
    async fn test_put_places_on_ring_selected_backups() {
        let cluster = build_cluster(5);
        let transport = Arc::new(FakeTransport::default());
        let svc = service(&cluster, 3, transport.clone());

        let key = b"chunk-under-test";
        let source = ChunkSource::Memory(Bytes::from_static(b"replicated bytes"));
        let info = svc
            .put_replica(key, key.to_vec(), "meta".to_string(), &source)
            .await
            .expect("put");

        let expected = cluster.view.pick_n(key, 3);
        assert_eq!(info.all_node_ids.len(), 3);
        assert_eq!(info.all_node_ids[0], expected[0].id, "ring primary first");

        // The primary holds the data locally; the fake only sees the two
        // backup transfers.
        let holders = transport.holders(key);
        assert_eq!(holders.len(), 2);
        for id in &holders {
            assert!(info.all_node_ids.contains(id));
            assert_ne!(*id, expected[0].id);
        }
    }

    #[tokio::test]
    async fn test_put_fails_on_small_cluster() {
        let cluster = build_cluster(2);
        let transport = Arc::new(FakeTransport::default());
        let svc = service(&cluster, 3, transport);

        let source = ChunkSource::Memory(Bytes::from_static(b"x"));
        match svc.put_replica(b"k", b"k".to_vec(), String::new(), &source).await {
            Err(ReplicaError::InsufficientNodes { need: 3, have: 2 }) => {}
            other => panic!("expected InsufficientNodes, got {:?}", other),
        }
    }

    // ============================================================
    // FALLBACK READ TESTS
    // ============================================================

    #[tokio::test]
    async fn test_get_falls_through_to_backup() {
        let cluster = build_cluster(5);
        let transport = Arc::new(FakeTransport::default());
        let svc = service(&cluster, 3, transport.clone());

        let key = b"fallback-key";
        let holders = cluster.view.pick_n(key, 3);
        // Only the second holder actually has the bytes.
        transport.seed(&holders[1].id, key, b"survivor copy");
        transport.take_down(&holders[0].id);

        let source = svc.get_replica(key).await.expect("get");
        assert_eq!(source.read_all().await.unwrap().as_ref(), b"survivor copy");
    }

    #[tokio::test]
    async fn test_get_with_no_holders_fails() {
        let cluster = build_cluster(3);
        let transport = Arc::new(FakeTransport::default());
        let svc = service(&cluster, 2, transport);

        match svc.get_replica(b"ghost").await {
            Err(ReplicaError::NoAvailableReplica(_)) => {}
            other => panic!("expected NoAvailableReplica, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_recover_reads_from_backup() {
        let cluster = build_cluster(5);
        let transport = Arc::new(FakeTransport::default());
        let svc = service(&cluster, 3, transport.clone());

        let key = b"recover-key";
        let source = ChunkSource::Memory(Bytes::from_static(b"original"));
        let info = svc
            .put_replica(key, key.to_vec(), "m".to_string(), &source)
            .await
            .expect("put");

        // The primary lost its copy; recovery must come from a backup.
        let recovered = svc.recover_replica(&info).await.expect("recover");
        assert_eq!(recovered.read_all().await.unwrap().as_ref(), b"original");
    }

    // ============================================================
    // DELETE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_delete_requires_known_nodes() {
        let cluster = build_cluster(3);
        let transport = Arc::new(FakeTransport::default());
        let svc = service(&cluster, 2, transport);

        let stranger = NodeId::derive("stranger", "127.0.0.1:9999".parse().unwrap());
        let info = ReplicaInfo {
            key: b"k".to_vec(),
            checksum: b"k".to_vec(),
            expected_count: 2,
            all_node_ids: vec![stranger.clone()],
            custom: String::new(),
        };
        match svc.delete_replica(&info).await {
            Err(ReplicaError::UnknownNode(id)) => assert_eq!(id, stranger),
            other => panic!("expected UnknownNode, got {:?}", other),
        }
    }

    // ============================================================
    // CONVERGENCE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_adjust_restores_count_after_node_loss() {
        let cluster = build_cluster(5);
        let transport = Arc::new(FakeTransport::default());
        let svc = service(&cluster, 3, transport.clone());

        let key = b"converge-key";
        let source = ChunkSource::Memory(Bytes::from_static(b"converge bytes"));
        let info = svc
            .put_replica(key, key.to_vec(), "m".to_string(), &source)
            .await
            .expect("put");
        // Mirror the primary's local copy into the fake so the adjustment
        // pass can fetch from it.
        transport.seed(&info.all_node_ids[0], key, b"converge bytes");

        // One original holder leaves the cluster entirely.
        let victim = info.all_node_ids[1].clone();
        cluster.ring.remove(&victim);
        cluster.members.remove(&victim);

        let (live, errors) = svc.check_and_adjust(&info).await;
        assert!(errors.is_empty(), "unexpected errors: {}", errors);
        assert_eq!(live, 3, "replica count restored");

        let new_set = cluster.view.pick_n(key, 3);
        assert_eq!(new_set.len(), 3);
        for node in &new_set {
            assert_ne!(node.id, victim);
        }

        // Every current member of the set carries the updated record.
        for node in &new_set {
            let record = transport
                .records
                .get(&(node.id.clone(), key.to_vec()))
                .expect("record pushed");
            assert_eq!(record.all_node_ids[0], new_set[0].id, "new primary recorded");
            assert!(!record.all_node_ids.contains(&victim));
        }
    }

    #[tokio::test]
    async fn test_adjust_promotes_new_primary() {
        let cluster = build_cluster(5);
        let transport = Arc::new(FakeTransport::default());
        let svc = service(&cluster, 3, transport.clone());

        let key = b"promotion-key";
        let source = ChunkSource::Memory(Bytes::from_static(b"promoted"));
        let info = svc
            .put_replica(key, key.to_vec(), "m".to_string(), &source)
            .await
            .expect("put");
        transport.seed(&info.all_node_ids[0], key, b"promoted");

        // Kill the primary itself.
        let old_primary = info.all_node_ids[0].clone();
        cluster.ring.remove(&old_primary);
        cluster.members.remove(&old_primary);

        let (live, _errors) = svc.check_and_adjust(&info).await;
        assert_eq!(live, 3);

        let new_primary = cluster.view.pick(key).expect("owner").id;
        assert_ne!(new_primary, old_primary);
        let record = transport
            .records
            .get(&(new_primary.clone(), key.to_vec()))
            .expect("record on new primary");
        assert_eq!(record.all_node_ids[0], new_primary);
    }

    #[tokio::test]
    async fn test_adjust_tolerates_already_missing_copies() {
        let cluster = build_cluster(5);
        let transport = Arc::new(FakeTransport::default());
        let svc = service(&cluster, 3, transport.clone());

        let key = b"tolerant-key";
        let source = ChunkSource::Memory(Bytes::from_static(b"tolerant"));
        let info = svc
            .put_replica(key, key.to_vec(), "m".to_string(), &source)
            .await
            .expect("put");
        transport.seed(&info.all_node_ids[0], key, b"tolerant");

        // An unchanged topology: nothing to add or delete, records refreshed.
        let (live, errors) = svc.check_and_adjust(&info).await;
        assert_eq!(live, 3);
        assert!(errors.is_empty(), "stable set must adjust cleanly: {}", errors);
    }
}
