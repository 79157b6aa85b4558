use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::Arc;

use super::types::{ChunkSource, ErrorList, ReplicaClient, ReplicaError, ReplicaInfo};
use crate::membership::service::ClusterView;
use crate::membership::types::{Node, NodeId};

/// Drives put/get/delete/recover/adjust for replicated objects. Owns no
/// storage: placement comes from the cluster view, transfers go through the
/// injected client.
pub struct ReplicaService<T, C> {
    view: ClusterView,
    expected_count: usize,
    client: Arc<C>,
    _payload: PhantomData<fn() -> T>,
}

impl<T, C> Clone for ReplicaService<T, C> {
    fn clone(&self) -> Self {
        Self {
            view: self.view.clone(),
            expected_count: self.expected_count,
            client: self.client.clone(),
            _payload: PhantomData,
        }
    }
}

impl<T, C> ReplicaService<T, C>
where
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    C: ReplicaClient<T> + Send + Sync + 'static,
{
    pub fn new(view: ClusterView, expected_count: usize, client: Arc<C>) -> Self {
        Self {
            view,
            expected_count,
            client,
            _payload: PhantomData,
        }
    }

    pub fn expected_count(&self) -> usize {
        self.expected_count
    }

    fn resolve(&self, id: &NodeId) -> Result<Node, ReplicaError> {
        self.view
            .get_member(id)
            .ok_or_else(|| ReplicaError::UnknownNode(id.clone()))
    }

    /// Places an object on the ring-selected node set.
    ///
    /// The primary (`nodes[0]`) is the caller's own node and is expected to
    /// already hold the data; the object is replicated sequentially to the
    /// backups, re-materializing the source before each transfer. Fails up
    /// front when the cluster is smaller than the replica factor; the
    /// caller retries once membership stabilizes.
    pub async fn put_replica(
        &self,
        key: &[u8],
        checksum: Vec<u8>,
        custom: T,
        source: &ChunkSource,
    ) -> Result<ReplicaInfo<T>, ReplicaError> {
        let nodes = self.view.pick_n(key, self.expected_count);
        if nodes.len() < self.expected_count {
            return Err(ReplicaError::InsufficientNodes {
                need: self.expected_count,
                have: nodes.len(),
            });
        }

        let info = ReplicaInfo {
            key: key.to_vec(),
            checksum,
            expected_count: self.expected_count,
            all_node_ids: nodes.iter().map(|n| n.id.clone()).collect(),
            custom,
        };

        for node in &nodes[1..] {
            self.client.put(node, &info, source).await?;
            tracing::debug!("Replicated {} to {:?}", info.hex_key(), node.id);
        }

        Ok(info)
    }

    /// Reads the object from the ring-ordered candidates, primary first.
    pub async fn get_replica(&self, key: &[u8]) -> Result<ChunkSource, ReplicaError> {
        let nodes = self.view.pick_n(key, self.expected_count);
        for node in &nodes {
            match self.client.fetch(node, key).await {
                Ok(source) => return Ok(source),
                Err(e) => {
                    tracing::debug!("Replica read of {} from {:?} failed: {}", hex::encode(key), node.id, e);
                }
            }
        }
        Err(ReplicaError::NoAvailableReplica(hex::encode(key)))
    }

    /// Used when the ring says we are the primary but the local copy is
    /// missing: read from whichever backup responds first, then reconcile
    /// the replica set off the request path.
    pub async fn recover_replica(
        &self,
        info: &ReplicaInfo<T>,
    ) -> Result<ChunkSource, ReplicaError> {
        let backups = info.all_node_ids.iter().skip(1);
        for id in backups {
            let node = match self.resolve(id) {
                Ok(node) => node,
                Err(_) => continue,
            };
            match self.client.fetch(&node, &info.key).await {
                Ok(source) => {
                    let service = self.clone();
                    let stored = info.clone();
                    tokio::spawn(async move {
                        let (live, errors) = service.check_and_adjust(&stored).await;
                        if !errors.is_empty() {
                            tracing::warn!(
                                "Post-recovery adjustment of {}: {} live copies, {}",
                                stored.hex_key(),
                                live,
                                errors
                            );
                        }
                    });
                    return Ok(source);
                }
                Err(e) => {
                    tracing::debug!("Recovery read from {:?} failed: {}", node.id, e);
                }
            }
        }
        Err(ReplicaError::NoAvailableReplica(info.hex_key()))
    }

    /// Deletes the object from every recorded holder. The first error
    /// aborts; callers may retry the whole operation.
    pub async fn delete_replica(&self, info: &ReplicaInfo<T>) -> Result<(), ReplicaError> {
        for id in &info.all_node_ids {
            let node = self.resolve(id)?;
            self.client.delete(&node, info).await?;
            tracing::debug!("Deleted replica {} from {:?}", info.hex_key(), id);
        }
        Ok(())
    }

    /// The diff-and-converge rebalancing pass, run off the request path.
    ///
    /// Computes the current desired node set, then concurrently deletes the
    /// object from nodes that fell out of it and pushes it to nodes that
    /// entered it; the two phases touch disjoint node sets and neither
    /// cancels the other. Finally pushes the updated placement record to
    /// every kept node. Returns the net surviving copy count and every
    /// collected error; callers must inspect the count, partial success is
    /// normal.
    pub async fn check_and_adjust(&self, info: &ReplicaInfo<T>) -> (usize, ErrorList) {
        let mut errors = ErrorList::default();

        let new_set = self.view.pick_n(&info.key, self.expected_count);
        if new_set.is_empty() {
            errors.push(ReplicaError::InsufficientNodes {
                need: self.expected_count,
                have: 0,
            });
            return (0, errors);
        }
        let new_ids: Vec<NodeId> = new_set.iter().map(|n| n.id.clone()).collect();

        let added: Vec<Node> = new_set
            .iter()
            .filter(|node| !info.all_node_ids.contains(&node.id))
            .cloned()
            .collect();
        let removed: Vec<NodeId> = info
            .all_node_ids
            .iter()
            .filter(|id| !new_ids.contains(id))
            .cloned()
            .collect();
        let kept: usize = info
            .all_node_ids
            .iter()
            .filter(|id| new_ids.contains(id))
            .count();

        // New primary is the ring's first pick; the remaining ids are kept
        // sorted so every holder persists the same record.
        let mut updated = info.clone();
        updated.all_node_ids = {
            let primary = new_ids[0].clone();
            let mut rest: Vec<NodeId> =
                new_ids.iter().skip(1).cloned().collect();
            rest.sort();
            let mut ids = vec![primary];
            ids.extend(rest);
            ids
        };

        let delete_phase = async {
            let mut errs = ErrorList::default();
            for id in &removed {
                let node = match self.resolve(id) {
                    Ok(node) => node,
                    Err(_) => {
                        // Node left the cluster entirely; nothing to delete.
                        tracing::debug!("Redundant holder {:?} already gone", id);
                        continue;
                    }
                };
                match self.client.delete(&node, info).await {
                    Ok(()) => {}
                    Err(ReplicaError::NotFound) => {
                        tracing::debug!("Replica {} already absent on {:?}", info.hex_key(), id);
                    }
                    Err(e) => errs.push(e),
                }
            }
            errs
        };

        let push_phase = async {
            let mut errs = ErrorList::default();
            if added.is_empty() {
                return (0usize, errs);
            }
            // Fetch from any surviving recorded holder.
            let mut source: Option<ChunkSource> = None;
            for id in &info.all_node_ids {
                if removed.contains(id) {
                    continue;
                }
                let node = match self.resolve(id) {
                    Ok(node) => node,
                    Err(_) => continue,
                };
                match self.client.fetch(&node, &info.key).await {
                    Ok(found) => {
                        source = Some(found);
                        break;
                    }
                    Err(e) => {
                        tracing::debug!("Adjustment read from {:?} failed: {}", id, e);
                    }
                }
            }
            let Some(source) = source else {
                errs.push(ReplicaError::NoAvailableReplica(info.hex_key()));
                return (0, errs);
            };
            let mut pushed = 0usize;
            for node in &added {
                match self.client.put(node, &updated, &source).await {
                    Ok(()) => pushed += 1,
                    Err(e) => errs.push(e),
                }
            }
            (pushed, errs)
        };

        let (delete_errs, (pushed, push_errs)) = tokio::join!(delete_phase, push_phase);
        errors.merge(delete_errs);
        errors.merge(push_errs);

        // Every kept node gets the updated placement record.
        for node in &new_set {
            match self.client.update_info(node, &updated).await {
                Ok(()) => {}
                Err(e) => errors.push(e),
            }
        }

        let live = kept + pushed;
        tracing::debug!(
            "Adjusted {}: {} kept, {} added, {} removed, {} live",
            info.hex_key(),
            kept,
            pushed,
            removed.len(),
            live
        );
        (live, errors)
    }
}
