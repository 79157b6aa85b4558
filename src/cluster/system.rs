use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tracing::{debug, info, warn};

use super::client::{ChunkClient, TransportError};
use super::protocol::{ReplicaMeta, StatusReply};
use crate::chunks::{ChunkError, ChunkInfo, HashChunkSystem};
use crate::membership::service::ClusterView;
use crate::replica::{ChunkSource, ReplicaClient, ReplicaError, ReplicaInfo, ReplicaService};

const INGEST_BUF_SIZE: usize = 64 * 1024;
const RECOVERY_POLL_INTERVAL: Duration = Duration::from_millis(50);
const RECOVERY_POLL_LIMIT: u32 = 200;

#[derive(Debug, Error)]
pub enum ClusterError {
    /// The ring is empty; no node owns any key.
    #[error("no owner: cluster has no members")]
    NoOwner,

    #[error(transparent)]
    Chunk(#[from] ChunkError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Replica(#[from] ReplicaError),

    /// Every candidate holder failed; the chunk may exist but cannot be
    /// served right now.
    #[error("chunk {0} unavailable: no holder responded")]
    Unavailable(String),
}

pub type ClusterResult<T> = Result<T, ClusterError>;

/// Cluster-wide chunk access over per-node local stores.
///
/// Every operation first resolves the key's owner on the ring. Owner-local
/// calls go to the local store directly; anything else travels over the
/// chunk transport. A read that lands on the owner but misses locally
/// triggers healing: the chunk is pulled from a surviving holder, ingested,
/// and the replica set reconciled off the request path.
pub struct DistributedChunkSystem {
    local: Arc<HashChunkSystem>,
    view: ClusterView,
    client: Arc<ChunkClient>,
    replicas: ReplicaService<ReplicaMeta, ChunkClient>,
    // Hex keys currently being healed, with a depth counter so overlapping
    // heals of the same chunk keep the flag up until the last one finishes.
    recovering: Arc<DashMap<String, u32>>,
}

impl DistributedChunkSystem {
    pub fn new(
        local: Arc<HashChunkSystem>,
        view: ClusterView,
        client: Arc<ChunkClient>,
        replica_factor: usize,
    ) -> Self {
        let replicas = ReplicaService::new(view.clone(), replica_factor, client.clone());
        Self {
            local,
            view,
            client,
            replicas,
            recovering: Arc::new(DashMap::new()),
        }
    }

    pub fn local(&self) -> &Arc<HashChunkSystem> {
        &self.local
    }

    pub fn view(&self) -> &ClusterView {
        &self.view
    }

    pub fn replica_factor(&self) -> usize {
        self.replicas.expected_count()
    }

    pub fn status(&self) -> StatusReply {
        let node = self.view.self_node();
        StatusReply {
            node_id: node.id.to_string(),
            name: node.name.clone(),
            alive_members: self.view.alive_members().len(),
            ring_members: self.view.ring_len(),
            capacity: self.local.capacity(),
            occupied: self.local.occupied(),
        }
    }

    fn local_source(&self, info: &ChunkInfo) -> ChunkSource {
        ChunkSource::from_file(self.local.chunk_path(info), info.size)
    }

    /// Content hash of a source, computed without holding file data whole.
    pub async fn hash_source(source: &ChunkSource) -> ClusterResult<Vec<u8>> {
        let mut hasher = Sha256::new();
        match source {
            ChunkSource::Memory(bytes) => hasher.update(bytes),
            ChunkSource::File { path, .. } => {
                let mut file = tokio::fs::File::open(path).await.map_err(ChunkError::from)?;
                let mut buf = vec![0u8; INGEST_BUF_SIZE];
                loop {
                    let n = file.read(&mut buf).await.map_err(ChunkError::from)?;
                    if n == 0 {
                        break;
                    }
                    hasher.update(&buf[..n]);
                }
            }
        }
        Ok(hasher.finalize().to_vec())
    }

    /// Reads a chunk from wherever the ring says it lives.
    pub async fn get(&self, hash: &[u8]) -> ClusterResult<(ChunkInfo, ChunkSource)> {
        let owner = self.view.pick(hash).ok_or(ClusterError::NoOwner)?;
        if self.view.is_self(&owner.id) {
            return self.get_local(hash).await;
        }
        debug!("Routing get of {} to {:?}", hex::encode(hash), owner.id);
        Ok(self.client.get_chunk(&owner, hash).await?)
    }

    /// Owner-side read: serves the local copy, or heals a miss.
    pub async fn get_local(&self, hash: &[u8]) -> ClusterResult<(ChunkInfo, ChunkSource)> {
        match self.local.get(hash).await {
            Ok((info, _file)) => {
                let source = self.local_source(&info);
                Ok((info, source))
            }
            Err(ChunkError::NotFound(_)) => self.heal(hash).await,
            Err(e) => Err(e.into()),
        }
    }

    /// Pulls a locally missing chunk back from a surviving holder.
    ///
    /// Preferred path: the persisted placement record names the holders, and
    /// the replica service both fetches and reconciles the set. Without a
    /// record (the record died with the disk) the ring candidates for the
    /// key are probed directly.
    async fn heal(&self, hash: &[u8]) -> ClusterResult<(ChunkInfo, ChunkSource)> {
        let hexed = hex::encode(hash);
        let _guard = HealGuard::enter(self.recovering.clone(), hexed.clone());
        info!("Healing locally missing chunk {}", hexed);

        if let Some(json) = self.local.get_replica_info(hash)? {
            match serde_json::from_str::<ReplicaInfo<ReplicaMeta>>(&json) {
                Ok(record) => match self.replicas.recover_replica(&record).await {
                    Ok(source) => {
                        let info = self.ingest(hash, &record.custom.name, &source).await?;
                        let source = self.local_source(&info);
                        return Ok((info, source));
                    }
                    Err(e) => {
                        warn!("Recorded holders of {} all failed: {}", hexed, e);
                    }
                },
                Err(e) => {
                    warn!("Corrupt placement record for {}: {}", hexed, e);
                }
            }
        }

        let candidates = self.view.pick_n(hash, self.replica_factor());
        for node in &candidates {
            if self.view.is_self(&node.id) {
                continue;
            }
            match self.client.get_chunk(node, hash).await {
                Ok((remote_info, source)) => {
                    let info = self.ingest(hash, &remote_info.name, &source).await?;

                    // The record died with the disk; rebuild it from the
                    // current ring set so later deletes and adjustments see
                    // the holders again, then reconcile off the request path.
                    let record = ReplicaInfo {
                        key: hash.to_vec(),
                        checksum: hash.to_vec(),
                        expected_count: self.replica_factor(),
                        all_node_ids: candidates.iter().map(|n| n.id.clone()).collect(),
                        custom: ReplicaMeta {
                            name: info.name.clone(),
                            size: info.size,
                        },
                    };
                    let json = serde_json::to_string(&record).map_err(ChunkError::from)?;
                    self.local.put_replica_info(hash, &json)?;

                    let replicas = self.replicas.clone();
                    tokio::spawn(async move {
                        let (live, errors) = replicas.check_and_adjust(&record).await;
                        if !errors.is_empty() {
                            warn!(
                                "Post-heal adjustment of {}: {} live copies, {}",
                                record.hex_key(),
                                live,
                                errors
                            );
                        }
                    });

                    let source = self.local_source(&info);
                    return Ok((info, source));
                }
                Err(TransportError::NotFound) => {}
                Err(e) => {
                    debug!("Heal probe of {:?} failed: {}", node.id, e);
                }
            }
        }
        Err(ClusterError::Unavailable(hexed))
    }

    /// Lands a chunk in the local store: refcount bump on dedup, streamed
    /// write otherwise.
    async fn ingest(
        &self,
        hash: &[u8],
        name: &str,
        source: &ChunkSource,
    ) -> ClusterResult<ChunkInfo> {
        if let Some(info) = self.local.add_ref(hash)? {
            return Ok(info);
        }
        match source {
            ChunkSource::Memory(bytes) => Ok(self.local.store_bytes(hash, name, bytes).await?),
            ChunkSource::File { path, size, .. } => {
                let mut writer = self.local.create_writer(hash, name, Some(*size));
                let mut file = tokio::fs::File::open(path).await.map_err(ChunkError::from)?;
                let mut buf = vec![0u8; INGEST_BUF_SIZE];
                loop {
                    let n = file.read(&mut buf).await.map_err(ChunkError::from)?;
                    if n == 0 {
                        break;
                    }
                    writer.write(&buf[..n]).await?;
                }
                Ok(writer.finalize().await?)
            }
        }
    }

    /// Stores a chunk under its content hash, routed to the owner.
    pub async fn store(&self, hash: &[u8], name: &str, source: &ChunkSource) -> ClusterResult<()> {
        let owner = self.view.pick(hash).ok_or(ClusterError::NoOwner)?;
        if self.view.is_self(&owner.id) {
            self.store_local(hash, name, source).await?;
            return Ok(());
        }
        debug!("Routing store of {} to {:?}", hex::encode(hash), owner.id);
        Ok(self.client.put_chunk(&owner, hash, name, source).await?)
    }

    /// Hashes the content first, then stores it. Returns the content hash
    /// the chunk is addressed by.
    pub async fn store_content(&self, name: &str, source: &ChunkSource) -> ClusterResult<Vec<u8>> {
        let hash = Self::hash_source(source).await?;
        self.store(&hash, name, source).await?;
        Ok(hash)
    }

    /// Owner-side store: dedup, local write, then replication to the ring
    /// backups. A failed replication rolls the local reference back so the
    /// caller can retry the whole operation.
    pub async fn store_local(
        &self,
        hash: &[u8],
        name: &str,
        source: &ChunkSource,
    ) -> ClusterResult<ChunkInfo> {
        // A write must not race a heal of the same key.
        self.wait_for_recovery(hash).await;
        if let Some(info) = self.local.add_ref(hash)? {
            return Ok(info);
        }

        let info = self.ingest(hash, name, source).await?;
        let meta = ReplicaMeta {
            name: info.name.clone(),
            size: info.size,
        };
        let local_source = self.local_source(&info);
        match self
            .replicas
            .put_replica(hash, hash.to_vec(), meta, &local_source)
            .await
        {
            Ok(record) => {
                let json = serde_json::to_string(&record).map_err(ChunkError::from)?;
                self.local.put_replica_info(hash, &json)?;
                Ok(info)
            }
            Err(e) => {
                warn!("Replication of {} failed, rolling back: {}", info.hex_hash(), e);
                if let Err(del) = self.local.delete(hash).await {
                    warn!("Rollback of {} failed: {}", info.hex_hash(), del);
                }
                Err(e.into())
            }
        }
    }

    /// Drops one reference to a chunk, routed to the owner.
    pub async fn delete(&self, hash: &[u8]) -> ClusterResult<()> {
        let owner = self.view.pick(hash).ok_or(ClusterError::NoOwner)?;
        if self.view.is_self(&owner.id) {
            return self.delete_local(hash).await;
        }
        debug!("Routing delete of {} to {:?}", hex::encode(hash), owner.id);
        Ok(self.client.delete_chunk(&owner, hash).await?)
    }

    /// Owner-side delete. When the last reference goes, the backups are
    /// dropped too; a backup that is already gone or unreachable is logged
    /// and skipped, the adjustment pass cleans stragglers later.
    pub async fn delete_local(&self, hash: &[u8]) -> ClusterResult<()> {
        // A delete must not race a heal of the same key.
        self.wait_for_recovery(hash).await;
        self.local.delete(hash).await?;
        if self.local.exists(hash)? {
            return Ok(());
        }

        if let Some(json) = self.local.get_replica_info(hash)? {
            match serde_json::from_str::<ReplicaInfo<ReplicaMeta>>(&json) {
                Ok(record) => {
                    for id in &record.all_node_ids {
                        if self.view.is_self(id) {
                            continue;
                        }
                        let Some(node) = self.view.get_member(id) else {
                            debug!("Replica holder {:?} already gone", id);
                            continue;
                        };
                        match self.client.delete(&node, &record).await {
                            Ok(()) | Err(ReplicaError::NotFound) => {}
                            Err(e) => {
                                warn!("Backup delete of {} on {:?} failed: {}", record.hex_key(), id, e);
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!("Corrupt placement record for {}: {}", hex::encode(hash), e);
                }
            }
        }
        self.local.delete_replica_info(hash)?;
        Ok(())
    }

    /// Runs the placement reconciliation for one chunk. Exposed for the
    /// info-update path and tests; heals schedule it themselves.
    pub async fn adjust(&self, record: &ReplicaInfo<ReplicaMeta>) -> (usize, crate::replica::ErrorList) {
        self.replicas.check_and_adjust(record).await
    }

    pub fn is_recovering(&self, hash: &[u8]) -> bool {
        self.recovering.contains_key(&hex::encode(hash))
    }

    /// Blocks (bounded) until no heal of `hash` is in flight. Writes and
    /// deletes for a key are held back while that key is being healed.
    pub async fn wait_for_recovery(&self, hash: &[u8]) {
        let key = hex::encode(hash);
        for _ in 0..RECOVERY_POLL_LIMIT {
            if !self.recovering.contains_key(&key) {
                return;
            }
            tokio::time::sleep(RECOVERY_POLL_INTERVAL).await;
        }
        warn!("Gave up waiting for recovery of {}", key);
    }
}

/// Scoped in-flight marker for one heal. The counter survives overlapping
/// heals of the same key; the entry disappears when the last guard drops.
struct HealGuard {
    recovering: Arc<DashMap<String, u32>>,
    key: String,
}

impl HealGuard {
    fn enter(recovering: Arc<DashMap<String, u32>>, key: String) -> Self {
        *recovering.entry(key.clone()).or_insert(0) += 1;
        Self { recovering, key }
    }
}

impl Drop for HealGuard {
    fn drop(&mut self) {
        if let Some(mut count) = self.recovering.get_mut(&self.key) {
            *count -= 1;
            let done = *count == 0;
            drop(count);
            if done {
                self.recovering.remove_if(&self.key, |_, v| *v == 0);
            }
        }
    }
}
