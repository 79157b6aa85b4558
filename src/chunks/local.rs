use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::db::ChunkDb;
use super::types::{ChunkError, ChunkInfo, ChunkResult, unix_timestamp};

const DB_FILE: &str = "chunks.db";
const TMP_DIR: &str = "tmp";

/// Injectable storage sub-path function: where under the root a chunk's
/// bytes land, derived from its metadata.
pub type LayoutFn = fn(&ChunkInfo) -> PathBuf;

/// Default layout: `year/month/day/hex[0..3]/hex[3..6]`, dated by creation
/// time so directories never grow unbounded.
pub fn dated_layout(info: &ChunkInfo) -> PathBuf {
    let (year, month, day) = civil_from_unix(info.create_time);
    let hexed = info.hex_hash();
    let (first, second) = if hexed.len() >= 6 {
        (&hexed[0..3], &hexed[3..6])
    } else {
        ("", "")
    };
    PathBuf::from(format!("{:04}/{:02}/{:02}", year, month, day))
        .join(first)
        .join(second)
}

/// Civil date from unix seconds (days-from-epoch algorithm).
fn civil_from_unix(secs: u64) -> (i64, u32, u32) {
    let days = (secs / 86_400) as i64;
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let year = yoe + era * 400 + if month <= 2 { 1 } else { 0 };
    (year, month, day)
}

/// On-disk, hash-addressed blob store with reference counting and capacity
/// accounting. Each node exclusively owns its store; remote nodes only reach
/// it through the RPC surface.
pub struct HashChunkSystem {
    root: PathBuf,
    db: ChunkDb,
    capacity: AtomicU64,
    occupied: AtomicU64,
    layout: LayoutFn,
    // Serializes first-time stores of the same hash; entries are removed
    // once no writer holds them.
    write_locks: DashMap<Vec<u8>, Arc<Mutex<()>>>,
}

impl HashChunkSystem {
    pub async fn open(root: impl Into<PathBuf>, capacity: u64) -> ChunkResult<Self> {
        Self::open_with_layout(root, capacity, dated_layout).await
    }

    pub async fn open_with_layout(
        root: impl Into<PathBuf>,
        capacity: u64,
        layout: LayoutFn,
    ) -> ChunkResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(TMP_DIR)).await?;
        let db = ChunkDb::open(&root.join(DB_FILE))?;

        // Restart reconciliation: prefer the larger capacity so the store
        // never shrinks below what it already holds.
        let (capacity, occupied) = match db.load_stat()? {
            Some((persisted_cap, occupied)) => {
                let chosen = if persisted_cap != capacity {
                    let larger = persisted_cap.max(capacity);
                    tracing::warn!(
                        "Capacity mismatch: configured {} vs persisted {}, keeping {}",
                        capacity,
                        persisted_cap,
                        larger
                    );
                    larger
                } else {
                    capacity
                };
                (chosen.max(occupied), occupied)
            }
            None => (capacity, 0),
        };
        db.save_stat(capacity, occupied)?;

        Ok(Self {
            root,
            db,
            capacity: AtomicU64::new(capacity),
            occupied: AtomicU64::new(occupied),
            layout,
            write_locks: DashMap::new(),
        })
    }

    pub fn capacity(&self) -> u64 {
        self.capacity.load(Ordering::SeqCst)
    }

    pub fn occupied(&self) -> u64 {
        self.occupied.load(Ordering::SeqCst)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn exists(&self, hash: &[u8]) -> ChunkResult<bool> {
        Ok(self.db.get_info(hash)?.is_some())
    }

    pub fn get_info(&self, hash: &[u8]) -> ChunkResult<Option<ChunkInfo>> {
        self.db.get_info(hash)
    }

    /// Reserves `size` bytes against the capacity, or fails with `Full`.
    /// Concurrent stores race through compare-exchange, never over-commit.
    fn reserve(&self, size: u64) -> ChunkResult<()> {
        let capacity = self.capacity();
        loop {
            let occupied = self.occupied.load(Ordering::SeqCst);
            if occupied + size > capacity {
                return Err(ChunkError::Full {
                    occupied,
                    incoming: size,
                    capacity,
                });
            }
            if self
                .occupied
                .compare_exchange(occupied, occupied + size, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    fn release(&self, size: u64) {
        self.occupied.fetch_sub(size, Ordering::SeqCst);
    }

    /// Per-hash guard for the check-reserve-insert sequence, so two
    /// concurrent first-time stores of the same content cannot both pass
    /// the dedup check and double-reserve capacity.
    fn write_lock(&self, hash: &[u8]) -> Arc<Mutex<()>> {
        self.write_locks.entry(hash.to_vec()).or_default().clone()
    }

    fn drop_write_lock(&self, hash: &[u8]) {
        self.write_locks
            .remove_if(hash, |_, lock| Arc::strong_count(lock) == 1);
    }

    fn persist_stat(&self) -> ChunkResult<()> {
        self.db.save_stat(self.capacity(), self.occupied())
    }

    /// Dedup path: if the hash is already stored, bump the refcount and
    /// return the updated record without touching the bytes.
    pub fn add_ref(&self, hash: &[u8]) -> ChunkResult<Option<ChunkInfo>> {
        match self.db.get_info(hash)? {
            Some(mut info) => {
                info.ref_count += 1;
                info.mod_time = unix_timestamp();
                self.db.put_info(&info)?;
                tracing::debug!("Chunk {} refcount now {}", info.hex_hash(), info.ref_count);
                Ok(Some(info))
            }
            None => Ok(None),
        }
    }

    /// Stores a chunk from an in-memory buffer. Identical content hash means
    /// one physical copy: an existing record only gains a reference, and
    /// concurrent first-time stores of the same hash are serialized.
    pub async fn store_bytes(&self, hash: &[u8], name: &str, data: &[u8]) -> ChunkResult<ChunkInfo> {
        let lock = self.write_lock(hash);
        let result = {
            let _guard = lock.lock().await;
            self.store_bytes_locked(hash, name, data).await
        };
        drop(lock);
        self.drop_write_lock(hash);
        result
    }

    // Runs under the per-hash write lock.
    async fn store_bytes_locked(
        &self,
        hash: &[u8],
        name: &str,
        data: &[u8],
    ) -> ChunkResult<ChunkInfo> {
        if let Some(info) = self.add_ref(hash)? {
            return Ok(info);
        }

        let size = data.len() as u64;
        self.reserve(size)?;

        let info = self.new_info(hash, name, size);
        let result: ChunkResult<()> = async {
            let dir = self.root.join(&info.path);
            fs::create_dir_all(&dir).await?;
            fs::write(dir.join(&info.name), data).await?;
            self.db.put_info(&info)?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => {
                self.persist_stat()?;
                Ok(info)
            }
            Err(e) => {
                self.release(size);
                Err(e)
            }
        }
    }

    /// Opens a streaming writer for a chunk that is not yet present. The
    /// caller should check the dedup path (`add_ref`) first; a duplicate
    /// that appears while the stream is in flight is resolved at finalize,
    /// which turns the write into a reference bump.
    pub fn create_writer(
        self: &Arc<Self>,
        hash: &[u8],
        name: &str,
        declared_size: Option<u64>,
    ) -> ChunkWriter {
        let info = self.new_info(hash, name, 0);
        let tmp_path = self
            .root
            .join(TMP_DIR)
            .join(format!("{}.{}.tmp", info.hex_hash(), uuid::Uuid::new_v4()));
        ChunkWriter {
            sys: self.clone(),
            info,
            tmp_path,
            file: None,
            written: 0,
            declared_size,
        }
    }

    fn new_info(&self, hash: &[u8], name: &str, size: u64) -> ChunkInfo {
        let now = unix_timestamp();
        let name = if name.is_empty() {
            hex::encode(hash)
        } else {
            name.to_string()
        };
        let mut info = ChunkInfo {
            hash: hash.to_vec(),
            name,
            path: String::new(),
            size,
            ref_count: 1,
            mod_time: now,
            create_time: now,
        };
        info.path = (self.layout)(&info).to_string_lossy().into_owned();
        info
    }

    /// Opens a stored chunk for reading.
    pub async fn get(&self, hash: &[u8]) -> ChunkResult<(ChunkInfo, fs::File)> {
        let info = self
            .db
            .get_info(hash)?
            .ok_or_else(|| ChunkError::NotFound(hex::encode(hash)))?;
        let file_path = self.chunk_path(&info);
        match fs::File::open(&file_path).await {
            Ok(file) => Ok((info, file)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(ChunkError::NotFound(info.hex_hash()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn chunk_path(&self, info: &ChunkInfo) -> PathBuf {
        self.root.join(&info.path).join(&info.name)
    }

    /// Drops one reference; frees the record, the file and the occupied bytes
    /// only when the count reaches zero. Deleting a missing chunk is
    /// `NotFound`, never an underflow.
    pub async fn delete(&self, hash: &[u8]) -> ChunkResult<()> {
        let mut info = self
            .db
            .get_info(hash)?
            .ok_or_else(|| ChunkError::NotFound(hex::encode(hash)))?;

        info.ref_count -= 1;
        if info.ref_count > 0 {
            info.mod_time = unix_timestamp();
            self.db.put_info(&info)?;
            tracing::debug!("Chunk {} refcount now {}", info.hex_hash(), info.ref_count);
            return Ok(());
        }

        self.db.delete_info(hash)?;
        match fs::remove_file(self.chunk_path(&info)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!("Chunk file for {} already missing", info.hex_hash());
            }
            Err(e) => return Err(e.into()),
        }
        self.release(info.size);
        self.persist_stat()?;
        tracing::debug!("Chunk {} fully removed", info.hex_hash());
        Ok(())
    }

    // Replica metadata passthrough: persisted beside the chunk it describes.

    pub fn put_replica_info(&self, key: &[u8], info_json: &str) -> ChunkResult<()> {
        self.db.put_replica_info(key, info_json)
    }

    pub fn get_replica_info(&self, key: &[u8]) -> ChunkResult<Option<String>> {
        self.db.get_replica_info(key)
    }

    pub fn delete_replica_info(&self, key: &[u8]) -> ChunkResult<()> {
        self.db.delete_replica_info(key)
    }
}

/// Streaming chunk ingest: bytes accumulate in a tmp file, `finalize` checks
/// the declared size, reserves capacity and moves the file into place.
/// Dropping the writer without finalizing leaves only the tmp file, which
/// `abort` (or the next process start) cleans up.
pub struct ChunkWriter {
    sys: Arc<HashChunkSystem>,
    info: ChunkInfo,
    tmp_path: PathBuf,
    file: Option<fs::File>,
    written: u64,
    declared_size: Option<u64>,
}

impl ChunkWriter {
    pub async fn write(&mut self, data: &[u8]) -> ChunkResult<()> {
        if self.file.is_none() {
            self.file = Some(fs::File::create(&self.tmp_path).await?);
        }
        let file = self.file.as_mut().expect("writer file just created");
        file.write_all(data).await?;
        self.written += data.len() as u64;
        Ok(())
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub async fn finalize(mut self) -> ChunkResult<ChunkInfo> {
        if let Some(declared) = self.declared_size
            && declared != self.written
        {
            let received = self.written;
            self.abort().await;
            return Err(ChunkError::SizeMismatch {
                declared,
                received,
            });
        }

        if let Some(mut file) = self.file.take() {
            file.flush().await?;
        } else {
            // Zero data frames still have to produce the tmp file.
            fs::File::create(&self.tmp_path).await?;
        }

        self.info.size = self.written;

        let lock = self.sys.write_lock(&self.info.hash);
        let outcome = {
            let _guard = lock.lock().await;
            self.commit().await
        };
        drop(lock);
        self.sys.drop_write_lock(&self.info.hash);
        outcome
    }

    // Runs under the store's per-hash write lock.
    async fn commit(&mut self) -> ChunkResult<ChunkInfo> {
        if let Some(existing) = self.sys.add_ref(&self.info.hash)? {
            // A concurrent writer landed the same content first; this
            // stream only adds a reference.
            self.abort().await;
            return Ok(existing);
        }

        if let Err(e) = self.sys.reserve(self.info.size) {
            self.abort().await;
            return Err(e);
        }

        let result: ChunkResult<()> = async {
            let dir = self.sys.root.join(&self.info.path);
            fs::create_dir_all(&dir).await?;
            fs::rename(&self.tmp_path, dir.join(&self.info.name)).await?;
            self.sys.db.put_info(&self.info)?;
            self.sys.persist_stat()?;
            Ok(())
        }
        .await;

        match result {
            Ok(()) => Ok(self.info.clone()),
            Err(e) => {
                self.sys.release(self.info.size);
                // The rename may already have happened; clean both locations.
                let final_path = self.sys.chunk_path(&self.info);
                let _ = fs::remove_file(&final_path).await;
                self.abort().await;
                Err(e)
            }
        }
    }

    pub async fn abort(&mut self) {
        self.file.take();
        if let Err(e) = fs::remove_file(&self.tmp_path).await
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::warn!("Failed to remove tmp chunk {:?}: {}", self.tmp_path, e);
        }
    }
}
