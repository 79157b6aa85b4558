use std::sync::{Arc, Mutex};

/// Bounded pool of chunk-sized byte buffers.
///
/// Small chunk transfers borrow a buffer instead of allocating per request.
/// A buffer is zeroed when it comes back so stale bytes never leak into the
/// next borrower; every exit path returns its buffer because the return
/// happens in [`PooledBuf`]'s `Drop`.
pub struct BufferPool {
    buf_size: usize,
    max_idle: usize,
    idle: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    pub fn new(buf_size: usize, max_idle: usize) -> Arc<Self> {
        Arc::new(Self {
            buf_size,
            max_idle,
            idle: Mutex::new(Vec::new()),
        })
    }

    pub fn buf_size(&self) -> usize {
        self.buf_size
    }

    pub fn idle_count(&self) -> usize {
        self.idle.lock().expect("buffer pool lock poisoned").len()
    }

    pub fn get(self: &Arc<Self>) -> PooledBuf {
        let data = self
            .idle
            .lock()
            .expect("buffer pool lock poisoned")
            .pop()
            .unwrap_or_else(|| vec![0u8; self.buf_size]);
        PooledBuf {
            data: Some(data),
            filled: 0,
            pool: self.clone(),
        }
    }

    fn put_back(&self, mut data: Vec<u8>) {
        data.fill(0);
        let mut idle = self.idle.lock().expect("buffer pool lock poisoned");
        if idle.len() < self.max_idle {
            idle.push(data);
        }
        // Over the bound the buffer is simply dropped.
    }
}

/// A borrowed pool buffer. Grows a filled prefix through `write`; exposes
/// only that prefix through `AsRef<[u8]>` (which is what lets it back a
/// zero-copy `bytes::Bytes` via `Bytes::from_owner`).
pub struct PooledBuf {
    data: Option<Vec<u8>>,
    filled: usize,
    pool: Arc<BufferPool>,
}

impl PooledBuf {
    /// Appends to the filled prefix. Fails when the payload would exceed
    /// the pool's buffer size; the caller must spill to disk instead.
    pub fn write(&mut self, chunk: &[u8]) -> Result<(), BufferFull> {
        let data = self.data.as_mut().expect("pooled buffer already released");
        if self.filled + chunk.len() > data.len() {
            return Err(BufferFull);
        }
        data[self.filled..self.filled + chunk.len()].copy_from_slice(chunk);
        self.filled += chunk.len();
        Ok(())
    }

    pub fn filled(&self) -> usize {
        self.filled
    }
}

impl AsRef<[u8]> for PooledBuf {
    fn as_ref(&self) -> &[u8] {
        let data = self.data.as_ref().expect("pooled buffer already released");
        &data[..self.filled]
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if let Some(data) = self.data.take() {
            self.pool.put_back(data);
        }
    }
}

#[derive(Debug)]
pub struct BufferFull;

impl std::fmt::Display for BufferFull {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("payload exceeds pooled buffer size")
    }
}

impl std::error::Error for BufferFull {}
