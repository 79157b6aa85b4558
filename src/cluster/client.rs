use bytes::Bytes;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use super::buffer::BufferPool;
use super::protocol::{
    CheckReply, ENDPOINT_CHUNK_INTERNAL, ENDPOINT_REPLICA, ENDPOINT_REPLICA_CHECK,
    ENDPOINT_REPLICA_INFO, HEADER_CHUNK_INFO, HEADER_CHUNK_NAME, HEADER_CHUNK_SIZE,
    HEADER_REPLICA_INFO, OpReply, ReplicaMeta,
};
use crate::chunks::ChunkInfo;
use crate::membership::types::Node;
use crate::replica::{ChunkSource, ReplicaClient, ReplicaError, ReplicaInfo};

/// Per-call deadline: a timeout is a normal failure of that candidate node.
pub const DEFAULT_RPC_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("chunk not found on remote node")]
    NotFound,

    #[error("request timed out")]
    Timeout,

    #[error("http transport error: {0}")]
    Http(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("remote error: {0}")]
    Remote(String),

    #[error("size mismatch: got {got} bytes, declared {declared}")]
    SizeMismatch { got: u64, declared: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Http(e.to_string())
        }
    }
}

impl From<TransportError> for ReplicaError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::NotFound => ReplicaError::NotFound,
            TransportError::SizeMismatch { got, declared } => ReplicaError::SizeMismatch {
                sent: got,
                declared,
            },
            TransportError::Remote(msg) => ReplicaError::Remote(msg),
            other => ReplicaError::Transport(other.to_string()),
        }
    }
}

/// HTTP client for internode chunk and replica transfer.
///
/// Connections are opened per call and bounded by a deadline; chunk
/// transfers are coarse-grained enough that no persistent pool is kept.
/// Downloads below the buffer threshold land in pooled buffers, larger ones
/// stream into a temp file that is deleted when the last reader drops.
pub struct ChunkClient {
    http: reqwest::Client,
    timeout: Duration,
    buffer_threshold: usize,
    pool: Arc<BufferPool>,
}

impl ChunkClient {
    pub fn new(buffer_threshold: usize, pool: Arc<BufferPool>) -> Self {
        Self::with_timeout(buffer_threshold, pool, DEFAULT_RPC_TIMEOUT)
    }

    pub fn with_timeout(
        buffer_threshold: usize,
        pool: Arc<BufferPool>,
        timeout: Duration,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout,
            buffer_threshold,
            pool,
        }
    }

    fn chunk_url(&self, node: &Node, hash: &[u8]) -> String {
        format!(
            "http://{}{}/{}",
            node.http_addr,
            ENDPOINT_CHUNK_INTERNAL,
            hex::encode(hash)
        )
    }

    fn replica_url(&self, node: &Node, base: &str, key: &[u8]) -> String {
        format!("http://{}{}/{}", node.http_addr, base, hex::encode(key))
    }

    /// Turns a rewindable source into a fresh request body.
    async fn source_body(source: &ChunkSource) -> Result<reqwest::Body, TransportError> {
        match source {
            ChunkSource::Memory(bytes) => Ok(reqwest::Body::from(bytes.clone())),
            ChunkSource::File { path, .. } => {
                let file = tokio::fs::File::open(path).await?;
                Ok(reqwest::Body::wrap_stream(ReaderStream::new(file)))
            }
        }
    }

    /// Streams a response body into a pooled buffer or a spill file,
    /// verifying the byte count against the declared size.
    async fn download(
        &self,
        resp: reqwest::Response,
        declared: u64,
    ) -> Result<ChunkSource, TransportError> {
        let mut stream = resp.bytes_stream();
        if declared > self.buffer_threshold as u64 {
            let tmp = tempfile::NamedTempFile::new()?;
            let (std_file, temp_path) = tmp.into_parts();
            let mut file = tokio::fs::File::from_std(std_file);
            let mut got = 0u64;
            while let Some(chunk) = stream.next().await {
                // A failed frame drops `temp_path`, deleting the spill file.
                let chunk = chunk.map_err(TransportError::from)?;
                file.write_all(&chunk).await?;
                got += chunk.len() as u64;
                if got > declared {
                    return Err(TransportError::SizeMismatch { got, declared });
                }
            }
            if got != declared {
                return Err(TransportError::SizeMismatch { got, declared });
            }
            file.flush().await?;
            let path = temp_path.to_path_buf();
            Ok(ChunkSource::File {
                path,
                size: got,
                temp: Some(Arc::new(temp_path)),
            })
        } else {
            let mut buf = self.pool.get();
            let mut got = 0u64;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk.map_err(TransportError::from)?;
                got += chunk.len() as u64;
                buf.write(&chunk)
                    .map_err(|e| TransportError::Protocol(e.to_string()))?;
            }
            if got != declared {
                return Err(TransportError::SizeMismatch { got, declared });
            }
            Ok(ChunkSource::Memory(Bytes::from_owner(buf)))
        }
    }

    /// Reads a write acknowledgment: transport status plus the explicit
    /// error frame.
    async fn parse_reply(resp: reqwest::Response) -> Result<(), TransportError> {
        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(TransportError::NotFound);
        }
        let reply: OpReply = resp
            .json()
            .await
            .map_err(|e| TransportError::Protocol(format!("bad reply: {}", e)))?;
        if !reply.error.is_empty() {
            return Err(TransportError::Remote(reply.error));
        }
        if !status.is_success() {
            return Err(TransportError::Remote(format!("status {}", status)));
        }
        Ok(())
    }

    /// Fetches a chunk: the first frame is the `ChunkInfo` header, the body
    /// is the data stream.
    pub async fn get_chunk(
        &self,
        node: &Node,
        hash: &[u8],
    ) -> Result<(ChunkInfo, ChunkSource), TransportError> {
        let resp = self
            .http
            .get(self.chunk_url(node, hash))
            .timeout(self.timeout)
            .send()
            .await?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(TransportError::NotFound);
        }
        if !resp.status().is_success() {
            return Err(TransportError::Remote(format!("status {}", resp.status())));
        }
        let info: ChunkInfo = resp
            .headers()
            .get(HEADER_CHUNK_INFO)
            .and_then(|value| value.to_str().ok())
            .and_then(|json| serde_json::from_str(json).ok())
            .ok_or_else(|| TransportError::Protocol("missing chunk info header".into()))?;
        let source = self.download(resp, info.size).await?;
        Ok((info, source))
    }

    pub async fn put_chunk(
        &self,
        node: &Node,
        hash: &[u8],
        name: &str,
        source: &ChunkSource,
    ) -> Result<(), TransportError> {
        let body = Self::source_body(source).await?;
        let resp = self
            .http
            .post(self.chunk_url(node, hash))
            .header(HEADER_CHUNK_NAME, name)
            .header(HEADER_CHUNK_SIZE, source.size())
            .body(body)
            .timeout(self.timeout)
            .send()
            .await?;
        Self::parse_reply(resp).await
    }

    pub async fn delete_chunk(&self, node: &Node, hash: &[u8]) -> Result<(), TransportError> {
        let resp = self
            .http
            .delete(self.chunk_url(node, hash))
            .timeout(self.timeout)
            .send()
            .await?;
        Self::parse_reply(resp).await
    }
}

/// The injected per-node replica operations, over the same HTTP surface.
#[async_trait::async_trait]
impl ReplicaClient<ReplicaMeta> for ChunkClient {
    async fn put(
        &self,
        node: &Node,
        info: &ReplicaInfo<ReplicaMeta>,
        source: &ChunkSource,
    ) -> Result<(), ReplicaError> {
        let info_json = serde_json::to_string(info)
            .map_err(|e| ReplicaError::Transport(format!("encode replica info: {}", e)))?;
        if source.size() != info.custom.size {
            return Err(ReplicaError::SizeMismatch {
                sent: source.size(),
                declared: info.custom.size,
            });
        }
        let body = Self::source_body(source).await.map_err(ReplicaError::from)?;
        let resp = self
            .http
            .post(self.replica_url(node, ENDPOINT_REPLICA, &info.key))
            .header(HEADER_REPLICA_INFO, info_json)
            .body(body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(TransportError::from)?;
        Self::parse_reply(resp).await.map_err(ReplicaError::from)
    }

    async fn fetch(&self, node: &Node, key: &[u8]) -> Result<ChunkSource, ReplicaError> {
        let resp = self
            .http
            .get(self.replica_url(node, ENDPOINT_REPLICA, key))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(TransportError::from)?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ReplicaError::NotFound);
        }
        if !resp.status().is_success() {
            return Err(ReplicaError::Remote(format!("status {}", resp.status())));
        }
        let info: ChunkInfo = resp
            .headers()
            .get(HEADER_CHUNK_INFO)
            .and_then(|value| value.to_str().ok())
            .and_then(|json| serde_json::from_str(json).ok())
            .ok_or_else(|| ReplicaError::Transport("missing chunk info header".into()))?;
        self.download(resp, info.size)
            .await
            .map_err(ReplicaError::from)
    }

    async fn delete(
        &self,
        node: &Node,
        info: &ReplicaInfo<ReplicaMeta>,
    ) -> Result<(), ReplicaError> {
        let resp = self
            .http
            .delete(self.replica_url(node, ENDPOINT_REPLICA, &info.key))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(TransportError::from)?;
        Self::parse_reply(resp).await.map_err(ReplicaError::from)
    }

    async fn check(&self, node: &Node, key: &[u8]) -> Result<bool, ReplicaError> {
        let resp = self
            .http
            .get(self.replica_url(node, ENDPOINT_REPLICA_CHECK, key))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(TransportError::from)?;
        let reply: CheckReply = resp
            .json()
            .await
            .map_err(|e| ReplicaError::Transport(format!("bad check reply: {}", e)))?;
        if !reply.error.is_empty() {
            return Err(ReplicaError::Remote(reply.error));
        }
        Ok(reply.exists)
    }

    async fn update_info(
        &self,
        node: &Node,
        info: &ReplicaInfo<ReplicaMeta>,
    ) -> Result<(), ReplicaError> {
        let resp = self
            .http
            .post(self.replica_url(node, ENDPOINT_REPLICA_INFO, &info.key))
            .json(info)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(TransportError::from)?;
        Self::parse_reply(resp).await.map_err(ReplicaError::from)
    }
}
