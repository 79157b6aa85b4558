use axum::{
    Json, Router,
    body::Body,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode, header::HeaderValue},
    routing::get,
};
use bytes::Bytes;
use futures_util::StreamExt;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;

use super::buffer::BufferPool;
use super::protocol::{
    CheckReply, ENDPOINT_CHUNK, ENDPOINT_CHUNK_INTERNAL, ENDPOINT_REPLICA, ENDPOINT_REPLICA_CHECK,
    ENDPOINT_REPLICA_INFO, ENDPOINT_STATUS, HEADER_CHUNK_INFO, HEADER_CHUNK_NAME,
    HEADER_CHUNK_SIZE, OpReply, ReplicaMeta, StatusReply,
};
use super::system::{ClusterError, DistributedChunkSystem};
use crate::chunks::{ChunkError, ChunkInfo};
use crate::replica::{ChunkSource, ReplicaInfo};

/// Builds the node's full HTTP surface: public chunk access, the
/// owner-internal variants, the replica transfer endpoints and status.
pub fn router(system: Arc<DistributedChunkSystem>, pool: Arc<BufferPool>) -> Router {
    Router::new()
        .route(
            &format!("{}/:hash", ENDPOINT_CHUNK),
            get(handle_get_chunk)
                .post(handle_put_chunk)
                .delete(handle_delete_chunk),
        )
        .route(
            &format!("{}/:hash", ENDPOINT_CHUNK_INTERNAL),
            get(handle_get_chunk_local)
                .post(handle_put_chunk_local)
                .delete(handle_delete_chunk_local),
        )
        .route(
            &format!("{}/:key", ENDPOINT_REPLICA),
            get(handle_get_replica)
                .post(handle_put_replica)
                .delete(handle_delete_replica),
        )
        .route(
            &format!("{}/:key", ENDPOINT_REPLICA_CHECK),
            get(handle_check_replica),
        )
        .route(
            &format!("{}/:key", ENDPOINT_REPLICA_INFO),
            axum::routing::post(handle_update_replica_info),
        )
        .route(ENDPOINT_STATUS, get(handle_status))
        .layer(Extension(system))
        .layer(Extension(pool))
}

fn error_status(e: &ClusterError) -> StatusCode {
    match e {
        ClusterError::Chunk(ChunkError::NotFound(_)) => StatusCode::NOT_FOUND,
        ClusterError::Transport(super::client::TransportError::NotFound) => StatusCode::NOT_FOUND,
        ClusterError::Replica(crate::replica::ReplicaError::NotFound) => StatusCode::NOT_FOUND,
        ClusterError::Unavailable(_) => StatusCode::NOT_FOUND,
        ClusterError::Chunk(ChunkError::Full { .. }) => StatusCode::INSUFFICIENT_STORAGE,
        ClusterError::Chunk(ChunkError::SizeMismatch { .. }) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn parse_hex_key(raw: &str) -> Result<Vec<u8>, (StatusCode, Json<OpReply>)> {
    hex::decode(raw).map_err(|e| {
        (
            StatusCode::BAD_REQUEST,
            Json(OpReply::err(format!("bad hex key: {}", e))),
        )
    })
}

/// Streams an uploaded body into a pooled buffer, spilling to a temp file
/// when it exceeds the pool's buffer size. Mirrors the client download path.
async fn spool_body(
    pool: &Arc<BufferPool>,
    body: Body,
) -> Result<ChunkSource, ClusterError> {
    let mut stream = body.into_data_stream();
    let mut buf = pool.get();
    let mut spilled: Option<(tokio::fs::File, tempfile::TempPath)> = None;
    let mut size = 0u64;

    while let Some(frame) = stream.next().await {
        let frame = frame.map_err(|e| {
            ClusterError::Chunk(ChunkError::Internal(format!("body stream: {}", e)))
        })?;
        size += frame.len() as u64;

        if let Some((file, _)) = spilled.as_mut() {
            file.write_all(&frame).await.map_err(ChunkError::from)?;
            continue;
        }
        if buf.write(&frame).is_err() {
            // Upload outgrew the buffer; move what we have to disk.
            let tmp = tempfile::NamedTempFile::new().map_err(ChunkError::from)?;
            let (std_file, temp_path) = tmp.into_parts();
            let mut file = tokio::fs::File::from_std(std_file);
            file.write_all(buf.as_ref()).await.map_err(ChunkError::from)?;
            file.write_all(&frame).await.map_err(ChunkError::from)?;
            spilled = Some((file, temp_path));
        }
    }

    match spilled {
        Some((mut file, temp_path)) => {
            file.flush().await.map_err(ChunkError::from)?;
            let path = temp_path.to_path_buf();
            Ok(ChunkSource::File {
                path,
                size,
                temp: Some(Arc::new(temp_path)),
            })
        }
        None => Ok(ChunkSource::Memory(Bytes::from_owner(buf))),
    }
}

/// Chunk read response: metadata header first, then the streamed bytes.
async fn chunk_response(
    info: &ChunkInfo,
    source: ChunkSource,
) -> Result<(StatusCode, HeaderMap, Body), ClusterError> {
    let mut headers = HeaderMap::new();
    let json = serde_json::to_string(info).map_err(ChunkError::from)?;
    let value = HeaderValue::from_str(&json)
        .map_err(|e| ClusterError::Chunk(ChunkError::Internal(format!("info header: {}", e))))?;
    headers.insert(HEADER_CHUNK_INFO, value);

    let body = match source {
        ChunkSource::Memory(bytes) => Body::from(bytes),
        ChunkSource::File { path, temp, .. } => {
            let file = tokio::fs::File::open(&path).await.map_err(ChunkError::from)?;
            // Tie any spill file's lifetime to the stream.
            let stream = ReaderStream::new(file).map(move |frame| {
                let _keep = &temp;
                frame
            });
            Body::from_stream(stream)
        }
    };
    Ok((StatusCode::OK, headers, body))
}

fn reply_err(e: ClusterError) -> (StatusCode, Json<OpReply>) {
    (error_status(&e), Json(OpReply::err(&e)))
}

// --- Public chunk endpoints (routed to the owner) ---

pub async fn handle_get_chunk(
    Extension(system): Extension<Arc<DistributedChunkSystem>>,
    Path(hash_hex): Path<String>,
) -> Result<(StatusCode, HeaderMap, Body), (StatusCode, Json<OpReply>)> {
    let hash = parse_hex_key(&hash_hex)?;
    let (info, source) = system.get(&hash).await.map_err(reply_err)?;
    chunk_response(&info, source).await.map_err(reply_err)
}

pub async fn handle_put_chunk(
    Extension(system): Extension<Arc<DistributedChunkSystem>>,
    Extension(pool): Extension<Arc<BufferPool>>,
    Path(hash_hex): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> (StatusCode, Json<OpReply>) {
    match put_chunk_inner(&system, &pool, &hash_hex, &headers, body, false).await {
        Ok(()) => (StatusCode::OK, Json(OpReply::ok())),
        Err(e) => {
            tracing::error!("Chunk store of {} failed: {}", hash_hex, e);
            reply_err(e)
        }
    }
}

pub async fn handle_delete_chunk(
    Extension(system): Extension<Arc<DistributedChunkSystem>>,
    Path(hash_hex): Path<String>,
) -> (StatusCode, Json<OpReply>) {
    let hash = match parse_hex_key(&hash_hex) {
        Ok(hash) => hash,
        Err(reply) => return reply,
    };
    match system.delete(&hash).await {
        Ok(()) => (StatusCode::OK, Json(OpReply::ok())),
        Err(e) => reply_err(e),
    }
}

// --- Owner-internal chunk endpoints (no further routing) ---

pub async fn handle_get_chunk_local(
    Extension(system): Extension<Arc<DistributedChunkSystem>>,
    Path(hash_hex): Path<String>,
) -> Result<(StatusCode, HeaderMap, Body), (StatusCode, Json<OpReply>)> {
    let hash = parse_hex_key(&hash_hex)?;
    let (info, source) = system.get_local(&hash).await.map_err(reply_err)?;
    chunk_response(&info, source).await.map_err(reply_err)
}

pub async fn handle_put_chunk_local(
    Extension(system): Extension<Arc<DistributedChunkSystem>>,
    Extension(pool): Extension<Arc<BufferPool>>,
    Path(hash_hex): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> (StatusCode, Json<OpReply>) {
    match put_chunk_inner(&system, &pool, &hash_hex, &headers, body, true).await {
        Ok(()) => (StatusCode::OK, Json(OpReply::ok())),
        Err(e) => {
            tracing::error!("Local chunk store of {} failed: {}", hash_hex, e);
            reply_err(e)
        }
    }
}

async fn put_chunk_inner(
    system: &Arc<DistributedChunkSystem>,
    pool: &Arc<BufferPool>,
    hash_hex: &str,
    headers: &HeaderMap,
    body: Body,
    local: bool,
) -> Result<(), ClusterError> {
    let hash = hex::decode(hash_hex)
        .map_err(|e| ClusterError::Chunk(ChunkError::Internal(format!("bad hex key: {}", e))))?;
    let name = headers
        .get(HEADER_CHUNK_NAME)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let declared = headers
        .get(HEADER_CHUNK_SIZE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let source = spool_body(pool, body).await?;
    if let Some(declared) = declared
        && declared != source.size()
    {
        return Err(ClusterError::Chunk(ChunkError::SizeMismatch {
            declared,
            received: source.size(),
        }));
    }

    if local {
        system.store_local(&hash, &name, &source).await?;
    } else {
        system.store(&hash, &name, &source).await?;
    }
    Ok(())
}

pub async fn handle_delete_chunk_local(
    Extension(system): Extension<Arc<DistributedChunkSystem>>,
    Path(hash_hex): Path<String>,
) -> (StatusCode, Json<OpReply>) {
    let hash = match parse_hex_key(&hash_hex) {
        Ok(hash) => hash,
        Err(reply) => return reply,
    };
    match system.delete_local(&hash).await {
        Ok(()) => (StatusCode::OK, Json(OpReply::ok())),
        Err(e) => reply_err(e),
    }
}

// --- Replica transfer endpoints ---

/// Receives a replica push: placement record in the header, bytes in the
/// body. The record is persisted beside the chunk so this node can serve
/// recovery later.
pub async fn handle_put_replica(
    Extension(system): Extension<Arc<DistributedChunkSystem>>,
    Extension(pool): Extension<Arc<BufferPool>>,
    Path(key_hex): Path<String>,
    headers: HeaderMap,
    body: Body,
) -> (StatusCode, Json<OpReply>) {
    let record: ReplicaInfo<ReplicaMeta> = match headers
        .get(super::protocol::HEADER_REPLICA_INFO)
        .and_then(|v| v.to_str().ok())
        .and_then(|json| serde_json::from_str(json).ok())
    {
        Some(record) => record,
        None => {
            return (
                StatusCode::BAD_REQUEST,
                Json(OpReply::err("missing or malformed replica info header")),
            );
        }
    };
    if hex::encode(&record.key) != key_hex {
        return (
            StatusCode::BAD_REQUEST,
            Json(OpReply::err("replica key does not match path")),
        );
    }

    let result: Result<(), ClusterError> = async {
        let source = spool_body(&pool, body).await?;
        if source.size() != record.custom.size {
            return Err(ClusterError::Chunk(ChunkError::SizeMismatch {
                declared: record.custom.size,
                received: source.size(),
            }));
        }
        let local = system.local();
        if local.add_ref(&record.key)?.is_none() {
            match &source {
                ChunkSource::Memory(bytes) => {
                    local
                        .store_bytes(&record.key, &record.custom.name, bytes)
                        .await?;
                }
                ChunkSource::File { path, size, .. } => {
                    let mut writer =
                        local.create_writer(&record.key, &record.custom.name, Some(*size));
                    let mut file =
                        tokio::fs::File::open(path).await.map_err(ChunkError::from)?;
                    let mut buf = vec![0u8; 64 * 1024];
                    loop {
                        let n = tokio::io::AsyncReadExt::read(&mut file, &mut buf)
                            .await
                            .map_err(ChunkError::from)?;
                        if n == 0 {
                            break;
                        }
                        writer.write(&buf[..n]).await?;
                    }
                    writer.finalize().await?;
                }
            }
        }
        let json = serde_json::to_string(&record).map_err(ChunkError::from)?;
        local.put_replica_info(&record.key, &json)?;
        Ok(())
    }
    .await;

    match result {
        Ok(()) => (StatusCode::OK, Json(OpReply::ok())),
        Err(e) => {
            tracing::error!("Replica store of {} failed: {}", key_hex, e);
            reply_err(e)
        }
    }
}

/// Serves a replica to a peer. Backups serve exactly what they hold; a miss
/// is a plain 404, never a heal (the asker is the one healing).
pub async fn handle_get_replica(
    Extension(system): Extension<Arc<DistributedChunkSystem>>,
    Path(key_hex): Path<String>,
) -> Result<(StatusCode, HeaderMap, Body), (StatusCode, Json<OpReply>)> {
    let key = parse_hex_key(&key_hex)?;
    let (info, _file) = system
        .local()
        .get(&key)
        .await
        .map_err(|e| reply_err(e.into()))?;
    let source = ChunkSource::from_file(system.local().chunk_path(&info), info.size);
    chunk_response(&info, source).await.map_err(reply_err)
}

pub async fn handle_delete_replica(
    Extension(system): Extension<Arc<DistributedChunkSystem>>,
    Path(key_hex): Path<String>,
) -> (StatusCode, Json<OpReply>) {
    let key = match parse_hex_key(&key_hex) {
        Ok(key) => key,
        Err(reply) => return reply,
    };
    match system.local().delete(&key).await {
        Ok(()) => {
            if let Ok(false) = system.local().exists(&key) {
                if let Err(e) = system.local().delete_replica_info(&key) {
                    tracing::warn!("Failed to drop placement record for {}: {}", key_hex, e);
                }
            }
            (StatusCode::OK, Json(OpReply::ok()))
        }
        Err(ChunkError::NotFound(_)) => (
            StatusCode::NOT_FOUND,
            Json(OpReply::err("no such replica")),
        ),
        Err(e) => reply_err(e.into()),
    }
}

pub async fn handle_check_replica(
    Extension(system): Extension<Arc<DistributedChunkSystem>>,
    Path(key_hex): Path<String>,
) -> (StatusCode, Json<CheckReply>) {
    let key = match hex::decode(&key_hex) {
        Ok(key) => key,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(CheckReply {
                    exists: false,
                    error: format!("bad hex key: {}", e),
                }),
            );
        }
    };
    match system.local().exists(&key) {
        Ok(exists) => (
            StatusCode::OK,
            Json(CheckReply {
                exists,
                error: String::new(),
            }),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(CheckReply {
                exists: false,
                error: e.to_string(),
            }),
        ),
    }
}

/// Replaces this node's copy of a placement record after an adjustment.
pub async fn handle_update_replica_info(
    Extension(system): Extension<Arc<DistributedChunkSystem>>,
    Path(key_hex): Path<String>,
    Json(record): Json<ReplicaInfo<ReplicaMeta>>,
) -> (StatusCode, Json<OpReply>) {
    if hex::encode(&record.key) != key_hex {
        return (
            StatusCode::BAD_REQUEST,
            Json(OpReply::err("replica key does not match path")),
        );
    }
    let json = match serde_json::to_string(&record) {
        Ok(json) => json,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(OpReply::err(format!("encode record: {}", e))),
            );
        }
    };
    match system.local().put_replica_info(&record.key, &json) {
        Ok(()) => (StatusCode::OK, Json(OpReply::ok())),
        Err(e) => reply_err(e.into()),
    }
}

pub async fn handle_status(
    Extension(system): Extension<Arc<DistributedChunkSystem>>,
) -> Json<StatusReply> {
    Json(system.status())
}
