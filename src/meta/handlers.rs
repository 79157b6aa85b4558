use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    routing::post,
};
use std::sync::Arc;

use super::protocol::{
    DirListReply, DirRequest, ENDPOINT_DIR, ENDPOINT_DIR_LIST, ENDPOINT_DIR_RENAME,
    ENDPOINT_METADATA, ENDPOINT_METADATA_GET, ENDPOINT_SPACE, MetaReply, MetadataReply,
    NewSpaceRequest, PutMetadataRequest, RenameDirRequest,
};
use super::service::MetaStore;
use super::types::MetaError;

pub fn router(store: Arc<dyn MetaStore>) -> Router {
    Router::new()
        .route(ENDPOINT_SPACE, post(handle_new_space))
        .route(
            &format!("{}/:space", ENDPOINT_SPACE),
            axum::routing::delete(handle_delete_space),
        )
        .route(ENDPOINT_DIR, post(handle_make_dir).delete(handle_delete_dir))
        .route(ENDPOINT_DIR_RENAME, post(handle_rename_dir))
        .route(ENDPOINT_DIR_LIST, post(handle_get_dir_sub))
        .route(
            ENDPOINT_METADATA,
            post(handle_put_metadata).delete(handle_delete_metadata),
        )
        .route(ENDPOINT_METADATA_GET, post(handle_get_metadata))
        .layer(Extension(store))
}

fn error_status(e: &MetaError) -> StatusCode {
    match e {
        MetaError::SpaceNotFound(_) | MetaError::NotFound(_) => StatusCode::NOT_FOUND,
        MetaError::SpaceExists(_) | MetaError::AlreadyExists(_) => StatusCode::CONFLICT,
        MetaError::InvalidName(_) => StatusCode::BAD_REQUEST,
        MetaError::Full { .. } => StatusCode::INSUFFICIENT_STORAGE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reply(result: Result<(), MetaError>) -> (StatusCode, Json<MetaReply>) {
    match result {
        Ok(()) => (StatusCode::OK, Json(MetaReply::ok())),
        Err(e) => (error_status(&e), Json(MetaReply::err(&e))),
    }
}

pub async fn handle_new_space(
    Extension(store): Extension<Arc<dyn MetaStore>>,
    Json(req): Json<NewSpaceRequest>,
) -> (StatusCode, Json<MetaReply>) {
    reply(store.new_space(&req.space, req.capacity).await)
}

pub async fn handle_delete_space(
    Extension(store): Extension<Arc<dyn MetaStore>>,
    Path(space): Path<String>,
) -> (StatusCode, Json<MetaReply>) {
    reply(store.delete_space(&space).await)
}

pub async fn handle_make_dir(
    Extension(store): Extension<Arc<dyn MetaStore>>,
    Json(req): Json<DirRequest>,
) -> (StatusCode, Json<MetaReply>) {
    reply(store.make_dir(&req.space, &req.base, &req.name).await)
}

pub async fn handle_rename_dir(
    Extension(store): Extension<Arc<dyn MetaStore>>,
    Json(req): Json<RenameDirRequest>,
) -> (StatusCode, Json<MetaReply>) {
    reply(
        store
            .rename_dir(&req.space, &req.base, &req.old_name, &req.new_name)
            .await,
    )
}

pub async fn handle_delete_dir(
    Extension(store): Extension<Arc<dyn MetaStore>>,
    Json(req): Json<DirRequest>,
) -> (StatusCode, Json<MetaReply>) {
    reply(store.delete_dir(&req.space, &req.base, &req.name).await)
}

pub async fn handle_get_dir_sub(
    Extension(store): Extension<Arc<dyn MetaStore>>,
    Json(req): Json<DirRequest>,
) -> (StatusCode, Json<DirListReply>) {
    match store.get_dir_sub(&req.space, &req.base, &req.name).await {
        Ok(entries) => (
            StatusCode::OK,
            Json(DirListReply {
                entries,
                error: String::new(),
            }),
        ),
        Err(e) => (
            error_status(&e),
            Json(DirListReply {
                entries: Vec::new(),
                error: e.to_string(),
            }),
        ),
    }
}

pub async fn handle_put_metadata(
    Extension(store): Extension<Arc<dyn MetaStore>>,
    Json(req): Json<PutMetadataRequest>,
) -> (StatusCode, Json<MetaReply>) {
    reply(
        store
            .put_metadata(&req.space, &req.base, &req.name, &req.metadata)
            .await,
    )
}

pub async fn handle_get_metadata(
    Extension(store): Extension<Arc<dyn MetaStore>>,
    Json(req): Json<DirRequest>,
) -> (StatusCode, Json<MetadataReply>) {
    match store.get_metadata(&req.space, &req.base, &req.name).await {
        Ok(metadata) => (
            StatusCode::OK,
            Json(MetadataReply {
                metadata: Some(metadata),
                error: String::new(),
            }),
        ),
        Err(e) => (
            error_status(&e),
            Json(MetadataReply {
                metadata: None,
                error: e.to_string(),
            }),
        ),
    }
}

pub async fn handle_delete_metadata(
    Extension(store): Extension<Arc<dyn MetaStore>>,
    Json(req): Json<DirRequest>,
) -> (StatusCode, Json<MetaReply>) {
    reply(store.delete_metadata(&req.space, &req.base, &req.name).await)
}
