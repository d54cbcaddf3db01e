use super::ApiResult;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use regionsync_sync::{AgentStats, FileService, RecoveryReport};
use regionsync_types::{DirectoryEntry, FileId, FileMetadata, RegionId};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;

/// Query of `PUT /files`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadQuery {
    pub path: String,
    pub name: String,
    pub mime_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(default = "root_dir")]
    dir: String,
}

fn root_dir() -> String {
    "/".to_string()
}

/// Body of `GET /sync/status`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncStatus {
    pub region_id: RegionId,
    pub stats: AgentStats,
    pub last_sync_at: Option<DateTime<Utc>>,
}

type Shared = State<Arc<FileService>>;

/// Routes served by a region node.
pub fn region_router(service: Arc<FileService>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/files", put(upload).get(list))
        .route("/api/v1/files/{id}", get(download).put(update).delete(remove))
        .route("/api/v1/files/{id}/metadata", get(stat))
        .route("/api/v1/sync/status", get(status))
        .route("/api/v1/sync/recover", post(recover))
        .with_state(service)
}

async fn health(State(service): Shared) -> Json<Value> {
    Json(json!({ "status": "ok", "role": "region", "region_id": service.region_id() }))
}

async fn upload(
    State(service): Shared,
    Query(query): Query<UploadQuery>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<FileMetadata>)> {
    let meta = service
        .upload(&query.path, &query.name, &body, query.mime_type.as_deref())
        .await?;
    Ok((StatusCode::CREATED, Json(meta)))
}

async fn list(State(service): Shared, Query(query): Query<ListQuery>) -> ApiResult<Json<Vec<DirectoryEntry>>> {
    Ok(Json(service.list(&query.dir)?))
}

async fn download(State(service): Shared, Path(id): Path<FileId>) -> ApiResult<impl IntoResponse> {
    let meta = service.stat(&id)?;
    let content = service.download(&id).await?;
    Ok(([(header::CONTENT_TYPE, meta.mime_type)], content))
}

async fn update(State(service): Shared, Path(id): Path<FileId>, body: Bytes) -> ApiResult<Json<FileMetadata>> {
    Ok(Json(service.update_content(&id, &body).await?))
}

async fn remove(State(service): Shared, Path(id): Path<FileId>) -> ApiResult<StatusCode> {
    service.delete(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn stat(State(service): Shared, Path(id): Path<FileId>) -> ApiResult<Json<FileMetadata>> {
    Ok(Json(service.stat(&id)?))
}

async fn status(State(service): Shared) -> Json<SyncStatus> {
    let agent = service.agent();
    Json(SyncStatus {
        region_id: agent.region_id().clone(),
        stats: agent.stats(),
        last_sync_at: agent.last_sync_at(),
    })
}

async fn recover(State(service): Shared) -> ApiResult<Json<RecoveryReport>> {
    Ok(Json(service.agent().recover().await?))
}
