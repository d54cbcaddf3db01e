use super::ApiResult;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use regionsync_sync::{
    Capacity, Conflict, Coordinator, EventOutcome, GeoLocation, RegionInfo, RegionStatus,
    Resolution, Side, SyncError,
};
use regionsync_types::{ChangeEvent, ConflictId, FileId, GlobalFileMetadata, RegionId};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::sync::Arc;

/// Body of `POST /regions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRegion {
    pub id: RegionId,
    pub name: String,
    pub endpoint: String,
    #[serde(default)]
    pub location: GeoLocation,
    #[serde(default)]
    pub capacity: Capacity,
}

impl From<&RegionInfo> for RegisterRegion {
    fn from(info: &RegionInfo) -> Self {
        Self {
            id: info.id.clone(),
            name: info.name.clone(),
            endpoint: info.endpoint.clone(),
            location: info.location.clone(),
            capacity: info.capacity,
        }
    }
}

/// Body of `POST /conflicts/{id}/resolve`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ResolveRequest {
    pub side: Side,
}

type Shared = State<Arc<Coordinator>>;

/// Routes served by the coordinator.
pub fn coordinator_router(coordinator: Arc<Coordinator>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/regions", post(register_region).get(list_regions))
        .route("/api/v1/regions/{id}", get(get_region).delete(deregister_region))
        .route("/api/v1/regions/{id}/heartbeat", post(heartbeat))
        .route("/api/v1/changes", post(submit_changes))
        .route("/api/v1/sync/pending/{region_id}", get(pending_changes))
        .route("/api/v1/metadata/{id}", get(metadata))
        .route("/api/v1/conflicts", get(conflicts))
        .route("/api/v1/conflicts/{id}/resolve", post(resolve_conflict))
        .with_state(coordinator)
}

async fn health(State(coordinator): Shared) -> Json<Value> {
    let regions = coordinator.regions().await.len();
    Json(json!({ "status": "ok", "role": "coordinator", "regions": regions }))
}

async fn register_region(
    State(coordinator): Shared,
    Json(req): Json<RegisterRegion>,
) -> ApiResult<(StatusCode, Json<RegionInfo>)> {
    if RegionId::new(req.id.as_str()).is_err() || req.id.is_coordinator() {
        return Err(SyncError::InvalidMetadata(format!("invalid region id {:?}", req.id.as_str())).into());
    }
    let mut info = RegionInfo::new(req.id, req.name, req.endpoint);
    info.location = req.location;
    info.capacity = req.capacity;
    let registered = coordinator.register_region(info).await?;
    Ok((StatusCode::CREATED, Json(registered)))
}

async fn list_regions(State(coordinator): Shared) -> Json<Vec<RegionInfo>> {
    Json(coordinator.regions().await)
}

async fn get_region(State(coordinator): Shared, Path(id): Path<RegionId>) -> ApiResult<Json<RegionInfo>> {
    Ok(Json(coordinator.region(&id).await?))
}

async fn deregister_region(State(coordinator): Shared, Path(id): Path<RegionId>) -> ApiResult<Json<Value>> {
    let discarded = coordinator.deregister_region(&id).await?;
    Ok(Json(json!({ "discarded": discarded })))
}

async fn heartbeat(
    State(coordinator): Shared,
    Path(id): Path<RegionId>,
    Json(status): Json<RegionStatus>,
) -> ApiResult<StatusCode> {
    coordinator.heartbeat(&id, status).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn submit_changes(
    State(coordinator): Shared,
    Json(events): Json<Vec<ChangeEvent>>,
) -> Json<Vec<EventOutcome>> {
    Json(coordinator.submit_changes(events).await)
}

async fn pending_changes(
    State(coordinator): Shared,
    Path(region_id): Path<RegionId>,
) -> ApiResult<Json<Vec<ChangeEvent>>> {
    Ok(Json(coordinator.pending_changes(&region_id).await?))
}

async fn metadata(State(coordinator): Shared, Path(id): Path<FileId>) -> ApiResult<Json<GlobalFileMetadata>> {
    Ok(Json(coordinator.metadata(&id).await?))
}

async fn conflicts(State(coordinator): Shared) -> Json<Vec<Conflict>> {
    Json(coordinator.conflicts().await)
}

async fn resolve_conflict(
    State(coordinator): Shared,
    Path(id): Path<ConflictId>,
    Json(req): Json<ResolveRequest>,
) -> ApiResult<Json<Resolution>> {
    Ok(Json(coordinator.resolve_conflict(&id, req.side).await?))
}
