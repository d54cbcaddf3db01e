//! HTTP API for both node roles.
//!
//! All routes live under `/api/v1`. Errors are returned as an
//! [`ErrorBody`] with a status derived from the underlying [`SyncError`].

mod coordinator;
mod region;

pub use coordinator::{RegisterRegion, ResolveRequest, coordinator_router};
pub use region::{SyncStatus, UploadQuery, region_router};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use regionsync_sync::SyncError;
use regionsync_types::{ConflictId, FileId};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// JSON body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable error class, e.g. `not_found`.
    pub kind: String,
    pub error: String,
    /// File a `conflict` error refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_id: Option<FileId>,
    /// Conflict an `already_resolved` error refers to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflict_id: Option<ConflictId>,
}

/// Response wrapper turning a [`SyncError`] into an HTTP error.
#[derive(Debug)]
pub struct ApiError(pub SyncError);

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn classify(&self) -> (StatusCode, &'static str) {
        match &self.0 {
            SyncError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            SyncError::AlreadyExists(_) => (StatusCode::CONFLICT, "already_exists"),
            SyncError::Conflict { .. } => (StatusCode::CONFLICT, "conflict"),
            SyncError::AlreadyResolved(_) => (StatusCode::CONFLICT, "already_resolved"),
            SyncError::QueueFull { .. } => (StatusCode::SERVICE_UNAVAILABLE, "queue_full"),
            SyncError::InvalidMetadata(_) => (StatusCode::BAD_REQUEST, "invalid_metadata"),
            SyncError::SyncTimeout(_) => (StatusCode::GATEWAY_TIMEOUT, "timeout"),
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal"),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.classify();
        if status.is_server_error() {
            error!(kind, "Request failed: {}", self.0);
        }
        let body = ErrorBody {
            kind: kind.to_string(),
            error: self.0.to_string(),
            file_id: match &self.0 {
                SyncError::Conflict { file_id } => Some(*file_id),
                _ => None,
            },
            conflict_id: match &self.0 {
                SyncError::AlreadyResolved(id) => Some(*id),
                _ => None,
            },
        };
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Serves `router` on `listener` until `shutdown` is cancelled.
pub async fn serve(listener: TcpListener, router: Router, shutdown: CancellationToken) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "HTTP API listening");
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
