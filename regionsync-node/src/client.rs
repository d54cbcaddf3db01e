//! [`CoordinatorClient`] over HTTP.

use crate::api::{ErrorBody, RegisterRegion};
use async_trait::async_trait;
use regionsync_sync::{CoordinatorClient, EventOutcome, RegionInfo, RegionStatus, SyncError, SyncResult};
use regionsync_types::{ChangeEvent, RegionId};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::debug;

/// Talks to a coordinator node's HTTP API.
///
/// Connection failures, timeouts and 5xx answers surface as retryable
/// errors so the agent's retry policy applies to them.
#[derive(Debug, Clone)]
pub struct HttpCoordinatorClient {
    base_url: String,
    http: Client,
    timeout: Duration,
}

impl HttpCoordinatorClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> SyncResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{path}", self.base_url)
    }

    /// Announces a region to the coordinator.
    pub async fn register_region(&self, info: &RegionInfo) -> SyncResult<RegionInfo> {
        let req = self.http.post(self.url("/regions")).json(&RegisterRegion::from(info));
        self.send_json(req).await
    }

    pub async fn deregister_region(&self, id: &RegionId) -> SyncResult<()> {
        self.send_empty(self.http.delete(self.url(&format!("/regions/{id}")))).await
    }

    async fn send(&self, req: RequestBuilder) -> SyncResult<reqwest::Response> {
        let resp = req.send().await.map_err(|e| self.transport_error(&e))?;
        if resp.status().is_success() {
            Ok(resp)
        } else {
            Err(status_error(resp).await)
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> SyncResult<T> {
        self.send(req)
            .await?
            .json()
            .await
            .map_err(|e| SyncError::SyncFailed(format!("failed to decode coordinator response: {e}")))
    }

    async fn send_empty(&self, req: RequestBuilder) -> SyncResult<()> {
        self.send(req).await.map(|_| ())
    }

    fn transport_error(&self, err: &reqwest::Error) -> SyncError {
        if err.is_timeout() {
            SyncError::SyncTimeout(self.timeout)
        } else if err.is_connect() {
            SyncError::RegionUnavailable(format!("coordinator unreachable: {err}"))
        } else {
            SyncError::SyncFailed(format!("request to coordinator failed: {err}"))
        }
    }
}

/// Rebuilds the coordinator's error from a non-success response.
async fn status_error(resp: reqwest::Response) -> SyncError {
    let status = resp.status();
    let body = resp.json::<ErrorBody>().await.unwrap_or_else(|_| ErrorBody {
        kind: String::new(),
        error: status.to_string(),
        file_id: None,
        conflict_id: None,
    });
    debug!(%status, kind = %body.kind, "Coordinator returned an error");

    let msg = body.error;
    match status {
        StatusCode::NOT_FOUND => SyncError::NotFound(msg),
        StatusCode::CONFLICT => match (body.kind.as_str(), body.file_id, body.conflict_id) {
            ("conflict", Some(file_id), _) => SyncError::Conflict { file_id },
            ("already_resolved", _, Some(id)) => SyncError::AlreadyResolved(id),
            _ => SyncError::AlreadyExists(msg),
        },
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => SyncError::InvalidMetadata(msg),
        StatusCode::SERVICE_UNAVAILABLE => SyncError::RegionUnavailable(msg),
        s if s.is_server_error() => SyncError::SyncFailed(msg),
        _ => SyncError::InvalidMetadata(format!("{status}: {msg}")),
    }
}

#[async_trait]
impl CoordinatorClient for HttpCoordinatorClient {
    async fn push_changes(&self, events: &[ChangeEvent]) -> SyncResult<Vec<EventOutcome>> {
        self.send_json(self.http.post(self.url("/changes")).json(events)).await
    }

    async fn pull_changes(&self, region: &RegionId) -> SyncResult<Vec<ChangeEvent>> {
        self.send_json(self.http.get(self.url(&format!("/sync/pending/{region}"))))
            .await
    }

    async fn heartbeat(&self, region: &RegionId, status: &RegionStatus) -> SyncResult<()> {
        let req = self
            .http
            .post(self.url(&format!("/regions/{region}/heartbeat")))
            .json(status);
        self.send_empty(req).await
    }
}
