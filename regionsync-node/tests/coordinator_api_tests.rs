use regionsync_node::HttpCoordinatorClient;
use regionsync_node::api::{ApiError, ErrorBody, coordinator_router};
use regionsync_sync::{
    ConflictConfig, Coordinator, CoordinatorClient, EngineConfig, OutcomeStatus, RegionInfo,
    RegionStatus, RegistryConfig, SyncError,
};
use regionsync_types::{
    ChangeEvent, ChangeType, ConflictId, FileId, FileMetadata, GlobalFileMetadata, RegionId,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

/// Spin up a coordinator on an OS-assigned port, returning the base URL.
async fn spawn_coordinator() -> (String, Arc<Coordinator>) {
    let coordinator = Arc::new(Coordinator::new(
        EngineConfig::default(),
        &ConflictConfig::default(),
        RegistryConfig::default(),
    ));
    let app = coordinator_router(Arc::clone(&coordinator));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://127.0.0.1:{}", port), coordinator)
}

fn client(base: &str) -> HttpCoordinatorClient {
    HttpCoordinatorClient::new(base, Duration::from_secs(5)).unwrap()
}

fn region(name: &str) -> RegionId {
    RegionId::new(name).unwrap()
}

fn info(name: &str) -> RegionInfo {
    RegionInfo::new(region(name), name, format!("http://{name}.local"))
}

fn create_event(origin: &str, path: &str) -> (FileMetadata, ChangeEvent) {
    let origin = region(origin);
    let mut meta = FileMetadata::new(origin.clone(), path, path.trim_start_matches('/'));
    meta.record_mutation(&origin);
    let event = ChangeEvent::new(ChangeType::Create, &meta, &origin);
    (meta, event)
}

#[tokio::test]
async fn health_reports_role() {
    let (base, _) = spawn_coordinator().await;
    let resp = reqwest::get(format!("{}/api/v1/health", base)).await.unwrap();
    assert_eq!(resp.status(), 200);

    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["role"], "coordinator");
}

#[tokio::test]
async fn register_and_list_regions() {
    let (base, _) = spawn_coordinator().await;
    let client = client(&base);

    let registered = client.register_region(&info("eu")).await.unwrap();
    assert_eq!(registered.id, region("eu"));
    client.register_region(&info("us")).await.unwrap();

    let listed: Vec<RegionInfo> = reqwest::get(format!("{}/api/v1/regions", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let ids: Vec<_> = listed.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["eu", "us"]);

    let resp = reqwest::get(format!("{}/api/v1/regions/eu", base)).await.unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn duplicate_registration_conflicts() {
    let (base, _) = spawn_coordinator().await;
    let client = client(&base);
    client.register_region(&info("eu")).await.unwrap();

    assert!(matches!(
        client.register_region(&info("eu")).await,
        Err(SyncError::AlreadyExists(_))
    ));
}

#[tokio::test]
async fn reserved_region_id_is_rejected() {
    let (base, _) = spawn_coordinator().await;
    let resp = reqwest::Client::new()
        .post(format!("{}/api/v1/regions", base))
        .json(&serde_json::json!({
            "id": RegionId::coordinator(),
            "name": "sneaky",
            "endpoint": "http://x"
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: ErrorBody = resp.json().await.unwrap();
    assert_eq!(body.kind, "invalid_metadata");
}

#[tokio::test]
async fn changes_flow_between_regions() {
    let (base, _) = spawn_coordinator().await;
    let client = client(&base);
    client.register_region(&info("eu")).await.unwrap();
    client.register_region(&info("us")).await.unwrap();

    let (meta, event) = create_event("eu", "/a.txt");
    let outcomes = client.push_changes(&[event.clone()]).await.unwrap();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].event_id, event.id);
    assert_eq!(outcomes[0].status, OutcomeStatus::Applied);

    // Redelivery is acknowledged without effect.
    let again = client.push_changes(&[event.clone()]).await.unwrap();
    assert_eq!(again[0].status, OutcomeStatus::Stale);

    let global: GlobalFileMetadata = reqwest::get(format!("{}/api/v1/metadata/{}", base, meta.id))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(global.file.path, "/a.txt");

    let pulled = client.pull_changes(&region("us")).await.unwrap();
    assert_eq!(pulled.len(), 1);
    assert_eq!(pulled[0].id, event.id);
    assert_eq!(pulled[0].metadata, event.metadata);
    assert!(client.pull_changes(&region("us")).await.unwrap().is_empty());
    assert!(client.pull_changes(&region("eu")).await.unwrap().is_empty());
}

#[tokio::test]
async fn unregistered_sender_is_rejected() {
    let (base, _) = spawn_coordinator().await;
    let (_, event) = create_event("ap", "/a.txt");
    let outcomes = client(&base).push_changes(&[event]).await.unwrap();
    assert!(matches!(outcomes[0].status, OutcomeStatus::Rejected(_)));
}

#[tokio::test]
async fn unknown_resources_are_not_found() {
    let (base, _) = spawn_coordinator().await;
    let client = client(&base);

    assert!(matches!(
        client.heartbeat(&region("ghost"), &RegionStatus::healthy()).await,
        Err(SyncError::NotFound(_))
    ));
    assert!(matches!(
        client.pull_changes(&region("ghost")).await,
        Err(SyncError::NotFound(_))
    ));

    let resp = reqwest::get(format!("{}/api/v1/metadata/{}", base, FileId::new()))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let body: ErrorBody = resp.json().await.unwrap();
    assert_eq!(body.kind, "not_found");

    let resp = reqwest::Client::new()
        .post(format!("{}/api/v1/conflicts/{}/resolve", base, FileId::new()))
        .json(&serde_json::json!({ "side": "local" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn heartbeat_updates_registry() {
    let (base, coordinator) = spawn_coordinator().await;
    let client = client(&base);
    client.register_region(&info("eu")).await.unwrap();

    let mut status = RegionStatus::healthy();
    status.sync_lag = 42;
    client.heartbeat(&region("eu"), &status).await.unwrap();

    assert_eq!(coordinator.region(&region("eu")).await.unwrap().status.sync_lag, 42);
}

#[tokio::test]
async fn deregister_reports_discarded() {
    let (base, _) = spawn_coordinator().await;
    let client = client(&base);
    client.register_region(&info("eu")).await.unwrap();
    client.register_region(&info("us")).await.unwrap();
    let (_, event) = create_event("eu", "/a.txt");
    client.push_changes(&[event]).await.unwrap();

    let body: Value = reqwest::Client::new()
        .delete(format!("{}/api/v1/regions/us", base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["discarded"], 1);

    assert!(matches!(
        client.deregister_region(&region("us")).await,
        Err(SyncError::NotFound(_))
    ));
}

#[tokio::test]
async fn conflicts_list_starts_empty() {
    let (base, _) = spawn_coordinator().await;
    let body: Vec<Value> = reqwest::get(format!("{}/api/v1/conflicts", base))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(body.is_empty());
}

#[tokio::test]
async fn unreachable_coordinator_is_retryable() {
    // Bind then drop to get a port nobody listens on.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let client = client(&format!("http://127.0.0.1:{}", port));
    let err = client.pull_changes(&region("eu")).await.unwrap_err();
    assert!(err.is_retryable(), "unexpected error: {err}");
}

#[tokio::test]
async fn conflict_errors_keep_their_identity() {
    let file_id = FileId::new();
    let conflict_id = ConflictId::new();
    let app = axum::Router::new()
        .route(
            "/api/v1/changes",
            axum::routing::post(move || async move {
                Err::<(), _>(ApiError(SyncError::Conflict { file_id }))
            }),
        )
        .route(
            "/api/v1/regions/{id}/heartbeat",
            axum::routing::post(move || async move {
                Err::<(), _>(ApiError(SyncError::AlreadyResolved(conflict_id)))
            }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    let client = client(&base);

    let err = client.push_changes(&[]).await.unwrap_err();
    assert!(matches!(err, SyncError::Conflict { file_id: id } if id == file_id));

    let err = client
        .heartbeat(&region("eu"), &RegionStatus::healthy())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::AlreadyResolved(id) if id == conflict_id));
}
