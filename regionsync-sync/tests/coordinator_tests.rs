//! End-to-end flows with regions talking to an in-process coordinator.

use regionsync_storage::{MemoryBackend, MemoryMetadataStore, MetadataStore};
use regionsync_sync::region::content_hash;
use regionsync_sync::{
    AgentConfig, ConflictConfig, ConflictResolver, ConflictStrategy, Coordinator, EngineConfig,
    FileService, HealthState, OutcomeStatus, RegionInfo, RegistryConfig, Side, SyncAgent,
    SyncError, SyncStrategy,
};
use regionsync_types::{ChangeEvent, ChangeType, FileMetadata, LocalState, RegionId, SyncState};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct Region {
    service: FileService,
    store: Arc<MemoryMetadataStore>,
}

impl Region {
    fn agent(&self) -> &Arc<SyncAgent> {
        self.service.agent()
    }
}

fn region_id(name: &str) -> RegionId {
    RegionId::new(name).unwrap()
}

fn coordinator(strategy: SyncStrategy, conflicts: ConflictStrategy) -> Arc<Coordinator> {
    Arc::new(Coordinator::new(
        EngineConfig {
            strategy,
            ..EngineConfig::default()
        },
        &ConflictConfig {
            default_strategy: conflicts,
        },
        RegistryConfig::default(),
    ))
}

async fn join(coordinator: &Arc<Coordinator>, name: &str, conflicts: ConflictStrategy) -> Region {
    let id = region_id(name);
    coordinator
        .register_region(RegionInfo::new(id.clone(), name, format!("http://{name}.local")))
        .await
        .unwrap();

    let store = Arc::new(MemoryMetadataStore::new());
    let agent = Arc::new(SyncAgent::new(
        AgentConfig::for_region(id),
        coordinator.clone(),
        store.clone(),
        ConflictResolver::new(&ConflictConfig {
            default_strategy: conflicts,
        }),
    ));
    let service = FileService::new(Arc::new(MemoryBackend::new()), store.clone(), agent);
    Region { service, store }
}

#[tokio::test]
async fn create_propagates_to_other_region() {
    let coordinator = coordinator(SyncStrategy::Lazy, ConflictStrategy::LastWriterWins);
    let us = join(&coordinator, "us", ConflictStrategy::LastWriterWins).await;
    let eu = join(&coordinator, "eu", ConflictStrategy::LastWriterWins).await;

    let meta = us.service.upload("/doc.txt", "doc.txt", b"v1", None).await.unwrap();
    assert_eq!(us.agent().flush().await.unwrap(), 1);
    assert_eq!(us.store.get(&meta.id).unwrap().unwrap().sync_state, SyncState::Synced);

    let global = coordinator.metadata(&meta.id).await.unwrap();
    assert_eq!(global.primary, region_id("us"));
    assert_eq!(global.vector_clock(), &meta.vector_clock);

    assert_eq!(eu.agent().pull().await.unwrap(), 1);
    let replica = eu.service.stat(&meta.id).unwrap();
    assert_eq!(replica.content_hash, meta.content_hash);
    assert_eq!(replica.local_state, LocalState::Pending);
    assert!(matches!(eu.service.download(&meta.id).await, Err(SyncError::NotFound(_))));

    // Nothing echoes back to the origin.
    assert_eq!(us.agent().pull().await.unwrap(), 0);
}

#[tokio::test]
async fn concurrent_edits_converge() {
    let coordinator = coordinator(SyncStrategy::Lazy, ConflictStrategy::LastWriterWins);
    let us = join(&coordinator, "us", ConflictStrategy::LastWriterWins).await;
    let eu = join(&coordinator, "eu", ConflictStrategy::LastWriterWins).await;

    let meta = us.service.upload("/doc.txt", "doc.txt", b"v1", None).await.unwrap();
    us.agent().flush().await.unwrap();
    eu.agent().pull().await.unwrap();

    // Both edit the same version while out of touch; eu writes last.
    us.service.update_content(&meta.id, b"us edit").await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    eu.service.update_content(&meta.id, b"eu edit").await.unwrap();

    assert_eq!(us.agent().flush().await.unwrap(), 1);
    assert_eq!(eu.agent().flush().await.unwrap(), 1);

    us.agent().pull().await.unwrap();
    eu.agent().pull().await.unwrap();
    eu.agent().flush_all().await;

    let global = coordinator.metadata(&meta.id).await.unwrap();
    let on_us = us.store.get(&meta.id).unwrap().unwrap();
    let on_eu = eu.store.get(&meta.id).unwrap().unwrap();

    assert_eq!(global.file.content_hash, content_hash(b"eu edit"));
    for local in [&on_us, &on_eu] {
        assert_eq!(&local.vector_clock, global.vector_clock());
        assert_eq!(local.content_hash, global.file.content_hash);
    }
    // us must fetch the winning content; eu already holds it.
    assert_eq!(on_us.local_state, LocalState::Pending);
    assert_eq!(on_eu.local_state, LocalState::Present);
    assert!(coordinator.conflicts().await.is_empty());
}

#[tokio::test]
async fn delete_propagates_as_tombstone() {
    let coordinator = coordinator(SyncStrategy::Eager, ConflictStrategy::LastWriterWins);
    let us = join(&coordinator, "us", ConflictStrategy::LastWriterWins).await;
    let eu = join(&coordinator, "eu", ConflictStrategy::LastWriterWins).await;

    let meta = us.service.upload("/doc.txt", "doc.txt", b"v1", None).await.unwrap();
    us.agent().flush().await.unwrap();
    eu.agent().pull().await.unwrap();

    us.service.delete(&meta.id).await.unwrap();
    us.agent().flush().await.unwrap();
    assert!(coordinator.metadata(&meta.id).await.unwrap().is_tombstone());

    eu.agent().pull().await.unwrap();
    assert!(eu.store.get(&meta.id).unwrap().unwrap().is_tombstone());
    assert!(eu.service.list("/").unwrap().is_empty());
}

#[tokio::test]
async fn manual_conflict_waits_for_decision() {
    let coordinator = coordinator(SyncStrategy::Eager, ConflictStrategy::Manual);
    let us = join(&coordinator, "us", ConflictStrategy::Manual).await;
    let eu = join(&coordinator, "eu", ConflictStrategy::Manual).await;

    let meta = us.service.upload("/doc.txt", "doc.txt", b"v1", None).await.unwrap();
    us.agent().flush().await.unwrap();
    eu.agent().pull().await.unwrap();

    us.service.update_content(&meta.id, b"us edit").await.unwrap();
    eu.service.update_content(&meta.id, b"eu edit").await.unwrap();
    us.agent().flush().await.unwrap();
    eu.agent().flush().await.unwrap();

    assert_eq!(eu.store.get(&meta.id).unwrap().unwrap().sync_state, SyncState::Conflict);
    let conflicts = coordinator.conflicts().await;
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].file_id, meta.id);

    coordinator
        .resolve_conflict(&conflicts[0].id, Side::Remote)
        .await
        .unwrap();
    assert!(coordinator.conflicts().await.is_empty());
    assert_eq!(
        coordinator.metadata(&meta.id).await.unwrap().file.content_hash,
        content_hash(b"eu edit")
    );
    assert!(matches!(
        coordinator.resolve_conflict(&conflicts[0].id, Side::Local).await,
        Err(SyncError::NotFound(_))
    ));
}

#[tokio::test]
async fn unregistered_region_is_rejected() {
    let coordinator = coordinator(SyncStrategy::Lazy, ConflictStrategy::LastWriterWins);
    let stranger = region_id("ap");
    let mut meta = FileMetadata::new(stranger.clone(), "/x.txt", "x.txt");
    meta.record_mutation(&stranger);

    let outcomes = coordinator
        .submit_changes(vec![ChangeEvent::new(ChangeType::Create, &meta, &stranger)])
        .await;
    assert!(matches!(outcomes[0].status, OutcomeStatus::Rejected(_)));
    assert!(coordinator.metadata(&meta.id).await.is_err());
}

#[tokio::test]
async fn deregister_discards_undelivered() {
    let coordinator = coordinator(SyncStrategy::Lazy, ConflictStrategy::LastWriterWins);
    let us = join(&coordinator, "us", ConflictStrategy::LastWriterWins).await;
    let _eu = join(&coordinator, "eu", ConflictStrategy::LastWriterWins).await;

    us.service.upload("/a.txt", "a.txt", b"a", None).await.unwrap();
    us.service.upload("/b.txt", "b.txt", b"b", None).await.unwrap();
    us.agent().flush().await.unwrap();

    assert_eq!(coordinator.deregister_region(&region_id("eu")).await.unwrap(), 2);
    assert!(coordinator.pending_changes(&region_id("eu")).await.is_err());
    assert_eq!(coordinator.regions().await.len(), 1);
}

#[tokio::test]
async fn duplicate_registration_is_rejected() {
    let coordinator = coordinator(SyncStrategy::Lazy, ConflictStrategy::LastWriterWins);
    join(&coordinator, "us", ConflictStrategy::LastWriterWins).await;
    let again = RegionInfo::new(region_id("us"), "us", "http://us.local");
    assert!(matches!(
        coordinator.register_region(again).await,
        Err(SyncError::AlreadyExists(_))
    ));
}

#[tokio::test]
async fn heartbeat_reaches_registry() {
    let coordinator = coordinator(SyncStrategy::Lazy, ConflictStrategy::LastWriterWins);
    let us = join(&coordinator, "us", ConflictStrategy::LastWriterWins).await;
    us.service.upload("/a.txt", "a.txt", b"a", None).await.unwrap();

    us.agent().heartbeat().await.unwrap();
    let info = coordinator.region(&region_id("us")).await.unwrap();
    assert_eq!(info.status.state, HealthState::Healthy);
    assert_eq!(info.status.sync_lag, 1);
}

#[tokio::test]
async fn recovery_after_partition() {
    let coordinator = coordinator(SyncStrategy::Lazy, ConflictStrategy::LastWriterWins);
    let us = join(&coordinator, "us", ConflictStrategy::LastWriterWins).await;
    let eu = join(&coordinator, "eu", ConflictStrategy::LastWriterWins).await;

    let meta = us.service.upload("/doc.txt", "doc.txt", b"v1", None).await.unwrap();
    us.agent().flush().await.unwrap();
    eu.agent().pull().await.unwrap();

    // eu is cut off and keeps writing; us moves on.
    eu.service.update_content(&meta.id, b"eu offline edit").await.unwrap();
    let fresh = eu.service.upload("/new.txt", "new.txt", b"n", None).await.unwrap();
    us.service.update_content(&meta.id, b"us edit").await.unwrap();
    us.agent().flush().await.unwrap();

    let report = eu.agent().recover().await.unwrap();
    assert_eq!(report.fetched, 1);
    assert_eq!(report.local_pending, 2);
    assert_eq!(report.conflicts, 1);
    assert_eq!(report.resolved, 1);
    assert_eq!(report.pushed, 2);

    assert!(coordinator.metadata(&fresh.id).await.is_ok());
    us.agent().pull().await.unwrap();
    let global = coordinator.metadata(&meta.id).await.unwrap();
    assert_eq!(&us.store.get(&meta.id).unwrap().unwrap().vector_clock, global.vector_clock());
    assert_eq!(&eu.store.get(&meta.id).unwrap().unwrap().vector_clock, global.vector_clock());
}

#[tokio::test]
async fn background_tasks_stop() {
    let coordinator = coordinator(SyncStrategy::Lazy, ConflictStrategy::LastWriterWins);
    let parent = CancellationToken::new();
    let tasks = coordinator.start(&parent);
    parent.cancel();
    tokio::time::timeout(Duration::from_secs(1), tasks.stop())
        .await
        .unwrap();
}
