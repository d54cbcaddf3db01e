use regionsync_storage::{MemoryBackend, MemoryMetadataStore, MetadataStore};
use regionsync_sync::region::content_hash;
use regionsync_sync::region::mock::MockCoordinatorClient;
use regionsync_sync::{AgentConfig, ConflictResolver, FileService, SyncAgent, SyncError};
use regionsync_types::{ChangeType, FileMetadata, LocalState, RegionId, SyncState};
use std::sync::Arc;

fn service_with(config: AgentConfig) -> (FileService, Arc<MemoryMetadataStore>) {
    let store = Arc::new(MemoryMetadataStore::new());
    let agent = Arc::new(SyncAgent::new(
        config,
        Arc::new(MockCoordinatorClient::new()),
        store.clone(),
        ConflictResolver::default(),
    ));
    let service = FileService::new(Arc::new(MemoryBackend::new()), store.clone(), agent);
    (service, store)
}

fn service() -> (FileService, Arc<MemoryMetadataStore>) {
    service_with(AgentConfig::for_region(RegionId::new("us").unwrap()))
}

#[test]
fn content_hash_is_sha256_hex() {
    assert_eq!(
        content_hash(b"abc"),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}

#[tokio::test]
async fn upload_records_and_queues_create() {
    let (service, store) = service();
    let meta = service
        .upload("/docs/a.txt", "a.txt", b"hello", Some("text/plain"))
        .await
        .unwrap();

    assert_eq!(meta.version, 1);
    assert_eq!(meta.size, 5);
    assert_eq!(meta.mime_type, "text/plain");
    assert_eq!(meta.content_hash, content_hash(b"hello"));
    assert_eq!(meta.vector_clock.get(service.region_id()), 1);
    assert_eq!(meta.sync_state, SyncState::Pending);
    assert_eq!(store.get(&meta.id).unwrap(), Some(meta.clone()));

    let queued = service.agent().queue().drain_all();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].change_type, ChangeType::Create);
    assert_eq!(queued[0].file_id, meta.id);
    assert_eq!(service.download(&meta.id).await.unwrap(), b"hello");
}

#[tokio::test]
async fn upload_defaults_mime_type() {
    let (service, _) = service();
    let meta = service.upload("/a.bin", "a.bin", b"\x00", None).await.unwrap();
    assert_eq!(meta.mime_type, FileMetadata::DEFAULT_MIME_TYPE);
}

#[tokio::test]
async fn upload_rejects_taken_path() {
    let (service, _) = service();
    service.upload("/a.txt", "a.txt", b"1", None).await.unwrap();
    assert!(matches!(
        service.upload("/a.txt", "a.txt", b"2", None).await,
        Err(SyncError::AlreadyExists(_))
    ));
    assert!(matches!(
        service.upload("", "a.txt", b"2", None).await,
        Err(SyncError::InvalidMetadata(_))
    ));
}

#[tokio::test]
async fn update_creates_new_version() {
    let (service, _) = service();
    let meta = service.upload("/a.txt", "a.txt", b"one", None).await.unwrap();
    let updated = service.update_content(&meta.id, b"two!").await.unwrap();

    assert_eq!(updated.version, 2);
    assert_eq!(updated.size, 4);
    assert!(updated.vector_clock.is_after(&meta.vector_clock));
    assert_eq!(service.download(&meta.id).await.unwrap(), b"two!");

    let types: Vec<_> = service
        .agent()
        .queue()
        .drain_all()
        .into_iter()
        .map(|e| e.change_type)
        .collect();
    assert_eq!(types, vec![ChangeType::Create, ChangeType::Update]);
}

#[tokio::test]
async fn delete_leaves_tombstone() {
    let (service, store) = service();
    let meta = service.upload("/a.txt", "a.txt", b"x", None).await.unwrap();
    let dead = service.delete(&meta.id).await.unwrap();

    assert!(dead.is_tombstone());
    assert_eq!(dead.version, 2);
    assert!(store.get(&meta.id).unwrap().unwrap().is_tombstone());
    assert!(matches!(service.stat(&meta.id), Err(SyncError::NotFound(_))));
    assert!(matches!(service.download(&meta.id).await, Err(SyncError::NotFound(_))));
    assert!(matches!(service.delete(&meta.id).await, Err(SyncError::NotFound(_))));
    assert!(service.list("/").unwrap().is_empty());

    // The path is free again.
    service.upload("/a.txt", "a.txt", b"y", None).await.unwrap();
}

#[tokio::test]
async fn download_requires_local_content() {
    let (service, store) = service();
    let mut meta = service.upload("/a.txt", "a.txt", b"x", None).await.unwrap();
    meta.local_state = LocalState::Pending;
    store.save(&meta).unwrap();

    assert!(matches!(service.download(&meta.id).await, Err(SyncError::NotFound(_))));
    assert!(service.stat(&meta.id).is_ok());
}

#[tokio::test]
async fn list_is_one_level() {
    let (service, _) = service();
    service.upload("/b.txt", "b.txt", b"", None).await.unwrap();
    service.upload("/a.txt", "a.txt", b"", None).await.unwrap();
    service.upload("/sub/c.txt", "c.txt", b"", None).await.unwrap();

    let names: Vec<_> = service.list("/").unwrap().into_iter().map(|e| e.name).collect();
    assert_eq!(names, vec!["a.txt", "b.txt"]);
    assert_eq!(service.list("/sub").unwrap().len(), 1);
}

#[tokio::test]
async fn writes_succeed_when_queue_is_full() {
    let (service, store) = service_with(AgentConfig {
        queue_capacity: 1,
        ..AgentConfig::for_region(RegionId::new("us").unwrap())
    });
    service.upload("/a.txt", "a.txt", b"1", None).await.unwrap();
    let second = service.upload("/b.txt", "b.txt", b"2", None).await.unwrap();

    assert_eq!(service.agent().queue().len(), 1);
    assert_eq!(store.get(&second.id).unwrap().unwrap().sync_state, SyncState::Pending);

    service.agent().queue().clear();
    assert_eq!(service.agent().requeue_pending().unwrap(), 1);
}
