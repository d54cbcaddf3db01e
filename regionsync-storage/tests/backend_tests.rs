use regionsync_storage::{
    BackendKind, LocalFsBackend, MemoryBackend, StorageBackend, StorageError, open_backend,
};
use tempfile::TempDir;

async fn exercise_backend(backend: &dyn StorageBackend) {
    backend.put("alpha", b"hello").await.unwrap();
    backend.put("beta", b"world!").await.unwrap();

    assert_eq!(backend.get("alpha").await.unwrap(), b"hello");
    assert!(backend.exists("alpha").await.unwrap());
    assert_eq!(backend.stat("beta").await.unwrap().size, 6);
    assert_eq!(backend.list("").await.unwrap(), vec!["alpha", "beta"]);
    assert_eq!(backend.list("al").await.unwrap(), vec!["alpha"]);

    backend.put("alpha", b"replaced").await.unwrap();
    assert_eq!(backend.get("alpha").await.unwrap(), b"replaced");

    backend.delete("alpha").await.unwrap();
    assert!(!backend.exists("alpha").await.unwrap());
    assert!(matches!(
        backend.get("alpha").await,
        Err(StorageError::NotFound(_))
    ));
    assert!(matches!(
        backend.delete("alpha").await,
        Err(StorageError::NotFound(_))
    ));
}

// ── Local filesystem ────────────────────────────────────────────

#[tokio::test]
async fn local_fs_round_trip() {
    let dir = TempDir::new().unwrap();
    let backend = LocalFsBackend::open(dir.path()).await.unwrap();
    exercise_backend(&backend).await;
}

#[tokio::test]
async fn local_fs_shards_by_key_hash() {
    let dir = TempDir::new().unwrap();
    let backend = LocalFsBackend::open(dir.path()).await.unwrap();
    backend.put("object", b"x").await.unwrap();

    let shards: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(shards.len(), 1);
    let outer = shards[0].as_ref().unwrap();
    assert_eq!(outer.file_name().len(), 2);
    let inner: Vec<_> = std::fs::read_dir(outer.path()).unwrap().collect();
    let inner = inner[0].as_ref().unwrap();
    assert!(inner.path().join("object").exists());
}

#[tokio::test]
async fn local_fs_rejects_unsafe_keys() {
    let dir = TempDir::new().unwrap();
    let backend = LocalFsBackend::open(dir.path()).await.unwrap();
    for key in ["", "../escape", "a/b", "/abs", ".hidden", "a\\b"] {
        assert!(
            matches!(backend.put(key, b"x").await, Err(StorageError::InvalidKey(_))),
            "key {key:?} should be rejected"
        );
    }
}

// ── Memory and factory ──────────────────────────────────────────

#[tokio::test]
async fn memory_round_trip() {
    exercise_backend(&MemoryBackend::new()).await;
}

#[tokio::test]
async fn factory_opens_each_variant() {
    let dir = TempDir::new().unwrap();
    let fs = open_backend(&BackendKind::LocalFs {
        root: dir.path().join("content"),
    })
    .await
    .unwrap();
    fs.put("k", b"v").await.unwrap();
    assert!(dir.path().join("content").is_dir());

    let mem = open_backend(&BackendKind::Memory).await.unwrap();
    assert!(!mem.exists("k").await.unwrap());
}
