use chrono::{Duration, Utc};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use regionsync_sync::{
    ConflictConfig, ConflictResolver, ConflictStatus, ConflictStrategy, LWW_TIE_WINNER,
    MergeHandler, Side, SyncError,
};
use regionsync_types::{CausalOrder, FileMetadata, GlobalFileMetadata, RegionId, VectorClock};
use std::sync::Arc;

fn region(name: &str) -> RegionId {
    RegionId::new(name).unwrap()
}

fn clock(entries: &[(&str, u64)]) -> VectorClock {
    entries.iter().map(|(r, t)| (region(r), *t)).collect()
}

fn version(origin: &str, entries: &[(&str, u64)]) -> GlobalFileMetadata {
    let mut file = FileMetadata::new(region(origin), "/a/file.txt", "file.txt");
    file.vector_clock = clock(entries);
    file.version = entries.iter().map(|(_, t)| t).sum();
    GlobalFileMetadata::new(file)
}

fn concurrent_pair() -> (GlobalFileMetadata, GlobalFileMetadata) {
    let mut local = version("eu", &[("eu", 2), ("us", 1)]);
    let mut remote = version("us", &[("eu", 1), ("us", 2)]);
    remote.file.id = local.file.id;
    local.file.content_hash = "local".into();
    remote.file.content_hash = "remote".into();
    (local, remote)
}

fn resolver(strategy: ConflictStrategy) -> ConflictResolver {
    ConflictResolver::new(&ConflictConfig {
        default_strategy: strategy,
    })
}

// ── Detection ───────────────────────────────────────────────────

#[test]
fn causally_ordered_versions_never_conflict() {
    let r = ConflictResolver::default();
    let older = version("eu", &[("eu", 1)]);
    let newer = version("eu", &[("eu", 2)]);
    assert!(r.detect(&older, &newer).is_none());
    assert!(r.detect(&newer, &older).is_none());
    assert!(r.detect(&older, &older).is_none());
}

#[test]
fn concurrent_versions_conflict() {
    let (local, remote) = concurrent_pair();
    let conflict = ConflictResolver::default().detect(&local, &remote).unwrap();
    assert_eq!(conflict.status, ConflictStatus::Pending);
    assert_eq!(conflict.file_id, local.id());
}

// ── Last writer wins ────────────────────────────────────────────

#[test]
fn lww_picks_later_update() {
    let (mut local, mut remote) = concurrent_pair();
    let t = Utc::now();
    local.file.updated_at = t;
    remote.file.updated_at = t + Duration::hours(1);

    let r = resolver(ConflictStrategy::LastWriterWins);
    let mut conflict = r.detect(&local, &remote).unwrap();
    let resolution = r.resolve(&mut conflict, None).unwrap();

    let result = resolution.result.unwrap();
    assert_eq!(result.file.content_hash, "remote");
    assert_eq!(resolution.rejected.unwrap().file.content_hash, "local");
    assert_eq!(conflict.status, ConflictStatus::Resolved);
}

#[test]
fn lww_tie_goes_to_local() {
    assert_eq!(LWW_TIE_WINNER, Side::Local);
    let (mut local, mut remote) = concurrent_pair();
    let t = Utc::now();
    local.file.updated_at = t;
    remote.file.updated_at = t;

    let r = ConflictResolver::default();
    let mut conflict = r.detect(&local, &remote).unwrap();
    let resolution = r.resolve(&mut conflict, None).unwrap();
    assert_eq!(resolution.result.unwrap().file.content_hash, "local");
}

#[test]
fn resolved_version_follows_both_inputs() {
    let (local, remote) = concurrent_pair();
    let r = ConflictResolver::default();
    let mut conflict = r.detect(&local, &remote).unwrap();
    let result = r.resolve(&mut conflict, None).unwrap().result.unwrap();

    assert_eq!(result.vector_clock().compare(local.vector_clock()), CausalOrder::After);
    assert_eq!(result.vector_clock().compare(remote.vector_clock()), CausalOrder::After);
    assert!(result.version() > local.version().max(remote.version()));
}

#[test]
fn resolving_twice_fails() {
    let (local, remote) = concurrent_pair();
    let r = ConflictResolver::default();
    let mut conflict = r.detect(&local, &remote).unwrap();
    r.resolve(&mut conflict, None).unwrap();
    assert!(matches!(
        r.resolve(&mut conflict, None),
        Err(SyncError::AlreadyResolved(_))
    ));
}

// ── Fork ────────────────────────────────────────────────────────

#[test]
fn fork_keeps_both_versions() {
    let (local, remote) = concurrent_pair();
    let r = ConflictResolver::default();
    let mut conflict = r.detect(&local, &remote).unwrap();
    let resolution = r.resolve(&mut conflict, Some(ConflictStrategy::Fork)).unwrap();

    let primary = resolution.result.unwrap();
    assert_eq!(primary.id(), local.id());
    assert_eq!(primary.file.name, "file.txt");

    let forked = resolution.forked.unwrap();
    assert_ne!(forked.id(), local.id());
    assert_eq!(forked.file.name, "file.txt.conflict");
    assert_eq!(forked.file.path, "/a/file.txt.conflict");
    assert_eq!(forked.file.content_hash, "remote");
    assert_eq!(conflict.status, ConflictStatus::Resolved);
}

// ── Merge ───────────────────────────────────────────────────────

#[test]
fn default_merge_unions_custom_metadata() {
    let (mut local, mut remote) = concurrent_pair();
    let t = Utc::now();
    local.file.updated_at = t;
    remote.file.updated_at = t + Duration::seconds(1);
    local.file.custom_meta.insert("owner".into(), "alice".into());
    local.file.custom_meta.insert("tag".into(), "old".into());
    remote.file.custom_meta.insert("tag".into(), "new".into());

    let r = resolver(ConflictStrategy::Merge);
    let mut conflict = r.detect(&local, &remote).unwrap();
    let result = r.resolve(&mut conflict, None).unwrap().result.unwrap();

    assert_eq!(result.file.content_hash, "remote");
    assert_eq!(result.file.custom_meta["owner"], "alice");
    assert_eq!(result.file.custom_meta["tag"], "new");
    assert!(result.vector_clock().dominates(local.vector_clock()));
}

struct KeepLocalName;

impl MergeHandler for KeepLocalName {
    fn merge(&self, local: &FileMetadata, remote: &FileMetadata) -> FileMetadata {
        let mut merged = remote.clone();
        merged.name = local.name.clone();
        merged
    }
}

#[test]
fn merge_uses_custom_handler() {
    let (mut local, remote) = concurrent_pair();
    local.file.name = "mine.txt".into();
    let r = resolver(ConflictStrategy::Merge).with_merge_handler(Arc::new(KeepLocalName));
    let mut conflict = r.detect(&local, &remote).unwrap();
    let result = r.resolve(&mut conflict, None).unwrap().result.unwrap();
    assert_eq!(result.file.name, "mine.txt");
    assert_eq!(result.file.content_hash, "remote");
}

// ── Manual ──────────────────────────────────────────────────────

#[test]
fn manual_escalates_without_result() {
    let (local, remote) = concurrent_pair();
    let r = resolver(ConflictStrategy::Manual);
    let mut conflict = r.detect(&local, &remote).unwrap();
    let resolution = r.resolve(&mut conflict, None).unwrap();

    assert!(resolution.result.is_none());
    assert_eq!(conflict.status, ConflictStatus::Escalated);
    assert!(matches!(
        r.resolve(&mut conflict, None),
        Err(SyncError::AlreadyResolved(_))
    ));

    let accepted = r.accept(&mut conflict, Side::Remote).unwrap();
    assert_eq!(accepted.result.unwrap().file.content_hash, "remote");
    assert_eq!(conflict.status, ConflictStatus::Resolved);
    assert!(r.accept(&mut conflict, Side::Local).is_err());
}

// ── Properties ──────────────────────────────────────────────────

fn arb_clock() -> impl Strategy<Value = VectorClock> {
    prop::collection::vec((prop::sample::select(vec!["eu", "us", "ap"]), 0u64..4), 0..5)
        .prop_map(|entries| entries.into_iter().map(|(r, t)| (region(r), t)).collect())
}

proptest! {
    #[test]
    fn detect_iff_concurrent(a in arb_clock(), b in arb_clock()) {
        let mut local = version("eu", &[]);
        local.file.vector_clock = a.clone();
        let mut remote = local.clone();
        remote.file.vector_clock = b.clone();

        let detected = ConflictResolver::default().detect(&local, &remote).is_some();
        prop_assert_eq!(detected, a.compare(&b) == CausalOrder::Concurrent);
    }
}
