//! Integration tests for [`CacheStore`]: hash-keyed storage, single-flight
//! fills, persistence across reopen, reconciliation and eviction.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::join_all;

use hotbundle::cache::Clock;
use hotbundle::{CacheStore, CacheStoreConfig, HotbundleError, Sha256Hash};

// =============================================================================
// Helpers
// =============================================================================

fn ticking_clock() -> Clock {
    let now = Arc::new(AtomicU64::new(1_700_000_000_000));
    Arc::new(move || now.fetch_add(1, Ordering::SeqCst))
}

async fn open(dir: &Path, max_size_bytes: u64) -> CacheStore {
    CacheStore::open_with_clock(
        CacheStoreConfig::new(dir)
            .max_size_bytes(max_size_bytes)
            .memory_bytes(0),
        ticking_clock(),
    )
    .await
    .unwrap()
}

async fn put(store: &CacheStore, body: &[u8]) -> Sha256Hash {
    let hash = Sha256Hash::digest(body);
    let owned = Bytes::copy_from_slice(body);
    store
        .get_or_put(&hash, || async move { Ok(owned) })
        .await
        .unwrap();
    hash
}

// =============================================================================
// Keying and integrity
// =============================================================================

#[tokio::test]
async fn stored_file_is_named_by_hash_and_holds_the_bytes() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), 1024).await;

    let hash = put(&store, b"export const answer = 42;").await;

    let on_disk = std::fs::read(dir.path().join(hash.to_hex())).unwrap();
    assert_eq!(on_disk, b"export const answer = 42;");
    assert_eq!(Sha256Hash::digest(&on_disk), hash);
    assert!(dir.path().join("index.json").exists());
}

#[tokio::test]
async fn get_on_missing_hash_is_none() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), 1024).await;

    let missing = Sha256Hash::digest(b"never stored");
    assert!(store.get(&missing).await.unwrap().is_none());
    assert!(store.entry(&missing).unwrap().is_none());
}

#[tokio::test]
async fn loader_error_is_returned_and_nothing_is_stored() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), 1024).await;
    let hash = Sha256Hash::digest(b"unreachable");

    let err = store
        .get_or_put(&hash, || async {
            Err(HotbundleError::Fetch {
                url: "https://cdn.example/m.js".to_string(),
                status: Some(503),
                message: "Service Unavailable".to_string(),
            })
        })
        .await
        .unwrap_err();

    assert!(matches!(err, HotbundleError::Fetch { status: Some(503), .. }));
    assert!(!store.contains(&hash).unwrap());
    assert_eq!(store.stats().unwrap().entries, 0);
}

// =============================================================================
// Single flight
// =============================================================================

#[tokio::test]
async fn concurrent_fills_share_one_loader_call() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), 1024 * 1024).await;
    let body = Bytes::from_static(b"shared dependency");
    let hash = Sha256Hash::digest(&body);
    let calls = AtomicU64::new(0);

    let results = join_all((0..8).map(|_| {
        let body = body.clone();
        let calls = &calls;
        let store = &store;
        async move {
            store
                .get_or_put(&hash, || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(body)
                })
                .await
        }
    }))
    .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for result in results {
        assert_eq!(&result.unwrap()[..], b"shared dependency");
    }
}

#[tokio::test]
async fn concurrent_waiters_see_the_same_failure() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), 1024).await;
    let hash = Sha256Hash::digest(b"declared");
    let calls = AtomicU64::new(0);

    let results = join_all((0..4).map(|_| {
        let calls = &calls;
        let store = &store;
        async move {
            store
                .get_or_put(&hash, || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    Ok(Bytes::from_static(b"something else"))
                })
                .await
        }
    }))
    .await;

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    for result in results {
        assert!(matches!(result, Err(HotbundleError::Integrity { .. })));
    }
    assert!(!store.contains(&hash).unwrap());
}

#[tokio::test]
async fn a_failed_fill_does_not_poison_later_calls() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), 1024).await;
    let hash = Sha256Hash::digest(b"eventually");

    let first = store
        .get_or_put(&hash, || async {
            Err(HotbundleError::ModuleNotFound {
                id: "m".to_string(),
            })
        })
        .await;
    assert!(first.is_err());

    let second = store
        .get_or_put(&hash, || async { Ok(Bytes::from_static(b"eventually")) })
        .await
        .unwrap();
    assert_eq!(&second[..], b"eventually");
}

// =============================================================================
// Persistence and reconciliation
// =============================================================================

#[tokio::test]
async fn entries_and_pins_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let (a, b) = {
        let store = open(dir.path(), 1024).await;
        let a = put(&store, b"module a").await;
        let b = put(&store, b"module b").await;
        assert!(store.pin(&a).await.unwrap());
        store
            .record_manifest("trivia", r#"{"modules":{}}"#)
            .await
            .unwrap();
        (a, b)
    };

    let store = open(dir.path(), 1024).await;
    assert!(store.entry(&a).unwrap().unwrap().pinned);
    assert!(!store.entry(&b).unwrap().unwrap().pinned);
    assert_eq!(&store.get(&b).await.unwrap().unwrap()[..], b"module b");
    assert_eq!(
        store.manifest("trivia").unwrap().as_deref(),
        Some(r#"{"modules":{}}"#)
    );
    assert!(store.manifest("other").unwrap().is_none());
}

#[tokio::test]
async fn open_removes_orphan_files() {
    let dir = tempfile::tempdir().unwrap();
    let kept = {
        let store = open(dir.path(), 1024).await;
        put(&store, b"indexed").await
    };

    let orphan = Sha256Hash::digest(b"written but never indexed");
    std::fs::write(dir.path().join(orphan.to_hex()), b"written but never indexed").unwrap();
    std::fs::write(dir.path().join("leftover.tmp"), b"partial").unwrap();

    let store = open(dir.path(), 1024).await;
    assert!(!dir.path().join(orphan.to_hex()).exists());
    assert!(!dir.path().join("leftover.tmp").exists());
    assert!(!store.contains(&orphan).unwrap());
    assert!(store.contains(&kept).unwrap());
}

#[tokio::test]
async fn open_drops_entries_whose_file_is_gone() {
    let dir = tempfile::tempdir().unwrap();
    let gone = {
        let store = open(dir.path(), 1024).await;
        put(&store, b"deleted behind our back").await
    };
    std::fs::remove_file(dir.path().join(gone.to_hex())).unwrap();

    let store = open(dir.path(), 1024).await;
    assert!(!store.contains(&gone).unwrap());
    assert_eq!(store.stats().unwrap().entries, 0);
}

#[tokio::test]
async fn corrupt_index_starts_empty() {
    let dir = tempfile::tempdir().unwrap();
    let hash = {
        let store = open(dir.path(), 1024).await;
        put(&store, b"before corruption").await
    };
    std::fs::write(dir.path().join("index.json"), b"{ not json").unwrap();

    let store = open(dir.path(), 1024).await;
    assert!(!store.contains(&hash).unwrap());
    // The unindexed file is treated as an orphan.
    assert!(!dir.path().join(hash.to_hex()).exists());
}

// =============================================================================
// Eviction
// =============================================================================

#[tokio::test]
async fn pinned_entries_survive_any_prune() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), 1024).await;
    let pinned = put(&store, b"active version").await;
    let loose = put(&store, b"old version").await;
    store.pin(&pinned).await.unwrap();

    let summary = store.prune(0).await.unwrap();

    assert_eq!(summary.evicted, 1);
    assert_eq!(summary.bytes_freed, b"old version".len() as u64);
    assert!(store.contains(&pinned).unwrap());
    assert!(!store.contains(&loose).unwrap());
    assert!(dir.path().join(pinned.to_hex()).exists());
}

#[tokio::test]
async fn unpin_makes_entry_evictable() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), 1024).await;
    let hash = put(&store, b"superseded").await;
    store.pin(&hash).await.unwrap();
    assert_eq!(store.prune(0).await.unwrap().evicted, 0);

    assert!(store.unpin(&hash).await.unwrap());
    assert_eq!(store.prune(0).await.unwrap().evicted, 1);
    assert!(!store.contains(&hash).unwrap());
}

#[tokio::test]
async fn inserts_keep_unpinned_total_within_budget() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), 24).await;
    let pinned = put(&store, b"pinned-pinned-pinned-pinned").await;
    store.pin(&pinned).await.unwrap();

    let mut last = None;
    for i in 0..10 {
        last = Some(put(&store, format!("module number {i:02}").as_bytes()).await);
    }

    let stats = store.stats().unwrap();
    assert!(stats.total_bytes - stats.pinned_bytes <= 24);
    assert_eq!(stats.pinned_bytes, b"pinned-pinned-pinned-pinned".len() as u64);
    // Most recent insert is the last thing LRU would pick.
    assert!(store.contains(&last.unwrap()).unwrap());
}

#[tokio::test]
async fn prune_within_budget_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), 1024).await;
    put(&store, b"small").await;

    let summary = store.prune(1024).await.unwrap();
    assert_eq!(summary.evicted, 0);
    assert_eq!(store.stats().unwrap().entries, 1);
}
