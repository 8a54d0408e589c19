//! Transaction conflict detection, isolation and atomicity.
//!
//! The refresh-token ledger commits a rotation as one transaction: a
//! compare-and-set on the family head plus unconditional writes for the new
//! session and the secret index. These tests pin down the properties that
//! pattern relies on. A failed precondition must apply nothing, and
//! uncommitted writes must stay invisible. Exactly one of several racing
//! commits can win.

#![allow(clippy::expect_used, clippy::panic)]

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use tokio::task::JoinSet;
use warden_storage::{Clock, ManualClock, MemoryBackend, StorageBackend, StorageError};

// ============================================================================
// Conflict Detection
// ============================================================================

/// Two transactions CAS the same key from the same expected value; the second
/// commit sees the first one's write and conflicts.
#[tokio::test]
async fn test_two_transactions_same_key_cas_conflict() {
    let backend = MemoryBackend::new();
    backend.set(b"head".to_vec(), b"gen-0".to_vec()).await.expect("initial set");

    let mut txn_a = backend.transaction().await.expect("txn_a");
    txn_a.compare_and_set(b"head".to_vec(), Some(b"gen-0".to_vec()), b"gen-1a".to_vec()).expect("buffer");
    let mut txn_b = backend.transaction().await.expect("txn_b");
    txn_b.compare_and_set(b"head".to_vec(), Some(b"gen-0".to_vec()), b"gen-1b".to_vec()).expect("buffer");

    txn_a.commit().await.expect("first commit wins");
    let result_b = txn_b.commit().await;
    assert!(matches!(result_b, Err(StorageError::Conflict)), "got: {result_b:?}");

    assert_eq!(backend.get(b"head").await.expect("get"), Some(Bytes::from("gen-1a")));
}

/// Two transactions insert the same absent key; only one may create it.
#[tokio::test]
async fn test_two_transactions_insert_if_absent_conflict() {
    let backend = MemoryBackend::new();

    let mut txn_a = backend.transaction().await.expect("txn_a");
    txn_a.compare_and_set(b"family".to_vec(), None, b"a".to_vec()).expect("buffer");
    let mut txn_b = backend.transaction().await.expect("txn_b");
    txn_b.compare_and_set(b"family".to_vec(), None, b"b".to_vec()).expect("buffer");

    txn_a.commit().await.expect("first insert");
    assert!(matches!(txn_b.commit().await, Err(StorageError::Conflict)));
    assert_eq!(backend.get(b"family").await.expect("get"), Some(Bytes::from("a")));
}

/// Racing transactional spends over many rounds: exactly one winner per round.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_transaction_cas_exactly_one_winner() {
    const CONCURRENCY: usize = 8;
    const ROUNDS: usize = 10;

    let backend = MemoryBackend::new();

    for round in 0..ROUNDS {
        let initial = format!("round-{round}");
        backend.set(b"race".to_vec(), initial.as_bytes().to_vec()).await.expect("reset");

        let mut set = JoinSet::new();
        for task_id in 0..CONCURRENCY {
            let backend = backend.clone();
            let expected = initial.clone();
            set.spawn(async move {
                let mut txn = backend.transaction().await.expect("txn");
                txn.compare_and_set(
                    b"race".to_vec(),
                    Some(expected.into_bytes()),
                    format!("winner-{task_id}").into_bytes(),
                )
                .expect("buffer");
                txn.set(format!("side-effect-{round}-{task_id}").into_bytes(), b"1".to_vec());
                txn.commit().await.map(|()| task_id)
            });
        }

        let mut winners = Vec::new();
        let mut conflicts = 0usize;
        while let Some(result) = set.join_next().await {
            match result.expect("task panicked") {
                Ok(task_id) => winners.push(task_id),
                Err(StorageError::Conflict) => conflicts += 1,
                Err(e) => panic!("unexpected error in round {round}: {e}"),
            }
        }

        assert_eq!(winners.len(), 1, "round {round}: exactly one commit");
        assert_eq!(conflicts, CONCURRENCY - 1);

        // Only the winner's unconditional write landed.
        for task_id in 0..CONCURRENCY {
            let side = backend
                .get(format!("side-effect-{round}-{task_id}").as_bytes())
                .await
                .expect("get");
            assert_eq!(side.is_some(), task_id == winners[0], "round {round}, task {task_id}");
        }
    }
}

// ============================================================================
// Atomicity
// ============================================================================

/// One failed precondition aborts the whole transaction, including
/// unconditional writes and deletes.
#[tokio::test]
async fn test_failed_cas_rolls_back_everything() {
    let backend = MemoryBackend::new();
    backend.set(b"head".to_vec(), b"gen-1".to_vec()).await.expect("set head");
    backend.set(b"index/old".to_vec(), b"s1".to_vec()).await.expect("set index");

    let mut txn = backend.transaction().await.expect("txn");
    txn.compare_and_set(b"head".to_vec(), Some(b"gen-0".to_vec()), b"gen-2".to_vec()).expect("buffer");
    txn.set(b"session/s2".to_vec(), b"{}".to_vec());
    txn.set_with_ttl(b"index/new".to_vec(), b"s2".to_vec(), Duration::from_secs(60));
    txn.delete(b"index/old".to_vec());

    assert!(matches!(txn.commit().await, Err(StorageError::Conflict)));

    assert_eq!(backend.get(b"head").await.expect("get"), Some(Bytes::from("gen-1")));
    assert_eq!(backend.get(b"session/s2").await.expect("get"), None);
    assert_eq!(backend.get(b"index/new").await.expect("get"), None);
    assert_eq!(backend.get(b"index/old").await.expect("get"), Some(Bytes::from("s1")));
}

/// Every precondition must hold; the second one failing blocks the first.
#[tokio::test]
async fn test_multiple_cas_operations_all_must_hold() {
    let backend = MemoryBackend::new();
    backend.set(b"a".to_vec(), b"1".to_vec()).await.expect("set a");
    backend.set(b"b".to_vec(), b"1".to_vec()).await.expect("set b");

    let mut txn = backend.transaction().await.expect("txn");
    txn.compare_and_set(b"a".to_vec(), Some(b"1".to_vec()), b"2".to_vec()).expect("buffer");
    txn.compare_and_set(b"b".to_vec(), Some(b"stale".to_vec()), b"2".to_vec()).expect("buffer");
    assert!(matches!(txn.commit().await, Err(StorageError::Conflict)));

    assert_eq!(backend.get(b"a").await.expect("get"), Some(Bytes::from("1")));
    assert_eq!(backend.get(b"b").await.expect("get"), Some(Bytes::from("1")));
}

#[tokio::test]
async fn test_empty_transaction_commit_is_noop() {
    let backend = MemoryBackend::new();
    backend.set(b"k".to_vec(), b"v".to_vec()).await.expect("set");

    let txn = backend.transaction().await.expect("txn");
    txn.commit().await.expect("empty commit");

    assert_eq!(backend.stored_len(), 1);
}

// ============================================================================
// Isolation
// ============================================================================

/// A transaction that is dropped without committing leaves no trace.
#[tokio::test]
async fn test_dropped_transaction_is_invisible() {
    let backend = MemoryBackend::new();

    {
        let mut txn = backend.transaction().await.expect("txn");
        txn.set(b"uncommitted".to_vec(), b"v".to_vec());
        txn.compare_and_set(b"claimed".to_vec(), None, b"v".to_vec()).expect("buffer");
        assert_eq!(txn.get(b"uncommitted").await.expect("own read"), Some(Bytes::from("v")));
    }

    assert_eq!(backend.get(b"uncommitted").await.expect("get"), None);
    assert_eq!(backend.get(b"claimed").await.expect("get"), None);
    backend.compare_and_set(b"claimed", None, b"other".to_vec()).await.expect("still absent");
}

/// Buffered writes are visible to the transaction itself, deletes included.
#[tokio::test]
async fn test_transaction_reads_own_writes() {
    let backend = MemoryBackend::new();
    backend.set(b"existing".to_vec(), b"old".to_vec()).await.expect("set");

    let mut txn = backend.transaction().await.expect("txn");
    assert_eq!(txn.get(b"existing").await.expect("get"), Some(Bytes::from("old")));

    txn.set(b"existing".to_vec(), b"new".to_vec());
    txn.set(b"fresh".to_vec(), b"v".to_vec());
    assert_eq!(txn.get(b"existing").await.expect("get"), Some(Bytes::from("new")));
    assert_eq!(txn.get(b"fresh").await.expect("get"), Some(Bytes::from("v")));

    txn.delete(b"existing".to_vec());
    assert_eq!(txn.get(b"existing").await.expect("get"), None);

    // Nothing leaked out before commit.
    assert_eq!(backend.get(b"existing").await.expect("get"), Some(Bytes::from("old")));
    assert_eq!(backend.get(b"fresh").await.expect("get"), None);

    txn.commit().await.expect("commit");
    assert_eq!(backend.get(b"existing").await.expect("get"), None);
    assert_eq!(backend.get(b"fresh").await.expect("get"), Some(Bytes::from("v")));
}

/// Reads outside the buffer see the latest committed state, not a snapshot.
#[tokio::test]
async fn test_reads_are_not_snapshot_isolated() {
    let backend = MemoryBackend::new();
    backend.set(b"k".to_vec(), b"v1".to_vec()).await.expect("set");

    let txn = backend.transaction().await.expect("txn");
    assert_eq!(txn.get(b"k").await.expect("get"), Some(Bytes::from("v1")));

    backend.set(b"k".to_vec(), b"v2".to_vec()).await.expect("concurrent write");
    assert_eq!(txn.get(b"k").await.expect("get"), Some(Bytes::from("v2")));
}

// ============================================================================
// Expiry
// ============================================================================

/// An expired key counts as absent for a transactional insert-if-absent.
#[tokio::test]
async fn test_transaction_cas_on_expired_key() {
    let clock = ManualClock::default();
    let backend = MemoryBackend::with_clock(Arc::new(clock.clone()) as Arc<dyn Clock>);
    backend
        .set_with_ttl(b"lock".to_vec(), b"old".to_vec(), Duration::from_secs(10))
        .await
        .expect("set");

    clock.advance(Duration::from_secs(11));

    let mut txn = backend.transaction().await.expect("txn");
    txn.compare_and_set(b"lock".to_vec(), None, b"new".to_vec()).expect("buffer");
    txn.commit().await.expect("expired key is absent");

    assert_eq!(backend.get(b"lock").await.expect("get"), Some(Bytes::from("new")));
}

/// Transactional TTL writes expire with the injected clock.
#[tokio::test]
async fn test_transaction_ttl_follows_clock() {
    let clock = ManualClock::default();
    let backend = MemoryBackend::with_clock(Arc::new(clock.clone()) as Arc<dyn Clock>);

    let mut txn = backend.transaction().await.expect("txn");
    txn.compare_and_set_with_ttl(b"a".to_vec(), None, b"1".to_vec(), Duration::from_secs(5))
        .expect("buffer");
    txn.set_with_ttl(b"b".to_vec(), b"1".to_vec(), Duration::from_secs(30));
    txn.commit().await.expect("commit");

    clock.advance(Duration::from_secs(6));
    assert_eq!(backend.get(b"a").await.expect("get"), None);
    assert_eq!(backend.get(b"b").await.expect("get"), Some(Bytes::from("1")));

    clock.advance(Duration::from_secs(30));
    assert_eq!(backend.get(b"b").await.expect("get"), None);
}
