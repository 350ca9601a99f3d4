//! Tests for [`RequestDeduplicator`]: concurrent callers with the same key
//! share one execution.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tillit::RequestDeduplicator;
use tokio::sync::Notify;

#[tokio::test]
async fn concurrent_callers_share_one_execution() {
    let dedup = Arc::new(RequestDeduplicator::<u32>::new());
    let runs = Arc::new(AtomicU32::new(0));
    let gate = Arc::new(Notify::new());

    let mut handles = Vec::new();
    for _ in 0..10 {
        let dedup = dedup.clone();
        let runs = runs.clone();
        let gate = gate.clone();
        handles.push(tokio::spawn(async move {
            dedup
                .dedupe("profile:phoneHash=abc", move || async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    gate.notified().await;
                    42
                })
                .await
        }));
    }

    // Let every task register before releasing the shared future.
    while !dedup.contains("profile:phoneHash=abc") {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;
    gate.notify_one();

    for handle in handles {
        assert_eq!(handle.await.unwrap(), 42);
    }
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert!(dedup.is_empty());
}

#[tokio::test]
async fn different_keys_run_independently() {
    let dedup = RequestDeduplicator::<&'static str>::new();
    let runs = Arc::new(AtomicU32::new(0));

    let r1 = runs.clone();
    let r2 = runs.clone();
    let (a, b) = tokio::join!(
        dedup.dedupe("a", move || async move {
            r1.fetch_add(1, Ordering::SeqCst);
            "a"
        }),
        dedup.dedupe("b", move || async move {
            r2.fetch_add(1, Ordering::SeqCst);
            "b"
        }),
    );

    assert_eq!((a, b), ("a", "b"));
    assert_eq!(runs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn sequential_calls_each_execute() {
    let dedup = RequestDeduplicator::<u32>::new();
    let runs = Arc::new(AtomicU32::new(0));

    for expected in 1..=3 {
        let runs = runs.clone();
        let out = dedup
            .dedupe("k", move || async move { runs.fetch_add(1, Ordering::SeqCst) + 1 })
            .await;
        assert_eq!(out, expected);
    }
    assert_eq!(runs.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn sweep_drops_entries_past_safety_ttl() {
    let dedup = Arc::new(RequestDeduplicator::<u32>::with_ttl(Duration::from_secs(5)));

    let stuck = dedup.clone();
    let handle = tokio::spawn(async move {
        stuck
            .dedupe("k", || std::future::pending::<u32>())
            .await
    });
    while !dedup.contains("k") {
        tokio::task::yield_now().await;
    }

    assert_eq!(dedup.sweep(), 0);
    tokio::time::advance(Duration::from_secs(6)).await;
    assert_eq!(dedup.sweep(), 1);
    assert!(dedup.is_empty());

    // A new caller starts fresh rather than joining the stuck future.
    let out = dedup.dedupe("k", || async { 9 }).await;
    assert_eq!(out, 9);

    handle.abort();
}

#[tokio::test]
async fn clear_lets_new_callers_start_fresh() {
    let dedup = Arc::new(RequestDeduplicator::<u32>::new());

    let stuck = dedup.clone();
    let handle = tokio::spawn(async move {
        stuck
            .dedupe("k", || std::future::pending::<u32>())
            .await
    });
    while !dedup.contains("k") {
        tokio::task::yield_now().await;
    }

    assert_eq!(dedup.clear(), 1);
    assert_eq!(dedup.dedupe("k", || async { 3 }).await, 3);

    handle.abort();
}
