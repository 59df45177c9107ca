//! Tests for the write-behind queue.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use bucketshim_core::{ByteStream, ObjectStat, RemoteStore, StoreError};

use crate::WriteBehindQueue;

/// Backend stub. `store` waits for a permit when gated, so tests control
/// exactly when a flush completes.
struct StubStore {
    listing: Vec<ObjectStat>,
    stored: Mutex<Vec<(String, Bytes)>>,
    entered: AtomicUsize,
    gate: Semaphore,
}

impl StubStore {
    /// Stores complete immediately.
    fn free() -> Arc<Self> {
        Arc::new(Self {
            listing: Vec::new(),
            stored: Mutex::new(Vec::new()),
            entered: AtomicUsize::new(0),
            gate: Semaphore::new(Semaphore::MAX_PERMITS),
        })
    }

    /// Stores block until [`StubStore::release`].
    fn gated() -> Arc<Self> {
        Arc::new(Self {
            listing: Vec::new(),
            stored: Mutex::new(Vec::new()),
            entered: AtomicUsize::new(0),
            gate: Semaphore::new(0),
        })
    }

    fn gated_with_listing(listing: Vec<ObjectStat>) -> Arc<Self> {
        Arc::new(Self {
            listing,
            stored: Mutex::new(Vec::new()),
            entered: AtomicUsize::new(0),
            gate: Semaphore::new(0),
        })
    }

    fn release(&self, n: usize) {
        self.gate.add_permits(n);
    }

    fn stored_keys(&self) -> Vec<String> {
        self.stored.lock().iter().map(|(k, _)| k.clone()).collect()
    }
}

#[async_trait]
impl RemoteStore for StubStore {
    async fn store(&self, key: &str, payload: Bytes) -> Result<(), StoreError> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        self.gate
            .acquire()
            .await
            .expect("stub gate closed")
            .forget();
        self.stored.lock().push((key.to_string(), payload));
        Ok(())
    }

    async fn fetch(
        &self,
        key: &str,
        stat_only: bool,
    ) -> Result<(Option<Bytes>, ObjectStat), StoreError> {
        let stored = self.stored.lock();
        match stored.iter().rev().find(|(k, _)| k == key) {
            Some((_, payload)) => {
                let stat = ObjectStat::new(key, payload.len() as u64);
                let body = (!stat_only).then(|| payload.clone());
                Ok((body, stat))
            }
            None => Err(StoreError::NotFound(key.to_string())),
        }
    }

    async fn fetch_stream(
        &self,
        key: &str,
        stat_only: bool,
    ) -> Result<(Option<ByteStream>, ObjectStat), StoreError> {
        let (body, stat) = self.fetch(key, stat_only).await?;
        let stream = body.map(|payload| futures::stream::once(async move { Ok(payload) }).boxed());
        Ok((stream, stat))
    }

    async fn list_prefix(&self, _prefix: &str) -> Result<Vec<ObjectStat>, StoreError> {
        Ok(self.listing.clone())
    }
}

fn queue(
    backend: Arc<StubStore>,
    workers: usize,
    capacity: usize,
) -> (WriteBehindQueue, CancellationToken, TaskTracker) {
    let shutdown = CancellationToken::new();
    let tracker = TaskTracker::new();
    let queue = WriteBehindQueue::new(
        "test",
        backend,
        workers,
        capacity,
        shutdown.clone(),
        &tracker,
    );
    (queue, shutdown, tracker)
}

async fn wait_until(what: &str, cond: impl Fn() -> bool) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

#[tokio::test]
async fn test_backpressure_blocks_when_queue_full() {
    let backend = StubStore::gated();
    let (queue, _shutdown, _tracker) = queue(backend.clone(), 1, 2);
    let queue = Arc::new(queue);

    // First write ends up inside the (stuck) worker, freeing a slot.
    queue.store("k0", Bytes::from("v")).await.unwrap();
    wait_until("worker picked up k0", || {
        backend.entered.load(Ordering::SeqCst) == 1
    })
    .await;

    // Fill the channel to capacity.
    queue.store("k1", Bytes::from("v")).await.unwrap();
    queue.store("k2", Bytes::from("v")).await.unwrap();

    // The next write must block until the backend makes progress.
    let blocked = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.store("k3", Bytes::from("v")).await })
    };
    sleep(Duration::from_millis(100)).await;
    assert!(!blocked.is_finished(), "write must block on a full queue");

    backend.release(4);
    timeout(Duration::from_secs(2), blocked)
        .await
        .expect("blocked write must resume once capacity frees up")
        .unwrap()
        .unwrap();

    wait_until("all four writes flushed", || {
        backend.stored_keys().len() == 4
    })
    .await;
}

#[tokio::test]
async fn test_read_blocks_until_all_writes_flushed() {
    let backend = StubStore::gated();
    let (queue, _shutdown, _tracker) = queue(backend.clone(), 1, 8);
    let queue = Arc::new(queue);

    queue.store("pending-key", Bytes::from("payload")).await.unwrap();

    // A read for a completely unrelated key must also wait: the barrier
    // is global, not per-key.
    let read = {
        let queue = queue.clone();
        tokio::spawn(async move { queue.fetch("unrelated", true).await })
    };
    sleep(Duration::from_millis(100)).await;
    assert!(!read.is_finished(), "read must wait for the in-flight write");

    backend.release(1);
    let result = timeout(Duration::from_secs(2), read)
        .await
        .expect("read must resume once the write is flushed")
        .unwrap();

    // The store for the pending key happened before the read returned.
    assert_eq!(backend.stored_keys(), vec!["pending-key".to_string()]);
    // The unrelated key itself does not exist; the backend error passes
    // through unchanged.
    assert!(matches!(result, Err(StoreError::NotFound(_))));
}

#[tokio::test]
async fn test_listing_merge_is_duplicate_free() {
    let backend = StubStore::gated();
    let (queue, _shutdown, _tracker) = queue(backend.clone(), 1, 8);

    queue.store("k", Bytes::from("12345")).await.unwrap();

    // Unflushed key is already visible, exactly once.
    let listed = queue.list_prefix("").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "k");
    assert_eq!(listed[0].size, 5);

    // A rewrite of the same key appends a second pending entry; dedup
    // keeps the first.
    queue.store("k", Bytes::from("123")).await.unwrap();
    let listed = queue.list_prefix("").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].size, 5);

    // Still exactly one entry after the flush completes: the pending list
    // is never pruned and the listing cache is never refreshed.
    backend.release(2);
    wait_until("writes flushed", || queue.outstanding() == 0).await;
    let listed = queue.list_prefix("").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "k");
}

#[tokio::test]
async fn test_shutdown_drains_queue_without_losing_writes() {
    let backend = StubStore::gated();
    let (queue, shutdown, tracker) = queue(backend.clone(), 2, 16);

    for i in 0..5 {
        queue
            .store(&format!("k{i}"), Bytes::from("v"))
            .await
            .unwrap();
    }

    // Signal shutdown while everything is still buffered or stuck in the
    // backend, then let the backend make progress.
    shutdown.cancel();
    tracker.close();
    backend.release(100);

    timeout(Duration::from_secs(5), tracker.wait())
        .await
        .expect("workers must terminate after the drain");

    let mut keys = backend.stored_keys();
    keys.sort();
    assert_eq!(keys, vec!["k0", "k1", "k2", "k3", "k4"]);
    assert_eq!(queue.outstanding(), 0);
}

#[tokio::test]
async fn test_concurrent_writers_lose_nothing() {
    let backend = StubStore::free();
    let (queue, _shutdown, _tracker) = queue(backend.clone(), 4, 8);
    let queue = Arc::new(queue);

    let mut writers = Vec::new();
    for i in 0..50 {
        let queue = queue.clone();
        writers.push(tokio::spawn(async move {
            for j in 0..100 {
                queue
                    .store(&format!("w{i}-{j}"), Bytes::from("v"))
                    .await
                    .unwrap();
            }
        }));
    }
    for writer in writers {
        writer.await.unwrap();
    }

    wait_until("all 5000 writes flushed", || queue.outstanding() == 0).await;
    let keys = backend.stored_keys();
    assert_eq!(keys.len(), 5000);
    let unique: std::collections::HashSet<_> = keys.iter().collect();
    assert_eq!(unique.len(), 5000, "no write may be duplicated");
}

#[tokio::test]
async fn test_listing_dedup_prefers_backend_entry() {
    let backend =
        StubStore::gated_with_listing(vec![ObjectStat::new("a", 10).with_etag("\"abc\"")]);
    let (queue, _shutdown, _tracker) = queue(backend.clone(), 1, 8);

    // Write a smaller payload for a key the backend already reports,
    // before the listing is first fetched.
    queue.store("a", Bytes::from("12345")).await.unwrap();

    let listed = queue.list_prefix("").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].size, 10, "backend entry wins over pending entry");
    assert_eq!(listed[0].etag, "\"abc\"");
}

#[tokio::test]
async fn test_write_after_shutdown_is_rejected_cleanly() {
    let backend = StubStore::free();
    let (queue, shutdown, _tracker) = queue(backend.clone(), 1, 8);

    shutdown.cancel();
    let err = queue.store("k", Bytes::from("v")).await.unwrap_err();
    assert!(matches!(err, StoreError::ShuttingDown));

    // No partial state: not counted, not pending.
    assert_eq!(queue.outstanding(), 0);
    assert!(queue.list_prefix("").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_stream_read_waits_for_barrier() {
    let backend = StubStore::gated();
    let (queue, _shutdown, _tracker) = queue(backend.clone(), 1, 8);
    let queue = Arc::new(queue);

    queue.store("doc", Bytes::from("chunked body")).await.unwrap();
    backend.release(1);

    let (body, stat) = queue.fetch_stream("doc", false).await.unwrap();
    assert_eq!(stat.size, 12);
    let mut stream = body.expect("payload requested");
    let chunk = stream.next().await.unwrap().unwrap();
    assert_eq!(&chunk[..], b"chunked body");
}
