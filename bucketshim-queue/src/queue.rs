//! Asynchronous write-behind queue
//!
//! Decorates a [`RemoteStore`] backend: writes are acknowledged after they
//! are buffered in a bounded channel and flushed to the backend by a fixed
//! pool of workers; reads park on the flush barrier until every accepted
//! write has been handed off; listings merge the backend's view with keys
//! that have not reached it yet. One instance per bucket, fully
//! independent of its siblings.

use std::collections::HashSet;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use bucketshim_core::{ByteStream, ObjectStat, RemoteStore, StoreError};

use crate::barrier::FlushBarrier;

/// One buffered write, owned by the queue until a worker consumes it.
#[derive(Debug)]
struct WriteTask {
    key: String,
    payload: Bytes,
}

/// Merge state guarded by the drain lock.
///
/// `pending` is append-only and never pruned: a key stays listed after its
/// flush, and listing-time dedup resolves the overlap. `listing` is
/// populated at most once per instance lifetime and never refreshed.
#[derive(Default)]
struct MergeState {
    pending: Vec<ObjectStat>,
    listing: Option<Vec<ObjectStat>>,
}

struct Shared {
    id: String,
    backend: Arc<dyn RemoteStore>,
    barrier: FlushBarrier,
    shutdown: CancellationToken,
    /// Single consumer end shared by all workers.
    rx: Mutex<mpsc::Receiver<WriteTask>>,
    /// The drain lock: mutually excludes write submission, the listing
    /// merge state and the shutdown drain pass.
    gate: Mutex<MergeState>,
    backlog: AtomicI64,
    total: AtomicI64,
}

impl Shared {
    /// Hand one task to the backend and mark it complete.
    ///
    /// A backend error here means the adapter's own retry policy was
    /// already exhausted; the write is dropped and still counted as
    /// flushed (best-effort semantics), which is why it is logged loudly.
    async fn flush(&self, task: WriteTask) {
        debug!(id = %self.id, key = %task.key, "flushing");
        if let Err(err) = self.backend.store(&task.key, task.payload).await {
            warn!(id = %self.id, key = %task.key, %err, "backend store failed, write dropped");
        }
        self.barrier.complete();
        let backlog = self.backlog.fetch_sub(1, Ordering::Relaxed) - 1;
        let total = self.total.load(Ordering::Relaxed);
        debug!(id = %self.id, backlog, total, "flushed");
    }

    /// Synchronously flush everything currently buffered. Non-blocking:
    /// stops once the channel reports empty, does not wait for arrivals.
    /// Caller must hold the drain lock.
    async fn drain(&self) {
        let mut rx = self.rx.lock().await;
        let mut drained = 0usize;
        while let Ok(task) = rx.try_recv() {
            self.flush(task).await;
            drained += 1;
        }
        if drained > 0 {
            info!(id = %self.id, drained, "shutdown drain flushed remaining writes");
        }
    }
}

/// Flush worker: `Running -> (shutdown observed) -> Draining -> Terminated`.
async fn run_worker(shared: Arc<Shared>) {
    loop {
        tokio::select! {
            task = next_task(&shared) => {
                match task {
                    Some(task) => shared.flush(task).await,
                    // Channel closed without a shutdown signal: the owning
                    // queue was dropped, nothing left to flush.
                    None => return,
                }
            }
            () = shared.shutdown.cancelled() => {
                let _guard = shared.gate.lock().await;
                shared.drain().await;
                return;
            }
        }
    }
}

async fn next_task(shared: &Shared) -> Option<WriteTask> {
    shared.rx.lock().await.recv().await
}

/// Write-behind queue in front of one backend adapter.
pub struct WriteBehindQueue {
    tx: mpsc::Sender<WriteTask>,
    shared: Arc<Shared>,
}

impl WriteBehindQueue {
    /// Build the queue and spawn its worker pool on `tracker`.
    ///
    /// `capacity` bounds the backlog: a full channel blocks producers
    /// rather than dropping or growing. `shutdown` is the process-wide
    /// stop signal; `tracker` is the shared completion tracker the owning
    /// process waits on before exiting.
    pub fn new(
        id: impl Into<String>,
        backend: Arc<dyn RemoteStore>,
        workers: usize,
        capacity: usize,
        shutdown: CancellationToken,
        tracker: &TaskTracker,
    ) -> Self {
        let id = id.into();
        let workers = workers.max(1);
        let (tx, rx) = mpsc::channel(capacity.max(1));

        let shared = Arc::new(Shared {
            id: id.clone(),
            backend,
            barrier: FlushBarrier::new(),
            shutdown,
            rx: Mutex::new(rx),
            gate: Mutex::new(MergeState::default()),
            backlog: AtomicI64::new(0),
            total: AtomicI64::new(0),
        });

        for _ in 0..workers {
            tracker.spawn(run_worker(shared.clone()));
        }
        info!(%id, workers, capacity, "write-behind queue started");

        Self { tx, shared }
    }

    /// Accepted-but-unflushed write count.
    pub fn outstanding(&self) -> i64 {
        self.shared.barrier.outstanding()
    }

    /// Instance identifier, as configured.
    pub fn id(&self) -> &str {
        &self.shared.id
    }
}

#[async_trait]
impl RemoteStore for WriteBehindQueue {
    /// Accept a write. Returns once the task is buffered; the payload
    /// reaches the backend later, from a worker or the shutdown drain.
    /// Blocks while the backlog is at capacity.
    async fn store(&self, key: &str, payload: Bytes) -> Result<(), StoreError> {
        // Backpressure happens before the drain lock is taken, so a
        // producer stuck on a full queue never holds up the drain pass.
        let permit = self
            .tx
            .reserve()
            .await
            .map_err(|_| StoreError::ShuttingDown)?;

        let mut state = self.shared.gate.lock().await;
        if self.shared.shutdown.is_cancelled() {
            // Reject with no partial state: the permit is released, the
            // write was neither counted nor queued.
            return Err(StoreError::ShuttingDown);
        }

        self.shared.barrier.register();
        let total = self.shared.total.fetch_add(1, Ordering::Relaxed) + 1;
        let backlog = self.shared.backlog.fetch_add(1, Ordering::Relaxed) + 1;
        state.pending.push(ObjectStat::new(key, payload.len() as u64));
        permit.send(WriteTask {
            key: key.to_string(),
            payload,
        });
        debug!(id = %self.shared.id, key, backlog, total, "write queued");
        Ok(())
    }

    /// Read through to the backend once every write accepted before this
    /// call has been flushed. The barrier is global, not per-key: a read
    /// for one key also waits for unrelated in-flight writes.
    async fn fetch(
        &self,
        key: &str,
        stat_only: bool,
    ) -> Result<(Option<Bytes>, ObjectStat), StoreError> {
        self.shared.barrier.wait().await;
        self.shared.backend.fetch(key, stat_only).await
    }

    async fn fetch_stream(
        &self,
        key: &str,
        stat_only: bool,
    ) -> Result<(Option<ByteStream>, ObjectStat), StoreError> {
        self.shared.barrier.wait().await;
        self.shared.backend.fetch_stream(key, stat_only).await
    }

    /// Merge the backend's listing with keys not yet flushed.
    ///
    /// The backend listing is fetched on the first call only and reused
    /// for the instance lifetime. Backend entries win over pending
    /// entries of the same name, so a key the backend already reports
    /// keeps the backend's size and tag.
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<ObjectStat>, StoreError> {
        let mut state = self.shared.gate.lock().await;
        if state.listing.is_none() {
            let fetched = self.shared.backend.list_prefix(prefix).await?;
            debug!(id = %self.shared.id, entries = fetched.len(), "backend listing cached");
            state.listing = Some(fetched);
        }

        let mut seen = HashSet::new();
        let mut merged = Vec::new();
        for stat in state.listing.iter().flatten().chain(state.pending.iter()) {
            if seen.insert(stat.name.clone()) {
                merged.push(stat.clone());
            }
        }
        Ok(merged)
    }
}
