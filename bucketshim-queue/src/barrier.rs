//! Write-completion barrier
//!
//! Counts writes that have been accepted but not yet handed to the
//! backend, and lets readers park until the count drops to zero. The
//! barrier is global per queue instance: a read for one key waits for
//! in-flight writes to every key. Coarse on purpose (see the queue docs).

use std::sync::atomic::{AtomicI64, Ordering};

use tokio::sync::Notify;

/// Outstanding-write counter with a zero-crossing wakeup.
#[derive(Debug, Default)]
pub struct FlushBarrier {
    outstanding: AtomicI64,
    drained: Notify,
}

impl FlushBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one accepted write. Called exactly once per write, under
    /// the submission lock.
    pub fn register(&self) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
    }

    /// Mark one write as handed to the backend. Wakes waiters when the
    /// count reaches zero.
    pub fn complete(&self) {
        if self.outstanding.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.drained.notify_waiters();
        }
    }

    /// Current number of accepted-but-unflushed writes.
    pub fn outstanding(&self) -> i64 {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Wait until every write registered before this call has completed.
    pub async fn wait(&self) {
        loop {
            // Arm the notification before the check so a completion that
            // lands in between is not missed.
            let drained = self.drained.notified();
            if self.outstanding.load(Ordering::SeqCst) <= 0 {
                return;
            }
            drained.await;
        }
    }
}
