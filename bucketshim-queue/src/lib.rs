//! Write-behind buffering for bucketshim
//!
//! The queue decouples client-facing writes from a slow remote backend:
//! a bounded task channel, a fixed flush-worker pool, a global
//! write-completion barrier gating reads, and a listing merge that makes
//! unflushed keys visible. See [`WriteBehindQueue`].

pub mod barrier;
pub mod queue;

#[cfg(test)]
mod tests;

pub use barrier::FlushBarrier;
pub use queue::WriteBehindQueue;
