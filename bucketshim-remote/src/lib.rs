//! Backend adapters for bucketshim
//!
//! Implementations of [`bucketshim_core::RemoteStore`] against actual
//! storage: an HTTP client for S3-compatible remote endpoints and an
//! in-memory store for tests and local experiments.

pub mod http;
pub mod memory;

pub use http::{HttpRemote, RetryPolicy};
pub use memory::MemoryRemote;
