//! Core types and traits for bucketshim
//!
//! This crate provides the types shared by the write-behind queue, the
//! backend adapters and the protocol front ends.

pub mod error;
pub mod store;

pub use error::StoreError;
pub use store::{ByteStream, ObjectStat, RemoteStore};
