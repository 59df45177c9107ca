//! The remote-store capability set
//!
//! [`RemoteStore`] is implemented both by backend adapters (the leaf
//! dependency talking to the actual remote object store) and by the
//! write-behind queue that decorates one of them. Front ends only ever
//! see this trait.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::StoreError;

/// Streamed object payload.
pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Metadata for one stored object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectStat {
    /// Object key.
    pub name: String,
    /// Payload length in bytes.
    pub size: u64,
    /// Backend integrity tag (ETag). Empty for writes the backend has not
    /// reported yet.
    pub etag: String,
}

impl ObjectStat {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
            etag: String::new(),
        }
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = etag.into();
        self
    }
}

/// Abstract remote object store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Store a payload under a key.
    async fn store(&self, key: &str, payload: Bytes) -> Result<(), StoreError>;

    /// Fetch an object. With `stat_only` the payload is not transferred
    /// and `None` is returned in its place.
    async fn fetch(
        &self,
        key: &str,
        stat_only: bool,
    ) -> Result<(Option<Bytes>, ObjectStat), StoreError>;

    /// Fetch an object as a stream of chunks. With `stat_only` the payload
    /// is not transferred and `None` is returned in its place.
    async fn fetch_stream(
        &self,
        key: &str,
        stat_only: bool,
    ) -> Result<(Option<ByteStream>, ObjectStat), StoreError>;

    /// List objects whose keys start with `prefix`.
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<ObjectStat>, StoreError>;
}
