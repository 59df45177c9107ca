//! In-memory backend adapter
//!
//! Used by tests and by local setups without a real remote. An optional
//! artificial delay per operation makes the write-behind buffering
//! observable even on a laptop.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::StreamExt;
use md5::{Digest, Md5};

use bucketshim_core::{ByteStream, ObjectStat, RemoteStore, StoreError};

struct StoredObject {
    data: Bytes,
    etag: String,
}

/// In-memory remote store.
#[derive(Default)]
pub struct MemoryRemote {
    objects: DashMap<String, StoredObject>,
    latency: Option<Duration>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep `latency` at the start of every operation, imitating a slow
    /// remote.
    pub fn with_latency(latency: Duration) -> Self {
        Self {
            objects: DashMap::new(),
            latency: Some(latency),
        }
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn compute_etag(data: &[u8]) -> String {
        let mut hasher = Md5::new();
        hasher.update(data);
        format!("\"{}\"", hex::encode(hasher.finalize()))
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn store(&self, key: &str, payload: Bytes) -> Result<(), StoreError> {
        self.simulate_latency().await;
        let etag = Self::compute_etag(&payload);
        self.objects.insert(
            key.to_string(),
            StoredObject {
                data: payload,
                etag,
            },
        );
        Ok(())
    }

    async fn fetch(
        &self,
        key: &str,
        stat_only: bool,
    ) -> Result<(Option<Bytes>, ObjectStat), StoreError> {
        self.simulate_latency().await;
        let obj = self
            .objects
            .get(key)
            .ok_or_else(|| StoreError::NotFound(key.to_string()))?;

        let stat = ObjectStat::new(key, obj.data.len() as u64).with_etag(obj.etag.clone());
        let body = (!stat_only).then(|| obj.data.clone());
        Ok((body, stat))
    }

    async fn fetch_stream(
        &self,
        key: &str,
        stat_only: bool,
    ) -> Result<(Option<ByteStream>, ObjectStat), StoreError> {
        let (body, stat) = self.fetch(key, stat_only).await?;
        let stream = body.map(|data| futures::stream::once(async move { Ok(data) }).boxed());
        Ok((stream, stat))
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<ObjectStat>, StoreError> {
        self.simulate_latency().await;
        let mut stats: Vec<ObjectStat> = self
            .objects
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| {
                ObjectStat::new(entry.key().clone(), entry.data.len() as u64)
                    .with_etag(entry.etag.clone())
            })
            .collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(stats)
    }
}
