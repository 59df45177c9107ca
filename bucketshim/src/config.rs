//! Configuration management

use serde::Deserialize;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    /// One gateway bucket per entry, each with its own backend target and
    /// its own write-behind queue.
    #[serde(default, rename = "bucket")]
    pub buckets: Vec<BucketConfig>,
}

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct QueueConfig {
    /// Flush workers per bucket.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Buffered-write capacity per bucket; a full backlog blocks writers.
    #[serde(default = "default_backlog")]
    pub backlog: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            backlog: default_backlog(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BucketConfig {
    pub name: String,

    #[serde(flatten)]
    pub backend: BackendConfig,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum BackendConfig {
    /// S3-compatible remote endpoint, e.g. `https://objects.example.com/backups`.
    Http { endpoint: String },

    /// In-memory backend, optionally with synthetic per-operation latency.
    Memory {
        #[serde(default)]
        latency_ms: Option<u64>,
    },
}

fn default_port() -> u16 {
    9800
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_workers() -> usize {
    4
}

fn default_backlog() -> usize {
    64
}

impl Config {
    /// Load configuration from file and environment
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let builder = match path {
            Some(path) => config::Config::builder().add_source(config::File::with_name(path)),
            None => config::Config::builder()
                .add_source(config::File::with_name("bucketshim").required(false)),
        };
        let config = builder
            .add_source(config::Environment::with_prefix("BUCKETSHIM"))
            .build()?;

        Ok(config.try_deserialize::<Config>()?)
    }
}
