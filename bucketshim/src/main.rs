//! bucketshim - write-behind S3 gateway
//!
//! Fronts slow remote object stores with an S3-compatible HTTP API so
//! legacy tools can read and write them as if they were local buckets.
//! Writes are acknowledged once buffered and flushed in the background;
//! reads wait for the outstanding backlog before hitting the backend.

mod config;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bucketshim_core::RemoteStore;
use bucketshim_queue::WriteBehindQueue;
use bucketshim_remote::{HttpRemote, MemoryRemote};
use bucketshim_s3::S3State;

use config::{BackendConfig, Config};

#[derive(Parser, Debug)]
#[command(name = "bucketshim")]
#[command(about = "Write-behind S3 gateway for slow remote object stores", long_about = None)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, env = "BUCKETSHIM_CONFIG")]
    config: Option<String>,

    /// Port to listen on (overrides the config file)
    #[arg(short, long, env = "BUCKETSHIM_PORT")]
    port: Option<u16>,

    /// Host to bind to (overrides the config file)
    #[arg(long, env = "BUCKETSHIM_HOST")]
    host: Option<String>,

    /// Flush workers per bucket (overrides the config file)
    #[arg(long, env = "BUCKETSHIM_WORKERS")]
    workers: Option<usize>,

    /// Buffered-write capacity per bucket (overrides the config file)
    #[arg(long, env = "BUCKETSHIM_BACKLOG")]
    backlog: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "BUCKETSHIM_LOG_LEVEL")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("bucketshim={},tower_http=debug", args.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = Config::load(args.config.as_deref())?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(workers) = args.workers {
        config.queue.workers = workers;
    }
    if let Some(backlog) = args.backlog {
        config.queue.backlog = backlog;
    }
    if config.buckets.is_empty() {
        anyhow::bail!("no buckets configured; add at least one [[bucket]] entry");
    }

    info!("Starting bucketshim...");
    info!(
        "  queue: {} workers, backlog {} per bucket",
        config.queue.workers, config.queue.backlog
    );

    // One shutdown signal and one completion tracker shared by the
    // workers of every bucket.
    let shutdown = CancellationToken::new();
    let tracker = TaskTracker::new();

    let mut state = S3State::new();
    for bucket in &config.buckets {
        let backend: Arc<dyn RemoteStore> = match &bucket.backend {
            BackendConfig::Http { endpoint } => {
                info!(bucket = %bucket.name, %endpoint, "remote backend");
                Arc::new(HttpRemote::new(endpoint)?)
            }
            BackendConfig::Memory { latency_ms } => {
                info!(bucket = %bucket.name, ?latency_ms, "in-memory backend");
                match latency_ms {
                    Some(ms) => Arc::new(MemoryRemote::with_latency(Duration::from_millis(*ms))),
                    None => Arc::new(MemoryRemote::new()),
                }
            }
        };

        let queue = WriteBehindQueue::new(
            &bucket.name,
            backend,
            config.queue.workers,
            config.queue.backlog,
            shutdown.clone(),
            &tracker,
        );
        state.add_bucket(&bucket.name, Arc::new(queue));
    }

    let app = bucketshim_s3::router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", addr);

    let stop = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("interrupt received, draining write backlogs");
            stop.cancel();
        })
        .await?;

    // Block until every flush worker of every bucket has drained.
    tracker.close();
    tracker.wait().await;
    info!("all write workers terminated, exiting");

    Ok(())
}
