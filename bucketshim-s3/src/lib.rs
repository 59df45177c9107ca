//! S3-compatible HTTP front end for bucketshim
//!
//! Exposes the subset of the S3 API that legacy tools need against the
//! write-behind gateway: ListBuckets, ListObjects, and Head/Get/Put on
//! objects. Everything else answers with an XML error.

pub mod handlers;
pub mod xml;


use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::{any, get},
    Router,
};
use tower_http::trace::TraceLayer;

pub use handlers::{ListObjectsQuery, S3State};

/// Build the S3 router over a bucket registry.
pub fn router(state: S3State) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/", any(handlers::handle_root))
        .route("/:bucket", any(handlers::handle_bucket))
        .route("/:bucket/*key", any(handlers::handle_object))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, r#"{"status": "running"}"#)
}
