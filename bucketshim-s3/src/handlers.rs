//! S3 HTTP request handlers
//!
//! Thin translators: parse the request, call the write-behind queue's
//! store operations, serialize an XML response. No scheduling or shared
//! state lives here.

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, Method, StatusCode},
    response::Response,
};
use bytes::Bytes;
use md5::{Digest, Md5};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

use bucketshim_core::{RemoteStore, StoreError};

use crate::xml::{format_error, format_list_buckets, format_list_objects};

/// Bucket registry: one store (a write-behind queue per configured
/// backend target) per bucket name, created at startup.
#[derive(Default)]
pub struct S3State {
    buckets: HashMap<String, Arc<dyn RemoteStore>>,
}

impl S3State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_bucket(&mut self, name: impl Into<String>, store: Arc<dyn RemoteStore>) {
        self.buckets.insert(name.into(), store);
    }

    pub fn bucket_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.buckets.keys().cloned().collect();
        names.sort();
        names
    }

    fn bucket(&self, name: &str) -> Option<&Arc<dyn RemoteStore>> {
        self.buckets.get(name)
    }
}

/// Query parameters for ListObjects
#[derive(Debug, Deserialize, Default)]
pub struct ListObjectsQuery {
    pub prefix: Option<String>,
}

/// Handle root-level operations (ListBuckets)
pub async fn handle_root(State(state): State<Arc<S3State>>, method: Method) -> Response {
    match method {
        Method::GET => list_buckets(&state),
        _ => method_not_allowed(),
    }
}

/// Handle bucket-level operations
pub async fn handle_bucket(
    State(state): State<Arc<S3State>>,
    Path(bucket): Path<String>,
    method: Method,
    Query(query): Query<ListObjectsQuery>,
) -> Response {
    info!(bucket = %bucket, method = %method, "bucket request");
    match method {
        Method::GET => list_objects(&state, &bucket, &query).await,
        Method::HEAD => head_bucket(&state, &bucket),
        // Bucket creation/deletion is not supported against a fixed
        // registry of configured backends.
        Method::PUT | Method::DELETE => not_implemented("bucket management"),
        _ => method_not_allowed(),
    }
}

/// Handle object-level operations
pub async fn handle_object(
    State(state): State<Arc<S3State>>,
    Path((bucket, key)): Path<(String, String)>,
    method: Method,
    body: Bytes,
) -> Response {
    info!(bucket = %bucket, key = %key, method = %method, "object request");
    match method {
        Method::PUT => put_object(&state, &bucket, &key, body).await,
        Method::GET => get_object(&state, &bucket, &key).await,
        Method::HEAD => head_object(&state, &bucket, &key).await,
        Method::DELETE => not_implemented("object deletion"),
        _ => method_not_allowed(),
    }
}

// === Bucket Operations ===

fn list_buckets(state: &S3State) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "application/xml")
        .body(Body::from(format_list_buckets(&state.bucket_names())))
        .unwrap()
}

fn head_bucket(state: &S3State, bucket: &str) -> Response {
    let status = if state.bucket(bucket).is_some() {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    Response::builder()
        .status(status)
        .body(Body::empty())
        .unwrap()
}

async fn list_objects(state: &S3State, bucket: &str, query: &ListObjectsQuery) -> Response {
    let Some(store) = state.bucket(bucket) else {
        return no_such_bucket(bucket);
    };

    let prefix = query.prefix.as_deref().unwrap_or("");
    match store.list_prefix(prefix).await {
        Ok(merged) => {
            let entries: Vec<_> = merged
                .into_iter()
                .filter(|stat| stat.name.starts_with(prefix))
                .collect();
            Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, "application/xml")
                .body(Body::from(format_list_objects(bucket, prefix, &entries)))
                .unwrap()
        }
        Err(err) => store_error(&err, bucket),
    }
}

// === Object Operations ===

async fn put_object(state: &S3State, bucket: &str, key: &str, body: Bytes) -> Response {
    let Some(store) = state.bucket(bucket) else {
        return no_such_bucket(bucket);
    };

    // The write is only buffered at this point; the ETag is computed here
    // because the backend has not seen the payload yet.
    let etag = compute_etag(&body);
    match store.store(key, body).await {
        Ok(()) => Response::builder()
            .status(StatusCode::OK)
            .header("ETag", etag)
            .body(Body::empty())
            .unwrap(),
        Err(err) => store_error(&err, key),
    }
}

async fn get_object(state: &S3State, bucket: &str, key: &str) -> Response {
    let Some(store) = state.bucket(bucket) else {
        return no_such_bucket(bucket);
    };

    match store.fetch_stream(key, false).await {
        Ok((body, stat)) => {
            let body = match body {
                Some(stream) => Body::from_stream(stream),
                None => Body::empty(),
            };
            Response::builder()
                .status(StatusCode::OK)
                .header("ETag", &stat.etag)
                .header(header::CONTENT_LENGTH, stat.size.to_string())
                .header(header::CONTENT_TYPE, "application/octet-stream")
                .header("Last-Modified", http_date())
                .body(body)
                .unwrap()
        }
        Err(err) => store_error(&err, key),
    }
}

async fn head_object(state: &S3State, bucket: &str, key: &str) -> Response {
    let Some(store) = state.bucket(bucket) else {
        return Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::empty())
            .unwrap();
    };

    match store.fetch(key, true).await {
        Ok((_, stat)) => Response::builder()
            .status(StatusCode::OK)
            .header("ETag", &stat.etag)
            .header(header::CONTENT_LENGTH, stat.size.to_string())
            .header("Last-Modified", http_date())
            .body(Body::empty())
            .unwrap(),
        Err(StoreError::NotFound(_)) => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::empty())
            .unwrap(),
        Err(_) => Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Body::empty())
            .unwrap(),
    }
}

// === Helper Functions ===

fn compute_etag(data: &[u8]) -> String {
    let mut hasher = Md5::new();
    hasher.update(data);
    format!("\"{}\"", hex::encode(hasher.finalize()))
}

fn http_date() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// Map a core failure to a protocol-appropriate status response.
fn store_error(err: &StoreError, resource: &str) -> Response {
    match err {
        StoreError::NotFound(_) => xml_error(
            StatusCode::NOT_FOUND,
            "NoSuchKey",
            "The specified key does not exist.",
            resource,
        ),
        StoreError::ShuttingDown => xml_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "ServiceUnavailable",
            "The gateway is shutting down.",
            resource,
        ),
        StoreError::Backend(_) | StoreError::Io(_) => xml_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "InternalError",
            &err.to_string(),
            resource,
        ),
    }
}

fn no_such_bucket(bucket: &str) -> Response {
    xml_error(
        StatusCode::NOT_FOUND,
        "NoSuchBucket",
        "The specified bucket does not exist",
        bucket,
    )
}

fn method_not_allowed() -> Response {
    xml_error(
        StatusCode::METHOD_NOT_ALLOWED,
        "MethodNotAllowed",
        "The specified method is not allowed against this resource.",
        "",
    )
}

fn not_implemented(what: &str) -> Response {
    xml_error(
        StatusCode::NOT_IMPLEMENTED,
        "NotImplemented",
        &format!("{what} is not supported by this gateway"),
        "",
    )
}

fn xml_error(status: StatusCode, code: &str, message: &str, resource: &str) -> Response {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "application/xml")
        .body(Body::from(format_error(code, message, resource)))
        .unwrap()
}
