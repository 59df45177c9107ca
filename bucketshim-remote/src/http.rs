//! HTTP backend adapter
//!
//! Talks to an S3-compatible remote object endpoint: PUT/GET/HEAD for
//! objects, `?list-type=2` for listings. Transient failures (network
//! errors, 5xx) are retried with bounded exponential backoff; the adapter
//! never retries forever.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use reqwest::{header, Client, Method, StatusCode};
use tracing::{debug, warn};

use bucketshim_core::{ByteStream, ObjectStat, RemoteStore, StoreError};

/// Characters escaped in object-key path segments. `/` stays literal so
/// hierarchical keys keep their shape.
const KEY_PATH: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}')
    .add(b'%');

const QUERY: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'<')
    .add(b'>')
    .add(b'&')
    .add(b'+')
    .add(b'=')
    .add(b'%');

/// Bounded exponential backoff for transient failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(200),
        }
    }
}

/// Outcome classification for one attempt.
enum Attempt {
    Transient(StoreError),
    Fatal(StoreError),
}

/// Remote object store over HTTP.
pub struct HttpRemote {
    client: Client,
    /// Endpoint including the bucket path, no trailing slash.
    endpoint: String,
    retry: RetryPolicy,
}

impl HttpRemote {
    /// Build an adapter for one remote bucket endpoint, e.g.
    /// `https://objects.example.com/backups`.
    pub fn new(endpoint: impl Into<String>) -> Result<Self, StoreError> {
        let client = Client::builder()
            .build()
            .map_err(StoreError::backend)?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            retry: RetryPolicy::default(),
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn object_url(&self, key: &str) -> String {
        format!(
            "{}/{}",
            self.endpoint,
            utf8_percent_encode(key, KEY_PATH)
        )
    }

    async fn with_retry<T, F, Fut>(&self, what: &str, mut attempt: F) -> Result<T, StoreError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, Attempt>>,
    {
        let mut delay = self.retry.base_delay;
        let mut tries = 0u32;
        loop {
            tries += 1;
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(Attempt::Fatal(err)) => return Err(err),
                Err(Attempt::Transient(err)) => {
                    if tries >= self.retry.max_attempts {
                        warn!(what, tries, %err, "backend retries exhausted");
                        return Err(err);
                    }
                    debug!(what, tries, delay_ms = delay.as_millis() as u64, %err, "transient backend failure, backing off");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }
}

fn transient(err: reqwest::Error) -> Attempt {
    Attempt::Transient(StoreError::backend(err))
}

/// Map an object-level response status. 404 surfaces as `NotFound`
/// verbatim; 5xx is worth another attempt; other failures are not.
fn classify_object_status(status: StatusCode, key: &str) -> Result<(), Attempt> {
    if status.is_success() {
        Ok(())
    } else if status == StatusCode::NOT_FOUND {
        Err(Attempt::Fatal(StoreError::NotFound(key.to_string())))
    } else if status.is_server_error() {
        Err(Attempt::Transient(StoreError::Backend(format!(
            "remote returned {status} for {key}"
        ))))
    } else {
        Err(Attempt::Fatal(StoreError::Backend(format!(
            "remote returned {status} for {key}"
        ))))
    }
}

fn stat_from_headers(key: &str, headers: &header::HeaderMap) -> ObjectStat {
    let size = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let etag = headers
        .get(header::ETAG)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    ObjectStat::new(key, size).with_etag(etag)
}

#[async_trait]
impl RemoteStore for HttpRemote {
    async fn store(&self, key: &str, payload: Bytes) -> Result<(), StoreError> {
        let url = self.object_url(key);
        let client = self.client.clone();
        let key = key.to_string();
        self.with_retry("put", move || {
            let client = client.clone();
            let url = url.clone();
            let payload = payload.clone();
            let key = key.clone();
            async move {
                let resp = client
                    .put(&url)
                    .body(payload)
                    .send()
                    .await
                    .map_err(transient)?;
                classify_object_status(resp.status(), &key)
            }
        })
        .await
    }

    async fn fetch(
        &self,
        key: &str,
        stat_only: bool,
    ) -> Result<(Option<Bytes>, ObjectStat), StoreError> {
        let url = self.object_url(key);
        let client = self.client.clone();
        let key = key.to_string();
        let method = if stat_only { Method::HEAD } else { Method::GET };
        self.with_retry("get", move || {
            let client = client.clone();
            let url = url.clone();
            let key = key.clone();
            let method = method.clone();
            async move {
                let resp = client
                    .request(method, &url)
                    .send()
                    .await
                    .map_err(transient)?;
                classify_object_status(resp.status(), &key)?;
                let stat = stat_from_headers(&key, resp.headers());
                if stat_only {
                    Ok((None, stat))
                } else {
                    let data = resp.bytes().await.map_err(transient)?;
                    let stat = ObjectStat::new(&key, data.len() as u64).with_etag(stat.etag);
                    Ok((Some(data), stat))
                }
            }
        })
        .await
    }

    async fn fetch_stream(
        &self,
        key: &str,
        stat_only: bool,
    ) -> Result<(Option<ByteStream>, ObjectStat), StoreError> {
        if stat_only {
            let (_, stat) = self.fetch(key, true).await?;
            return Ok((None, stat));
        }

        let url = self.object_url(key);
        let client = self.client.clone();
        let owned_key = key.to_string();
        // Retry wraps the initial request only; once the body stream has
        // started, errors surface to the consumer.
        let resp = self
            .with_retry("get-stream", move || {
                let client = client.clone();
                let url = url.clone();
                let key = owned_key.clone();
                async move {
                    let resp = client.get(&url).send().await.map_err(transient)?;
                    classify_object_status(resp.status(), &key)?;
                    Ok(resp)
                }
            })
            .await?;

        let stat = stat_from_headers(key, resp.headers());
        let stream = resp
            .bytes_stream()
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))
            .boxed();
        Ok((Some(stream), stat))
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<ObjectStat>, StoreError> {
        let url = format!(
            "{}?list-type=2&prefix={}",
            self.endpoint,
            utf8_percent_encode(prefix, QUERY)
        );
        let client = self.client.clone();
        let body = self
            .with_retry("list", move || {
                let client = client.clone();
                let url = url.clone();
                async move {
                    let resp = client.get(&url).send().await.map_err(transient)?;
                    let status = resp.status();
                    if status.is_server_error() {
                        return Err(Attempt::Transient(StoreError::Backend(format!(
                            "remote listing returned {status}"
                        ))));
                    }
                    if !status.is_success() {
                        return Err(Attempt::Fatal(StoreError::Backend(format!(
                            "remote listing returned {status}"
                        ))));
                    }
                    resp.text().await.map_err(transient)
                }
            })
            .await?;
        Ok(extract_contents(&body))
    }
}

/// Pull `<Contents>` entries out of a ListBucketResult document. Keys are
/// XML-unescaped; a block without a `<Key>` is skipped.
fn extract_contents(xml: &str) -> Vec<ObjectStat> {
    let mut out = Vec::new();
    let mut rest = xml;
    while let Some(start) = rest.find("<Contents>") {
        let body_start = start + "<Contents>".len();
        let Some(len) = rest[body_start..].find("</Contents>") else {
            break;
        };
        let block = &rest[body_start..body_start + len];
        if let Some(name) = extract_tag(block, "Key") {
            let size = extract_tag(block, "Size")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            let etag = extract_tag(block, "ETag").unwrap_or_default();
            out.push(ObjectStat::new(name, size).with_etag(etag));
        }
        rest = &rest[body_start + len + "</Contents>".len()..];
    }
    out
}

fn extract_tag(block: &str, tag: &str) -> Option<String> {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let start = block.find(&open)? + open.len();
    let end = block[start..].find(&close)? + start;
    Some(xml_unescape(&block[start..end]))
}

fn xml_unescape(s: &str) -> String {
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_contents() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>backups</Name>
  <Contents>
    <Key>reports/2024.csv</Key>
    <LastModified>2024-01-01T00:00:00.000Z</LastModified>
    <ETag>&quot;d41d8cd98f00b204e9800998ecf8427e&quot;</ETag>
    <Size>1042</Size>
    <StorageClass>STANDARD</StorageClass>
  </Contents>
  <Contents>
    <Key>a&amp;b.txt</Key>
    <Size>7</Size>
  </Contents>
</ListBucketResult>"#;

        let stats = extract_contents(xml);
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].name, "reports/2024.csv");
        assert_eq!(stats[0].size, 1042);
        assert_eq!(stats[0].etag, "\"d41d8cd98f00b204e9800998ecf8427e\"");
        assert_eq!(stats[1].name, "a&b.txt");
        assert_eq!(stats[1].etag, "");
    }

    #[test]
    fn test_extract_contents_empty_listing() {
        let xml = r#"<ListBucketResult><Name>empty</Name></ListBucketResult>"#;
        assert!(extract_contents(xml).is_empty());
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let remote = HttpRemote::new("http://remote.invalid/bucket")
            .unwrap()
            .with_retry_policy(RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
            });

        let mut calls = 0u32;
        let err = remote
            .with_retry("test", || {
                calls += 1;
                async { Err::<(), _>(Attempt::Transient(StoreError::backend("boom"))) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls, 3);
        assert!(matches!(err, StoreError::Backend(_)));
    }

    #[tokio::test]
    async fn test_retry_fatal_is_not_retried() {
        let remote = HttpRemote::new("http://remote.invalid/bucket").unwrap();

        let mut calls = 0u32;
        let err = remote
            .with_retry("test", || {
                calls += 1;
                async { Err::<(), _>(Attempt::Fatal(StoreError::NotFound("k".to_string()))) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls, 1);
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_object_url_escapes_key() {
        let remote = HttpRemote::new("https://objects.example.com/backups/").unwrap();
        assert_eq!(
            remote.object_url("dir/my file.txt"),
            "https://objects.example.com/backups/dir/my%20file.txt"
        );
    }
}
