//! S3-compatible object store backed by `rust-s3`.

use std::future::Future;
use std::io::{self, SeekFrom};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, NaiveDateTime, Utc};
use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};
use tracing::debug;

use ::s3::creds::Credentials;
use ::s3::error::S3Error;
use ::s3::region::Region;
use ::s3::Bucket;

use super::{BucketInfo, ObjectInfo, ObjectListing, ObjectStat, ObjectStore, ObjectStream, DELIMITER};
use crate::config::StoreConfig;
use crate::error::{Error, Result};

/// Object store talking to an S3-compatible endpoint
#[derive(Clone)]
pub struct S3Store {
    region: Region,
    credentials: Credentials,
    path_style: bool,
}

impl S3Store {
    /// Create a store from connection settings
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let region = Region::Custom {
            region: config.region.clone(),
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
        };

        let credentials = if config.access_key.is_empty() {
            Credentials::anonymous()
        } else {
            Credentials::new(
                Some(&config.access_key),
                Some(&config.secret_key),
                None,
                None,
                None,
            )
        }
        .map_err(|e| Error::Config(format!("invalid S3 credentials: {}", e)))?;

        Ok(Self {
            region,
            credentials,
            path_style: config.path_style,
        })
    }

    fn bucket(&self, name: &str) -> Result<Bucket> {
        let mut bucket = Bucket::new(name, self.region.clone(), self.credentials.clone())?;
        if self.path_style {
            bucket = bucket.with_path_style();
        }
        Ok(*bucket)
    }

    async fn list_all(&self, bucket: &str, prefix: &str, recursive: bool) -> Result<Vec<ObjectInfo>> {
        let delimiter = if recursive {
            None
        } else {
            Some(DELIMITER.to_string())
        };

        let pages = self.bucket(bucket)?.list(prefix.to_string(), delimiter).await?;

        let mut listing = Vec::new();
        for page in pages {
            for object in page.contents {
                listing.push(ObjectInfo {
                    last_modified: parse_timestamp(&object.last_modified),
                    key: object.key,
                    size: object.size,
                });
            }
            for common in page.common_prefixes.into_iter().flatten() {
                listing.push(ObjectInfo {
                    key: common.prefix,
                    size: 0,
                    last_modified: DateTime::<Utc>::UNIX_EPOCH,
                });
            }
        }

        debug!("S3 list {}/{}: {} entries", bucket, prefix, listing.len());
        Ok(listing)
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        let response = Bucket::list_buckets(self.region.clone(), self.credentials.clone()).await?;
        Ok(response
            .buckets
            .bucket
            .into_iter()
            .map(|b| BucketInfo {
                creation_date: parse_timestamp(&b.creation_date.to_string()),
                name: b.name,
            })
            .collect())
    }

    fn list_objects<'a>(&'a self, bucket: &'a str, prefix: &'a str, recursive: bool)
        -> ObjectListing<'a>
    {
        stream::once(self.list_all(bucket, prefix, recursive))
            .flat_map(|result| {
                let items: Vec<Result<ObjectInfo>> = match result {
                    Ok(listing) => listing.into_iter().map(Ok).collect(),
                    Err(e) => vec![Err(e)],
                };
                stream::iter(items)
            })
            .boxed()
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Box<dyn ObjectStream>> {
        let handle = self.bucket(bucket)?;
        let stat = head(&handle, key).await?;
        debug!("S3 open {}/{} ({} bytes)", bucket, key, stat.size);

        Ok(Box::new(S3ObjectStream::new(handle, key, stat)))
    }

    async fn stat_object(&self, bucket: &str, key: &str) -> Result<ObjectStat> {
        head(&self.bucket(bucket)?, key).await
    }
}

async fn head(bucket: &Bucket, key: &str) -> Result<ObjectStat> {
    let (head, code) = bucket
        .head_object(key)
        .await
        .map_err(|e| request_error(e, &bucket.name(), key))?;
    match code {
        200..=299 => {}
        404 => return Err(Error::NotFound(format!("{}/{}", bucket.name(), key))),
        code => {
            return Err(Error::Store(format!(
                "HEAD {}/{} returned status {}",
                bucket.name(),
                key,
                code
            )))
        }
    }

    let last_modified = head
        .last_modified
        .as_deref()
        .and_then(parse_http_date)
        .ok_or_else(|| Error::Store(format!("HEAD {}/{} has no Last-Modified", bucket.name(), key)))?;

    Ok(ObjectStat {
        size: head.content_length.unwrap_or(0).max(0) as u64,
        last_modified,
    })
}

/// Bytes requested per ranged GET
const FETCH_WINDOW: u64 = 4 * 1024 * 1024;

/// A ranged GET in flight: offset of the first returned byte, and the bytes
type Fetch = BoxFuture<'static, Result<(u64, Bytes)>>;

/// Object body fetched lazily with ranged GETs.
///
/// Only the window around the read position is held in memory; seeking
/// just moves the position.
struct S3ObjectStream {
    bucket: Arc<Bucket>,
    key: String,
    stat: ObjectStat,
    pos: u64,
    window: Bytes,
    window_start: u64,
    pending: Option<Fetch>,
}

impl S3ObjectStream {
    fn new(bucket: Bucket, key: &str, stat: ObjectStat) -> Self {
        Self {
            bucket: Arc::new(bucket),
            key: key.to_string(),
            stat,
            pos: 0,
            window: Bytes::new(),
            window_start: 0,
            pending: None,
        }
    }

    /// Fetched bytes from the read position on, if the window covers it
    fn buffered(&self) -> Option<&[u8]> {
        let offset = usize::try_from(self.pos.checked_sub(self.window_start)?).ok()?;
        self.window.get(offset..).filter(|rest| !rest.is_empty())
    }
}

fn fetch_range(bucket: Arc<Bucket>, key: String, start: u64, end: u64) -> Fetch {
    Box::pin(async move {
        let response = bucket
            .get_object_range(&key, start, Some(end))
            .await
            .map_err(|e| request_error(e, &bucket.name(), &key))?;

        match response.status_code() {
            206 => Ok((start, response.bytes().clone())),
            // Range ignored: the whole object came back
            200 => Ok((0, response.bytes().clone())),
            404 => Err(Error::NotFound(format!("{}/{}", bucket.name(), key))),
            code => Err(Error::Store(format!(
                "GET {}/{} bytes {}-{} returned status {}",
                bucket.name(),
                key,
                start,
                end,
                code
            ))),
        }
    })
}

impl AsyncRead for S3ObjectStream {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            if this.pos >= this.stat.size || buf.remaining() == 0 {
                return Poll::Ready(Ok(()));
            }

            if let Some(rest) = this.buffered() {
                let n = rest.len().min(buf.remaining());
                buf.put_slice(&rest[..n]);
                this.pos += n as u64;
                return Poll::Ready(Ok(()));
            }

            let start = this.pos;
            let end = start.saturating_add(FETCH_WINDOW).min(this.stat.size) - 1;
            let pending = this
                .pending
                .get_or_insert_with(|| fetch_range(Arc::clone(&this.bucket), this.key.clone(), start, end));

            let result = ready!(pending.as_mut().poll(cx));
            this.pending = None;

            let (window_start, window) = result.map_err(io::Error::from)?;
            debug!("S3 GET {}/{} bytes {}-{}: {} bytes", this.bucket.name(), this.key, start, end, window.len());
            this.window_start = window_start;
            this.window = window;

            if this.buffered().is_none() {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("{}: object shorter than its reported size", this.key),
                )));
            }
        }
    }
}

impl AsyncSeek for S3ObjectStream {
    fn start_seek(self: Pin<&mut Self>, pos: SeekFrom) -> io::Result<()> {
        let this = self.get_mut();
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(offset) => this.stat.size.checked_add_signed(offset),
            SeekFrom::Current(offset) => this.pos.checked_add_signed(offset),
        }
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seek before start of object"))?;

        if target != this.pos {
            this.pending = None;
            this.pos = target;
        }
        Ok(())
    }

    fn poll_complete(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Poll::Ready(Ok(self.pos))
    }
}

#[async_trait]
impl ObjectStream for S3ObjectStream {
    async fn stat(&mut self) -> Result<ObjectStat> {
        Ok(self.stat)
    }

    async fn close(mut self: Box<Self>) -> Result<()> {
        self.pending = None;
        Ok(())
    }
}

/// Clients built with `fail-on-err` report HTTP failures as errors
fn request_error(err: S3Error, bucket: &str, key: &str) -> Error {
    match err {
        S3Error::HttpFailWithBody(404, _) => Error::NotFound(format!("{}/{}", bucket, key)),
        other => other.into(),
    }
}

/// Parse an RFC 7231 date as sent in Last-Modified
fn parse_http_date(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%a, %d %b %Y %H:%M:%S GMT")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

/// Parse a listing timestamp (`2024-05-01T10:00:00.000Z`). Unparseable
/// values fall back to the Unix epoch.
fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f UTC").map(|naive| naive.and_utc())
        })
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}
