//! In-memory object store.
//!
//! Buckets and objects live in ordered maps, so listings come back in key
//! order just like an S3 listing. Used by the test suites; all data is lost
//! when the store is dropped.

use std::collections::BTreeMap;
use std::io::{self, Cursor, SeekFrom};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard};
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};

use super::{BucketInfo, ObjectInfo, ObjectListing, ObjectStat, ObjectStore, ObjectStream, DELIMITER};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    last_modified: DateTime<Utc>,
}

#[derive(Debug)]
struct StoredBucket {
    creation_date: DateTime<Utc>,
    objects: BTreeMap<String, StoredObject>,
}

#[derive(Debug, Default)]
struct Inner {
    buckets: RwLock<BTreeMap<String, StoredBucket>>,
    /// When set, every store call fails with this message
    failure: RwLock<Option<String>>,
    /// When set, closing a stream fails (the stream is still released)
    close_failure: AtomicBool,
    open_streams: AtomicUsize,
    closed_streams: AtomicUsize,
}

impl Inner {
    fn buckets(&self) -> Result<RwLockReadGuard<'_, BTreeMap<String, StoredBucket>>> {
        self.buckets
            .read()
            .map_err(|_| Error::Internal("memory store lock poisoned".into()))
    }

    fn check_failure(&self) -> Result<()> {
        let failure = self
            .failure
            .read()
            .map_err(|_| Error::Internal("memory store lock poisoned".into()))?;
        match failure.as_ref() {
            Some(msg) => Err(Error::Store(msg.clone())),
            None => Ok(()),
        }
    }

    fn stat(&self, bucket: &str, key: &str) -> Result<ObjectStat> {
        self.check_failure()?;
        let buckets = self.buckets()?;
        let object = buckets
            .get(bucket)
            .ok_or_else(|| Error::Store(format!("NoSuchBucket: {}", bucket)))?
            .objects
            .get(key)
            .ok_or_else(|| Error::NotFound(format!("{}/{}", bucket, key)))?;
        Ok(ObjectStat {
            size: object.data.len() as u64,
            last_modified: object.last_modified,
        })
    }
}

/// In-memory object store
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a bucket if it doesn't exist yet
    pub fn create_bucket(&self, name: &str) -> Result<()> {
        let mut buckets = self
            .inner
            .buckets
            .write()
            .map_err(|_| Error::Internal("memory store lock poisoned".into()))?;
        buckets.entry(name.to_string()).or_insert_with(|| StoredBucket {
            creation_date: Utc::now(),
            objects: BTreeMap::new(),
        });
        Ok(())
    }

    /// Store an object, creating the bucket if needed
    pub fn put_object(&self, bucket: &str, key: &str, data: impl Into<Bytes>) -> Result<()> {
        self.create_bucket(bucket)?;
        let mut buckets = self
            .inner
            .buckets
            .write()
            .map_err(|_| Error::Internal("memory store lock poisoned".into()))?;
        if let Some(b) = buckets.get_mut(bucket) {
            b.objects.insert(
                key.to_string(),
                StoredObject {
                    data: data.into(),
                    last_modified: Utc::now(),
                },
            );
        }
        Ok(())
    }

    /// Make every following store call fail with `message`
    pub fn inject_failure(&self, message: &str) {
        if let Ok(mut failure) = self.inner.failure.write() {
            *failure = Some(message.to_string());
        }
    }

    /// Undo [`MemoryStore::inject_failure`]
    pub fn clear_failure(&self) {
        if let Ok(mut failure) = self.inner.failure.write() {
            *failure = None;
        }
    }

    /// Make closing object streams fail until cleared
    pub fn inject_close_failure(&self, fail: bool) {
        self.inner.close_failure.store(fail, Ordering::SeqCst);
    }

    /// Number of object streams currently open
    pub fn open_streams(&self) -> usize {
        self.inner.open_streams.load(Ordering::SeqCst)
    }

    /// Number of object streams released through `close`
    pub fn closed_streams(&self) -> usize {
        self.inner.closed_streams.load(Ordering::SeqCst)
    }

    /// Delimited listing of one bucket. Keys deeper than one level below
    /// `prefix` collapse into a single common-prefix entry.
    fn collect(&self, bucket: &str, prefix: &str, recursive: bool) -> Result<Vec<ObjectInfo>> {
        let buckets = self.inner.buckets()?;
        let stored = buckets
            .get(bucket)
            .ok_or_else(|| Error::Store(format!("NoSuchBucket: {}", bucket)))?;

        let mut listing: Vec<ObjectInfo> = Vec::new();
        for (key, object) in stored.objects.range(prefix.to_string()..) {
            let Some(rest) = key.strip_prefix(prefix) else {
                break;
            };

            if !recursive {
                if let Some(pos) = rest.find(DELIMITER) {
                    let common = format!("{}{}", prefix, &rest[..=pos]);
                    // Keys sharing a prefix are adjacent in a BTreeMap
                    if listing.last().map(|o| o.key == common).unwrap_or(false) {
                        continue;
                    }
                    listing.push(ObjectInfo {
                        key: common,
                        size: 0,
                        last_modified: DateTime::<Utc>::UNIX_EPOCH,
                    });
                    continue;
                }
            }

            listing.push(ObjectInfo {
                key: key.clone(),
                size: object.data.len() as u64,
                last_modified: object.last_modified,
            });
        }

        Ok(listing)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>> {
        self.inner.check_failure()?;
        let buckets = self.inner.buckets()?;
        Ok(buckets
            .iter()
            .map(|(name, b)| BucketInfo {
                name: name.clone(),
                creation_date: b.creation_date,
            })
            .collect())
    }

    fn list_objects<'a>(&'a self, bucket: &'a str, prefix: &'a str, recursive: bool)
        -> ObjectListing<'a>
    {
        let items: Vec<Result<ObjectInfo>> = match self.collect(bucket, prefix, recursive) {
            Ok(listing) => match self.inner.check_failure() {
                Ok(()) => listing.into_iter().map(Ok).collect(),
                // Fail part way through so consumers see a per-item error
                Err(e) => listing.into_iter().take(1).map(Ok).chain(std::iter::once(Err(e))).collect(),
            },
            Err(e) => vec![Err(e)],
        };
        stream::iter(items).boxed()
    }

    async fn get_object(&self, bucket: &str, key: &str) -> Result<Box<dyn ObjectStream>> {
        self.inner.check_failure()?;
        let data = {
            let buckets = self.inner.buckets()?;
            buckets
                .get(bucket)
                .ok_or_else(|| Error::Store(format!("NoSuchBucket: {}", bucket)))?
                .objects
                .get(key)
                .ok_or_else(|| Error::NotFound(format!("{}/{}", bucket, key)))?
                .data
                .clone()
        };

        self.inner.open_streams.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryObjectStream {
            inner: Arc::clone(&self.inner),
            bucket: bucket.to_string(),
            key: key.to_string(),
            cursor: Cursor::new(data),
        }))
    }

    async fn stat_object(&self, bucket: &str, key: &str) -> Result<ObjectStat> {
        self.inner.stat(bucket, key)
    }
}

/// Stream over an in-memory object body
struct MemoryObjectStream {
    inner: Arc<Inner>,
    bucket: String,
    key: String,
    cursor: Cursor<Bytes>,
}

impl AsyncRead for MemoryObjectStream {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.cursor).poll_read(cx, buf)
    }
}

impl AsyncSeek for MemoryObjectStream {
    fn start_seek(mut self: Pin<&mut Self>, pos: SeekFrom) -> io::Result<()> {
        Pin::new(&mut self.cursor).start_seek(pos)
    }

    fn poll_complete(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Pin::new(&mut self.cursor).poll_complete(cx)
    }
}

#[async_trait]
impl ObjectStream for MemoryObjectStream {
    async fn stat(&mut self) -> Result<ObjectStat> {
        self.inner.stat(&self.bucket, &self.key)
    }

    async fn close(self: Box<Self>) -> Result<()> {
        if self.inner.close_failure.load(Ordering::SeqCst) {
            return Err(Error::Store(format!("close {}/{}: connection reset", self.bucket, self.key)));
        }
        self.inner.closed_streams.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Drop for MemoryObjectStream {
    fn drop(&mut self) {
        self.inner.open_streams.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{StreamExt, TryStreamExt};
    use tokio::io::{AsyncReadExt, AsyncSeekExt};

    fn photos() -> MemoryStore {
        let store = MemoryStore::new();
        store.put_object("photos", "a.png", &b"png-a"[..]).unwrap();
        store.put_object("photos", "album/b.png", &b"png-b!"[..]).unwrap();
        store.put_object("photos", "album/deep/c.png", &b"c"[..]).unwrap();
        store.put_object("photos", "albums.txt", &b"list"[..]).unwrap();
        store
    }

    async fn keys(store: &MemoryStore, bucket: &str, prefix: &str, recursive: bool) -> Vec<String> {
        store
            .list_objects(bucket, prefix, recursive)
            .map_ok(|o| o.key)
            .try_collect()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_delimited_listing() {
        let store = photos();
        assert_eq!(keys(&store, "photos", "", false).await, vec!["a.png", "album/", "albums.txt"]);
        assert_eq!(keys(&store, "photos", "album/", false).await, vec!["album/b.png", "album/deep/"]);
    }

    #[tokio::test]
    async fn test_recursive_listing() {
        let store = photos();
        assert_eq!(
            keys(&store, "photos", "album/", true).await,
            vec!["album/b.png", "album/deep/c.png"]
        );
    }

    #[tokio::test]
    async fn test_common_prefix_has_no_size() {
        let store = photos();
        let listing: Vec<ObjectInfo> = store.list_objects("photos", "", false).try_collect().await.unwrap();
        let album = listing.iter().find(|o| o.key == "album/").unwrap();
        assert!(album.is_prefix());
        assert_eq!(album.size, 0);
    }

    #[tokio::test]
    async fn test_missing_bucket_listing_fails() {
        let store = photos();
        let result: Result<Vec<ObjectInfo>> = store.list_objects("videos", "", false).try_collect().await;
        assert!(matches!(result, Err(Error::Store(_))));
    }

    #[tokio::test]
    async fn test_injected_failure_aborts_listing() {
        let store = photos();
        store.inject_failure("connection reset");

        let mut listing = store.list_objects("photos", "", false);
        assert!(listing.next().await.unwrap().is_ok());
        assert!(matches!(listing.next().await.unwrap(), Err(Error::Store(_))));

        store.clear_failure();
        assert_eq!(store.list_buckets().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_get_object_reads_and_seeks() {
        let store = photos();
        let mut stream = store.get_object("photos", "album/b.png").await.unwrap();
        assert_eq!(store.open_streams(), 1);

        let mut buf = String::new();
        stream.read_to_string(&mut buf).await.unwrap();
        assert_eq!(buf, "png-b!");

        stream.seek(SeekFrom::Start(4)).await.unwrap();
        let mut tail = Vec::new();
        stream.read_to_end(&mut tail).await.unwrap();
        assert_eq!(tail, b"b!");

        assert_eq!(stream.stat().await.unwrap().size, 6);
        stream.close().await.unwrap();
        assert_eq!(store.open_streams(), 0);
        assert_eq!(store.closed_streams(), 1);
    }

    #[tokio::test]
    async fn test_get_missing_object_is_not_found() {
        let store = photos();
        let result = store.get_object("photos", "album").await;
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn test_stat_object() {
        let store = photos();
        let stat = store.stat_object("photos", "album/b.png").await.unwrap();
        assert_eq!(stat.size, 6);

        let listing: Vec<ObjectInfo> = store.list_objects("photos", "album/", true).try_collect().await.unwrap();
        assert_eq!(stat.last_modified, listing[0].last_modified);

        let missing = store.stat_object("photos", "album/nope.png").await;
        assert!(matches!(missing, Err(Error::NotFound(_))));

        let no_bucket = store.stat_object("videos", "clip.mp4").await;
        assert!(matches!(no_bucket, Err(Error::Store(_))));
    }

    #[tokio::test]
    async fn test_failed_close_still_releases_stream() {
        let store = photos();
        store.inject_close_failure(true);

        let stream = store.get_object("photos", "a.png").await.unwrap();
        assert!(matches!(stream.close().await, Err(Error::Store(_))));
        assert_eq!(store.open_streams(), 0);
        assert_eq!(store.closed_streams(), 0);
    }
}
