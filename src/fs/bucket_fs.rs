//! Path classification over an object store.
//!
//! Object storage has no directories, so [`BucketFs::open`] decides what a
//! path is from what the store returns:
//!
//! 1. `/` is the storage root and lists every bucket.
//! 2. `/<bucket>` is a bucket and lists the top level of that bucket.
//! 3. `/<bucket>/<prefix>` is a directory if a delimited listing of
//!    `<prefix>/` returns anything, otherwise a file if an object with key
//!    `<prefix>` can be opened, otherwise not found.
//!
//! Listing comes before the object lookup, so a key that is both an object
//! and a prefix of other keys opens as a directory.

use std::sync::Arc;

use futures::TryStreamExt;
use tracing::debug;

use super::handle::{Handle, NodeState};
use super::path::{self, VirtualPath};
use super::pool::FsPools;
use crate::config::FsConfig;
use crate::error::{Error, Result};
use crate::store::{ObjectInfo, ObjectStore, DELIMITER};

/// Idle instances kept per pool when no configuration is given
pub const DEFAULT_POOL_CAPACITY: usize = 256;

/// Read-only filesystem view of an object store
#[derive(Clone)]
pub struct BucketFs {
    store: Arc<dyn ObjectStore>,
    show_directory_files: bool,
    pools: Arc<FsPools>,
}

impl BucketFs {
    /// Create a filesystem with its own pools
    pub fn new(store: Arc<dyn ObjectStore>, show_directory_files: bool) -> Self {
        Self::with_pools(
            store,
            show_directory_files,
            Arc::new(FsPools::new(DEFAULT_POOL_CAPACITY)),
        )
    }

    /// Create a filesystem sharing existing pools
    pub fn with_pools(store: Arc<dyn ObjectStore>, show_directory_files: bool, pools: Arc<FsPools>) -> Self {
        Self {
            store,
            show_directory_files,
            pools,
        }
    }

    /// Create a filesystem from the `[fs]` configuration section
    pub fn from_config(store: Arc<dyn ObjectStore>, config: &FsConfig) -> Self {
        Self::with_pools(
            store,
            config.show_directory_files,
            Arc::new(FsPools::new(config.pool_capacity)),
        )
    }

    pub fn pools(&self) -> &Arc<FsPools> {
        &self.pools
    }

    pub fn show_directory_files(&self) -> bool {
        self.show_directory_files
    }

    /// Open a virtual path.
    ///
    /// The path is cleaned first, so `photos/album/` and `/photos//album`
    /// open the same node. Fails with [`Error::NotFound`] when the path is
    /// neither a directory nor an object; store failures are returned as-is.
    pub async fn open(&self, path: &str) -> Result<Handle> {
        let path = path::normalize(path)?;
        let state = self.classify(&path).await?;

        let mut node = self.pools.nodes.acquire();
        node.populate(&path, state);
        Ok(Handle::new(node, Arc::clone(&self.pools)))
    }

    async fn classify(&self, path: &str) -> Result<NodeState> {
        match VirtualPath::parse(path) {
            VirtualPath::Root => {
                let buckets = self.store.list_buckets().await?;
                debug!("open {}: root with {} buckets", path, buckets.len());
                Ok(NodeState::Root { buckets })
            }

            VirtualPath::Bucket(bucket) => {
                if !self.show_directory_files {
                    debug!("open {}: bucket (listing hidden)", path);
                    return Ok(NodeState::Bucket { objects: Vec::new() });
                }
                let objects = self.list(bucket, "").await?;
                debug!("open {}: bucket with {} entries", path, objects.len());
                Ok(NodeState::Bucket { objects })
            }

            VirtualPath::Object { bucket, prefix } => {
                let marker = format!("{}{}", prefix, DELIMITER);
                let mut objects = self.list(bucket, &marker).await?;
                if !objects.is_empty() {
                    if self.show_directory_files {
                        objects.retain(|o| o.key != marker);
                    } else {
                        objects.clear();
                    }
                    debug!("open {}: directory with {} entries", path, objects.len());
                    return Ok(NodeState::Directory { objects });
                }

                match self.store.get_object(bucket, prefix).await {
                    Ok(stream) => {
                        debug!("open {}: file", path);
                        Ok(NodeState::File { stream })
                    }
                    Err(e) if e.is_not_found() => {
                        debug!("open {}: not found", path);
                        Err(Error::NotFound(path.to_string()))
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Materialize a delimited listing, stopping at the first error
    async fn list(&self, bucket: &str, prefix: &str) -> Result<Vec<ObjectInfo>> {
        self.store.list_objects(bucket, prefix, false).try_collect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::NodeKind;
    use crate::store::MemoryStore;
    use chrono::Utc;
    use std::io::SeekFrom;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncSeekExt};

    fn photos() -> MemoryStore {
        let store = MemoryStore::new();
        store.put_object("photos", "a.png", &b"0123456789"[..]).unwrap();
        store.put_object("photos", "album/b.png", &b"bbbb"[..]).unwrap();
        store
    }

    fn fs(store: &MemoryStore, show: bool) -> BucketFs {
        BucketFs::new(Arc::new(store.clone()), show)
    }

    fn names(entries: &[crate::fs::Entry]) -> Vec<String> {
        entries.iter().map(|e| e.name().to_string()).collect()
    }

    #[tokio::test]
    async fn test_root_lists_buckets_as_directories() {
        let store = photos();
        store.create_bucket("videos").unwrap();
        let fs = fs(&store, true);

        for path in ["/", "", "//"] {
            let mut root = fs.open(path).await.unwrap();
            assert_eq!(root.kind(), NodeKind::Root);

            let entries = root.readdir(None).unwrap();
            assert_eq!(names(entries), vec!["photos", "videos"]);
            assert!(entries.iter().all(|e| e.is_dir() && e.size() == 0));
            root.close().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_bucket_listing() {
        let store = photos();
        let fs = fs(&store, true);

        let mut bucket = fs.open("/photos").await.unwrap();
        assert_eq!(bucket.kind(), NodeKind::Bucket);
        assert!(bucket.is_dir());

        let entries = bucket.readdir(None).unwrap();
        assert_eq!(names(entries), vec!["a.png", "album"]);
        assert!(!entries[0].is_dir());
        assert_eq!(entries[0].size(), 10);
        assert!(entries[1].is_dir());
        assert_eq!(entries[1].size(), 0);
        bucket.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_hidden_listing_still_reports_directories() {
        let store = photos();
        let fs = fs(&store, false);

        let mut bucket = fs.open("/photos").await.unwrap();
        assert!(bucket.readdir(None).unwrap().is_empty());
        assert!(bucket.stat().await.unwrap().is_dir());
        bucket.close().await.unwrap();

        let mut dir = fs.open("/photos/album").await.unwrap();
        assert_eq!(dir.kind(), NodeKind::Directory);
        assert!(dir.readdir(None).unwrap().is_empty());
        dir.close().await.unwrap();

        // Buckets are not checked when listings are hidden
        let mut ghost = fs.open("/no-such-bucket").await.unwrap();
        assert!(ghost.readdir(None).unwrap().is_empty());
        ghost.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_directory_lists_basenames() {
        let store = photos();
        store.put_object("photos", "album/2024/c.png", &b"c"[..]).unwrap();
        let fs = fs(&store, true);

        let mut dir = fs.open("/photos/album").await.unwrap();
        assert_eq!(dir.kind(), NodeKind::Directory);

        let entries = dir.readdir(None).unwrap();
        assert_eq!(names(entries), vec!["2024", "b.png"]);
        assert!(entries[0].is_dir());
        assert_eq!(entries[1].size(), 4);
        assert!(entries.iter().all(|e| !e.name().contains('/')));
        dir.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_folder_marker_is_not_its_own_child() {
        let store = photos();
        store.put_object("photos", "empty/", &b""[..]).unwrap();
        let fs = fs(&store, true);

        let mut dir = fs.open("/photos/empty").await.unwrap();
        assert_eq!(dir.kind(), NodeKind::Directory);
        assert!(dir.readdir(None).unwrap().is_empty());
        dir.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_file_read_seek_stat() {
        let store = photos();
        let fs = fs(&store, true);

        let mut file = fs.open("/photos/a.png").await.unwrap();
        assert_eq!(file.kind(), NodeKind::File);
        assert!(!file.is_dir());
        assert!(file.readdir(None).unwrap().is_empty());

        let mut body = Vec::new();
        file.read_to_end(&mut body).await.unwrap();
        assert_eq!(body, b"0123456789");

        assert_eq!(file.seek(SeekFrom::Start(7)).await.unwrap(), 7);
        let mut tail = String::new();
        file.read_to_string(&mut tail).await.unwrap();
        assert_eq!(tail, "789");

        let stat = file.stat().await.unwrap();
        assert!(!stat.is_dir());
        assert_eq!(stat.size(), 10);
        assert_eq!(stat.name(), "/photos/a.png");
        assert!(!stat.mode().is_dir());

        file.close().await.unwrap();
        assert_eq!(store.open_streams(), 0);
        assert_eq!(store.closed_streams(), 1);
    }

    #[tokio::test]
    async fn test_directory_reads_as_empty() {
        let store = photos();
        let fs = fs(&store, true);

        let mut dir = fs.open("/photos/album").await.unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(dir.read(&mut buf).await.unwrap(), 0);
        assert_eq!(dir.seek(SeekFrom::End(100)).await.unwrap(), 0);

        let stat = dir.stat().await.unwrap();
        assert!(stat.is_dir());
        assert_eq!(stat.size(), 0);
        assert_eq!(stat.name(), "/photos/album");
        dir.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_directory_wins_over_object_with_same_key() {
        let store = photos();
        store.put_object("photos", "album", &b"i am also a file"[..]).unwrap();
        let fs = fs(&store, true);

        let dir = fs.open("/photos/album").await.unwrap();
        assert_eq!(dir.kind(), NodeKind::Directory);
        dir.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_path_is_not_found() {
        let store = photos();
        let fs = fs(&store, true);

        let err = fs.open("/photos/nothing.png").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(matches!(err, Error::NotFound(ref p) if p == "/photos/nothing.png"));

        // Prefix of a key but not a whole segment
        assert!(fs.open("/photos/alb").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_store_errors_are_not_masked() {
        let store = photos();
        let fs = fs(&store, true);

        store.inject_failure("connection reset");
        assert!(fs.open("/").await.unwrap_err().is_store_error());
        assert!(fs.open("/photos").await.unwrap_err().is_store_error());
        assert!(fs.open("/photos/album").await.unwrap_err().is_store_error());
        store.clear_failure();

        // Listing of a bucket that doesn't exist
        assert!(fs.open("/videos/clip.mp4").await.unwrap_err().is_store_error());

        let stats = fs.pools().node_stats();
        assert_eq!(stats.acquired, 0);
    }

    #[tokio::test]
    async fn test_stat_failure_reports_not_found() {
        let store = photos();
        let fs = fs(&store, true);

        let mut file = fs.open("/photos/a.png").await.unwrap();
        store.inject_failure("connection reset");
        let err = file.stat().await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        store.clear_failure();
        file.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_readdir_in_batches() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store.put_object("logs", &format!("day-{}.txt", i), &b"x"[..]).unwrap();
        }
        let fs = fs(&store, true);

        let mut bucket = fs.open("/logs").await.unwrap();
        assert_eq!(names(bucket.readdir(Some(2)).unwrap()), vec!["day-0.txt", "day-1.txt"]);
        assert_eq!(names(bucket.readdir(Some(2)).unwrap()), vec!["day-2.txt", "day-3.txt"]);
        assert_eq!(names(bucket.readdir(None).unwrap()), vec!["day-4.txt"]);
        assert!(bucket.readdir(Some(2)).unwrap().is_empty());
        bucket.close().await.unwrap();

        assert_eq!(fs.pools().entry_stats().outstanding(), 0);
    }

    #[tokio::test]
    async fn test_every_acquisition_is_released() {
        let store = photos();
        let fs = fs(&store, true);

        for path in ["/", "/photos", "/photos/album", "/photos/a.png"] {
            let mut handle = fs.open(path).await.unwrap();
            handle.readdir(None).unwrap();
            handle.stat().await.unwrap();
            handle.close().await.unwrap();
        }
        assert!(fs.open("/photos/missing").await.is_err());

        // Dropping without close releases too
        let mut dropped = fs.open("/photos/a.png").await.unwrap();
        dropped.stat().await.unwrap();
        drop(dropped);

        let nodes = fs.pools().node_stats();
        assert_eq!(nodes.acquired, 5);
        assert_eq!(nodes.released, nodes.acquired);
        assert_eq!(nodes.allocated, 1);

        let entries = fs.pools().entry_stats();
        assert!(entries.acquired > 0);
        assert_eq!(entries.released, entries.acquired);
        assert_eq!(store.open_streams(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_opens_share_pools() {
        let store = photos();
        let fs = fs(&store, true);

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let fs = fs.clone();
                tokio::spawn(async move {
                    let path = if i % 2 == 0 { "/photos/album" } else { "/photos/a.png" };
                    let mut handle = fs.open(path).await.unwrap();
                    let stat = handle.stat().await.unwrap();
                    assert_eq!(stat.name(), path);
                    handle.close().await.unwrap();
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let nodes = fs.pools().node_stats();
        assert_eq!(nodes.acquired, 16);
        assert_eq!(nodes.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_failed_close_still_releases_everything() {
        let store = photos();
        let fs = fs(&store, true);

        let mut file = fs.open("/photos/a.png").await.unwrap();
        file.stat().await.unwrap();
        store.inject_close_failure(true);

        assert!(file.close().await.unwrap_err().is_store_error());
        assert_eq!(fs.pools().node_stats().outstanding(), 0);
        assert_eq!(fs.pools().entry_stats().outstanding(), 0);
        assert_eq!(store.open_streams(), 0);
    }

    #[tokio::test]
    async fn test_directory_stat_time_is_taken_at_stat() {
        let store = photos();
        let fs = fs(&store, true);

        let mut dir = fs.open("/photos/album").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let before = Utc::now();

        let stat = dir.stat().await.unwrap();
        assert!(stat.mod_time() >= before);
        dir.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_listing_times_come_from_the_store() {
        let store = photos();
        let fs = fs(&store, true);

        let created = store.list_buckets().await.unwrap()[0].creation_date;
        let mut root = fs.open("/").await.unwrap();
        assert_eq!(root.readdir(None).unwrap()[0].mod_time(), created);
        root.close().await.unwrap();

        let modified = store.stat_object("photos", "a.png").await.unwrap().last_modified;
        let mut bucket = fs.open("/photos").await.unwrap();
        let entries = bucket.readdir(None).unwrap();
        assert_eq!(entries[0].name(), "a.png");
        assert_eq!(entries[0].mod_time(), modified);
        bucket.close().await.unwrap();
    }
}
