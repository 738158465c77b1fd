//! Object Store Facade
//!
//! The filesystem layer talks to object storage only through the
//! [`ObjectStore`] trait: list buckets, list objects under a prefix, open an
//! object for reading and stat an object.
//!
//! - **S3Store**: any S3-compatible endpoint (AWS, MinIO, WolfDisk)
//! - **MemoryStore**: in-process buckets, used by the test suites

mod memory;
mod s3;

pub use memory::MemoryStore;
pub use s3::S3Store;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use tokio::io::{AsyncRead, AsyncSeek};

use crate::error::Result;

/// Delimiter used for non-recursive listings
pub const DELIMITER: char = '/';

/// A bucket as reported by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketInfo {
    pub name: String,
    pub creation_date: DateTime<Utc>,
}

/// An object (or common prefix) as reported by a listing.
///
/// Non-recursive listings report each common prefix as an entry whose key
/// ends with [`DELIMITER`] and whose size is 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

impl ObjectInfo {
    /// True if this entry stands for a prefix rather than object data
    pub fn is_prefix(&self) -> bool {
        self.key.ends_with(DELIMITER)
    }
}

/// Size and modification time of a stored object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectStat {
    pub size: u64,
    pub last_modified: DateTime<Utc>,
}

/// An open object body.
///
/// Bytes are fetched as they are read, so seeking past data that is never
/// read costs nothing. The stream must be closed exactly once through
/// `close`.
#[async_trait]
pub trait ObjectStream: AsyncRead + AsyncSeek + Send + Unpin {
    /// Metadata of the object this stream reads
    async fn stat(&mut self) -> Result<ObjectStat>;

    /// Release the stream
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Listing stream: each item is an object or the error that ended the listing
pub type ObjectListing<'a> = BoxStream<'a, Result<ObjectInfo>>;

/// Abstract object store interface
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// List every bucket visible to the configured credentials
    async fn list_buckets(&self) -> Result<Vec<BucketInfo>>;

    /// List objects in `bucket` whose key starts with `prefix`.
    ///
    /// When `recursive` is false the listing is delimited by `/` and only
    /// returns the immediate children of `prefix`.
    fn list_objects<'a>(&'a self, bucket: &'a str, prefix: &'a str, recursive: bool)
        -> ObjectListing<'a>;

    /// Open an object for reading.
    ///
    /// Returns [`crate::Error::NotFound`] if the key does not exist.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Box<dyn ObjectStream>>;

    /// Fetch object metadata without reading the body
    async fn stat_object(&self, bucket: &str, key: &str) -> Result<ObjectStat>;
}
