//! WolfBucket - Object Storage as a Read-Only Filesystem
//!
//! Presents an S3-compatible object store as a hierarchical, read-only
//! filesystem: the root lists buckets, buckets and slash-delimited key
//! prefixes behave as directories, and objects behave as files that can be
//! read, seeked and stat'ed.
//!
//! # Architecture
//!
//! Every open path is classified against the store (root, bucket, virtual
//! directory or file) and backed by a pooled node. Directory entries and
//! metadata records are pooled as well and returned when the handle closes,
//! so a busy file server allocates very little per request.
//!
//! # Features
//!
//! - Path classification with directory-wins collision handling
//! - Batched `readdir` with cursor semantics
//! - Optional hiding of directory contents (`show_directory_files`)
//! - Object pooling for nodes and entries
//! - S3 backend via `rust-s3`, in-memory backend for tests
//! - HTTP file server with directory listings and byte ranges

pub mod config;
pub mod error;
pub mod fs;
pub mod http;
pub mod store;

pub use config::WolfBucketConfig;
pub use error::{Error, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::WolfBucketConfig;
    pub use crate::error::{Error, Result};
    pub use crate::fs::{BucketFs, Entry, FileMode, Handle, NodeKind};
    pub use crate::http::FileServer;
    pub use crate::store::{MemoryStore, ObjectStore, S3Store};
}
