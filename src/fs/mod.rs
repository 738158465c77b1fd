//! Virtual filesystem over object storage
//!
//! Presents buckets and slash-delimited keys as a directory tree:
//!
//! ```text
//! /                       # every bucket
//! ├── /photos/            # bucket
//! │   ├── a.png           # object "a.png"
//! │   └── album/          # virtual directory (prefix "album/")
//! │       └── b.png       # object "album/b.png"
//! └── /videos/
//! ```
//!
//! [`BucketFs::open`] classifies a path and returns a [`Handle`] that can be
//! read, seeked, listed and stat'ed like an open file.

mod bucket_fs;
mod entry;
mod handle;
pub mod path;
mod pool;

pub use bucket_fs::{BucketFs, DEFAULT_POOL_CAPACITY};
pub use entry::{Entry, FileMode};
pub use handle::{Handle, NodeKind};
pub use pool::{FsPools, Pool, PoolStats, Recycle};
