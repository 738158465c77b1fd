//! Open handles on classified paths.
//!
//! A [`Handle`] wraps a pooled [`Node`]. The node's state says what the
//! path turned out to be and carries exactly the data needed to serve it:
//! the bucket list for the root, a materialized listing for buckets and
//! directories, or an open object stream for files.
//!
//! Entries produced by `readdir` and `stat` are pooled too. They are
//! borrowed from the handle and go back to the pool when the handle is
//! closed (or dropped).

use std::fmt;
use std::io::{self, SeekFrom};
use std::ops::Range;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use chrono::Utc;
use tokio::io::{AsyncRead, AsyncSeek, ReadBuf};
use tracing::warn;

use super::entry::Entry;
use super::path;
use super::pool::{FsPools, Recycle};
use crate::error::{Error, Result};
use crate::store::{BucketInfo, ObjectInfo, ObjectStream};

/// What a path resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Root,
    Bucket,
    Directory,
    File,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeKind::Root => "root",
            NodeKind::Bucket => "bucket",
            NodeKind::Directory => "directory",
            NodeKind::File => "file",
        };
        f.write_str(name)
    }
}

/// Backing data of a node
pub(crate) enum NodeState {
    /// Just taken from the pool
    Fresh,
    Root { buckets: Vec<BucketInfo> },
    Bucket { objects: Vec<ObjectInfo> },
    /// Immediate children of a virtual directory, folder marker excluded
    Directory { objects: Vec<ObjectInfo> },
    File { stream: Box<dyn ObjectStream> },
}

/// Pooled per-open state
pub(crate) struct Node {
    path: String,
    state: NodeState,
    /// Entries handed out by this node, returned to the pool on close
    emitted: Vec<Entry>,
    /// Position of the next `readdir` batch
    cursor: usize,
}

impl Node {
    pub(crate) fn populate(&mut self, path: &str, state: NodeState) {
        self.path.push_str(path);
        self.state = state;
    }

    fn kind(&self) -> NodeKind {
        match self.state {
            NodeState::Root { .. } => NodeKind::Root,
            NodeState::Bucket { .. } => NodeKind::Bucket,
            NodeState::Directory { .. } | NodeState::Fresh => NodeKind::Directory,
            NodeState::File { .. } => NodeKind::File,
        }
    }
}

impl Default for Node {
    fn default() -> Self {
        Self {
            path: String::new(),
            state: NodeState::Fresh,
            emitted: Vec::new(),
            cursor: 0,
        }
    }
}

impl Recycle for Node {
    fn reset(&mut self) {
        self.path.clear();
        self.state = NodeState::Fresh;
        self.emitted.clear();
        self.cursor = 0;
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("path", &self.path)
            .field("kind", &self.kind())
            .field("emitted", &self.emitted.len())
            .finish()
    }
}

/// An open file or directory.
///
/// Files support `AsyncRead` and `AsyncSeek`; directories read as empty and
/// seek to 0.
/// Closing consumes the handle, so entries borrowed from it cannot outlive it.
pub struct Handle {
    node: Node,
    pools: Arc<FsPools>,
}

impl Handle {
    pub(crate) fn new(node: Node, pools: Arc<FsPools>) -> Self {
        Self { node, pools }
    }

    /// The cleaned virtual path this handle was opened with
    pub fn path(&self) -> &str {
        &self.node.path
    }

    pub fn kind(&self) -> NodeKind {
        self.node.kind()
    }

    pub fn is_dir(&self) -> bool {
        self.kind() != NodeKind::File
    }

    /// Read directory entries.
    ///
    /// `None` (or `Some(0)`) returns every entry not yet returned;
    /// `Some(n)` returns at most `n` and the next call continues after them.
    /// Files have no entries.
    pub fn readdir(&mut self, limit: Option<usize>) -> Result<&[Entry]> {
        let Node { state, emitted, cursor, .. } = &mut self.node;
        let pool = &self.pools.entries;
        let start = emitted.len();

        let mut emit = |name: &str, size, modified, is_dir| {
            let mut entry = pool.acquire();
            entry.fill(name, size, modified, is_dir);
            emitted.push(entry);
        };

        match state {
            NodeState::Root { buckets } => {
                for bucket in &buckets[next_batch(buckets.len(), cursor, limit)] {
                    emit(&bucket.name, 0, bucket.creation_date, true);
                }
            }
            NodeState::Bucket { objects } => {
                for object in &objects[next_batch(objects.len(), cursor, limit)] {
                    emit(&path::clean(&object.key), object.size, object.last_modified, object.is_prefix());
                }
            }
            NodeState::Directory { objects } => {
                for object in &objects[next_batch(objects.len(), cursor, limit)] {
                    emit(path::base(&object.key), object.size, object.last_modified, object.is_prefix());
                }
            }
            NodeState::File { .. } | NodeState::Fresh => {}
        }

        Ok(&self.node.emitted[start..])
    }

    /// Metadata of the opened path.
    ///
    /// Directories report size 0 and the current time. For files the
    /// object stream is asked; any failure there is reported as not found.
    pub async fn stat(&mut self) -> Result<&Entry> {
        let (size, modified, is_dir) = match &mut self.node.state {
            NodeState::File { stream } => match stream.stat().await {
                Ok(stat) => (stat.size, stat.last_modified, false),
                Err(e) => {
                    warn!("stat {} failed: {}", self.node.path, e);
                    return Err(Error::NotFound(self.node.path.clone()));
                }
            },
            _ => (0, Utc::now(), true),
        };

        let mut entry = self.pools.entries.acquire();
        entry.fill(&self.node.path, size, modified, is_dir);
        self.node.emitted.push(entry);
        match self.node.emitted.last() {
            Some(entry) => Ok(entry),
            None => Err(Error::Internal("stat entry vanished".into())),
        }
    }

    /// Close the handle, releasing the object stream and every pooled
    /// instance it holds. Stream close errors are returned, but the pooled
    /// instances are released either way.
    pub async fn close(mut self) -> Result<()> {
        match std::mem::replace(&mut self.node.state, NodeState::Fresh) {
            NodeState::File { stream } => stream.close().await,
            _ => Ok(()),
        }
    }
}

impl AsyncRead for Handle {
    fn poll_read(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        match &mut self.get_mut().node.state {
            NodeState::File { stream } => Pin::new(stream.as_mut()).poll_read(cx, buf),
            _ => Poll::Ready(Ok(())),
        }
    }
}

impl AsyncSeek for Handle {
    fn start_seek(self: Pin<&mut Self>, pos: SeekFrom) -> io::Result<()> {
        match &mut self.get_mut().node.state {
            NodeState::File { stream } => Pin::new(stream.as_mut()).start_seek(pos),
            _ => Ok(()),
        }
    }

    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        match &mut self.get_mut().node.state {
            NodeState::File { stream } => Pin::new(stream.as_mut()).poll_complete(cx),
            _ => Poll::Ready(Ok(0)),
        }
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        let mut node = std::mem::take(&mut self.node);
        for entry in node.emitted.drain(..) {
            self.pools.entries.release(entry);
        }
        self.pools.nodes.release(node);
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("path", &self.node.path)
            .field("kind", &self.node.kind())
            .finish()
    }
}

/// Advance `cursor` over the next batch of a listing of `len` items
fn next_batch(len: usize, cursor: &mut usize, limit: Option<usize>) -> Range<usize> {
    let start = (*cursor).min(len);
    let end = match limit {
        Some(n) if n > 0 => start.saturating_add(n).min(len),
        _ => len,
    };
    *cursor = end;
    start..end
}
