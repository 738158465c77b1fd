//! Slash-path helpers.
//!
//! Virtual paths are plain strings rooted at `/`. The first segment names a
//! bucket and the rest form an object key prefix:
//!
//! ```text
//! /                   storage root (all buckets)
//! /photos             bucket
//! /photos/album       directory or object, decided by the store
//! /photos/album/b.png
//! ```

use crate::error::{Error, Result};

/// Structural reading of a cleaned virtual path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VirtualPath<'a> {
    /// `/`
    Root,
    /// `/<bucket>`
    Bucket(&'a str),
    /// `/<bucket>/<prefix...>`
    Object { bucket: &'a str, prefix: &'a str },
}

impl<'a> VirtualPath<'a> {
    /// Classify a path previously passed through [`normalize`]
    pub fn parse(path: &'a str) -> Self {
        if parent(path) == path {
            return VirtualPath::Root;
        }

        let rest = path.trim_start_matches('/');
        match rest.split_once('/') {
            None => VirtualPath::Bucket(rest),
            Some((bucket, prefix)) => VirtualPath::Object { bucket, prefix },
        }
    }
}

/// Turn a request path into the canonical absolute form used for
/// classification: leading `/`, no empty, `.` or `..` segments and no
/// trailing slash.
pub fn normalize(path: &str) -> Result<String> {
    if path.contains('\0') {
        return Err(Error::InvalidPath(path.escape_default().to_string()));
    }
    Ok(clean(&format!("/{}", path)))
}

/// Lexically clean a slash path.
///
/// Repeated slashes collapse, `.` segments vanish, `..` removes the segment
/// before it (or is dropped at the root of an absolute path) and trailing
/// slashes are removed. The empty path cleans to `.`.
pub fn clean(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }

    let rooted = path.starts_with('/');
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match segments.last() {
                Some(&last) if last != ".." => {
                    segments.pop();
                }
                _ if rooted => {}
                _ => segments.push(".."),
            },
            other => segments.push(other),
        }
    }

    let joined = segments.join("/");
    match (rooted, joined.is_empty()) {
        (true, _) => format!("/{}", joined),
        (false, true) => ".".to_string(),
        (false, false) => joined,
    }
}

/// Final element of a slash path, ignoring trailing slashes.
///
/// `base("album/b.png") == "b.png"`, `base("album/deep/") == "deep"`,
/// `base("") == "."` and a path made only of slashes yields `/`.
pub fn base(path: &str) -> &str {
    if path.is_empty() {
        return ".";
    }
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return "/";
    }
    match trimmed.rfind('/') {
        Some(pos) => &trimmed[pos + 1..],
        None => trimmed,
    }
}

/// Parent of a cleaned absolute path. The root is its own parent.
pub fn parent(path: &str) -> &str {
    match path.trim_end_matches('/').rfind('/') {
        Some(0) | None => "/",
        Some(pos) => &path[..pos],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean() {
        assert_eq!(clean(""), ".");
        assert_eq!(clean("/"), "/");
        assert_eq!(clean("album/"), "album");
        assert_eq!(clean("a//b/./c/"), "a/b/c");
        assert_eq!(clean("/a/b/../c"), "/a/c");
        assert_eq!(clean("/../a"), "/a");
        assert_eq!(clean("../a"), "../a");
        assert_eq!(clean("a/../.."), "..");
    }

    #[test]
    fn test_base() {
        assert_eq!(base("album/b.png"), "b.png");
        assert_eq!(base("album/deep/"), "deep");
        assert_eq!(base("a.png"), "a.png");
        assert_eq!(base(""), ".");
        assert_eq!(base("///"), "/");
    }

    #[test]
    fn test_parent() {
        assert_eq!(parent("/"), "/");
        assert_eq!(parent("/photos"), "/");
        assert_eq!(parent("/photos/album"), "/photos");
        assert_eq!(parent("/photos/album/b.png"), "/photos/album");
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("").unwrap(), "/");
        assert_eq!(normalize("photos/").unwrap(), "/photos");
        assert_eq!(normalize("//photos//album/").unwrap(), "/photos/album");
        assert_eq!(normalize("/photos/../videos").unwrap(), "/videos");
        assert!(matches!(normalize("/photos/\0"), Err(Error::InvalidPath(_))));
    }

    #[test]
    fn test_classify() {
        assert_eq!(VirtualPath::parse("/"), VirtualPath::Root);
        assert_eq!(VirtualPath::parse("/photos"), VirtualPath::Bucket("photos"));
        assert_eq!(
            VirtualPath::parse("/photos/album"),
            VirtualPath::Object { bucket: "photos", prefix: "album" }
        );
        assert_eq!(
            VirtualPath::parse("/photos/album/deep/c.png"),
            VirtualPath::Object { bucket: "photos", prefix: "album/deep/c.png" }
        );
    }
}
