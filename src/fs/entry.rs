//! Directory entries and file modes

use std::fmt;

use chrono::{DateTime, Utc};

use super::pool::Recycle;

/// Permission and type bits of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileMode(u32);

impl FileMode {
    /// Directory type bit (`S_IFDIR`)
    pub const DIR: u32 = 0o040_000;

    /// Owner read/write, nothing else
    pub const OWNER_RW: u32 = 0o600;

    /// Mode for an entry of the given type
    pub fn new(is_dir: bool) -> Self {
        if is_dir {
            FileMode(Self::DIR | Self::OWNER_RW)
        } else {
            FileMode(Self::OWNER_RW)
        }
    }

    pub fn is_dir(&self) -> bool {
        self.0 & Self::DIR != 0
    }

    /// Permission bits only
    pub fn perm(&self) -> u32 {
        self.0 & 0o777
    }

    pub fn bits(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const RWX: [char; 3] = ['r', 'w', 'x'];
        let mut out = String::with_capacity(10);
        out.push(if self.is_dir() { 'd' } else { '-' });
        for shift in (0..9).rev() {
            if self.0 & (1 << shift) != 0 {
                out.push(RWX[2 - shift % 3]);
            } else {
                out.push('-');
            }
        }
        f.write_str(&out)
    }
}

/// One directory entry worth of metadata.
///
/// `name` is a display name relative to the listed directory (or the full
/// virtual path for a `stat` result). Directories always report size 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    name: String,
    size: u64,
    modified: DateTime<Utc>,
    is_dir: bool,
}

impl Entry {
    /// Build a standalone entry
    pub fn new(name: &str, size: u64, modified: DateTime<Utc>, is_dir: bool) -> Self {
        let mut entry = Entry::default();
        entry.fill(name, size, modified, is_dir);
        entry
    }

    /// Overwrite every field, reusing the name allocation
    pub(crate) fn fill(&mut self, name: &str, size: u64, modified: DateTime<Utc>, is_dir: bool) {
        self.name.clear();
        self.name.push_str(name);
        self.size = if is_dir { 0 } else { size };
        self.modified = modified;
        self.is_dir = is_dir;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir
    }

    pub fn mod_time(&self) -> DateTime<Utc> {
        self.modified
    }

    pub fn mode(&self) -> FileMode {
        FileMode::new(self.is_dir)
    }
}

impl Default for Entry {
    fn default() -> Self {
        Self {
            name: String::new(),
            size: 0,
            modified: DateTime::<Utc>::UNIX_EPOCH,
            is_dir: false,
        }
    }
}

impl Recycle for Entry {
    fn reset(&mut self) {
        self.name.clear();
        self.size = 0;
        self.modified = DateTime::<Utc>::UNIX_EPOCH;
        self.is_dir = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_bits() {
        let dir = FileMode::new(true);
        assert!(dir.is_dir());
        assert_eq!(dir.perm(), 0o600);
        assert_eq!(dir.to_string(), "drw-------");

        let file = FileMode::new(false);
        assert!(!file.is_dir());
        assert_eq!(file.bits(), 0o600);
        assert_eq!(file.to_string(), "-rw-------");
    }

    #[test]
    fn test_directory_has_no_size() {
        let entry = Entry::new("album", 4096, Utc::now(), true);
        assert_eq!(entry.size(), 0);
        assert!(entry.mode().is_dir());
    }

    #[test]
    fn test_fill_replaces_previous_values() {
        let mut entry = Entry::new("a-much-longer-name.png", 10, Utc::now(), false);
        entry.fill("b", 3, DateTime::<Utc>::UNIX_EPOCH, false);
        assert_eq!(entry.name(), "b");
        assert_eq!(entry.size(), 3);

        entry.reset();
        assert_eq!(entry, Entry::default());
    }
}
