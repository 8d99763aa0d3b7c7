use std::path::Path;
use std::time::SystemTime;

use crate::{Error, Result};

/// Comparable snapshot of a file's modification state.
///
/// Two signatures taken of an untouched file compare equal; any rewrite that
/// changes the mtime or the length makes them differ.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Signature {
    modified: Option<SystemTime>,
    len: u64,
}

impl Signature {
    pub fn new(modified: Option<SystemTime>, len: u64) -> Self {
        Self { modified, len }
    }

    pub fn of(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let metadata = path.metadata().map_err(|e| Error::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(Self {
            modified: metadata.modified().ok(),
            len: metadata.len(),
        })
    }

    /// Whether `path` no longer matches this signature.
    ///
    /// A file that has disappeared counts as changed.
    pub fn has_changed(&self, path: impl AsRef<Path>) -> bool {
        Self::of(path).map_or(true, |current| current != *self)
    }

    pub fn modified(&self) -> Option<SystemTime> {
        self.modified
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}
