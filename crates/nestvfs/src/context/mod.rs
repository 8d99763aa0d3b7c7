//! Contexts: the stateful owners of one rooted tree.
//!
//! A [`VirtualFile`](crate::VirtualFile) is a context plus a path inside it.
//! Contexts never know about mounts; crossing into a mounted archive is the
//! file facade's job.

use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use nestvfs_archive::CertificateSet;
use nestvfs_fs::{Signature, VirtualPath};

use crate::Result;

mod archive;
mod directory;
mod memory;

pub use archive::ArchiveContext;
pub use directory::DirectoryContext;
pub use memory::MemoryContext;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileType {
    File,
    Directory,
}

/// What a context knows about one node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileAttr {
    pub kind: FileType,
    pub size: u64,
    pub modified: Option<SystemTime>,
}

impl FileAttr {
    pub fn file(size: u64, modified: Option<SystemTime>) -> Self {
        Self {
            kind: FileType::File,
            size,
            modified,
        }
    }

    pub fn directory(modified: Option<SystemTime>) -> Self {
        Self {
            kind: FileType::Directory,
            size: 0,
            modified,
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind == FileType::Directory
    }
}

/// A rooted, read-only tree.
pub trait VfsContext: Send + Sync + fmt::Debug {
    /// URI the context is registered under, e.g. `vfszip:/srv/app.jar`.
    fn root_uri(&self) -> &str;

    /// Signature of the backing resource, if it has one on disk.
    fn signature(&self) -> Option<Signature> {
        None
    }

    /// Whether the backing resource changed since the context was built.
    fn has_changed(&self) -> bool {
        false
    }

    /// Attributes of `path`; `Ok(None)` if there is nothing there.
    fn attr(&self, path: &VirtualPath) -> Result<Option<FileAttr>>;

    /// Names of the children of the directory at `path`, sorted.
    fn children(&self, path: &VirtualPath) -> Result<Vec<String>>;

    fn open_stream(&self, path: &VirtualPath) -> Result<Box<dyn Read + Send>>;

    /// Where `path` lives on the host filesystem, if anywhere.
    fn physical_file(&self, _path: &VirtualPath) -> Option<PathBuf> {
        None
    }

    fn certificates(&self, _path: &VirtualPath) -> Result<Option<Arc<CertificateSet>>> {
        Ok(None)
    }
}
