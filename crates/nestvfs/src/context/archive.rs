use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nestvfs_archive::{ArchiveIndex, ArchiveReader, CertificateSet, EntryRef, IndexOptions};
use nestvfs_fs::{Signature, VirtualPath};

use super::{FileAttr, VfsContext};
use crate::error::{Error, Result};

/// A context over an indexed archive file.
///
/// Lookups go through [`ArchiveIndex::snapshot`], so a rewritten archive is
/// re-indexed before it is read again.
#[derive(Debug)]
pub struct ArchiveContext {
    index: ArchiveIndex,
    uri: String,
}

impl ArchiveContext {
    /// Index `archive` now; `uri` is the root it will be known by.
    pub fn open(
        archive: impl Into<PathBuf>,
        uri: impl Into<String>,
        reader: Arc<dyn ArchiveReader>,
        options: IndexOptions,
    ) -> Result<Self> {
        let index = ArchiveIndex::open(archive, reader, options)?;
        Ok(Self {
            index,
            uri: uri.into(),
        })
    }

    pub fn index(&self) -> &ArchiveIndex {
        &self.index
    }

    pub fn archive(&self) -> &Path {
        self.index.source()
    }

    fn entry(&self, path: &VirtualPath) -> Result<Option<EntryRef>> {
        Ok(self.index.resolve(path)?)
    }

    fn existing(&self, path: &VirtualPath) -> Result<EntryRef> {
        self.entry(path)?
            .ok_or_else(|| Error::not_found(format!("{}/{path}", self.uri)))
    }
}

impl VfsContext for ArchiveContext {
    fn root_uri(&self) -> &str {
        &self.uri
    }

    fn signature(&self) -> Option<Signature> {
        Some(self.index.current().signature())
    }

    fn has_changed(&self) -> bool {
        self.index.has_changed()
    }

    fn attr(&self, path: &VirtualPath) -> Result<Option<FileAttr>> {
        Ok(self.entry(path)?.map(|entry| {
            if entry.is_directory() {
                FileAttr::directory(entry.last_modified())
            } else {
                FileAttr::file(entry.size(), entry.last_modified())
            }
        }))
    }

    fn children(&self, path: &VirtualPath) -> Result<Vec<String>> {
        let entry = self.existing(path)?;
        if !entry.is_directory() {
            return Err(Error::not_a_directory(format!("{}/{path}", self.uri)));
        }
        Ok(entry
            .children()
            .iter()
            .map(|child| child.name().to_string())
            .collect())
    }

    fn open_stream(&self, path: &VirtualPath) -> Result<Box<dyn Read + Send>> {
        Ok(self.existing(path)?.open_stream()?)
    }

    fn certificates(&self, path: &VirtualPath) -> Result<Option<Arc<CertificateSet>>> {
        Ok(self.existing(path)?.certificates()?)
    }
}
