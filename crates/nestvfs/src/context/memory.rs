//! In-memory trees.

use std::collections::BTreeMap;
use std::io::{Cursor, Read};
use std::sync::Arc;
use std::time::SystemTime;

use nestvfs_fs::VirtualPath;
use parking_lot::RwLock;

use super::{FileAttr, VfsContext};
use crate::error::{Error, Result};
use crate::uri::MEMORY_SCHEME;

#[derive(Clone, Debug)]
enum Node {
    Directory { modified: SystemTime },
    File { data: Arc<[u8]>, modified: SystemTime },
}

impl Node {
    fn attr(&self) -> FileAttr {
        match self {
            Node::Directory { modified } => FileAttr::directory(Some(*modified)),
            Node::File { data, modified } => FileAttr::file(data.len() as u64, Some(*modified)),
        }
    }
}

/// A context whose nodes live in memory, addressed as
/// `vfsmemory://<host>/<path>`.
///
/// Parent directories are created on demand. Content is shared, so streams
/// opened before an overwrite keep reading the old bytes.
#[derive(Debug)]
pub struct MemoryContext {
    host: Arc<str>,
    uri: String,
    nodes: RwLock<BTreeMap<VirtualPath, Node>>,
}

impl MemoryContext {
    pub fn new(host: impl Into<Arc<str>>) -> Self {
        let host = host.into();
        let mut nodes = BTreeMap::new();
        nodes.insert(
            VirtualPath::root(),
            Node::Directory {
                modified: SystemTime::now(),
            },
        );
        Self {
            uri: format!("{MEMORY_SCHEME}://{host}"),
            host,
            nodes: RwLock::new(nodes),
        }
    }

    pub fn host(&self) -> &Arc<str> {
        &self.host
    }

    /// Create `path` and any missing parents as directories.
    pub fn mkdirs(&self, path: &VirtualPath) -> Result<()> {
        let mut nodes = self.nodes.write();
        Self::ensure_dirs(&mut nodes, path, self.uri.as_str())
    }

    /// Store `data` at `path`, replacing an existing file.
    pub fn put_file(&self, path: &VirtualPath, data: impl Into<Arc<[u8]>>) -> Result<()> {
        if path.is_root() {
            return Err(Error::is_a_directory(self.uri.clone()));
        }
        let mut nodes = self.nodes.write();
        if let Some(parent) = path.parent() {
            Self::ensure_dirs(&mut nodes, &parent, &self.uri)?;
        }
        if let Some(Node::Directory { .. }) = nodes.get(path) {
            return Err(Error::is_a_directory(format!("{}/{path}", self.uri)));
        }
        nodes.insert(
            path.clone(),
            Node::File {
                data: data.into(),
                modified: SystemTime::now(),
            },
        );
        Ok(())
    }

    /// Remove `path` and everything below it. Returns whether anything was
    /// there.
    pub fn remove(&self, path: &VirtualPath) -> bool {
        if path.is_root() {
            return false;
        }
        let mut nodes = self.nodes.write();
        let before = nodes.len();
        nodes.retain(|candidate, _| !candidate.starts_with(path));
        nodes.len() != before
    }

    fn ensure_dirs(
        nodes: &mut BTreeMap<VirtualPath, Node>,
        path: &VirtualPath,
        uri: &str,
    ) -> Result<()> {
        for depth in 1..=path.len() {
            let (dir, _) = path.split_at(depth);
            match nodes.get(&dir) {
                Some(Node::Directory { .. }) => {}
                Some(Node::File { .. }) => {
                    return Err(Error::not_a_directory(format!("{uri}/{dir}")));
                }
                None => {
                    nodes.insert(
                        dir,
                        Node::Directory {
                            modified: SystemTime::now(),
                        },
                    );
                }
            }
        }
        Ok(())
    }
}

impl VfsContext for MemoryContext {
    fn root_uri(&self) -> &str {
        &self.uri
    }

    fn attr(&self, path: &VirtualPath) -> Result<Option<FileAttr>> {
        Ok(self.nodes.read().get(path).map(Node::attr))
    }

    fn children(&self, path: &VirtualPath) -> Result<Vec<String>> {
        let nodes = self.nodes.read();
        match nodes.get(path) {
            Some(Node::Directory { .. }) => {}
            Some(Node::File { .. }) => {
                return Err(Error::not_a_directory(format!("{}/{path}", self.uri)));
            }
            None => return Err(Error::not_found(format!("{}/{path}", self.uri))),
        }
        // BTreeMap order keeps the names sorted
        Ok(nodes
            .keys()
            .filter(|candidate| candidate.len() == path.len() + 1 && candidate.starts_with(path))
            .map(|child| child.name().to_string())
            .collect())
    }

    fn open_stream(&self, path: &VirtualPath) -> Result<Box<dyn Read + Send>> {
        match self.nodes.read().get(path) {
            Some(Node::File { data, .. }) => Ok(Box::new(Cursor::new(ArcBytes(Arc::clone(data))))),
            Some(Node::Directory { .. }) => {
                Err(Error::is_a_directory(format!("{}/{path}", self.uri)))
            }
            None => Err(Error::not_found(format!("{}/{path}", self.uri))),
        }
    }
}

struct ArcBytes(Arc<[u8]>);

impl AsRef<[u8]> for ArcBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
