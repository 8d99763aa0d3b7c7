//! Archive index: an entry tree built once per archive signature.
//!
//! A build enumerates the archive once and inserts every entry by its
//! normalized path, synthesizing directory nodes for undeclared parents.
//! When the backing file changes on disk the whole tree is discarded and
//! rebuilt on the next lookup; trees are never patched.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use nestvfs_fs::{Signature, VirtualPath};
use parking_lot::{Mutex, RwLock};

use crate::entry::{CertificateState, EntryInfo, EntryMetadata};
use crate::error::Error;
use crate::options::IndexOptions;
use crate::reader::{ArchiveHandle, ArchiveReader, CertificateSet, RawEntry};
use crate::{Certificates, Result};

pub type NodeId = usize;

const ROOT: NodeId = 0;

#[derive(Debug)]
struct EntryNode {
    path: VirtualPath,
    children: BTreeMap<String, NodeId>,
    /// `None` for the root and for synthesized directories.
    info: Option<Arc<EntryInfo>>,
    is_dir: bool,
}

impl EntryNode {
    fn directory(path: VirtualPath) -> Self {
        Self {
            path,
            children: BTreeMap::new(),
            info: None,
            is_dir: true,
        }
    }
}

/// Arena of entry nodes. Parents always precede their children.
#[derive(Debug)]
pub struct EntryTree {
    nodes: Vec<EntryNode>,
    duplicates: usize,
    skipped: usize,
}

impl EntryTree {
    pub fn build(handle: &dyn ArchiveHandle, options: &IndexOptions) -> Result<Self> {
        let mut tree = Self {
            nodes: vec![EntryNode::directory(VirtualPath::root())],
            duplicates: 0,
            skipped: 0,
        };

        for item in handle.entries() {
            let outcome = item.and_then(|raw| tree.insert(raw));
            match outcome {
                Ok(()) => {}
                Err(Error::EntryInit {
                    index,
                    name,
                    reason,
                }) if options.entry_failure.allows_skip(name.as_deref()) => {
                    tracing::warn!(index, name = ?name, %reason, "skipping archive entry");
                    tree.skipped += 1;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(tree)
    }

    fn insert(&mut self, raw: RawEntry) -> Result<()> {
        let invalid = |reason: String| Error::EntryInit {
            index: raw.index,
            name: Some(raw.name.clone()),
            reason,
        };
        let path = VirtualPath::parse(&raw.name).map_err(|e| invalid(e.to_string()))?;
        let Some((leaf, parents)) = path.segments().split_last() else {
            // "/" or "./": the root is always present
            return Ok(());
        };

        let mut parent = ROOT;
        for (depth, segment) in parents.iter().enumerate() {
            parent = match self.nodes[parent].children.get(segment).copied() {
                Some(id) if self.nodes[id].is_dir => id,
                Some(_) => return Err(invalid(format!("'{segment}' is a file"))),
                None => {
                    let (dir, _) = path.split_at(depth + 1);
                    self.push(parent, segment, EntryNode::directory(dir))
                }
            };
        }

        let existing = self.nodes[parent].children.get(leaf).copied();
        if let Some(id) = existing {
            if !raw.is_dir && !self.nodes[id].children.is_empty() {
                return Err(invalid("file shadows a non-empty directory".to_string()));
            }
        }
        let leaf = leaf.clone();
        let is_dir = raw.is_dir;
        let info = Arc::new(EntryInfo::new(raw));

        match existing {
            Some(id) => {
                let node = &mut self.nodes[id];
                if node.info.is_some() {
                    self.duplicates += 1;
                    tracing::debug!(entry = %path, "duplicate archive entry, last one wins");
                }
                node.info = Some(info);
                node.is_dir = is_dir;
            }
            None => {
                self.push(
                    parent,
                    &leaf,
                    EntryNode {
                        path,
                        children: BTreeMap::new(),
                        info: Some(info),
                        is_dir,
                    },
                );
            }
        }
        Ok(())
    }

    fn push(&mut self, parent: NodeId, name: &str, node: EntryNode) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(node);
        self.nodes[parent].children.insert(name.to_string(), id);
        id
    }

    pub fn lookup(&self, path: &VirtualPath) -> Option<NodeId> {
        path.segments()
            .iter()
            .try_fold(ROOT, |id, segment| self.nodes[id].children.get(segment).copied())
    }

    /// Nodes other than the root, parents first.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        1..self.nodes.len()
    }

    /// Number of nodes, including synthesized directories but not the root.
    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Entries that replaced an earlier entry of the same name.
    pub fn duplicates(&self) -> usize {
        self.duplicates
    }

    /// Entries dropped by the failure policy.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

/// One immutable generation of an index.
pub struct IndexSnapshot {
    source: PathBuf,
    handle: Box<dyn ArchiveHandle>,
    tree: EntryTree,
    signature: Signature,
}

impl IndexSnapshot {
    fn build(source: &Path, reader: &dyn ArchiveReader, options: &IndexOptions) -> Result<Self> {
        let signature = Signature::of(source)?;
        let handle = reader.open(source)?;
        let tree = EntryTree::build(handle.as_ref(), options)?;
        tracing::debug!(
            path = %source.display(),
            backend = reader.name(),
            nodes = tree.len(),
            duplicates = tree.duplicates(),
            skipped = tree.skipped(),
            "indexed archive"
        );
        Ok(Self {
            source: source.to_path_buf(),
            handle,
            tree,
            signature,
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn signature(&self) -> Signature {
        self.signature
    }

    pub fn tree(&self) -> &EntryTree {
        &self.tree
    }

    pub fn handle(&self) -> &dyn ArchiveHandle {
        self.handle.as_ref()
    }

    pub fn root(self: &Arc<Self>) -> EntryRef {
        EntryRef::new(Arc::clone(self), ROOT)
    }

    pub fn resolve(self: &Arc<Self>, path: &VirtualPath) -> Option<EntryRef> {
        self.tree
            .lookup(path)
            .map(|id| EntryRef::new(Arc::clone(self), id))
    }

    /// Every entry except the root, parents before children.
    pub fn entries(self: &Arc<Self>) -> impl Iterator<Item = EntryRef> + '_ {
        self.tree.ids().map(|id| EntryRef::new(Arc::clone(self), id))
    }
}

impl fmt::Debug for IndexSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexSnapshot")
            .field("source", &self.source)
            .field("nodes", &self.tree.len())
            .field("signature", &self.signature)
            .finish()
    }
}

/// A live index over one archive file.
pub struct ArchiveIndex {
    source: PathBuf,
    reader: Arc<dyn ArchiveReader>,
    options: IndexOptions,
    current: RwLock<Arc<IndexSnapshot>>,
    rebuild: Mutex<()>,
    builds: AtomicUsize,
}

impl ArchiveIndex {
    /// Open `source` and build its tree immediately.
    pub fn open(
        source: impl Into<PathBuf>,
        reader: Arc<dyn ArchiveReader>,
        options: IndexOptions,
    ) -> Result<Self> {
        let source = source.into();
        let snapshot = IndexSnapshot::build(&source, reader.as_ref(), &options)?;
        Ok(Self {
            source,
            reader,
            options,
            current: RwLock::new(Arc::new(snapshot)),
            rebuild: Mutex::new(()),
            builds: AtomicUsize::new(1),
        })
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn options(&self) -> &IndexOptions {
        &self.options
    }

    pub fn reader(&self) -> &Arc<dyn ArchiveReader> {
        &self.reader
    }

    /// Whether the file on disk differs from the current tree's signature.
    pub fn has_changed(&self) -> bool {
        self.current.read().signature.has_changed(&self.source)
    }

    /// The current tree, rebuilt first if the source changed.
    ///
    /// Concurrent callers that observe the same change rebuild once.
    pub fn snapshot(&self) -> Result<Arc<IndexSnapshot>> {
        let current = self.current.read().clone();
        if !current.signature.has_changed(&self.source) {
            return Ok(current);
        }

        let _guard = self.rebuild.lock();
        let current = self.current.read().clone();
        if !current.signature.has_changed(&self.source) {
            return Ok(current);
        }

        tracing::debug!(path = %self.source.display(), "archive changed, rebuilding index");
        let fresh = Arc::new(IndexSnapshot::build(
            &self.source,
            self.reader.as_ref(),
            &self.options,
        )?);
        *self.current.write() = Arc::clone(&fresh);
        self.builds.fetch_add(1, Ordering::Relaxed);
        Ok(fresh)
    }

    /// The current tree without a staleness check.
    pub fn current(&self) -> Arc<IndexSnapshot> {
        self.current.read().clone()
    }

    /// Resolve a normalized path. Absence is `Ok(None)`.
    pub fn resolve(&self, path: &VirtualPath) -> Result<Option<EntryRef>> {
        Ok(self.snapshot()?.resolve(path))
    }

    pub fn root(&self) -> Result<EntryRef> {
        Ok(self.snapshot()?.root())
    }

    /// How many trees have been built, the initial one included.
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for ArchiveIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveIndex")
            .field("source", &self.source)
            .field("backend", &self.reader.name())
            .field("builds", &self.build_count())
            .finish()
    }
}

/// A node in one snapshot. Keeps its snapshot (and archive handle) alive.
#[derive(Clone)]
pub struct EntryRef {
    snapshot: Arc<IndexSnapshot>,
    id: NodeId,
}

impl EntryRef {
    fn new(snapshot: Arc<IndexSnapshot>, id: NodeId) -> Self {
        Self { snapshot, id }
    }

    fn node(&self) -> &EntryNode {
        &self.snapshot.tree.nodes[self.id]
    }

    pub fn snapshot(&self) -> &Arc<IndexSnapshot> {
        &self.snapshot
    }

    pub fn name(&self) -> &str {
        self.node().path.name()
    }

    pub fn path(&self) -> &VirtualPath {
        &self.node().path
    }

    pub fn is_root(&self) -> bool {
        self.id == ROOT
    }

    pub fn is_directory(&self) -> bool {
        self.node().is_dir
    }

    /// Whether the archive declared this node (as opposed to it being a
    /// synthesized parent directory).
    pub fn is_declared(&self) -> bool {
        self.node().info.is_some()
    }

    pub fn info(&self) -> Option<&Arc<EntryInfo>> {
        self.node().info.as_ref()
    }

    pub fn child(&self, name: &str) -> Option<EntryRef> {
        self.node()
            .children
            .get(name)
            .map(|&id| EntryRef::new(Arc::clone(&self.snapshot), id))
    }

    /// Children in name order.
    pub fn children(&self) -> Vec<EntryRef> {
        self.node()
            .children
            .values()
            .map(|&id| EntryRef::new(Arc::clone(&self.snapshot), id))
            .collect()
    }

    pub fn resolve(&self, relative: &VirtualPath) -> Option<EntryRef> {
        relative
            .segments()
            .iter()
            .try_fold(self.clone(), |node, segment| node.child(segment))
    }

    /// Size, time and certificates, resolved once per entry.
    pub fn metadata(&self) -> Result<EntryMetadata> {
        match self.info() {
            Some(info) => info.metadata(self.snapshot.handle()).cloned(),
            None => Ok(EntryMetadata {
                size: 0,
                modified: None,
                certificates: Certificates::Absent,
            }),
        }
    }

    pub fn size(&self) -> u64 {
        self.info().map_or(0, |info| info.raw().size)
    }

    pub fn last_modified(&self) -> Option<std::time::SystemTime> {
        self.info().and_then(|info| info.raw().modified)
    }

    pub fn certificates(&self) -> Result<Option<Arc<CertificateSet>>> {
        match self.info() {
            Some(info) => info.certificates(self.snapshot.handle()),
            None => Ok(None),
        }
    }

    pub fn certificate_state(&self) -> CertificateState {
        match self.info() {
            Some(info) => info.certificate_state(),
            None => CertificateState::Absent,
        }
    }

    /// A fresh stream over the entry's bytes.
    pub fn open_stream(&self) -> Result<Box<dyn Read + Send>> {
        match self.info() {
            Some(info) if !self.is_directory() => self.snapshot.handle().open_stream(info.raw()),
            _ => Err(Error::IsDirectory(self.path().to_string())),
        }
    }
}

impl fmt::Debug for EntryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryRef")
            .field("source", &self.snapshot.source)
            .field("path", &self.path().to_string())
            .field("is_dir", &self.is_directory())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Listing(Vec<Result<RawEntry>>);

    impl ArchiveHandle for Listing {
        fn len(&self) -> usize {
            self.0.len()
        }

        fn entries(&self) -> Box<dyn Iterator<Item = Result<RawEntry>> + '_> {
            Box::new(self.0.iter().map(|item| match item {
                Ok(raw) => Ok(raw.clone()),
                Err(Error::EntryInit {
                    index,
                    name,
                    reason,
                }) => Err(Error::EntryInit {
                    index: *index,
                    name: name.clone(),
                    reason: reason.clone(),
                }),
                Err(other) => panic!("unexpected fixture error {other}"),
            }))
        }

        fn open_stream(&self, entry: &RawEntry) -> Result<Box<dyn Read + Send>> {
            Ok(Box::new(std::io::Cursor::new(entry.name.clone().into_bytes())))
        }
    }

    fn file(index: usize, name: &str, size: u64) -> Result<RawEntry> {
        Ok(RawEntry {
            name: name.to_string(),
            is_dir: false,
            size,
            modified: None,
            index,
        })
    }

    fn dir(index: usize, name: &str) -> Result<RawEntry> {
        Ok(RawEntry {
            name: name.to_string(),
            is_dir: true,
            size: 0,
            modified: None,
            index,
        })
    }

    fn broken(index: usize, name: &str) -> Result<RawEntry> {
        Err(Error::EntryInit {
            index,
            name: Some(name.to_string()),
            reason: "bad local header".to_string(),
        })
    }

    fn path(p: &str) -> VirtualPath {
        VirtualPath::parse(p).unwrap()
    }

    #[test]
    fn synthesizes_parent_directories() {
        let listing = Listing(vec![file(0, "a/b/c.txt", 3)]);
        let tree = EntryTree::build(&listing, &IndexOptions::default()).unwrap();

        assert_eq!(tree.len(), 3);
        let a = tree.lookup(&path("a")).unwrap();
        assert!(tree.nodes[a].is_dir);
        assert!(tree.nodes[a].info.is_none());
        let c = tree.lookup(&path("a/b/c.txt")).unwrap();
        assert!(!tree.nodes[c].is_dir);
        assert!(tree.lookup(&path("a/x")).is_none());
    }

    #[test]
    fn declared_directory_after_synthesized() {
        let listing = Listing(vec![file(0, "a/b.txt", 1), dir(1, "a/")]);
        let tree = EntryTree::build(&listing, &IndexOptions::default()).unwrap();
        let a = tree.lookup(&path("a")).unwrap();
        assert!(tree.nodes[a].info.is_some());
        assert_eq!(tree.duplicates(), 0);
        assert_eq!(tree.nodes[a].children.len(), 1);
    }

    #[test]
    fn duplicate_entries_last_wins() {
        let listing = Listing(vec![file(0, "x.txt", 1), file(1, "x.txt", 2)]);
        let tree = EntryTree::build(&listing, &IndexOptions::default()).unwrap();
        let x = tree.lookup(&path("x.txt")).unwrap();
        let info = tree.nodes[x].info.as_ref().unwrap();
        assert_eq!(info.raw().size, 2);
        assert_eq!(info.raw().index, 1);
        assert_eq!(tree.duplicates(), 1);
    }

    #[test]
    fn escaping_entry_fails_build() {
        let listing = Listing(vec![file(0, "../evil.sh", 1)]);
        let err = EntryTree::build(&listing, &IndexOptions::default()).unwrap_err();
        assert!(matches!(err, Error::EntryInit { index: 0, .. }));
    }

    #[test]
    fn default_policy_aborts_on_broken_entry() {
        let listing = Listing(vec![file(0, "ok.txt", 1), broken(1, "bad.txt")]);
        assert!(EntryTree::build(&listing, &IndexOptions::default()).is_err());
    }

    #[test]
    fn skip_policy_honours_allow_list() {
        let entries = || vec![broken(0, "META-INF/maven/x"), file(1, "ok.txt", 1)];
        let options = IndexOptions::default()
            .entry_failure(crate::EntryFailurePolicy::skip_matching(["maven"]));
        let tree = EntryTree::build(&Listing(entries()), &options).unwrap();
        assert_eq!(tree.skipped(), 1);
        assert!(tree.lookup(&path("ok.txt")).is_some());

        let strict = IndexOptions::default()
            .entry_failure(crate::EntryFailurePolicy::skip_matching(["other"]));
        assert!(EntryTree::build(&Listing(entries()), &strict).is_err());
    }

    #[test]
    fn file_under_file_is_rejected() {
        let listing = Listing(vec![file(0, "a", 1), file(1, "a/b", 1)]);
        let err = EntryTree::build(&listing, &IndexOptions::default()).unwrap_err();
        assert!(matches!(err, Error::EntryInit { index: 1, .. }));
    }
}
