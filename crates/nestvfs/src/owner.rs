//! Mount owners and file identities.

use std::any::Any;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use nestvfs_fs::VirtualPath;

/// Which tree a file lives in.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    /// The host-backed namespace (`vfs:` and `vfszip:` URIs).
    Fs,
    /// A named in-memory tree (`vfsmemory://<host>`).
    Memory(Arc<str>),
}

/// Canonical identity of a virtual file.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId {
    scope: Scope,
    path: VirtualPath,
}

impl FileId {
    pub fn new(scope: Scope, path: VirtualPath) -> Self {
        Self { scope, path }
    }

    pub fn fs(path: VirtualPath) -> Self {
        Self::new(Scope::Fs, path)
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn path(&self) -> &VirtualPath {
        &self.path
    }

    pub(crate) fn with_path(&self, path: VirtualPath) -> Self {
        Self::new(self.scope.clone(), path)
    }

    /// Strictly below `ancestor`, in the same scope.
    pub fn is_descendant_of(&self, ancestor: &FileId) -> bool {
        self.scope == ancestor.scope
            && self.path.len() > ancestor.path.len()
            && self.path.starts_with(&ancestor.path)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Scope::Fs => write!(f, "/{}", self.path),
            Scope::Memory(host) => write!(f, "vfsmemory://{host}/{}", self.path),
        }
    }
}

/// An opaque owner. Two tokens are the same owner only if one was cloned
/// from the other.
#[derive(Clone)]
pub struct OwnerToken {
    target: Arc<dyn Any + Send + Sync>,
    label: Arc<str>,
}

impl OwnerToken {
    pub fn new(label: impl Into<Arc<str>>) -> Self {
        Self {
            target: Arc::new(()),
            label: label.into(),
        }
    }

    /// Use an existing shared object as the owner.
    pub fn of<T: Any + Send + Sync>(value: &Arc<T>, label: impl Into<Arc<str>>) -> Self {
        let target: Arc<dyn Any + Send + Sync> = Arc::clone(value) as _;
        Self {
            target,
            label: label.into(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn addr(&self) -> *const () {
        Arc::as_ptr(&self.target) as *const ()
    }
}

impl PartialEq for OwnerToken {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for OwnerToken {}

impl Hash for OwnerToken {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for OwnerToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OwnerToken({}@{:p})", self.label, self.addr())
    }
}

/// Who keeps a mount alive.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Owner {
    Explicit(OwnerToken),
    /// The file itself, keyed by identity.
    SelfOwned(FileId),
}

impl Owner {
    pub fn token(label: impl Into<Arc<str>>) -> Self {
        Self::Explicit(OwnerToken::new(label))
    }
}

impl From<OwnerToken> for Owner {
    fn from(token: OwnerToken) -> Self {
        Self::Explicit(token)
    }
}

impl From<FileId> for Owner {
    fn from(id: FileId) -> Self {
        Self::SelfOwned(id)
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Explicit(token) => write!(f, "token:{}", token.label),
            Self::SelfOwned(id) => write!(f, "self:{id}"),
        }
    }
}
