//! Scoped temporary storage.
//!
//! All stores share one root directory. Each allocation is a fresh,
//! uniquely named directory under that root; the name is claimed with an
//! atomic `mkdir` and retried on collision, so concurrent stores never hand
//! out the same directory and never delete each other's.
//!
//! ```text
//! <root>/
//! └── <owner>-XXXXXXXX/      allocation (removed on delete)
//!     └── <inner>/           TempDir::path()
//! ```

use std::fmt;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::{Error, Result};

const MAX_NAME_LEN: usize = 48;

/// A directory handed out by a [`TempStore`].
///
/// Deleting is idempotent: once the allocation is gone from disk, later
/// calls are no-ops. A removal that failed is attempted again next time.
#[derive(Debug)]
pub struct TempDir {
    allocation: PathBuf,
    path: PathBuf,
    deleted: AtomicBool,
}

impl TempDir {
    /// The directory callers should write into.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The unique directory claimed under the store root.
    pub fn allocation(&self) -> &Path {
        &self.allocation
    }

    pub fn file(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.path.join(relative)
    }

    /// Copy `reader` into a new file named `name` inside this directory.
    pub fn create_file(&self, name: &str, reader: &mut dyn Read) -> Result<PathBuf> {
        let target = self.path.join(sanitize(name));
        crate::primitives::write_stream(reader, &target)?;
        Ok(target)
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted.load(Ordering::Acquire)
    }

    fn remove(&self) -> Result<bool> {
        if self.is_deleted() {
            return Ok(false);
        }
        remove_all(&self.allocation)?;
        Ok(!self.deleted.swap(true, Ordering::AcqRel))
    }
}

/// Allocator for scoped temporary directories.
pub trait TempStore: Send + Sync + fmt::Debug {
    /// Claim a new directory for `owner_name`, with `inner_name` created inside it.
    fn create_temp_dir(&self, owner_name: &str, inner_name: &str) -> Result<Arc<TempDir>>;

    /// Remove `dir` recursively. Removing an already-absent directory succeeds.
    fn delete(&self, dir: &TempDir) -> Result<()>;

    /// Remove everything this store has handed out.
    fn clear(&self) -> Result<()>;

    fn root(&self) -> &Path;
}

/// Plain on-disk store.
#[derive(Debug)]
pub struct FsTempStore {
    root: PathBuf,
    created: Mutex<Vec<Arc<TempDir>>>,
}

impl FsTempStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            created: Mutex::new(Vec::new()),
        }
    }

    /// A store rooted at `<system temp>/nestvfs`.
    pub fn in_system_temp() -> Self {
        Self::new(std::env::temp_dir().join("nestvfs"))
    }

    pub fn live(&self) -> usize {
        self.created.lock().len()
    }
}

impl TempStore for FsTempStore {
    fn create_temp_dir(&self, owner_name: &str, inner_name: &str) -> Result<Arc<TempDir>> {
        fs::create_dir_all(&self.root).map_err(|e| Error::Write {
            path: self.root.clone(),
            source: e,
        })?;

        // tempfile claims the name with create_dir and retries on EEXIST
        let allocation = tempfile::Builder::new()
            .prefix(&format!("{}-", sanitize(owner_name)))
            .rand_bytes(8)
            .tempdir_in(&self.root)
            .map_err(|e| Error::Allocate {
                root: self.root.clone(),
                source: e,
            })?
            .keep();

        let path = allocation.join(sanitize(inner_name));
        if let Err(e) = fs::create_dir(&path) {
            let _ = fs::remove_dir_all(&allocation);
            return Err(Error::Write { path, source: e });
        }

        let dir = Arc::new(TempDir {
            allocation,
            path,
            deleted: AtomicBool::new(false),
        });
        tracing::trace!(path = %dir.path.display(), "allocated temp dir");
        self.created.lock().push(Arc::clone(&dir));
        Ok(dir)
    }

    fn delete(&self, dir: &TempDir) -> Result<()> {
        if dir.remove()? {
            tracing::trace!(path = %dir.allocation.display(), "deleted temp dir");
        }
        self.created
            .lock()
            .retain(|d| d.allocation != dir.allocation);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let drained: Vec<_> = std::mem::take(&mut *self.created.lock());
        let mut first_error = None;
        let mut failed = Vec::new();
        for dir in drained {
            if let Err(e) = dir.remove() {
                tracing::warn!(path = %dir.allocation.display(), error = %e, "temp dir removal failed");
                first_error.get_or_insert(e);
                failed.push(dir);
            }
        }
        // kept for the next delete or clear
        self.created.lock().extend(failed);
        first_error.map_or(Ok(()), Err)
    }

    fn root(&self) -> &Path {
        &self.root
    }
}

/// Wraps another store and removes whatever is still allocated when the
/// wrapper goes away.
///
/// This is a safety net for missed cleanup, not a replacement for it:
/// explicit [`TempStore::delete`] still runs immediately.
pub struct DeleteOnExit<S: TempStore> {
    inner: S,
    pending: Mutex<Vec<PathBuf>>,
}

impl<S: TempStore> DeleteOnExit<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn pending(&self) -> Vec<PathBuf> {
        self.pending.lock().clone()
    }

    /// Best-effort removal of every pending path. Safe to call repeatedly.
    pub fn shutdown(&self) {
        let pending: Vec<_> = std::mem::take(&mut *self.pending.lock());
        for path in pending {
            if let Err(e) = remove_all(&path) {
                tracing::warn!(path = %path.display(), error = %e, "delete-on-exit failed");
            }
        }
    }
}

impl<S: TempStore> fmt::Debug for DeleteOnExit<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeleteOnExit")
            .field("inner", &self.inner)
            .field("pending", &self.pending.lock().len())
            .finish()
    }
}

impl<S: TempStore> TempStore for DeleteOnExit<S> {
    fn create_temp_dir(&self, owner_name: &str, inner_name: &str) -> Result<Arc<TempDir>> {
        let dir = self.inner.create_temp_dir(owner_name, inner_name)?;
        self.pending.lock().push(dir.allocation.clone());
        Ok(dir)
    }

    fn delete(&self, dir: &TempDir) -> Result<()> {
        self.inner.delete(dir)?;
        self.pending.lock().retain(|p| p != &dir.allocation);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.inner.clear()?;
        self.pending.lock().clear();
        Ok(())
    }

    fn root(&self) -> &Path {
        self.inner.root()
    }
}

impl<S: TempStore> Drop for DeleteOnExit<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn remove_all(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::Remove {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Make `name` usable as a single path component.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .take(MAX_NAME_LEN)
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}
