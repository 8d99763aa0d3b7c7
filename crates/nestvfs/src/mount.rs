//! The automounter.
//!
//! Every mounted file has one [`MountRecord`] keyed by its [`FileId`]. The
//! record holds the temp directories the mount produced and the set of
//! owners keeping it alive. Mounting an already-mounted file only adds an
//! owner; the record (and its temp storage) goes away when its last owner
//! is cleaned up.
//!
//! Removing a record releases the file's own self-ownership in turn, which
//! is how an umbrella archive takes the archives nested inside it along
//! with it:
//!
//! ```text
//! cleanup(T)
//! └── app.ear      owners {T}                 -> empty, removed
//!     └── self:app.ear released
//!         ├── lib/util.jar  owners {self}     -> empty, removed
//!         └── web.war       owners {self, U}  -> kept until cleanup(U)
//! ```
//!
//! Mount and cleanup of one identity are serialized on a per-identity lock;
//! unrelated identities never wait on each other.
//!
//! A record remembers the signature of the host file it was made from.
//! When that file changes, [`MountRegistry::refresh`] materializes the
//! mount again for the same owners, and the self-owned mounts nested in
//! the old contents go away. Every record's temp storage belongs to that
//! record alone, so unmounting one file never pulls data out from under
//! another.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use nestvfs_archive::{ArchiveIndex, ArchiveReader, IndexOptions, detect_from_path, extract_to};
use nestvfs_fs::{Signature, TempDir, TempStore, copy_path};
use parking_lot::Mutex;

use crate::config::MountMode;
use crate::context::{ArchiveContext, DirectoryContext, VfsContext};
use crate::error::{Error, Result};
use crate::file::VirtualFile;
use crate::owner::{FileId, Owner};
use crate::uri::ZIP_SCHEME;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MountOptions {
    pub mode: MountMode,
}

impl MountOptions {
    pub fn new(mode: MountMode) -> Self {
        Self { mode }
    }

    pub fn expanded() -> Self {
        Self::new(MountMode::Expanded)
    }

    pub fn indexed() -> Self {
        Self::new(MountMode::Indexed)
    }

    pub fn copy() -> Self {
        Self::new(MountMode::Copy)
    }

    pub fn mode(mut self, mode: MountMode) -> Self {
        self.mode = mode;
        self
    }
}

struct MountRecord {
    owners: HashSet<Owner>,
    temp: Vec<Arc<TempDir>>,
    mode: MountMode,
    physical: Option<PathBuf>,
    context: Option<Arc<dyn VfsContext>>,
    /// Host file the mount was made from, as it was at the time.
    source: Option<(PathBuf, Signature)>,
}

/// What a [`MountRegistry::mount`] call found or produced.
#[derive(Clone, Debug)]
pub struct MountInfo {
    pub id: FileId,
    pub mode: MountMode,
    /// Where the mounted file now lives on disk.
    pub physical: Option<PathBuf>,
    /// The tree to navigate into, if the file has one.
    pub context: Option<Arc<dyn VfsContext>>,
    /// `false` when the call joined an existing mount.
    pub created: bool,
}

impl MountRecord {
    fn is_stale(&self) -> bool {
        self.source
            .as_ref()
            .is_some_and(|(path, signature)| signature.has_changed(path))
    }

    fn info(&self, id: &FileId, created: bool) -> MountInfo {
        MountInfo {
            id: id.clone(),
            mode: self.mode,
            physical: self.physical.clone(),
            context: self.context.clone(),
            created,
        }
    }
}

pub struct MountRegistry {
    records: DashMap<FileId, MountRecord>,
    locks: DashMap<FileId, Arc<Mutex<()>>>,
    temp: Arc<dyn TempStore>,
    reader: Arc<dyn ArchiveReader>,
    index_options: IndexOptions,
    materialized: AtomicUsize,
}

impl MountRegistry {
    pub fn new(
        temp: Arc<dyn TempStore>,
        reader: Arc<dyn ArchiveReader>,
        index_options: IndexOptions,
    ) -> Self {
        Self {
            records: DashMap::new(),
            locks: DashMap::new(),
            temp,
            reader,
            index_options,
            materialized: AtomicUsize::new(0),
        }
    }

    pub fn temp_store(&self) -> &Arc<dyn TempStore> {
        &self.temp
    }

    /// Mount `file` on behalf of `owner`.
    ///
    /// The first mount of an identity materializes it according to
    /// `options`; later mounts, by any owner and with any options, join the
    /// existing record. A failed mount leaves the identity unmounted with
    /// nothing allocated.
    pub fn mount(
        &self,
        owner: impl Into<Owner>,
        file: &VirtualFile,
        options: MountOptions,
    ) -> Result<MountInfo> {
        let owner = owner.into();
        let id = file.id().clone();

        self.with_lock(&id, || {
            if let Some(mut record) = self.records.get_mut(&id) {
                let added = record.owners.insert(owner.clone());
                tracing::debug!(file = %id, %owner, added, "joined existing mount");
                return Ok(record.info(&id, false));
            }

            let mut record = self
                .materialize(file, options)
                .map_err(|e| Error::mount(id.to_string(), e))?;
            record.owners.insert(owner.clone());
            let info = record.info(&id, true);
            self.records.insert(id.clone(), record);
            self.materialized.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(file = %id, %owner, mode = ?options.mode, "mounted");
            Ok(info)
        })
    }

    /// Release everything `owner` holds.
    ///
    /// Records left without owners are unmounted and their temp storage
    /// deleted; each unmount releases that file's self-ownership of the
    /// mounts nested under it. Returns the identities that were unmounted,
    /// parents first. Deletion failures are logged and the first one is
    /// returned after the bookkeeping is complete.
    pub fn cleanup(&self, owner: impl Into<Owner>) -> Result<Vec<FileId>> {
        let mut sweep = Sweep::default();
        sweep.pending.push_back(owner.into());
        self.drain(sweep)
    }

    /// Bring `file`'s mount up to date with its host file.
    ///
    /// A mount whose source changed since it was made is materialized
    /// again, with the same mode and owners, and its old storage deleted.
    /// Self-owned mounts nested in the old contents are unmounted; nested
    /// mounts with other owners keep their own storage. Returns the current
    /// mount, with `created` set when it was rebuilt, or `None` when `file`
    /// is not mounted. A failed rebuild leaves the old mount in place.
    pub fn refresh(&self, file: &VirtualFile) -> Result<Option<MountInfo>> {
        let id = file.id().clone();
        let rebuilt = self.with_lock(&id, || -> Result<Option<(MountInfo, bool)>> {
            let mode = match self.records.get(&id) {
                None => return Ok(None),
                Some(record) if !record.is_stale() => return Ok(Some((record.info(&id, false), false))),
                Some(record) => record.mode,
            };

            let mut fresh = self
                .materialize(file, MountOptions::new(mode))
                .map_err(|e| Error::mount(id.to_string(), e))?;
            let Some((_, mut old)) = self.records.remove(&id) else {
                return Ok(None);
            };
            fresh.owners = std::mem::take(&mut old.owners);
            let info = fresh.info(&id, true);
            self.records.insert(id.clone(), fresh);
            self.materialized.fetch_add(1, Ordering::Relaxed);
            // failures are logged; the new mount is already in place
            let _ = self.delete_storage(&id, &old);
            tracing::debug!(file = %id, ?mode, "remounted changed source");
            Ok(Some((info, true)))
        })?;

        let Some((info, changed)) = rebuilt else {
            return Ok(None);
        };
        if changed {
            if let Err(e) = self.release_nested(&id) {
                tracing::warn!(file = %id, error = %e, "failed to unmount nested mounts");
            }
        }
        Ok(Some(info))
    }

    /// Mounted identities whose host file changed, parents first.
    pub fn stale(&self) -> Vec<FileId> {
        let mut ids: Vec<_> = self
            .records
            .iter()
            .filter(|record| record.is_stale())
            .map(|record| record.key().clone())
            .collect();
        ids.sort();
        ids
    }

    /// The context to enter `file` through, refreshing a stale mount first.
    pub(crate) fn current_context(&self, file: &VirtualFile) -> Result<Option<Arc<dyn VfsContext>>> {
        match self.records.get(file.id()) {
            None => return Ok(None),
            Some(record) if !record.is_stale() => return Ok(record.context.clone()),
            Some(_) => {}
        }
        Ok(self.refresh(file)?.and_then(|info| info.context))
    }

    /// Unmount everything regardless of owners.
    pub fn cleanup_all(&self) -> Result<Vec<FileId>> {
        let owners: HashSet<Owner> = self
            .records
            .iter()
            .flat_map(|record| record.owners.iter().cloned().collect::<Vec<_>>())
            .collect();

        let mut unmounted = Vec::new();
        let mut first_error = None;
        for owner in owners {
            match self.cleanup(owner) {
                Ok(ids) => unmounted.extend(ids),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(unmounted),
        }
    }

    pub fn is_mounted(&self, file: &VirtualFile) -> bool {
        self.is_mounted_id(file.id())
    }

    pub fn is_mounted_id(&self, id: &FileId) -> bool {
        self.records.contains_key(id)
    }

    pub fn owners(&self, id: &FileId) -> Vec<Owner> {
        self.records
            .get(id)
            .map(|record| record.owners.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Currently mounted identities, sorted.
    pub fn mounted(&self) -> Vec<FileId> {
        let mut ids: Vec<_> = self.records.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn info(&self, id: &FileId) -> Option<MountInfo> {
        self.records.get(id).map(|record| record.info(id, false))
    }

    pub(crate) fn context(&self, id: &FileId) -> Option<Arc<dyn VfsContext>> {
        self.records.get(id).and_then(|record| record.context.clone())
    }

    pub(crate) fn physical(&self, id: &FileId) -> Option<PathBuf> {
        self.records.get(id).and_then(|record| record.physical.clone())
    }

    /// How many mounts have actually been materialized.
    pub fn materialized_count(&self) -> usize {
        self.materialized.load(Ordering::Relaxed)
    }

    /// Run `f` holding the lock for `id`, the same lock mount and cleanup
    /// of that identity take.
    pub fn with_lock<T>(&self, id: &FileId, f: impl FnOnce() -> T) -> T {
        let result = {
            let lock = self.lock_for(id);
            let _guard = lock.lock();
            f()
        };
        self.prune_lock(id);
        result
    }

    fn lock_for(&self, id: &FileId) -> Arc<Mutex<()>> {
        // clone out so the shard lock is released before blocking
        Arc::clone(self.locks.entry(id.clone()).or_default().value())
    }

    fn prune_lock(&self, id: &FileId) {
        self.locks.remove_if(id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Release owners until none are pending, following each unmount to the
    /// mounts nested under it.
    fn drain(&self, mut sweep: Sweep) -> Result<Vec<FileId>> {
        while let Some(owner) = sweep.pending.pop_front() {
            if !sweep.released.insert(owner.clone()) {
                continue;
            }
            let ids = self.held_by(&owner);
            self.release_all(&owner, ids, &mut sweep);
        }

        match sweep.first_error {
            Some(e) => Err(e.into()),
            None => Ok(sweep.unmounted),
        }
    }

    fn release_all(&self, owner: &Owner, ids: Vec<FileId>, sweep: &mut Sweep) {
        for id in ids {
            let removed = self.with_lock(&id, || {
                let record = self.release(&id, owner)?;
                Some(self.delete_storage(&id, &record))
            });
            let Some(outcome) = removed else { continue };

            if let Err(e) = outcome {
                sweep.first_error.get_or_insert(e);
            }
            tracing::debug!(file = %id, "unmounted");
            sweep.pending.push_back(Owner::SelfOwned(id.clone()));
            sweep.unmounted.push(id);
        }
    }

    /// Release `root`'s self-ownership of the mounts below it, leaving
    /// `root`'s own record alone.
    fn release_nested(&self, root: &FileId) -> Result<Vec<FileId>> {
        let owner = Owner::SelfOwned(root.clone());
        let nested = self
            .held_by(&owner)
            .into_iter()
            .filter(|id| id.is_descendant_of(root))
            .collect();

        let mut sweep = Sweep::default();
        sweep.released.insert(owner.clone());
        self.release_all(&owner, nested, &mut sweep);
        self.drain(sweep)
    }

    /// Identities `owner` should be released from: those it owns directly,
    /// plus, for a file's self-ownership, the self-owned mounts below it.
    fn held_by(&self, owner: &Owner) -> Vec<FileId> {
        self.records
            .iter()
            .filter(|record| {
                record.owners.contains(owner) || nested_self_owned(record.key(), &record.owners, owner)
            })
            .map(|record| record.key().clone())
            .collect()
    }

    /// Drop `owner` from `id`'s record; hand the record back if that
    /// emptied it. Caller holds `id`'s lock.
    fn release(&self, id: &FileId, owner: &Owner) -> Option<MountRecord> {
        {
            let mut record = self.records.get_mut(id)?;
            record.owners.remove(owner);
            if matches!(owner, Owner::SelfOwned(root) if id.is_descendant_of(root)) {
                record.owners.remove(&Owner::SelfOwned(id.clone()));
            }
            if !record.owners.is_empty() {
                tracing::debug!(file = %id, %owner, remaining = record.owners.len(), "released owner");
                return None;
            }
        }
        self.records.remove(id).map(|(_, record)| record)
    }

    /// Delete every temp directory of a removed record, continuing past
    /// failures and reporting the first.
    fn delete_storage(&self, id: &FileId, record: &MountRecord) -> nestvfs_fs::Result<()> {
        let mut first_error = None;
        for dir in &record.temp {
            if let Err(e) = self.temp.delete(dir) {
                tracing::warn!(
                    file = %id,
                    path = %dir.allocation().display(),
                    error = %e,
                    "failed to delete mount storage"
                );
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn materialize(&self, file: &VirtualFile, options: MountOptions) -> Result<MountRecord> {
        let attr = file
            .attr()?
            .ok_or_else(|| Error::not_found(file.id().to_string()))?;
        let source = file
            .context()
            .physical_file(file.local_path())
            .filter(|path| path.exists());
        // files inside other mounts change only through those mounts
        let watched = match &source {
            Some(path) if path.is_file() && !self.in_temp_storage(path) => {
                Some((path.clone(), Signature::of(path)?))
            }
            _ => None,
        };
        let mut staging = Staging::new(self.temp.as_ref(), file.name());

        let (physical, context): (Option<PathBuf>, Option<Arc<dyn VfsContext>>) =
            match options.mode {
                MountMode::Copy => {
                    let dir = staging.allocate("copy")?;
                    let copy = dir.file(safe_name(file.name()));
                    match &source {
                        Some(source) => {
                            copy_path(source, &copy)?;
                        }
                        None if attr.is_dir() => {
                            return Err(Error::is_a_directory(file.id().to_string()));
                        }
                        None => {
                            nestvfs_fs::write_stream(&mut file.open_stream()?, &copy)?;
                        }
                    }
                    let context = self.context_over(&copy, file.id())?;
                    (Some(copy), context)
                }
                // a directory already is a tree; mounting it is bookkeeping only
                _ if attr.is_dir() => (source, None),
                MountMode::Indexed => {
                    // the index reads the file for as long as the mount lives,
                    // so it must not sit in storage another mount may delete
                    let source = source.filter(|path| !self.in_temp_storage(path));
                    let archive = self.archive_file(file, source, &mut staging)?;
                    let context = ArchiveContext::open(
                        &archive,
                        zip_uri(file.id()),
                        Arc::clone(&self.reader),
                        self.index_options.clone(),
                    )?;
                    let context: Arc<dyn VfsContext> = Arc::new(context);
                    (Some(archive), Some(context))
                }
                MountMode::Expanded => {
                    let archive = self.archive_file(file, source, &mut staging)?;
                    let index = ArchiveIndex::open(
                        &archive,
                        Arc::clone(&self.reader),
                        self.index_options.clone(),
                    )?;
                    let dir = staging.allocate("contents")?;
                    extract_to(&index.snapshot()?, dir.path())?;
                    let root = dir.path().to_path_buf();
                    let context: Arc<dyn VfsContext> = Arc::new(DirectoryContext::new(&root));
                    (Some(root), Some(context))
                }
            };

        Ok(MountRecord {
            owners: HashSet::new(),
            temp: staging.commit(),
            mode: options.mode,
            physical,
            context,
            source: watched,
        })
    }

    fn in_temp_storage(&self, path: &Path) -> bool {
        path.starts_with(self.temp.root())
    }

    /// The archive as a host file, spilling its bytes into this mount's
    /// storage when there is no `source` to read it from.
    fn archive_file(
        &self,
        file: &VirtualFile,
        source: Option<PathBuf>,
        staging: &mut Staging<'_>,
    ) -> Result<PathBuf> {
        if let Some(path) = source {
            return Ok(path);
        }
        let dir = staging.allocate("spill")?;
        let path = dir.create_file(file.name(), &mut file.open_stream()?)?;
        tracing::trace!(file = %file.id(), spill = %path.display(), "spilled archive to disk");
        Ok(path)
    }

    /// A navigable tree over a copied file, if it has one.
    fn context_over(&self, copy: &Path, id: &FileId) -> Result<Option<Arc<dyn VfsContext>>> {
        if copy.is_dir() {
            let context: Arc<dyn VfsContext> = Arc::new(DirectoryContext::new(copy));
            return Ok(Some(context));
        }
        if detect_from_path(copy)?.is_none() {
            return Ok(None);
        }
        let context = ArchiveContext::open(
            copy,
            zip_uri(id),
            Arc::clone(&self.reader),
            self.index_options.clone(),
        )?;
        let context: Arc<dyn VfsContext> = Arc::new(context);
        Ok(Some(context))
    }
}

impl fmt::Debug for MountRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MountRegistry")
            .field("mounted", &self.records.len())
            .field("temp", &self.temp)
            .finish()
    }
}

fn nested_self_owned(id: &FileId, owners: &HashSet<Owner>, owner: &Owner) -> bool {
    match owner {
        Owner::SelfOwned(root) => {
            id.is_descendant_of(root) && owners.contains(&Owner::SelfOwned(id.clone()))
        }
        Owner::Explicit(_) => false,
    }
}

fn zip_uri(id: &FileId) -> String {
    format!("{ZIP_SCHEME}:{id}")
}

fn safe_name(name: &str) -> &str {
    if name.is_empty() { "root" } else { name }
}

#[derive(Default)]
struct Sweep {
    pending: VecDeque<Owner>,
    released: HashSet<Owner>,
    unmounted: Vec<FileId>,
    first_error: Option<nestvfs_fs::Error>,
}

/// Temp directories allocated for a mount in progress. Dropped without
/// [`commit`](Self::commit), they are deleted again.
struct Staging<'a> {
    store: &'a dyn TempStore,
    owner_name: String,
    dirs: Vec<Arc<TempDir>>,
}

impl<'a> Staging<'a> {
    fn new(store: &'a dyn TempStore, owner_name: &str) -> Self {
        Self {
            store,
            owner_name: safe_name(owner_name).to_string(),
            dirs: Vec::new(),
        }
    }

    fn allocate(&mut self, inner: &str) -> Result<Arc<TempDir>> {
        let dir = self.store.create_temp_dir(&self.owner_name, inner)?;
        self.dirs.push(Arc::clone(&dir));
        Ok(dir)
    }

    fn commit(mut self) -> Vec<Arc<TempDir>> {
        std::mem::take(&mut self.dirs)
    }
}

impl Drop for Staging<'_> {
    fn drop(&mut self) {
        for dir in self.dirs.drain(..) {
            if let Err(e) = self.store.delete(&dir) {
                tracing::warn!(path = %dir.allocation().display(), error = %e, "failed to roll back mount storage");
            }
        }
    }
}
