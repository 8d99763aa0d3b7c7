//! The VFS entry point.

use std::fmt;
use std::io::Read;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use nestvfs_archive::{ArchiveReader, SignedZipReader, ZipReader};
use nestvfs_fs::{DeleteOnExit, FsTempStore, TempStore, VirtualPath};
use once_cell::sync::Lazy;

use crate::cache::{ContextCache, MapContextCache, NoopContextCache};
use crate::config::VfsConfig;
use crate::context::{ArchiveContext, DirectoryContext, MemoryContext, VfsContext};
use crate::error::{Error, Result};
use crate::file::VirtualFile;
use crate::mount::{MountInfo, MountOptions, MountRegistry};
use crate::owner::{FileId, Owner, Scope};
use crate::scan::PeriodicScanner;
use crate::uri::{MEMORY_SCHEME, VfsUri, ZIP_SCHEME};

static GLOBAL: Lazy<Vfs> = Lazy::new(|| {
    let config = VfsConfig::default().from_env();
    VfsBuilder::new(config).assemble()
});

struct VfsInner {
    config: VfsConfig,
    root: Arc<DirectoryContext>,
    temp: Arc<dyn TempStore>,
    cache: Arc<dyn ContextCache>,
    reader: Arc<dyn ArchiveReader>,
    mounts: MountRegistry,
    memory: DashMap<Arc<str>, Arc<MemoryContext>>,
    scanner: PeriodicScanner,
}

/// A virtual filesystem: the host tree under [`VfsConfig::root`], the
/// archives inside it, and any registered memory trees.
///
/// Cheap to clone; clones share everything.
#[derive(Clone)]
pub struct Vfs {
    inner: Arc<VfsInner>,
}

/// Assembles a [`Vfs`], with any component swapped out.
pub struct VfsBuilder {
    config: VfsConfig,
    temp: Option<Arc<dyn TempStore>>,
    cache: Option<Arc<dyn ContextCache>>,
    reader: Option<Arc<dyn ArchiveReader>>,
}

impl VfsBuilder {
    pub fn new(config: VfsConfig) -> Self {
        Self {
            config,
            temp: None,
            cache: None,
            reader: None,
        }
    }

    pub fn temp_store(mut self, temp: Arc<dyn TempStore>) -> Self {
        self.temp = Some(temp);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn ContextCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn reader(mut self, reader: Arc<dyn ArchiveReader>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn build(self) -> Result<Vfs> {
        self.config.validate()?;
        let interval = self.config.scan_interval_duration();
        let vfs = self.assemble();
        if let Some(interval) = interval {
            vfs.inner.scanner.enable(interval)?;
        }
        Ok(vfs)
    }

    fn assemble(self) -> Vfs {
        let config = self.config;
        let temp = self.temp.unwrap_or_else(|| default_temp_store(&config));
        let cache = self.cache.unwrap_or_else(|| default_cache(&config));
        let reader = self.reader.unwrap_or_else(|| default_reader(&config));

        let inner = Arc::new_cyclic(|weak: &Weak<VfsInner>| {
            let weak = weak.clone();
            VfsInner {
                root: Arc::new(DirectoryContext::new(&config.root)),
                mounts: MountRegistry::new(
                    Arc::clone(&temp),
                    Arc::clone(&reader),
                    config.index_options(),
                ),
                memory: DashMap::new(),
                scanner: PeriodicScanner::new(move || match weak.upgrade() {
                    Some(inner) => Vfs { inner }.scan(),
                    None => Ok(0),
                }),
                config,
                temp,
                cache,
                reader,
            }
        });
        tracing::debug!(root = %inner.config.root.display(), "vfs ready");
        Vfs { inner }
    }
}

fn default_temp_store(config: &VfsConfig) -> Arc<dyn TempStore> {
    let store = FsTempStore::new(config.effective_temp_root());
    if config.delete_on_exit {
        Arc::new(DeleteOnExit::new(store))
    } else {
        Arc::new(store)
    }
}

fn default_cache(config: &VfsConfig) -> Arc<dyn ContextCache> {
    if config.context_cache {
        Arc::new(MapContextCache::new())
    } else {
        Arc::new(NoopContextCache)
    }
}

fn default_reader(config: &VfsConfig) -> Arc<dyn ArchiveReader> {
    if config.signed_archives {
        Arc::new(SignedZipReader)
    } else {
        Arc::new(ZipReader)
    }
}

impl Vfs {
    pub fn new(config: VfsConfig) -> Result<Self> {
        VfsBuilder::new(config).build()
    }

    pub fn builder(config: VfsConfig) -> VfsBuilder {
        VfsBuilder::new(config)
    }

    /// The process-wide instance, built on first use from the default
    /// configuration and the environment.
    ///
    /// Statics are never dropped, so temp storage of the global instance
    /// is only removed by [`shutdown`](Self::shutdown).
    pub fn global() -> &'static Vfs {
        &GLOBAL
    }

    pub fn config(&self) -> &VfsConfig {
        &self.inner.config
    }

    pub fn mounts(&self) -> &MountRegistry {
        &self.inner.mounts
    }

    pub fn cache(&self) -> &Arc<dyn ContextCache> {
        &self.inner.cache
    }

    pub fn temp_store(&self) -> &Arc<dyn TempStore> {
        &self.inner.temp
    }

    pub fn reader(&self) -> &Arc<dyn ArchiveReader> {
        &self.inner.reader
    }

    pub fn scanner(&self) -> &PeriodicScanner {
        &self.inner.scanner
    }

    pub fn default_mount_options(&self) -> MountOptions {
        MountOptions::new(self.inner.config.mount_mode)
    }

    /// The `/` of the namespace.
    pub fn root(&self) -> VirtualFile {
        let root: Arc<dyn VfsContext> = self.inner.root.clone();
        VirtualFile::new(
            self.clone(),
            FileId::fs(VirtualPath::root()),
            root,
            VirtualPath::root(),
        )
    }

    /// Look up `path` from the root, entering archives on the way.
    pub fn get_child(&self, path: &str) -> Result<Option<VirtualFile>> {
        self.root().get_child(path.trim_start_matches('/'))
    }

    /// Resolve a `vfs:`, `vfszip:` or `vfsmemory:` URI.
    ///
    /// A cached context whose backing file changed is dropped and rebuilt
    /// before the lookup.
    pub fn get_file(&self, uri: &str) -> Result<Option<VirtualFile>> {
        match VfsUri::parse(uri)? {
            VfsUri::File(path) => self.root().walk(&path),
            VfsUri::Zip(path) => self.zip_file(&path),
            VfsUri::Memory { host, path } => match self.memory_root(&host) {
                Some(root) => root.walk(&path),
                None => Ok(None),
            },
        }
    }

    /// A stream over the file `uri` names.
    ///
    /// A URI that resolves to nothing, in any scheme, is
    /// [`Error::ResourceNotFound`].
    pub fn open_uri(&self, uri: &str) -> Result<Box<dyn Read + Send>> {
        let file = match self.get_file(uri) {
            Ok(Some(file)) => file,
            Ok(None) => return Err(Error::resource_not_found(uri)),
            Err(e) if unresolvable(&e) => {
                tracing::debug!(%uri, error = %e, "uri did not resolve");
                return Err(Error::resource_not_found(uri));
            }
            Err(e) => return Err(e),
        };
        match file.open_stream() {
            Err(e) if e.is_not_found() => Err(Error::resource_not_found(uri)),
            outcome => outcome,
        }
    }

    pub(crate) fn file_for_id(&self, id: &FileId) -> Result<Option<VirtualFile>> {
        match id.scope() {
            Scope::Fs => self.root().walk(id.path()),
            Scope::Memory(host) => match self.memory_root(host) {
                Some(root) => root.walk(id.path()),
                None => Ok(None),
            },
        }
    }

    /// The archive is the shortest prefix of `path` that is a host file;
    /// the rest is looked up inside it.
    fn zip_file(&self, path: &VirtualPath) -> Result<Option<VirtualFile>> {
        let Some(split) = (1..=path.len()).find(|&n| {
            let (archive, _) = path.split_at(n);
            self.inner.root.resolve(&archive).is_file()
        }) else {
            return Ok(None);
        };
        let (archive, inner) = path.split_at(split);
        let id = FileId::fs(archive);
        let uri = format!("{ZIP_SCHEME}:{id}");

        let context = self.inner.mounts.with_lock(&id, || -> Result<Arc<dyn VfsContext>> {
            if let Some(context) = self.inner.cache.find_fresh(&uri) {
                return Ok(context);
            }
            let context = ArchiveContext::open(
                self.inner.root.resolve(id.path()),
                uri.as_str(),
                Arc::clone(&self.inner.reader),
                self.inner.config.index_options(),
            )?;
            let context: Arc<dyn VfsContext> = Arc::new(context);
            self.inner.cache.put(Arc::clone(&context));
            Ok(context)
        })?;

        VirtualFile::new(self.clone(), id, context, VirtualPath::root()).walk(&inner)
    }

    fn memory_root(&self, host: &str) -> Option<VirtualFile> {
        let uri = format!("{MEMORY_SCHEME}://{host}");
        let context = match self.inner.cache.find_fresh(&uri) {
            Some(context) if context.root_uri() == uri => context,
            _ => {
                let context: Arc<dyn VfsContext> = self.inner.memory.get(host)?.clone();
                self.inner.cache.put(Arc::clone(&context));
                context
            }
        };
        Some(VirtualFile::new(
            self.clone(),
            FileId::new(Scope::Memory(host.into()), VirtualPath::root()),
            context,
            VirtualPath::root(),
        ))
    }

    /// The memory tree registered as `host`, created if absent.
    pub fn create_memory(&self, host: &str) -> Result<Arc<MemoryContext>> {
        if host.is_empty() || host.contains('/') {
            return Err(Error::MalformedPath(format!("{MEMORY_SCHEME}://{host}")));
        }
        let context = self
            .inner
            .memory
            .entry(Arc::from(host))
            .or_insert_with(|| {
                tracing::debug!(%host, "created memory context");
                Arc::new(MemoryContext::new(host))
            })
            .clone();
        let cached: Arc<dyn VfsContext> = context.clone();
        self.inner.cache.put(cached);
        Ok(context)
    }

    pub fn memory(&self, host: &str) -> Option<Arc<MemoryContext>> {
        self.inner.memory.get(host).map(|c| c.clone())
    }

    /// Unregister a memory tree. Handles already obtained keep working.
    pub fn remove_memory(&self, host: &str) -> bool {
        let Some((_, context)) = self.inner.memory.remove(host) else {
            return false;
        };
        let cached: Arc<dyn VfsContext> = context;
        self.inner.cache.remove(&cached);
        true
    }

    /// Mount `file` for `owner` with the configured mode.
    pub fn mount(&self, owner: impl Into<Owner>, file: &VirtualFile) -> Result<MountInfo> {
        self.inner
            .mounts
            .mount(owner, file, self.default_mount_options())
    }

    pub fn mount_with(
        &self,
        owner: impl Into<Owner>,
        file: &VirtualFile,
        options: MountOptions,
    ) -> Result<MountInfo> {
        self.inner.mounts.mount(owner, file, options)
    }

    pub fn cleanup(&self, owner: impl Into<Owner>) -> Result<Vec<FileId>> {
        self.inner.mounts.cleanup(owner)
    }

    pub fn is_mounted(&self, file: &VirtualFile) -> bool {
        self.inner.mounts.is_mounted(file)
    }

    /// Drop every cached context whose backing resource changed and
    /// rebuild every mount whose host file changed. Each check holds the
    /// per-identity lock mounts of that file use. Returns how many contexts
    /// were evicted plus how many mounts were rebuilt.
    pub fn scan(&self) -> Result<usize> {
        let remounted = self.refresh_mounts();
        let mut evicted = 0;
        for context in self.inner.cache.contexts() {
            let root = context.root_uri();
            let Some(id) = context_identity(root) else {
                continue;
            };
            let fresh = self
                .inner
                .mounts
                .with_lock(&id, || self.inner.cache.find_fresh(root));
            if !fresh.is_some_and(|current| Arc::ptr_eq(&current, &context)) {
                evicted += 1;
            }
        }
        if evicted + remounted > 0 {
            tracing::debug!(evicted, remounted, "scan found stale resources");
        }
        Ok(evicted + remounted)
    }

    /// Rebuild stale mounts, parents first. A mount whose file can no
    /// longer be reached is left to its owners.
    fn refresh_mounts(&self) -> usize {
        let mut remounted = 0;
        for id in self.inner.mounts.stale() {
            let outcome = self
                .file_for_id(&id)
                .and_then(|file| match file {
                    Some(file) => self.inner.mounts.refresh(&file),
                    None => Ok(None),
                });
            match outcome {
                Ok(Some(info)) if info.created => remounted += 1,
                Ok(_) => tracing::trace!(file = %id, "stale mount not rebuilt"),
                Err(e) => tracing::warn!(file = %id, error = %e, "failed to rebuild mount"),
            }
        }
        remounted
    }

    /// Stop scanning, unmount everything, and remove all temp storage.
    ///
    /// Keeps going past failures; the first is returned.
    pub fn shutdown(&self) -> Result<()> {
        self.inner.scanner.disable();
        let mut first_error = self.inner.mounts.cleanup_all().err();
        self.inner.cache.flush();
        if let Err(e) = self.inner.temp.clear() {
            tracing::warn!(error = %e, "failed to clear temp storage");
            first_error.get_or_insert(e.into());
        }
        tracing::debug!("vfs shut down");
        first_error.map_or(Ok(()), Err)
    }
}

/// The file identity a cached context root stands for.
fn context_identity(root: &str) -> Option<FileId> {
    match VfsUri::parse(root).ok()? {
        VfsUri::File(path) | VfsUri::Zip(path) => Some(FileId::fs(path)),
        VfsUri::Memory { host, path } => Some(FileId::new(Scope::Memory(host.into()), path)),
    }
}

fn unresolvable(e: &Error) -> bool {
    e.is_not_found()
        || matches!(
            e,
            Error::UnknownScheme(_)
                | Error::MalformedPath(_)
                | Error::PathEscapesRoot(_)
                | Error::NotADirectory(_)
        )
}

impl fmt::Debug for Vfs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vfs")
            .field("root", &self.inner.config.root)
            .field("mounts", &self.inner.mounts)
            .field("cache", &self.inner.cache)
            .field("memory", &self.inner.memory.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn vfs_at(root: &std::path::Path) -> Vfs {
        Vfs::new(
            VfsConfig::default()
                .root(root)
                .temp_root(root.join(".tmp")),
        )
        .unwrap()
    }

    #[test]
    fn walks_host_tree() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a/b")).unwrap();
        std::fs::write(dir.path().join("a/b/c.txt"), b"hello").unwrap();
        let vfs = vfs_at(dir.path());

        let file = vfs.get_child("/a/b/c.txt").unwrap().unwrap();
        assert_eq!(file.name(), "c.txt");
        assert_eq!(file.read_to_vec().unwrap(), b"hello");
        assert_eq!(file.uri(), "vfs:/a/b/c.txt");
        assert!(vfs.get_child("a/missing").unwrap().is_none());

        let parent = file.parent().unwrap().unwrap();
        assert_eq!(parent.path_name(), "/a/b");
    }

    #[test]
    fn memory_hosts_resolve_by_uri() {
        let dir = tempdir().unwrap();
        let vfs = vfs_at(dir.path());
        let memory = vfs.create_memory("scratch").unwrap();
        memory
            .put_file(&VirtualPath::parse("x/y.txt").unwrap(), b"mem".to_vec())
            .unwrap();

        let mut data = String::new();
        vfs.open_uri("vfsmemory://scratch/x/y.txt")
            .unwrap()
            .read_to_string(&mut data)
            .unwrap();
        assert_eq!(data, "mem");

        assert!(vfs.remove_memory("scratch"));
        assert!(matches!(
            vfs.open_uri("vfsmemory://scratch/x/y.txt"),
            Err(Error::ResourceNotFound { .. })
        ));
        assert!(vfs.create_memory("bad/host").is_err());
    }

    #[test]
    fn unknown_scheme_is_resource_not_found() {
        let dir = tempdir().unwrap();
        let vfs = vfs_at(dir.path());
        assert!(matches!(
            vfs.open_uri("ftp://example/x"),
            Err(Error::ResourceNotFound { .. })
        ));
        assert!(matches!(
            vfs.open_uri("vfs:/nothing/here"),
            Err(Error::ResourceNotFound { .. })
        ));
    }

    #[test]
    fn relative_root_is_rejected() {
        assert!(matches!(
            Vfs::new(VfsConfig::default().root("relative")),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn context_identity_from_root_uri() {
        assert_eq!(
            context_identity("vfszip:/srv/app.jar"),
            Some(FileId::fs(VirtualPath::parse("srv/app.jar").unwrap()))
        );
        assert!(context_identity("file:///srv").is_none());
    }
}
