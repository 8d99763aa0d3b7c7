//! The read-only file handle applications hold.

use std::fmt;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use nestvfs_archive::{CertificateSet, has_archive_extension};
use nestvfs_fs::VirtualPath;

use crate::context::{FileAttr, VfsContext};
use crate::error::{Error, Result};
use crate::owner::{FileId, Owner, Scope};
use crate::uri::{FILE_SCHEME, MEMORY_SCHEME};
use crate::vfs::Vfs;

/// A node of the virtual tree: a directory, a plain file, an archive (which
/// can be entered like a directory) or an entry inside one.
///
/// Cheap to clone. Holds its context alive, but not its mount: a handle to
/// an entry of an unmounted archive reports the entry as gone.
#[derive(Clone)]
pub struct VirtualFile {
    vfs: Vfs,
    id: FileId,
    context: Arc<dyn VfsContext>,
    local: VirtualPath,
}

impl VirtualFile {
    pub(crate) fn new(
        vfs: Vfs,
        id: FileId,
        context: Arc<dyn VfsContext>,
        local: VirtualPath,
    ) -> Self {
        Self {
            vfs,
            id,
            context,
            local,
        }
    }

    pub fn id(&self) -> &FileId {
        &self.id
    }

    pub fn name(&self) -> &str {
        self.id.path().name()
    }

    /// The file's path within its namespace, e.g. `/srv/app.ear/lib/util.jar`.
    pub fn path_name(&self) -> String {
        format!("/{}", self.id.path())
    }

    pub fn uri(&self) -> String {
        match self.id.scope() {
            Scope::Fs => format!("{FILE_SCHEME}:/{}", self.id.path()),
            Scope::Memory(host) => format!("{MEMORY_SCHEME}://{host}/{}", self.id.path()),
        }
    }

    pub fn vfs(&self) -> &Vfs {
        &self.vfs
    }

    /// The context this file is a node of.
    pub fn context(&self) -> &Arc<dyn VfsContext> {
        &self.context
    }

    /// The file's path inside [`context`](Self::context).
    pub fn local_path(&self) -> &VirtualPath {
        &self.local
    }

    pub fn attr(&self) -> Result<Option<FileAttr>> {
        self.context.attr(&self.local)
    }

    pub fn exists(&self) -> Result<bool> {
        Ok(self.is_mounted() || self.attr()?.is_some())
    }

    pub fn is_mounted(&self) -> bool {
        self.vfs.mounts().is_mounted_id(&self.id)
    }

    /// Directories, and mounted files that can be entered.
    pub fn is_directory(&self) -> Result<bool> {
        if self.vfs.mounts().context(&self.id).is_some() {
            return Ok(true);
        }
        Ok(self.attr()?.is_some_and(|attr| attr.is_dir()))
    }

    /// A plain file whose name marks it as an archive.
    pub fn is_archive(&self) -> Result<bool> {
        if !has_archive_extension(self.name(), &self.vfs.config().archive_extensions) {
            return Ok(false);
        }
        Ok(self.attr()?.is_some_and(|attr| !attr.is_dir()))
    }

    pub fn size(&self) -> Result<u64> {
        Ok(self.attr()?.map_or(0, |attr| attr.size))
    }

    pub fn last_modified(&self) -> Result<Option<SystemTime>> {
        Ok(self.attr()?.and_then(|attr| attr.modified))
    }

    pub fn open_stream(&self) -> Result<Box<dyn Read + Send>> {
        self.context.open_stream(&self.local)
    }

    pub fn read_to_vec(&self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        self.open_stream()?.read_to_end(&mut data)?;
        Ok(data)
    }

    pub fn certificates(&self) -> Result<Option<Arc<CertificateSet>>> {
        self.context.certificates(&self.local)
    }

    /// Where the file lives on the host filesystem.
    ///
    /// For a mounted file this is where the mount put it: the extraction
    /// directory or the copy. Entries of an archive that is only indexed
    /// have no physical location.
    pub fn physical_file(&self) -> Option<PathBuf> {
        self.vfs
            .mounts()
            .physical(&self.id)
            .or_else(|| self.context.physical_file(&self.local))
    }

    pub fn parent(&self) -> Result<Option<VirtualFile>> {
        let Some(parent) = self.id.path().parent() else {
            return Ok(None);
        };
        match self.local.parent() {
            Some(local) => Ok(Some(Self::new(
                self.vfs.clone(),
                self.id.with_path(parent),
                Arc::clone(&self.context),
                local,
            ))),
            // at the root of a nested context; the parent is in the enclosing tree
            None => self.vfs.file_for_id(&self.id.with_path(parent)),
        }
    }

    /// Mount this file on behalf of `owner` with the configured mode.
    pub fn mount(&self, owner: impl Into<Owner>) -> Result<()> {
        self.vfs
            .mounts()
            .mount(owner, self, self.vfs.default_mount_options())?;
        Ok(())
    }

    /// The context and path to look children up in, automounting an archive
    /// on first entry. The automount is owned by the archive itself. A mount
    /// whose host file changed is rebuilt before it is entered.
    fn enter(&self) -> Result<(Arc<dyn VfsContext>, VirtualPath)> {
        if let Some(context) = self.vfs.mounts().current_context(self)? {
            return Ok((context, VirtualPath::root()));
        }

        let attr = self
            .attr()?
            .ok_or_else(|| Error::not_found(self.id.to_string()))?;
        if attr.is_dir() {
            return Ok((Arc::clone(&self.context), self.local.clone()));
        }

        if self.is_archive()? {
            let info = self.vfs.mounts().mount(
                Owner::SelfOwned(self.id.clone()),
                self,
                self.vfs.default_mount_options(),
            )?;
            if let Some(context) = info.context {
                tracing::trace!(file = %self.id, "automounted");
                return Ok((context, VirtualPath::root()));
            }
        }
        Err(Error::not_a_directory(self.id.to_string()))
    }

    /// The direct child `name`, or `None` if there is none.
    pub fn child(&self, name: &str) -> Result<Option<VirtualFile>> {
        let (context, base) = self.enter()?;
        let local = base.child(name)?;
        if context.attr(&local)?.is_none() {
            return Ok(None);
        }
        Ok(Some(Self::new(
            self.vfs.clone(),
            self.id.with_path(self.id.path().child(name)?),
            context,
            local,
        )))
    }

    /// Walk `relative` (`/`-separated, `.`/`..` allowed as long as they stay
    /// below this file), crossing into archives on the way.
    pub fn get_child(&self, relative: &str) -> Result<Option<VirtualFile>> {
        self.walk(&VirtualPath::parse(relative)?)
    }

    pub(crate) fn walk(&self, relative: &VirtualPath) -> Result<Option<VirtualFile>> {
        let mut current = self.clone();
        for segment in relative.segments() {
            match current.child(segment)? {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Direct children in name order.
    pub fn children(&self) -> Result<Vec<VirtualFile>> {
        let (context, base) = self.enter()?;
        let names = context.children(&base)?;
        names
            .into_iter()
            .map(|name| {
                Ok(Self::new(
                    self.vfs.clone(),
                    self.id.with_path(self.id.path().child(&name)?),
                    Arc::clone(&context),
                    base.child(&name)?,
                ))
            })
            .collect()
    }

    /// Depth-first walk below this file.
    ///
    /// `visitor` sees every descendant, parents before children.
    /// Directories are always descended into; archives only when `enter`
    /// accepts them, which automounts them.
    pub fn visit(
        &self,
        enter: &dyn Fn(&VirtualFile) -> bool,
        visitor: &mut dyn FnMut(&VirtualFile) -> Result<()>,
    ) -> Result<()> {
        for child in self.children()? {
            visitor(&child)?;
            if child.is_directory()? || (child.is_archive()? && enter(&child)) {
                child.visit(enter, visitor)?;
            }
        }
        Ok(())
    }

    /// Every descendant accepted by `filter`. Archives are only searched
    /// if something already mounted them.
    pub fn descendants(&self, filter: impl Fn(&VirtualFile) -> bool) -> Result<Vec<VirtualFile>> {
        let mut found = Vec::new();
        self.visit(&|_| false, &mut |file| {
            if filter(file) {
                found.push(file.clone());
            }
            Ok(())
        })?;
        Ok(found)
    }
}

impl PartialEq for VirtualFile {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for VirtualFile {}

impl fmt::Debug for VirtualFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualFile")
            .field("id", &self.id.to_string())
            .field("context", &self.context.root_uri())
            .field("local", &self.local.to_string())
            .finish()
    }
}

impl fmt::Display for VirtualFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri())
    }
}
