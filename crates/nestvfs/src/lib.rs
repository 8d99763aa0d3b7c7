//! A virtual filesystem over host directories, nested zip/jar archives and
//! in-memory trees.
//!
//! # Architecture
//!
//! - `vfs.rs` - The [`Vfs`] entry point: namespace walks and URI resolution
//! - `file.rs` - [`VirtualFile`], the handle callers hold; automounts
//!   archives on navigation
//! - `context/` - Directory-, archive- and memory-backed trees
//! - `mount.rs` - The automounter: shared-ownership mounts over temp storage
//! - `cache.rs` - Root URI to context memoization with staleness eviction
//! - `owner.rs` - File identities and mount owners
//! - `scan.rs` - Periodic background re-checks
//! - `uri.rs` - The `vfs:`, `vfszip:` and `vfsmemory:` schemes
//! - `config.rs` - TOML-loadable configuration
//!
//! ```no_run
//! use nestvfs::{OwnerToken, Vfs, VfsConfig};
//!
//! let vfs = Vfs::new(VfsConfig::default().root("/srv/deployments"))?;
//! let ear = vfs.get_child("app.ear")?.expect("deployed");
//! let deployment = OwnerToken::new("app");
//! vfs.mount(deployment.clone(), &ear)?;
//!
//! // nested archives mount themselves on first entry
//! let manifest = ear.get_child("lib/util.jar/META-INF/MANIFEST.MF")?;
//! # let _ = manifest;
//! vfs.cleanup(deployment)?;
//! # Ok::<(), nestvfs::Error>(())
//! ```

mod cache;
mod config;
pub mod context;
mod error;
mod file;
mod mount;
mod owner;
mod scan;
mod uri;
mod vfs;

pub use cache::{ContextCache, MapContextCache, NoopContextCache};
pub use config::{MountMode, TEMP_DIR_ENV, VfsConfig};
pub use context::{FileAttr, FileType, VfsContext};
pub use error::{Error, Result};
pub use file::VirtualFile;
pub use mount::{MountInfo, MountOptions, MountRegistry};
pub use owner::{FileId, Owner, OwnerToken, Scope};
pub use scan::PeriodicScanner;
pub use uri::{FILE_SCHEME, MEMORY_SCHEME, VfsUri, ZIP_SCHEME};
pub use vfs::{Vfs, VfsBuilder};

pub use nestvfs_archive::{CertificateSet, EntryFailurePolicy, Signer};
pub use nestvfs_fs::{Signature, TempStore, VirtualPath};
