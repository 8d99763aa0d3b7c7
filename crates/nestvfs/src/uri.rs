//! VFS URI schemes.
//!
//! - `vfs:/abs/path` - a file in the host-backed namespace, mounts included
//! - `vfszip:/abs/archive.jar/inner/path` - an entry inside an indexed archive
//! - `vfsmemory://host/path` - a node in a registered memory tree

use std::fmt;

use nestvfs_fs::VirtualPath;

use crate::error::{Error, Result};

pub const FILE_SCHEME: &str = "vfs";
pub const ZIP_SCHEME: &str = "vfszip";
pub const MEMORY_SCHEME: &str = "vfsmemory";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VfsUri {
    File(VirtualPath),
    /// Archive location and inner path together; where one ends and the
    /// other begins is only known once the host filesystem is consulted.
    Zip(VirtualPath),
    Memory { host: String, path: VirtualPath },
}

impl VfsUri {
    pub fn parse(uri: &str) -> Result<Self> {
        let Some((scheme, rest)) = uri.split_once(':') else {
            return Err(Error::UnknownScheme(uri.to_string()));
        };
        match scheme {
            FILE_SCHEME => Ok(Self::File(absolute(uri, rest)?)),
            ZIP_SCHEME => Ok(Self::Zip(absolute(uri, rest)?)),
            MEMORY_SCHEME => {
                let authority = rest
                    .strip_prefix("//")
                    .ok_or_else(|| Error::MalformedPath(uri.to_string()))?;
                let (host, path) = authority.split_once('/').unwrap_or((authority, ""));
                if host.is_empty() {
                    return Err(Error::MalformedPath(uri.to_string()));
                }
                Ok(Self::Memory {
                    host: host.to_string(),
                    path: VirtualPath::parse(path)?,
                })
            }
            _ => Err(Error::UnknownScheme(uri.to_string())),
        }
    }

    pub fn path(&self) -> &VirtualPath {
        match self {
            Self::File(path) | Self::Zip(path) | Self::Memory { path, .. } => path,
        }
    }
}

/// `/a/b` and `///a/b` are the same path; a relative one is refused.
fn absolute(uri: &str, rest: &str) -> Result<VirtualPath> {
    if !rest.starts_with('/') {
        return Err(Error::MalformedPath(uri.to_string()));
    }
    Ok(VirtualPath::parse(rest.trim_start_matches('/'))?)
}

impl fmt::Display for VfsUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File(path) => write!(f, "{FILE_SCHEME}:/{path}"),
            Self::Zip(path) => write!(f, "{ZIP_SCHEME}:/{path}"),
            Self::Memory { host, path } => write!(f, "{MEMORY_SCHEME}://{host}/{path}"),
        }
    }
}
