use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed path: {0}")]
    MalformedPath(String),

    #[error("path escapes root: {0}")]
    PathEscapesRoot(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A URI that names nothing this VFS can serve.
    #[error("resource not found in this VFS: {uri}")]
    ResourceNotFound { uri: String },

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    #[error("unknown URI scheme in '{0}'")]
    UnknownScheme(String),

    /// An archive entry that could not be indexed and that the configured
    /// [`EntryFailurePolicy`](nestvfs_archive::EntryFailurePolicy) does not skip.
    #[error("archive entry #{index} ({}) failed to initialize: {reason}", name.as_deref().unwrap_or("<unnamed>"))]
    EntryInit {
        index: usize,
        name: Option<String>,
        reason: String,
    },

    #[error("failed to mount '{file}': {source}")]
    Mount {
        file: String,
        #[source]
        source: Box<Error>,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to read config '{path}': {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error(transparent)]
    Archive(nestvfs_archive::Error),

    #[error(transparent)]
    Fs(nestvfs_fs::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound(path.into())
    }

    pub fn resource_not_found(uri: impl Into<String>) -> Self {
        Self::ResourceNotFound { uri: uri.into() }
    }

    pub fn not_a_directory(path: impl Into<String>) -> Self {
        Self::NotADirectory(path.into())
    }

    pub fn is_a_directory(path: impl Into<String>) -> Self {
        Self::IsADirectory(path.into())
    }

    pub(crate) fn mount(file: impl Into<String>, source: Error) -> Self {
        Self::Mount {
            file: file.into(),
            source: Box::new(source),
        }
    }

    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound(_) | Self::ResourceNotFound { .. } => true,
            Self::Mount { source, .. } => source.is_not_found(),
            Self::Fs(e) => e.is_not_found(),
            Self::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<nestvfs_fs::Error> for Error {
    fn from(e: nestvfs_fs::Error) -> Self {
        match e {
            nestvfs_fs::Error::MalformedPath { path } => Self::MalformedPath(path),
            nestvfs_fs::Error::EscapesRoot { path } => Self::PathEscapesRoot(path),
            other => Self::Fs(other),
        }
    }
}

impl From<nestvfs_archive::Error> for Error {
    fn from(e: nestvfs_archive::Error) -> Self {
        match e {
            nestvfs_archive::Error::Fs(inner) => inner.into(),
            nestvfs_archive::Error::IsDirectory(path) => Self::IsADirectory(path),
            nestvfs_archive::Error::EntryInit {
                index,
                name,
                reason,
            } => Self::EntryInit {
                index,
                name,
                reason,
            },
            other => Self::Archive(other),
        }
    }
}

/// Convert to `std::io::Error` for `Read`-based callers.
impl From<Error> for io::Error {
    fn from(e: Error) -> Self {
        match e {
            Error::Io(e) => e,
            e if e.is_not_found() => io::Error::new(io::ErrorKind::NotFound, e),
            e @ Error::IsADirectory(_) => io::Error::new(io::ErrorKind::IsADirectory, e),
            e @ Error::NotADirectory(_) => io::Error::new(io::ErrorKind::NotADirectory, e),
            e @ (Error::MalformedPath(_) | Error::PathEscapesRoot(_) | Error::UnknownScheme(_)) => {
                io::Error::new(io::ErrorKind::InvalidInput, e)
            }
            e => io::Error::other(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
