use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed path '{path}': empty segment")]
    MalformedPath { path: String },

    #[error("path escapes root: '{path}'")]
    EscapesRoot { path: String },

    #[error("failed to read '{path}': {source}")]
    Read { path: PathBuf, source: io::Error },

    #[error("failed to write '{path}': {source}")]
    Write { path: PathBuf, source: io::Error },

    #[error("failed to remove '{path}': {source}")]
    Remove { path: PathBuf, source: io::Error },

    #[error("temp name allocation under '{root}' failed: {source}")]
    Allocate { root: PathBuf, source: io::Error },

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Read { source, .. } | Self::Io(source) => source.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
