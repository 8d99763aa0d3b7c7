use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unsupported archive format: '{path}'")]
    UnsupportedFormat { path: PathBuf },

    #[error("archive '{path}' is corrupted: {reason}")]
    Corrupted { path: PathBuf, reason: String },

    #[error("entry #{index} ({}) failed to initialize: {reason}", name.as_deref().unwrap_or("<unnamed>"))]
    EntryInit {
        index: usize,
        name: Option<String>,
        reason: String,
    },

    #[error("'{0}' is a directory")]
    IsDirectory(String),

    #[error("entry '{entry}' would extract outside the destination: '{resolved}'")]
    ZipSlip { entry: String, resolved: PathBuf },

    #[error("failed to extract '{path}': {source}")]
    ExtractionFailed { path: PathBuf, source: io::Error },

    #[error(transparent)]
    Fs(#[from] nestvfs_fs::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub(crate) fn corrupted(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Corrupted {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
