//! Archive reader capability.
//!
//! Tree building only ever talks to these traits, so a different reader
//! (random-access, encrypted entries, ...) can be dropped in without touching
//! the index. Closing a handle is dropping it.

use std::fmt;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

use crate::Result;

mod signed;
mod zip;

pub use self::signed::SignedZipReader;
pub use self::zip::{ZipHandle, ZipReader};

/// One member as enumerated from the archive's central directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u64,
    pub modified: Option<SystemTime>,
    /// Backend-specific locator (the zip central-directory index).
    pub index: usize,
}

/// A signer found in the archive's signature files.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Signer {
    /// Signature file stem, e.g. `CERT` for `META-INF/CERT.SF`.
    pub name: String,
    /// Raw signature block (`.RSA`, `.DSA` or `.EC`) bytes.
    pub block: Arc<[u8]>,
    /// Lowercase hex SHA-256 of `block`.
    pub fingerprint: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CertificateSet {
    signers: Vec<Signer>,
}

impl CertificateSet {
    pub fn new(mut signers: Vec<Signer>) -> Self {
        signers.sort_by(|a, b| a.name.cmp(&b.name));
        Self { signers }
    }

    pub fn signers(&self) -> &[Signer] {
        &self.signers
    }

    pub fn len(&self) -> usize {
        self.signers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signers.is_empty()
    }

    pub fn contains_fingerprint(&self, fingerprint: &str) -> bool {
        self.signers.iter().any(|s| s.fingerprint == fingerprint)
    }
}

/// Outcome of asking a backend for an entry's certificates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CertificateLookup {
    /// The backend has no certificate support.
    Unsupported,
    Unsigned,
    Signed(CertificateSet),
}

/// Opens archives.
pub trait ArchiveReader: Send + Sync + fmt::Debug {
    fn open(&self, source: &Path) -> Result<Box<dyn ArchiveHandle>>;

    fn name(&self) -> &'static str;
}

/// An open archive.
pub trait ArchiveHandle: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enumerate entries lazily in central-directory order.
    ///
    /// A failing entry yields `Err(Error::EntryInit { .. })` and enumeration
    /// continues with the next one; the caller's policy decides what to do.
    fn entries(&self) -> Box<dyn Iterator<Item = Result<RawEntry>> + '_>;

    /// Open an independent stream over one entry's bytes.
    ///
    /// Streams never share a position, so any number may be open at once.
    fn open_stream(&self, entry: &RawEntry) -> Result<Box<dyn Read + Send>>;

    fn certificates(&self, _entry: &RawEntry) -> Result<CertificateLookup> {
        Ok(CertificateLookup::Unsupported)
    }
}
