//! Per-entry metadata cells.

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use once_cell::sync::OnceCell;

use crate::reader::{ArchiveHandle, CertificateLookup, CertificateSet, RawEntry};
use crate::Result;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Certificates {
    Present(Arc<CertificateSet>),
    /// Resolved, and the entry carries none (or the backend can't tell).
    Absent,
}

impl Certificates {
    pub fn as_set(&self) -> Option<&Arc<CertificateSet>> {
        match self {
            Self::Present(set) => Some(set),
            Self::Absent => None,
        }
    }
}

/// Observable state of an entry's certificate cell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CertificateState {
    Unresolved,
    Present(Arc<CertificateSet>),
    Absent,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryMetadata {
    pub size: u64,
    pub modified: Option<SystemTime>,
    pub certificates: Certificates,
}

/// The mutable cell behind an archive node.
///
/// Metadata is resolved on first access and memoized. Concurrent first
/// readers block on the one in-flight resolution and all observe its
/// result; a failed resolution leaves the cell empty so a later call can
/// retry.
pub struct EntryInfo {
    raw: RawEntry,
    metadata: OnceCell<EntryMetadata>,
}

impl EntryInfo {
    pub fn new(raw: RawEntry) -> Self {
        Self {
            raw,
            metadata: OnceCell::new(),
        }
    }

    pub fn raw(&self) -> &RawEntry {
        &self.raw
    }

    pub fn name(&self) -> &str {
        &self.raw.name
    }

    pub fn is_dir(&self) -> bool {
        self.raw.is_dir
    }

    pub fn metadata(&self, handle: &dyn ArchiveHandle) -> Result<&EntryMetadata> {
        self.metadata.get_or_try_init(|| {
            let certificates = match handle.certificates(&self.raw)? {
                CertificateLookup::Signed(set) if !set.is_empty() => {
                    Certificates::Present(Arc::new(set))
                }
                CertificateLookup::Signed(_)
                | CertificateLookup::Unsigned
                | CertificateLookup::Unsupported => Certificates::Absent,
            };
            tracing::trace!(entry = %self.raw.name, "resolved entry metadata");
            Ok(EntryMetadata {
                size: self.raw.size,
                modified: self.raw.modified,
                certificates,
            })
        })
    }

    pub fn certificates(&self, handle: &dyn ArchiveHandle) -> Result<Option<Arc<CertificateSet>>> {
        Ok(self.metadata(handle)?.certificates.as_set().cloned())
    }

    pub fn certificate_state(&self) -> CertificateState {
        match self.metadata.get().map(|m| &m.certificates) {
            None => CertificateState::Unresolved,
            Some(Certificates::Present(set)) => CertificateState::Present(Arc::clone(set)),
            Some(Certificates::Absent) => CertificateState::Absent,
        }
    }
}

impl fmt::Debug for EntryInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntryInfo")
            .field("name", &self.raw.name)
            .field("resolved", &self.metadata.get().is_some())
            .finish()
    }
}
