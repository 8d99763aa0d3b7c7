//! Zip/jar indexing for nestvfs.
//!
//! # Architecture
//!
//! - `format.rs` - Magic-number sniffing and archive-name recognition
//! - `reader/` - Archive reader capability and the zip backends
//! - `entry.rs` - Per-entry metadata cells, resolved once
//! - `index.rs` - Entry trees, snapshots and staleness-driven rebuilds
//! - `extract.rs` - Materializing a snapshot onto disk
//! - `options.rs` - Index options and the entry failure policy

mod entry;
mod error;
mod extract;
mod format;
mod index;
pub mod options;
pub mod reader;

pub use entry::{CertificateState, Certificates, EntryInfo, EntryMetadata};
pub use error::{Error, Result};
pub use extract::{ExtractReport, extract_to};
pub use format::{
    ArchiveFormat, DEFAULT_ARCHIVE_EXTENSIONS, detect_format, detect_from_path,
    has_archive_extension,
};
pub use index::{ArchiveIndex, EntryRef, EntryTree, IndexSnapshot, NodeId};
pub use options::{EntryFailurePolicy, IndexOptions};
pub use reader::{
    ArchiveHandle, ArchiveReader, CertificateLookup, CertificateSet, RawEntry, SignedZipReader,
    Signer, ZipReader,
};
