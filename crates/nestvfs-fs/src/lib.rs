//! Filesystem building blocks for nestvfs.
//!
//! - `path` - tokenizing and `.`/`..` normalization ([`VirtualPath`])
//! - `signature` - modification snapshots for staleness checks
//! - `temp` - scoped temp directories with idempotent cleanup
//! - `primitives` - copy and stream-to-disk helpers

mod error;
pub mod path;
pub mod primitives;
mod signature;
pub mod temp;

pub use error::{Error, Result};
pub use path::{VirtualPath, join_remaining, normalize, tokenize};
pub use primitives::{copy_path, write_stream};
pub use signature::Signature;
pub use temp::{DeleteOnExit, FsTempStore, TempDir, TempStore};
