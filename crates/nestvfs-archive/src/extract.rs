//! Materializing an indexed archive onto disk.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::index::{EntryRef, IndexSnapshot};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtractReport {
    pub file_count: usize,
    pub directory_count: usize,
    pub total_bytes: u64,
}

impl ExtractReport {
    pub fn entry_count(&self) -> usize {
        self.file_count + self.directory_count
    }
}

/// Write every entry of `snapshot` under `destination`, preserving the
/// directory structure. Synthesized parent directories are created too.
pub fn extract_to(snapshot: &Arc<IndexSnapshot>, destination: &Path) -> Result<ExtractReport> {
    fs::create_dir_all(destination).map_err(|e| Error::ExtractionFailed {
        path: destination.to_path_buf(),
        source: e,
    })?;

    let mut report = ExtractReport::default();
    for entry in snapshot.entries() {
        let target = target_path(&entry, destination)?;
        if entry.is_directory() {
            fs::create_dir_all(&target).map_err(|e| Error::ExtractionFailed {
                path: target.clone(),
                source: e,
            })?;
            report.directory_count += 1;
            continue;
        }

        let mut stream = entry.open_stream()?;
        let written = nestvfs_fs::write_stream(&mut stream, &target)?;
        tracing::trace!(entry = %entry.path(), bytes = written, "extracted");
        report.file_count += 1;
        report.total_bytes += written;
    }

    tracing::debug!(
        source = %snapshot.source().display(),
        destination = %destination.display(),
        files = report.file_count,
        bytes = report.total_bytes,
        "extracted archive"
    );
    Ok(report)
}

/// Entry paths are already `.`/`..`-free; this only rejects segments the
/// host filesystem would read as more than one plain component.
fn target_path(entry: &EntryRef, destination: &Path) -> Result<PathBuf> {
    let mut target = destination.to_path_buf();
    for segment in entry.path().segments() {
        let mut components = Path::new(segment).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(part)), None) => target.push(part),
            _ => {
                return Err(Error::ZipSlip {
                    entry: entry.path().to_string(),
                    resolved: target.join(segment),
                });
            }
        }
    }
    Ok(target)
}
