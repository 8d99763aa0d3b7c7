use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// Archive extensions treated as mountable by default.
pub const DEFAULT_ARCHIVE_EXTENSIONS: &[&str] = &["jar", "war", "ear", "sar", "rar", "zip"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArchiveFormat {
    /// Local file header first (the usual case).
    Zip,
    /// Only an end-of-central-directory record: an archive with no entries.
    EmptyZip,
}

pub fn detect_format(data: &[u8]) -> Option<ArchiveFormat> {
    match data {
        [0x50, 0x4B, 0x03, 0x04, ..] => Some(ArchiveFormat::Zip),
        // spanned-archive marker precedes the first local header
        [0x50, 0x4B, 0x07, 0x08, ..] => Some(ArchiveFormat::Zip),
        [0x50, 0x4B, 0x05, 0x06, ..] => Some(ArchiveFormat::EmptyZip),
        _ => None,
    }
}

pub fn detect_from_path(path: &Path) -> io::Result<Option<ArchiveFormat>> {
    let mut header = [0u8; 4];
    let mut file = File::open(path)?;
    let mut filled = 0;
    while filled < header.len() {
        let n = file.read(&mut header[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(detect_format(&header[..filled]))
}

/// Whether `name` ends in one of `extensions` (case-insensitive).
pub fn has_archive_extension<S: AsRef<str>>(name: &str, extensions: &[S]) -> bool {
    let Some((stem, ext)) = name.rsplit_once('.') else {
        return false;
    };
    !stem.is_empty()
        && extensions
            .iter()
            .any(|candidate| candidate.as_ref().eq_ignore_ascii_case(ext))
}
