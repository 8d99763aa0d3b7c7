use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek, SeekFrom, Take};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use flate2::read::DeflateDecoder;
use parking_lot::Mutex;
use zip::{CompressionMethod, ZipArchive};

use super::{ArchiveHandle, ArchiveReader, RawEntry};
use crate::error::Error;
use crate::format::detect_from_path;
use crate::Result;

/// Baseline zip/jar backend without certificate support.
#[derive(Clone, Copy, Debug, Default)]
pub struct ZipReader;

impl ArchiveReader for ZipReader {
    fn open(&self, source: &Path) -> Result<Box<dyn ArchiveHandle>> {
        Ok(Box::new(ZipHandle::open(source)?))
    }

    fn name(&self) -> &'static str {
        "zip"
    }
}

pub struct ZipHandle {
    path: PathBuf,
    archive: Mutex<ZipArchive<BufReader<File>>>,
    len: usize,
}

impl ZipHandle {
    pub fn open(source: &Path) -> Result<Self> {
        let format = detect_from_path(source).map_err(|e| Error::ExtractionFailed {
            path: source.to_path_buf(),
            source: e,
        })?;
        if format.is_none() {
            return Err(Error::UnsupportedFormat {
                path: source.to_path_buf(),
            });
        }

        let file = File::open(source).map_err(|e| Error::ExtractionFailed {
            path: source.to_path_buf(),
            source: e,
        })?;
        let archive =
            ZipArchive::new(BufReader::new(file)).map_err(|e| Error::corrupted(source, e))?;
        let len = archive.len();
        tracing::trace!(path = %source.display(), entries = len, "opened zip");

        Ok(Self {
            path: source.to_path_buf(),
            archive: Mutex::new(archive),
            len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn raw_entry(&self, index: usize) -> Result<RawEntry> {
        let mut archive = self.archive.lock();
        let enumerated = archive.by_index_raw(index).map(|file| RawEntry {
            name: file.name().to_string(),
            is_dir: file.is_dir(),
            size: file.size(),
            modified: file.last_modified().and_then(to_system_time),
            index,
        });

        let reason = match enumerated {
            Ok(entry) if !entry.name.is_empty() => return Ok(entry),
            Ok(_) => "empty entry name".to_string(),
            Err(e) => e.to_string(),
        };
        Err(Error::EntryInit {
            index,
            name: archive.name_for_index(index).map(str::to_owned),
            reason,
        })
    }

    /// Inflate one entry completely into memory.
    ///
    /// Only for small entries (signature files) and for compression
    /// methods [`open_stream`](ArchiveHandle::open_stream) cannot decode
    /// on its own.
    pub(crate) fn read_entry(&self, entry: &RawEntry) -> Result<Vec<u8>> {
        let mut archive = self.archive.lock();
        let mut file = archive
            .by_index(entry.index)
            .map_err(|e| Error::corrupted(&self.path, format!("{}: {e}", entry.name)))?;
        if file.is_dir() {
            return Err(Error::IsDirectory(entry.name.clone()));
        }

        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(|e| Error::corrupted(&self.path, format!("{}: {e}", entry.name)))?;
        Ok(data)
    }

    /// Locate an entry's compressed bytes. `None` when the entry needs
    /// decryption or a compression method other than store or deflate.
    fn data_span(&self, entry: &RawEntry) -> Result<Option<DataSpan>> {
        let mut archive = self.archive.lock();
        let file = archive
            .by_index_raw(entry.index)
            .map_err(|e| Error::corrupted(&self.path, format!("{}: {e}", entry.name)))?;
        if file.is_dir() {
            return Err(Error::IsDirectory(entry.name.clone()));
        }

        let method = file.compression();
        if file.encrypted()
            || !matches!(method, CompressionMethod::Stored | CompressionMethod::Deflated)
        {
            return Ok(None);
        }
        let start = file.data_start().ok_or_else(|| {
            Error::corrupted(&self.path, format!("{}: unknown data offset", entry.name))
        })?;
        Ok(Some(DataSpan {
            method,
            start,
            len: file.compressed_size(),
        }))
    }
}

struct DataSpan {
    method: CompressionMethod,
    start: u64,
    len: u64,
}

/// An entry read through its own handle on the archive file, so streams
/// neither share a position nor hold the archive lock.
enum EntryStream {
    Stored(Take<BufReader<File>>),
    Deflated(DeflateDecoder<Take<BufReader<File>>>),
}

impl EntryStream {
    fn open(path: &Path, span: &DataSpan) -> io::Result<Self> {
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(span.start))?;
        let raw = BufReader::new(file).take(span.len);
        Ok(match span.method {
            CompressionMethod::Deflated => Self::Deflated(DeflateDecoder::new(raw)),
            _ => Self::Stored(raw),
        })
    }
}

impl Read for EntryStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Stored(raw) => raw.read(buf),
            Self::Deflated(decoder) => decoder.read(buf),
        }
    }
}

impl ArchiveHandle for ZipHandle {
    fn len(&self) -> usize {
        self.len
    }

    fn entries(&self) -> Box<dyn Iterator<Item = Result<RawEntry>> + '_> {
        Box::new((0..self.len).map(move |index| self.raw_entry(index)))
    }

    fn open_stream(&self, entry: &RawEntry) -> Result<Box<dyn Read + Send>> {
        match self.data_span(entry)? {
            Some(span) => {
                let stream = EntryStream::open(&self.path, &span).map_err(|e| {
                    Error::ExtractionFailed {
                        path: self.path.clone(),
                        source: e,
                    }
                })?;
                Ok(Box::new(stream))
            }
            None => Ok(Box::new(Cursor::new(self.read_entry(entry)?))),
        }
    }
}

fn to_system_time(dt: zip::DateTime) -> Option<SystemTime> {
    let date = chrono::NaiveDate::from_ymd_opt(
        i32::from(dt.year()),
        u32::from(dt.month()),
        u32::from(dt.day()),
    )?;
    let naive = date.and_hms_opt(
        u32::from(dt.hour()),
        u32::from(dt.minute()),
        u32::from(dt.second()),
    )?;
    Some(SystemTime::from(naive.and_utc()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, data) in entries {
            if name.ends_with('/') {
                zip.add_directory(*name, SimpleFileOptions::default()).unwrap();
            } else {
                zip.start_file(*name, SimpleFileOptions::default()).unwrap();
                zip.write_all(data).unwrap();
            }
        }
        zip.finish().unwrap();
    }

    #[test]
    fn enumerates_entries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jar");
        write_zip(&path, &[("META-INF/", b""), ("a/b.txt", b"hello")]);

        let handle = ZipHandle::open(&path).unwrap();
        let entries: Vec<_> = handle.entries().collect::<Result<_>>().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_dir);
        assert_eq!(entries[1].name, "a/b.txt");
        assert_eq!(entries[1].size, 5);
        assert!(entries[1].modified.is_some());
    }

    #[test]
    fn streams_are_independent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jar");
        write_zip(&path, &[("one", b"first"), ("two", b"second")]);

        let handle = ZipHandle::open(&path).unwrap();
        let entries: Vec<_> = handle.entries().collect::<Result<_>>().unwrap();
        let mut one = handle.open_stream(&entries[0]).unwrap();
        let mut two = handle.open_stream(&entries[1]).unwrap();

        let mut buf = [0u8; 3];
        one.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"fir");
        let mut rest = String::new();
        two.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "second");
        one.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "secondst");
    }

    #[test]
    fn large_entries_stream_in_both_methods() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.jar");
        let payload: Vec<u8> = (0..4 * 1024 * 1024u32).map(|i| (i % 251) as u8).collect();

        let mut zip = zip::ZipWriter::new(File::create(&path).unwrap());
        for (name, method) in [
            ("stored.bin", CompressionMethod::Stored),
            ("deflated.bin", CompressionMethod::Deflated),
        ] {
            let options = SimpleFileOptions::default().compression_method(method);
            zip.start_file(name, options).unwrap();
            zip.write_all(&payload).unwrap();
        }
        zip.finish().unwrap();

        let handle = ZipHandle::open(&path).unwrap();
        let entries: Vec<_> = handle.entries().collect::<Result<_>>().unwrap();
        for entry in &entries {
            let mut stream = handle.open_stream(entry).unwrap();
            // the handle stays usable while a stream is half read
            let mut head = [0u8; 1024];
            stream.read_exact(&mut head).unwrap();
            assert_eq!(handle.entries().count(), 2);

            let mut rest = Vec::new();
            stream.read_to_end(&mut rest).unwrap();
            assert_eq!(head.len() + rest.len(), payload.len(), "{}", entry.name);
            assert_eq!(&head[..], &payload[..1024]);
            assert!(rest == payload[1024..], "{} differs", entry.name);
        }
    }

    #[test]
    fn directory_stream_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.jar");
        write_zip(&path, &[("d/", b"")]);

        let handle = ZipHandle::open(&path).unwrap();
        let entry = handle.entries().next().unwrap().unwrap();
        assert!(matches!(
            handle.open_stream(&entry),
            Err(Error::IsDirectory(_))
        ));
    }

    #[test]
    fn non_archive_is_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.jar");
        std::fs::write(&path, b"not a zip at all").unwrap();
        assert!(matches!(
            ZipHandle::open(&path),
            Err(Error::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn truncated_archive_is_corrupted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cut.jar");
        write_zip(&path, &[("a.txt", b"some content here")]);
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();
        assert!(matches!(
            ZipHandle::open(&path),
            Err(Error::Corrupted { .. })
        ));
    }
}
