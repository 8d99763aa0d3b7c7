use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, SystemTime};

use nestvfs_archive::{
    ArchiveHandle, ArchiveIndex, ArchiveReader, CertificateLookup, CertificateSet,
    CertificateState, EntryFailurePolicy, Error, IndexOptions, RawEntry, Result, SignedZipReader,
    Signer, ZipReader, extract_to,
};
use nestvfs_fs::VirtualPath;
use zip::write::SimpleFileOptions;

fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let file = File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    for (name, data) in entries {
        if name.ends_with('/') {
            zip.add_directory(*name, SimpleFileOptions::default())
                .unwrap();
        } else {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
    }
    zip.finish().unwrap();
}

fn bump_mtime(path: &Path) {
    let later = SystemTime::now() + Duration::from_secs(10);
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(later)
        .unwrap();
}

fn path(p: &str) -> VirtualPath {
    VirtualPath::parse(p).unwrap()
}

fn read_all(mut stream: Box<dyn Read + Send>) -> String {
    let mut out = String::new();
    stream.read_to_string(&mut out).unwrap();
    out
}

const SIGNATURE_FILE: &[u8] = b"Signature-Version: 1.0\r\n\r\n\
Name: com/example/App.class\r\nSHA-256-Digest: AAAA\r\n\r\n";

fn signed_jar(path: &Path) {
    write_zip(
        path,
        &[
            ("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\r\n"),
            ("META-INF/SIGNER.SF", SIGNATURE_FILE),
            ("META-INF/SIGNER.RSA", b"pretend pkcs7 block"),
            ("com/example/App.class", b"cafebabe"),
            ("com/example/Unsigned.class", b"cafebabe"),
        ],
    );
}

#[test]
fn resolve_and_stream() {
    let dir = tempfile::tempdir().unwrap();
    let jar = dir.path().join("app.jar");
    write_zip(&jar, &[("a/b/c.txt", b"content"), ("top.txt", b"top")]);

    let index = ArchiveIndex::open(&jar, Arc::new(ZipReader), IndexOptions::default()).unwrap();
    let c = index.resolve(&path("a/b/c.txt")).unwrap().unwrap();
    assert_eq!(c.name(), "c.txt");
    assert_eq!(c.size(), 7);
    assert_eq!(read_all(c.open_stream().unwrap()), "content");

    let a = index.resolve(&path("a")).unwrap().unwrap();
    assert!(a.is_directory());
    assert!(!a.is_declared());
    assert!(matches!(a.open_stream(), Err(Error::IsDirectory(_))));

    let names: Vec<_> = index
        .root()
        .unwrap()
        .children()
        .iter()
        .map(|e| e.name().to_string())
        .collect();
    assert_eq!(names, ["a", "top.txt"]);

    assert!(index.resolve(&path("missing")).unwrap().is_none());
}

#[test]
fn certificates_are_memoized() {
    let dir = tempfile::tempdir().unwrap();
    let jar = dir.path().join("signed.jar");
    signed_jar(&jar);

    let index =
        ArchiveIndex::open(&jar, Arc::new(SignedZipReader), IndexOptions::default()).unwrap();
    let app = index
        .resolve(&path("com/example/App.class"))
        .unwrap()
        .unwrap();
    assert_eq!(app.certificate_state(), CertificateState::Unresolved);

    let first = app.certificates().unwrap().unwrap();
    let second = app.certificates().unwrap().unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.len(), 1);
    assert_eq!(first.signers()[0].name, "SIGNER");
    assert_eq!(first.signers()[0].fingerprint.len(), 64);
    assert!(matches!(app.certificate_state(), CertificateState::Present(_)));

    let unsigned = index
        .resolve(&path("com/example/Unsigned.class"))
        .unwrap()
        .unwrap();
    assert!(unsigned.certificates().unwrap().is_none());
    assert_eq!(unsigned.certificate_state(), CertificateState::Absent);
}

#[test]
fn baseline_backend_reports_no_certificates() {
    let dir = tempfile::tempdir().unwrap();
    let jar = dir.path().join("signed.jar");
    signed_jar(&jar);

    let index = ArchiveIndex::open(&jar, Arc::new(ZipReader), IndexOptions::default()).unwrap();
    let app = index
        .resolve(&path("com/example/App.class"))
        .unwrap()
        .unwrap();
    assert!(app.certificates().unwrap().is_none());
}

/// Backend whose certificate lookup is slow and counted.
#[derive(Debug, Default)]
struct CountingReader {
    lookups: Arc<AtomicUsize>,
}

struct CountingHandle {
    lookups: Arc<AtomicUsize>,
}

impl ArchiveReader for CountingReader {
    fn open(&self, _source: &Path) -> Result<Box<dyn ArchiveHandle>> {
        Ok(Box::new(CountingHandle {
            lookups: Arc::clone(&self.lookups),
        }))
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}

impl ArchiveHandle for CountingHandle {
    fn len(&self) -> usize {
        1
    }

    fn entries(&self) -> Box<dyn Iterator<Item = Result<RawEntry>> + '_> {
        Box::new(std::iter::once(Ok(RawEntry {
            name: "lib/signed.class".to_string(),
            is_dir: false,
            size: 4,
            modified: None,
            index: 0,
        })))
    }

    fn open_stream(&self, _entry: &RawEntry) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(&b"data"[..]))
    }

    fn certificates(&self, _entry: &RawEntry) -> Result<CertificateLookup> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        Ok(CertificateLookup::Signed(CertificateSet::new(vec![Signer {
            name: "ONLY".to_string(),
            block: Arc::from(&b"block"[..]),
            fingerprint: "00".to_string(),
        }])))
    }
}

#[test]
fn concurrent_first_resolution_runs_once() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("fake.jar");
    std::fs::write(&source, b"placeholder").unwrap();

    let reader = CountingReader::default();
    let lookups = Arc::clone(&reader.lookups);
    let index = Arc::new(
        ArchiveIndex::open(&source, Arc::new(reader), IndexOptions::default()).unwrap(),
    );

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let index = Arc::clone(&index);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let entry = index.resolve(&path("lib/signed.class")).unwrap().unwrap();
                barrier.wait();
                entry.certificates().unwrap().unwrap()
            })
        })
        .collect();

    let sets: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(lookups.load(Ordering::SeqCst), 1);
    assert!(sets.iter().all(|set| Arc::ptr_eq(set, &sets[0])));
}

#[test]
fn changed_archive_is_rebuilt() {
    let dir = tempfile::tempdir().unwrap();
    let jar = dir.path().join("app.jar");
    write_zip(&jar, &[("old.txt", b"old"), ("kept.txt", b"v1")]);

    let index = ArchiveIndex::open(&jar, Arc::new(ZipReader), IndexOptions::default()).unwrap();
    assert!(index.resolve(&path("old.txt")).unwrap().is_some());
    let before = index.resolve(&path("kept.txt")).unwrap().unwrap();
    assert!(!index.has_changed());

    write_zip(&jar, &[("kept.txt", b"version two"), ("new.txt", b"new")]);
    bump_mtime(&jar);
    assert!(index.has_changed());

    assert!(index.resolve(&path("old.txt")).unwrap().is_none());
    assert!(index.resolve(&path("new.txt")).unwrap().is_some());
    let after = index.resolve(&path("kept.txt")).unwrap().unwrap();
    assert_eq!(read_all(after.open_stream().unwrap()), "version two");
    assert_eq!(index.build_count(), 2);

    // a handle from the old tree keeps reading the old tree
    assert_eq!(before.size(), 2);
    assert!(!Arc::ptr_eq(before.snapshot(), after.snapshot()));
}

#[test]
fn unchanged_archive_is_not_rebuilt() {
    let dir = tempfile::tempdir().unwrap();
    let jar = dir.path().join("app.jar");
    write_zip(&jar, &[("a.txt", b"a")]);

    let index = ArchiveIndex::open(&jar, Arc::new(ZipReader), IndexOptions::default()).unwrap();
    for _ in 0..5 {
        index.resolve(&path("a.txt")).unwrap();
    }
    assert_eq!(index.build_count(), 1);
}

#[test]
fn extract_preserves_structure() {
    let dir = tempfile::tempdir().unwrap();
    let jar = dir.path().join("app.war");
    write_zip(
        &jar,
        &[
            ("WEB-INF/", b""),
            ("WEB-INF/web.xml", b"<web-app/>"),
            ("WEB-INF/lib/util.jar", b"PK-not-really"),
            ("index.html", b"<html/>"),
        ],
    );

    let index = ArchiveIndex::open(&jar, Arc::new(ZipReader), IndexOptions::default()).unwrap();
    let out = dir.path().join("out");
    let report = extract_to(&index.snapshot().unwrap(), &out).unwrap();

    assert_eq!(report.file_count, 3);
    assert_eq!(report.directory_count, 2);
    assert_eq!(report.total_bytes, 10 + 13 + 7);
    assert_eq!(
        std::fs::read_to_string(out.join("WEB-INF/web.xml")).unwrap(),
        "<web-app/>"
    );
    assert!(out.join("WEB-INF/lib").is_dir());
}

#[test]
fn extraction_streams_large_entries() {
    const LEN: usize = 8 * 1024 * 1024;
    let dir = tempfile::tempdir().unwrap();
    let ear = dir.path().join("app.ear");
    let payload: Vec<u8> = (0..LEN).map(|i| (i * 7 % 253) as u8).collect();
    write_zip(&ear, &[("lib/big.jar", payload.as_slice()), ("small.txt", b"s")]);

    let index = ArchiveIndex::open(&ear, Arc::new(ZipReader), IndexOptions::default()).unwrap();
    let snapshot = index.snapshot().unwrap();
    let entry = snapshot.resolve(&VirtualPath::parse("lib/big.jar").unwrap()).unwrap();

    // two streams over the same entry advance independently
    let mut first = entry.open_stream().unwrap();
    let mut second = entry.open_stream().unwrap();
    let mut head = vec![0u8; 4096];
    first.read_exact(&mut head).unwrap();
    second.read_exact(&mut head).unwrap();
    second.read_exact(&mut head).unwrap();
    assert_eq!(head, payload[4096..8192]);
    drop((first, second));

    let out = dir.path().join("out");
    let report = extract_to(&snapshot, &out).unwrap();
    assert_eq!(report.total_bytes, LEN as u64 + 1);
    let extracted = std::fs::read(out.join("lib/big.jar")).unwrap();
    assert_eq!(extracted.len(), LEN);
    assert!(extracted == payload);
}

#[test]
fn empty_archive_indexes() {
    let dir = tempfile::tempdir().unwrap();
    let jar = dir.path().join("empty.jar");
    write_zip(&jar, &[]);

    let index = ArchiveIndex::open(&jar, Arc::new(ZipReader), IndexOptions::default()).unwrap();
    let snapshot = index.snapshot().unwrap();
    assert!(snapshot.tree().is_empty());
    assert!(snapshot.root().children().is_empty());
}

#[test]
fn skip_policy_from_options() {
    let dir = tempfile::tempdir().unwrap();
    let jar = dir.path().join("app.jar");
    write_zip(&jar, &[("ok.txt", b"ok")]);

    let options = IndexOptions::default().entry_failure(EntryFailurePolicy::skip_all());
    let index = ArchiveIndex::open(&jar, Arc::new(ZipReader), options).unwrap();
    assert_eq!(index.snapshot().unwrap().tree().skipped(), 0);
    assert_eq!(
        index.options().entry_failure,
        EntryFailurePolicy::skip_all()
    );
}
