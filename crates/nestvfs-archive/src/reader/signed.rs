//! Signed-jar backend.
//!
//! Signers are discovered from `META-INF/<NAME>.SF` signature files paired
//! with a `META-INF/<NAME>.{RSA,DSA,EC}` block. An entry belongs to a signer
//! when that signer's `.SF` file has a `Name:` section for it. The blocks are
//! reported as raw bytes with a SHA-256 fingerprint; they are not verified.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};

use super::zip::ZipHandle;
use super::{ArchiveHandle, ArchiveReader, CertificateLookup, CertificateSet, RawEntry, Signer};
use crate::Result;

const SIGNATURE_DIR: &str = "META-INF/";
const BLOCK_EXTENSIONS: &[&str] = &["RSA", "DSA", "EC"];

/// Zip backend that also answers certificate lookups.
#[derive(Clone, Copy, Debug, Default)]
pub struct SignedZipReader;

impl ArchiveReader for SignedZipReader {
    fn open(&self, source: &Path) -> Result<Box<dyn ArchiveHandle>> {
        Ok(Box::new(SignedZipHandle {
            inner: ZipHandle::open(source)?,
            signatures: OnceCell::new(),
        }))
    }

    fn name(&self) -> &'static str {
        "signed-zip"
    }
}

struct SignedZipHandle {
    inner: ZipHandle,
    signatures: OnceCell<SignatureIndex>,
}

#[derive(Debug, Default)]
struct SignatureIndex {
    signers: Vec<Signer>,
    /// entry name -> indices into `signers`
    signed: HashMap<String, Vec<usize>>,
}

impl SignedZipHandle {
    fn signatures(&self) -> Result<&SignatureIndex> {
        self.signatures.get_or_try_init(|| {
            let index = SignatureIndex::build(&self.inner)?;
            tracing::debug!(
                path = %self.inner.path().display(),
                signers = index.signers.len(),
                signed_entries = index.signed.len(),
                "indexed jar signatures"
            );
            Ok(index)
        })
    }
}

impl ArchiveHandle for SignedZipHandle {
    fn len(&self) -> usize {
        self.inner.len()
    }

    fn entries(&self) -> Box<dyn Iterator<Item = Result<RawEntry>> + '_> {
        self.inner.entries()
    }

    fn open_stream(&self, entry: &RawEntry) -> Result<Box<dyn Read + Send>> {
        self.inner.open_stream(entry)
    }

    fn certificates(&self, entry: &RawEntry) -> Result<CertificateLookup> {
        if entry.is_dir {
            return Ok(CertificateLookup::Unsigned);
        }
        let index = self.signatures()?;
        Ok(match index.signed.get(&entry.name) {
            Some(owners) => CertificateLookup::Signed(CertificateSet::new(
                owners.iter().map(|&i| index.signers[i].clone()).collect(),
            )),
            None => CertificateLookup::Unsigned,
        })
    }
}

impl SignatureIndex {
    fn build(handle: &ZipHandle) -> Result<Self> {
        let mut signature_files = Vec::new();
        let mut blocks = HashMap::new();
        for entry in handle.entries() {
            // unreadable entries are the index builder's concern, not ours
            let Ok(entry) = entry else { continue };
            if entry.is_dir {
                continue;
            }
            let Some((stem, ext)) = signature_member(&entry.name) else {
                continue;
            };
            if ext.eq_ignore_ascii_case("SF") {
                signature_files.push((stem.to_ascii_uppercase(), entry));
            } else if BLOCK_EXTENSIONS.iter().any(|b| b.eq_ignore_ascii_case(ext)) {
                blocks.insert(stem.to_ascii_uppercase(), entry);
            }
        }

        let mut index = Self::default();
        for (stem, sf) in signature_files {
            let Some(block_entry) = blocks.get(&stem) else {
                tracing::debug!(signature = %sf.name, "signature file without block, ignored");
                continue;
            };
            let block: Arc<[u8]> = handle.read_entry(block_entry)?.into();
            let fingerprint = hex::encode(Sha256::digest(&block));
            let listed = section_names(&String::from_utf8_lossy(&handle.read_entry(&sf)?));

            let signer = index.signers.len();
            index.signers.push(Signer {
                name: stem,
                block,
                fingerprint,
            });
            for name in listed {
                index.signed.entry(name).or_default().push(signer);
            }
        }
        Ok(index)
    }
}

/// `META-INF/CERT.SF` -> `("CERT", "SF")`; nested paths don't count.
fn signature_member(name: &str) -> Option<(&str, &str)> {
    let file = name.strip_prefix(SIGNATURE_DIR)?;
    if file.contains('/') {
        return None;
    }
    file.rsplit_once('.').filter(|(stem, _)| !stem.is_empty())
}

/// Collect `Name:` attributes of a manifest-format file, joining
/// continuation lines (those starting with a single space).
fn section_names(text: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut current: Option<String> = None;
    for line in text.lines() {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if let Some(rest) = line.strip_prefix(' ') {
            if let Some(name) = current.as_mut() {
                name.push_str(rest);
            }
            continue;
        }
        if let Some(name) = current.take() {
            names.push(name);
        }
        if let Some(value) = line.strip_prefix("Name:") {
            current = Some(value.trim_start().to_string());
        }
    }
    names.extend(current);
    names
}
