use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use nestvfs_fs::{Signature, VirtualPath};

use super::{FileAttr, VfsContext};
use crate::error::{Error, Result};

/// A context backed by a host directory.
#[derive(Debug)]
pub struct DirectoryContext {
    root: PathBuf,
    uri: String,
}

impl DirectoryContext {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let uri = format!("file://{}", root.display());
        Self { root, uri }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, path: &VirtualPath) -> PathBuf {
        path.segments()
            .iter()
            .fold(self.root.clone(), |acc, segment| acc.join(segment))
    }
}

impl VfsContext for DirectoryContext {
    fn root_uri(&self) -> &str {
        &self.uri
    }

    fn signature(&self) -> Option<Signature> {
        Signature::of(&self.root).ok()
    }

    fn attr(&self, path: &VirtualPath) -> Result<Option<FileAttr>> {
        let host = self.resolve(path);
        let metadata = match fs::metadata(&host) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let modified = metadata.modified().ok();
        Ok(Some(if metadata.is_dir() {
            FileAttr::directory(modified)
        } else {
            FileAttr::file(metadata.len(), modified)
        }))
    }

    fn children(&self, path: &VirtualPath) -> Result<Vec<String>> {
        let host = self.resolve(path);
        let entries = match fs::read_dir(&host) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(Error::not_found(host.display().to_string()));
            }
            Err(e) if e.kind() == io::ErrorKind::NotADirectory => {
                return Err(Error::not_a_directory(host.display().to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        for entry in entries {
            let name = entry?.file_name();
            // names that aren't UTF-8 can't be addressed through the VFS
            if let Some(name) = name.to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn open_stream(&self, path: &VirtualPath) -> Result<Box<dyn Read + Send>> {
        let host = self.resolve(path);
        if host.is_dir() {
            return Err(Error::is_a_directory(host.display().to_string()));
        }
        match File::open(&host) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(Error::not_found(host.display().to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn physical_file(&self, path: &VirtualPath) -> Option<PathBuf> {
        Some(self.resolve(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn stat_list_and_read() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), "bb").unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();

        let ctx = DirectoryContext::new(dir.path());
        let root = VirtualPath::root();
        assert!(ctx.attr(&root).unwrap().unwrap().is_dir());
        assert_eq!(ctx.children(&root).unwrap(), ["a.txt", "sub"]);

        let b = VirtualPath::parse("sub/b.txt").unwrap();
        assert_eq!(ctx.attr(&b).unwrap().unwrap().size, 2);
        let mut text = String::new();
        ctx.open_stream(&b).unwrap().read_to_string(&mut text).unwrap();
        assert_eq!(text, "bb");
        assert_eq!(ctx.physical_file(&b).unwrap(), dir.path().join("sub/b.txt"));
    }

    #[test]
    fn missing_is_none_not_error() {
        let dir = tempdir().unwrap();
        let ctx = DirectoryContext::new(dir.path());
        let missing = VirtualPath::parse("nope").unwrap();
        assert!(ctx.attr(&missing).unwrap().is_none());
        assert!(ctx.open_stream(&missing).err().unwrap().is_not_found());
    }

    #[test]
    fn directory_stream_is_rejected() {
        let dir = tempdir().unwrap();
        let ctx = DirectoryContext::new(dir.path());
        assert!(matches!(
            ctx.open_stream(&VirtualPath::root()),
            Err(Error::IsADirectory(_))
        ));
    }
}
