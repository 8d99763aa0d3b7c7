use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Copy a file, or a directory and everything below it, to `dest`.
///
/// Symlinks are followed, so the copy never points back into the source.
/// Returns how many regular files were copied.
pub fn copy_path(src: impl AsRef<Path>, dest: impl AsRef<Path>) -> Result<usize> {
    let src = src.as_ref();
    let dest = dest.as_ref();

    if !fs::metadata(src).map_err(read_error(src))?.is_dir() {
        ensure_parent(dest)?;
        fs::copy(src, dest).map_err(write_error(dest))?;
        return Ok(1);
    }

    let mut files = 0;
    let mut pending: Vec<(PathBuf, PathBuf)> = vec![(src.to_path_buf(), dest.to_path_buf())];
    while let Some((from, to)) = pending.pop() {
        fs::create_dir_all(&to).map_err(write_error(&to))?;
        for entry in fs::read_dir(&from).map_err(read_error(&from))? {
            let entry = entry.map_err(read_error(&from))?;
            let child = entry.path();
            let target = to.join(entry.file_name());
            if fs::metadata(&child).map_err(read_error(&child))?.is_dir() {
                pending.push((child, target));
            } else {
                fs::copy(&child, &target).map_err(write_error(&target))?;
                files += 1;
            }
        }
    }
    Ok(files)
}

/// Drain `reader` into a freshly created file at `dest`.
pub fn write_stream(reader: &mut dyn Read, dest: &Path) -> Result<u64> {
    ensure_parent(dest)?;
    let mut file = fs::File::create(dest).map_err(write_error(dest))?;
    io::copy(reader, &mut file).map_err(write_error(dest))
}

fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(parent) if !parent.exists() => fs::create_dir_all(parent).map_err(write_error(parent)),
        _ => Ok(()),
    }
}

fn read_error(path: &Path) -> impl FnOnce(io::Error) -> Error + '_ {
    move |source| Error::Read {
        path: path.to_path_buf(),
        source,
    }
}

fn write_error(path: &Path) -> impl FnOnce(io::Error) -> Error + '_ {
    move |source| Error::Write {
        path: path.to_path_buf(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn copies_nested_tree() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("app.war");
        std::fs::create_dir_all(src.join("WEB-INF/lib")).unwrap();
        std::fs::write(src.join("index.html"), "<html/>").unwrap();
        std::fs::write(src.join("WEB-INF/lib/util.jar"), "jar").unwrap();
        std::fs::create_dir_all(src.join("empty")).unwrap();

        let dest = dir.path().join("copies/app.war");
        assert_eq!(copy_path(&src, &dest).unwrap(), 2);
        assert_eq!(std::fs::read(dest.join("WEB-INF/lib/util.jar")).unwrap(), b"jar");
        assert!(dest.join("empty").is_dir());
    }

    #[test]
    fn copies_single_file_into_missing_parent() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("a.jar");
        std::fs::write(&src, "jar").unwrap();
        let dest = dir.path().join("copies/a.jar");

        assert_eq!(copy_path(&src, &dest).unwrap(), 1);
        assert_eq!(std::fs::read(&dest).unwrap(), b"jar");
    }

    #[test]
    fn missing_source_is_not_found() {
        let dir = tempdir().unwrap();
        let err = copy_path(dir.path().join("nope"), dir.path().join("x")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn write_stream_creates_parents() {
        let dir = tempdir().unwrap();
        let dest = dir.path().join("a/b/c.bin");
        let written = write_stream(&mut &b"payload"[..], &dest).unwrap();
        assert_eq!(written, 7);
        assert_eq!(std::fs::read(&dest).unwrap(), b"payload");
    }
}
