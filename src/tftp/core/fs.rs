//! File access for transfers
//!
//! Sessions never touch paths themselves; they go through [`FileAccess`],
//! which the server backs with [`RootedFiles`] so that every request stays
//! inside the served directory.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

/// A file opened for reading, with its size for `tsize`
pub struct ReadHandle {
    pub reader: Box<dyn Read + Send>,
    pub size: u64,
}

impl std::fmt::Debug for ReadHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadHandle").field("size", &self.size).finish()
    }
}

pub trait FileAccess: Send + Sync {
    fn open_read(&self, filename: &str) -> io::Result<ReadHandle>;

    /// Must fail with `AlreadyExists` if the target exists.
    fn open_write(&self, filename: &str) -> io::Result<Box<dyn Write + Send>>;
}

/// Files under a single root directory
#[derive(Debug, Clone)]
pub struct RootedFiles {
    root: PathBuf,
}

/// Device names Windows reserves in every directory.
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

impl RootedFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Map a requested name to a path under the root.
    ///
    /// Anything that would leave the root, names a reserved device, or
    /// passes through a symbolic link is reported as not found.
    pub fn resolve(&self, filename: &str) -> io::Result<PathBuf> {
        let relative = filename.trim_start_matches(['/', '\\']);

        let mut path = self.root.clone();
        let mut named = false;
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => {
                    let stem = part
                        .to_str()
                        .and_then(|s| s.split('.').next())
                        .unwrap_or_default();
                    if RESERVED_NAMES.iter().any(|r| r.eq_ignore_ascii_case(stem)) {
                        return Err(not_found(filename));
                    }
                    path.push(part);
                    named = true;
                    if path
                        .symlink_metadata()
                        .is_ok_and(|meta| meta.file_type().is_symlink())
                    {
                        return Err(not_found(filename));
                    }
                }
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(not_found(filename));
                }
            }
        }
        if !named {
            return Err(not_found(filename));
        }
        Ok(path)
    }
}

fn not_found(filename: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotFound,
        format!("{filename:?} is not available under the served directory"),
    )
}

impl FileAccess for RootedFiles {
    fn open_read(&self, filename: &str) -> io::Result<ReadHandle> {
        let path = self.resolve(filename)?;
        let file = File::open(&path)?;
        let meta = file.metadata()?;
        if !meta.is_file() {
            return Err(not_found(filename));
        }
        Ok(ReadHandle {
            reader: Box::new(file),
            size: meta.len(),
        })
    }

    fn open_write(&self, filename: &str) -> io::Result<Box<dyn Write + Send>> {
        let path = self.resolve(filename)?;
        let file = OpenOptions::new().write(true).create_new(true).open(&path)?;
        Ok(Box::new(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_inside_root() {
        let dir = tempfile::tempdir().unwrap();
        let files = RootedFiles::new(dir.path());

        assert_eq!(files.resolve("a.txt").unwrap(), dir.path().join("a.txt"));
        assert_eq!(files.resolve("/a.txt").unwrap(), dir.path().join("a.txt"));
        assert_eq!(files.resolve("./sub/a.txt").unwrap(), dir.path().join("sub/a.txt"));

        for bad in ["../etc/passwd", "sub/../../x", "", "/", ".", "./", "NUL", "con.txt"] {
            let err = files.resolve(bad).unwrap_err();
            assert_eq!(err.kind(), io::ErrorKind::NotFound, "{bad:?}");
        }
    }

    #[test]
    fn read_reports_size_and_write_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hello.txt"), b"hello").unwrap();
        let files = RootedFiles::new(dir.path());

        let mut handle = files.open_read("hello.txt").unwrap();
        assert_eq!(handle.size, 5);
        let mut content = String::new();
        handle.reader.read_to_string(&mut content).unwrap();
        assert_eq!(content, "hello");

        assert_eq!(
            files.open_read("missing.txt").unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
        assert_eq!(
            files.open_write("hello.txt").err().map(|e| e.kind()),
            Some(io::ErrorKind::AlreadyExists)
        );

        let mut out = files.open_write("new.txt").unwrap();
        out.write_all(b"data").unwrap();
        drop(out);
        assert_eq!(std::fs::read(dir.path().join("new.txt")).unwrap(), b"data");
    }

    #[cfg(unix)]
    #[test]
    fn symlinks_are_not_followed() {
        let dir = tempfile::tempdir().unwrap();
        let outside = tempfile::NamedTempFile::new().unwrap();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("link")).unwrap();

        let files = RootedFiles::new(dir.path());
        assert_eq!(
            files.open_read("link").unwrap_err().kind(),
            io::ErrorKind::NotFound
        );
    }
}
