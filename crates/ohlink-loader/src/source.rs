//! Read-only handle on the executable, kept open for the whole run.

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};

use crate::error::MapError;

#[derive(Debug)]
pub struct BackingFile {
    file: File,
    path: PathBuf,
}

impl BackingFile {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path)?;
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fills `buf` from `pos`. Reaching end of file first is a
    /// [`MapError::ShortRead`].
    pub fn read_exact_at(&self, pos: u64, buf: &mut [u8]) -> Result<(), MapError> {
        let mut done = 0usize;
        while done < buf.len() {
            match self.file.read_at(&mut buf[done..], pos + done as u64) {
                Ok(0) => {
                    return Err(MapError::ShortRead { pos, expected: buf.len(), got: done });
                }
                Ok(n) => done += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(source) => return Err(MapError::Read { pos, len: buf.len(), source }),
            }
        }
        Ok(())
    }
}

impl AsRawFd for BackingFile {
    fn as_raw_fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}
