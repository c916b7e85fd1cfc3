use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

/// A swarm's content file, kept open for the session's lifetime.
///
/// All IO is positioned; the handle has no cursor state to get confused
/// by interleaved verification and gateway reads.
#[derive(Debug)]
pub struct ContentFile {
    path: PathBuf,
    handle: File,
    len: u64,
}

impl ContentFile {
    /// Opens the content file read-write, creating it if absent (the
    /// download-into-empty-file case).
    pub fn open(path: &Path) -> io::Result<Self> {
        let handle = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;
        let len = handle.metadata()?.len();
        Ok(ContentFile {
            path: path.to_path_buf(),
            handle,
            len,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Reads exactly `len` bytes at `offset`.
    pub fn read_at(&self, offset: u64, len: usize) -> io::Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.handle.read_exact_at(&mut buf, offset).map_err(|e| {
            log::warn!("file {:?} read error at {}: {}", self.path, offset, e);
            e
        })?;
        Ok(buf)
    }

    /// Writes `data` at `offset`, growing the file as needed.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.handle.write_all_at(data, offset).map_err(|e| {
            log::warn!("file {:?} write error at {}: {}", self.path, offset, e);
            e
        })?;
        self.len = self.len.max(offset + data.len() as u64);
        Ok(())
    }

    /// Flushes buffered data to the OS. Called before a checkpoint is
    /// taken so the checkpoint never describes bytes the file does not
    /// durably have.
    pub fn sync(&self) -> io::Result<()> {
        self.handle.sync_data()
    }
}
