//! Open-file and open-directory records.
//!
//! A record holds a reference to the mount instance and the inode it names;
//! several records may name the same inode. Every operation takes the mount
//! mutex on entry, so handles can be used from any thread. Dropping a
//! handle closes it and lets delete reach the inode again.

use alloc::{string::String, sync::Arc, vec::Vec};

use bitflags::bitflags;
use spin::Mutex;

use crate::{
    error::FsError,
    fs::FsInner,
    repr::{DirEntryKind, InodeNo},
    stat::Stat,
};

bitflags! {
    /// Mode bits for [`crate::GosFs::open`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenMode: u32 {
        /// Allow reads through the handle.
        const READ = 0x1;
        /// Allow writes through the handle.
        const WRITE = 0x2;
        /// Create the file if the path does not resolve.
        const CREATE = 0x4;
    }
}

/// An open regular file with a byte cursor.
pub struct File {
    fs: Arc<Mutex<FsInner>>,
    ino: InodeNo,
    mode: OpenMode,
    pos: u64,
}

impl File {
    pub(crate) fn new(fs: Arc<Mutex<FsInner>>, ino: InodeNo, mode: OpenMode) -> Self {
        Self {
            fs,
            ino,
            mode,
            pos: 0,
        }
    }

    /// Returns the cursor position in bytes.
    #[must_use]
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Reads from the cursor into `buf`, advancing the cursor.
    ///
    /// Returns the number of bytes read, clamped to the file size; zero
    /// means end of file. Holes read as zeros. The handle must be open for
    /// reading.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
        if !self.mode.contains(OpenMode::READ) {
            return Err(FsError::AccessDenied);
        }
        let fs = self.fs.lock();
        let n = fs.read_at(self.ino, self.pos, buf)?;
        self.pos += n as u64;
        Ok(n)
    }

    /// Writes `data` at the cursor, advancing the cursor and extending the
    /// file when the write ends past its current size.
    ///
    /// Returns the number of bytes written. The handle must be open for
    /// writing.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, FsError> {
        if !self.mode.contains(OpenMode::WRITE) {
            return Err(FsError::AccessDenied);
        }
        let fs = self.fs.lock();
        let n = fs.write_at(self.ino, self.pos, data)?;
        self.pos += n as u64;
        Ok(n)
    }

    /// Moves the cursor to `pos`.
    ///
    /// A handle open for reading may not seek past end of file. A
    /// write-only handle may; the skipped range becomes a hole that reads
    /// back as zeros once a later write extends the file over it.
    pub fn seek(&mut self, pos: u64) -> Result<(), FsError> {
        if self.mode.contains(OpenMode::READ) {
            let fs = self.fs.lock();
            if pos > fs.read_inode(self.ino)?.size {
                return Err(FsError::InvalidArgument);
            }
        }
        self.pos = pos;
        Ok(())
    }

    /// Copies the file's metadata.
    pub fn stat(&self) -> Result<Stat, FsError> {
        self.fs.lock().stat_inode(self.ino)
    }

    /// Closes the handle. Dropping it has the same effect.
    pub fn close(self) {}
}

impl Drop for File {
    fn drop(&mut self) {
        self.fs.lock().release(self.ino);
    }
}

/// One entry yielded by [`Dir::read_entry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntryInfo {
    /// Entry name; stored bytes that are not UTF-8 are replaced.
    pub name: String,
    /// The inode the entry references.
    pub ino: InodeNo,
    /// Regular child or the directory's self-reference.
    pub kind: DirEntryKind,
}

/// An open directory.
///
/// Opening a directory snapshots its live entries in stored order;
/// [`Dir::read_entry`] hands them out one by one.
pub struct Dir {
    fs: Arc<Mutex<FsInner>>,
    ino: InodeNo,
    entries: Vec<DirEntryInfo>,
    cursor: usize,
}

impl Dir {
    pub(crate) fn new(fs: Arc<Mutex<FsInner>>, ino: InodeNo, entries: Vec<DirEntryInfo>) -> Self {
        Self {
            fs,
            ino,
            entries,
            cursor: 0,
        }
    }

    /// Returns the next entry of the snapshot, or `None` once all entries
    /// have been read.
    pub fn read_entry(&mut self) -> Option<DirEntryInfo> {
        let entry = self.entries.get(self.cursor)?.clone();
        self.cursor += 1;
        Some(entry)
    }

    /// Repositions the entry cursor. Positions past the snapshot are
    /// rejected.
    pub fn seek(&mut self, pos: u64) -> Result<(), FsError> {
        if pos > self.entries.len() as u64 {
            return Err(FsError::InvalidArgument);
        }
        self.cursor = pos as usize;
        Ok(())
    }

    /// Copies the directory's metadata.
    pub fn stat(&self) -> Result<Stat, FsError> {
        self.fs.lock().stat_inode(self.ino)
    }

    /// Closes the handle. Dropping it has the same effect.
    pub fn close(self) {}
}

impl Drop for Dir {
    fn drop(&mut self) {
        self.fs.lock().release(self.ino);
    }
}
