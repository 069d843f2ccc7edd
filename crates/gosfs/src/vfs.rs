//! The operation tables a VFS layer dispatches through.
//!
//! A mount point carries the path-level operations; open handles carry the
//! per-file ones. Files and directories are distinct capability sets:
//! directories have no read or write slot, files have no `read_entry`.
//! `close` consumes the handle; dropping one without calling it releases
//! the open record all the same.

use alloc::boxed::Box;

use crate::{
    error::FsError,
    file::{Dir, DirEntryInfo, File, OpenMode},
    fs::GosFs,
    stat::Stat,
};

/// Name under which the file system registers with the VFS layer.
pub const FS_NAME: &str = "gosfs";

/// Operations available on a mount point.
pub trait MountOps {
    fn open(&self, path: &str, mode: OpenMode) -> Result<File, FsError>;
    fn create_directory(&self, path: &str) -> Result<(), FsError>;
    fn open_directory(&self, path: &str) -> Result<Dir, FsError>;
    fn stat(&self, path: &str) -> Result<Stat, FsError>;
    fn sync(&self) -> Result<(), FsError>;
    fn delete(&self, path: &str) -> Result<(), FsError>;
}

impl MountOps for GosFs {
    fn open(&self, path: &str, mode: OpenMode) -> Result<File, FsError> {
        self.open(path, mode)
    }

    fn create_directory(&self, path: &str) -> Result<(), FsError> {
        self.mkdir(path)
    }

    fn open_directory(&self, path: &str) -> Result<Dir, FsError> {
        self.open_dir(path)
    }

    fn stat(&self, path: &str) -> Result<Stat, FsError> {
        self.stat(path)
    }

    fn sync(&self) -> Result<(), FsError> {
        self.sync()
    }

    fn delete(&self, path: &str) -> Result<(), FsError> {
        self.delete(path)
    }
}

/// Operations available on an open file.
pub trait FileOps {
    fn stat(&self) -> Result<Stat, FsError>;
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError>;
    fn write(&mut self, data: &[u8]) -> Result<usize, FsError>;
    fn seek(&mut self, pos: u64) -> Result<(), FsError>;
    fn close(self: Box<Self>);
}

impl FileOps for File {
    fn stat(&self) -> Result<Stat, FsError> {
        self.stat()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, FsError> {
        self.read(buf)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, FsError> {
        self.write(data)
    }

    fn seek(&mut self, pos: u64) -> Result<(), FsError> {
        self.seek(pos)
    }

    fn close(self: Box<Self>) {
        (*self).close();
    }
}

/// Operations available on an open directory.
pub trait DirOps {
    fn stat(&self) -> Result<Stat, FsError>;
    fn seek(&mut self, pos: u64) -> Result<(), FsError>;
    fn read_entry(&mut self) -> Option<DirEntryInfo>;
    fn close(self: Box<Self>);
}

impl DirOps for Dir {
    fn stat(&self) -> Result<Stat, FsError> {
        self.stat()
    }

    fn seek(&mut self, pos: u64) -> Result<(), FsError> {
        self.seek(pos)
    }

    fn read_entry(&mut self) -> Option<DirEntryInfo> {
        self.read_entry()
    }

    fn close(self: Box<Self>) {
        (*self).close();
    }
}
