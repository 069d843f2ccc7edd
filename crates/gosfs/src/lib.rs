//! GOSFS, a block-structured file system over a sector device.
//!
//! Layers, from the disk up:
//!
//! + `repr`: the on-disk records and layout constants.
//! + `data_block`: the free-space bitmap allocator.
//! + `inode`: the inode table, read and written through the block cache at
//!   all times.
//! + `content`: logical-to-physical block mapping across the direct,
//!   single-indirect and double-indirect regions, and byte-granularity file
//!   data access.
//! + `directory`: fixed-size entries packed into a directory's direct data
//!   blocks.
//! + `path`: absolute-path resolution.
//! + `file` and `fs`: open records and the mount instance carrying the
//!   VFS-facing operations; one mutex per mount serializes them.
//!
//! All device access goes through the [`block_io`] buffer cache.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod content;
mod data_block;
mod directory;
mod error;
mod file;
mod fs;
mod inode;
mod path;
pub mod repr;
mod stat;
mod vfs;

#[cfg(test)]
mod test_util;

pub use block_io::{BlockDevice, IoError, SECTOR_SIZE};

pub use self::{
    error::FsError,
    file::{Dir, DirEntryInfo, File, OpenMode},
    fs::GosFs,
    repr::{BlockNo, DirEntryKind, InodeNo},
    stat::Stat,
    vfs::{DirOps, FileOps, MountOps, FS_NAME},
};
