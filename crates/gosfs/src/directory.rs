//! Directories.
//!
//! A directory stores its children as fixed-size entries packed into its
//! direct data blocks; no indirection is used, so a directory holds at most
//! `NUM_DIRECT * DIR_ENTRIES_PER_BLOCK` entries. The inode's size field
//! counts the entries currently populated, the self-reference included.
//!
//! Scans visit blocks in direct-slot order and entries in block order, so
//! the first match always wins. Names compare by byte equality.

use alloc::{string::String, vec::Vec};

use crate::{
    error::FsError,
    file::DirEntryInfo,
    fs::FsInner,
    repr::{DirBlock, DirEntryKind, Inode, InodeNo, NUM_DIRECT},
};

impl FsInner {
    /// Scans `dir`'s data blocks for a live entry named `name`.
    pub(crate) fn dir_lookup(
        &self,
        dir: &Inode,
        name: &[u8],
    ) -> Result<Option<InodeNo>, FsError> {
        for slot in 0..NUM_DIRECT {
            let Some(bn) = dir.ptr(slot) else { continue };
            let buf = self.cache.get(bn.as_index())?;
            let guard = buf.lock();
            let found = guard.map(0, |block: &DirBlock| {
                block
                    .entries()
                    .iter()
                    .find(|entry| !entry.is_free() && entry.is_same_name(name))
                    .and_then(|entry| entry.ino())
            });
            if found.is_some() {
                return Ok(found);
            }
        }
        Ok(None)
    }

    /// Adds a regular entry mapping `name` to `child`.
    ///
    /// The entry lands in the first free slot of the existing data blocks;
    /// when none is free, the directory grows by one freshly free-marked
    /// block through its first absent direct pointer. A directory whose
    /// direct pointers are all populated with full blocks cannot grow.
    pub(crate) fn dir_insert(
        &self,
        dir_ino: InodeNo,
        name: &[u8],
        child: InodeNo,
    ) -> Result<(), FsError> {
        let mut dir = self.read_inode(dir_ino)?;

        for slot in 0..NUM_DIRECT {
            let Some(bn) = dir.ptr(slot) else { continue };
            let buf = self.cache.get(bn.as_index())?;
            let mut guard = buf.lock();
            let free = guard.map(0, |block: &DirBlock| {
                block.entries().iter().position(|entry| entry.is_free())
            });
            if let Some(idx) = free {
                guard.map_mut(0, |block: &mut DirBlock| {
                    block.entries_mut()[idx].set(DirEntryKind::Regular, child, name);
                });
                drop(guard);
                dir.size += 1;
                return self.update_inode(dir_ino, &dir);
            }
        }

        for slot in 0..NUM_DIRECT {
            if dir.ptr(slot).is_some() {
                continue;
            }
            let bn = self.alloc_block()?;
            {
                let buf = self.cache.get(bn.as_index())?;
                let mut guard = buf.lock();
                guard.map_mut(0, |block: &mut DirBlock| {
                    block.init_free();
                    block.entries_mut()[0].set(DirEntryKind::Regular, child, name);
                });
            }
            dir.set_ptr(slot, Some(bn));
            dir.size += 1;
            return self.update_inode(dir_ino, &dir);
        }

        Err(FsError::NoSpace)
    }

    /// Removes the entry referencing `target` and decrements the entry
    /// count. The vacated slot is free-marked in place; directory blocks are
    /// never compacted or freed.
    pub(crate) fn dir_remove(&self, dir_ino: InodeNo, target: InodeNo) -> Result<(), FsError> {
        let mut dir = self.read_inode(dir_ino)?;
        for slot in 0..NUM_DIRECT {
            let Some(bn) = dir.ptr(slot) else { continue };
            let buf = self.cache.get(bn.as_index())?;
            let mut guard = buf.lock();
            let idx = guard.map(0, |block: &DirBlock| {
                block
                    .entries()
                    .iter()
                    .position(|entry| !entry.is_free() && entry.ino() == Some(target))
            });
            if let Some(idx) = idx {
                guard.map_mut(0, |block: &mut DirBlock| block.entries_mut()[idx].clear());
                drop(guard);
                dir.size = dir.size.saturating_sub(1);
                return self.update_inode(dir_ino, &dir);
            }
        }
        Err(FsError::NotFound)
    }

    /// Returns `true` if `dir` holds no regular entry. The self-reference
    /// does not make a directory non-empty.
    pub(crate) fn dir_is_empty(&self, dir: &Inode) -> Result<bool, FsError> {
        for slot in 0..NUM_DIRECT {
            let Some(bn) = dir.ptr(slot) else { continue };
            let buf = self.cache.get(bn.as_index())?;
            let guard = buf.lock();
            let occupied = guard.map(0, |block: &DirBlock| {
                block
                    .entries()
                    .iter()
                    .any(|entry| entry.kind() == DirEntryKind::Regular)
            });
            if occupied {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Copies every live entry of `dir`, in stored order, for `read_entry`.
    pub(crate) fn dir_snapshot(&self, dir: &Inode) -> Result<Vec<DirEntryInfo>, FsError> {
        let mut entries = Vec::new();
        for slot in 0..NUM_DIRECT {
            let Some(bn) = dir.ptr(slot) else { continue };
            let buf = self.cache.get(bn.as_index())?;
            let guard = buf.lock();
            guard.map(0, |block: &DirBlock| {
                for entry in block.entries().iter().filter(|entry| !entry.is_free()) {
                    let Some(ino) = entry.ino() else { continue };
                    entries.push(DirEntryInfo {
                        name: String::from_utf8_lossy(entry.name()).into_owned(),
                        ino,
                        kind: entry.kind(),
                    });
                }
            });
        }
        Ok(entries)
    }

    /// Gives a fresh directory inode its first data block: every slot
    /// free-marked, with the self-reference in slot zero, and an entry count
    /// of one.
    pub(crate) fn init_dir(&self, ino: InodeNo, name: &[u8]) -> Result<(), FsError> {
        let bn = self.alloc_block()?;
        {
            let buf = self.cache.get(bn.as_index())?;
            let mut guard = buf.lock();
            guard.map_mut(0, |block: &mut DirBlock| {
                block.init_free();
                block.entries_mut()[0].set(DirEntryKind::This, ino, name);
            });
        }
        let mut inode = self.read_inode(ino)?;
        inode.set_ptr(0, Some(bn));
        inode.size = 1;
        self.update_inode(ino, &inode)
    }
}
