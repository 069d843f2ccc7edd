//! The inode table.
//!
//! Inodes are laid out sequentially on disk starting at the block the super
//! block names, and are identified by their table index. They are read and
//! written through the block cache at all times; no copy is kept in the
//! mount instance, so the cached record is the single source of truth and
//! delete cannot race a stale snapshot. The mount mutex serializes every
//! access.

use dataview::PodMethods as _;

use crate::{
    error::FsError,
    fs::FsInner,
    repr::{Inode, InodeBlock, InodeFlags, InodeNo, NUM_INODES},
};

impl FsInner {
    /// Copies inode `ino` out of the cache.
    pub(crate) fn read_inode(&self, ino: InodeNo) -> Result<Inode, FsError> {
        check_ino(ino)?;
        let buf = self.cache.get(self.superblock.inode_block(ino).as_index())?;
        let guard = buf.lock();
        Ok(guard.map(0, |block: &InodeBlock| *block.inode(ino)))
    }

    /// Writes `inode` back to the table.
    ///
    /// Must be called after every change to a record that lives on disk.
    pub(crate) fn update_inode(&self, ino: InodeNo, inode: &Inode) -> Result<(), FsError> {
        check_ino(ino)?;
        let buf = self.cache.get(self.superblock.inode_block(ino).as_index())?;
        let mut guard = buf.lock();
        guard.map_mut(0, |block: &mut InodeBlock| *block.inode_mut(ino) = *inode);
        Ok(())
    }

    /// Claims the first unused inode, marking it used with `flags` and
    /// zeroed metadata.
    ///
    /// An inode is unused exactly when its flag word is zero.
    pub(crate) fn alloc_inode(&self, flags: InodeFlags) -> Result<InodeNo, FsError> {
        for ino in 1..NUM_INODES as u32 {
            let ino = InodeNo::new(ino);
            let buf = self.cache.get(self.superblock.inode_block(ino).as_index())?;
            let mut guard = buf.lock();
            if guard.map(0, |block: &InodeBlock| block.inode(ino).flags == 0) {
                guard.map_mut(0, |block: &mut InodeBlock| {
                    block.inode_mut(ino).allocate(flags);
                });
                return Ok(ino);
            }
        }
        log::warn!("gosfs: out of inodes");
        Err(FsError::NoSpace)
    }

    /// Marks inode `ino` free by zeroing its record.
    ///
    /// The caller must already have released every block the inode reached.
    pub(crate) fn free_inode(&self, ino: InodeNo) -> Result<(), FsError> {
        self.update_inode(ino, &Inode::zeroed())
    }
}

fn check_ino(ino: InodeNo) -> Result<(), FsError> {
    // Inode 0 is the absent sentinel; anything past the table cap can only
    // come from a corrupted directory entry.
    if ino.value() == 0 || ino.as_index() >= NUM_INODES {
        return Err(FsError::Unspecified(None));
    }
    Ok(())
}
