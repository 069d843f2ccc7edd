//! Inode content.
//!
//! The data associated with an inode is stored in blocks on the disk. The
//! first [`NUM_DIRECT`] pointers in the inode name data blocks directly; the
//! next pointer names a block of pointers to data blocks; the last names a
//! block of pointers to such pointer blocks. A zero pointer anywhere in the
//! chain means the logical block has never been written.
//!
//! When a write lands on a missing block, every missing level of the chain
//! is materialized on the way down; a child block is always allocated and
//! zeroed before its pointer is published, so a non-zero pointer always
//! names an allocated, zeroed block.

use alloc::vec::Vec;

use crate::{
    error::FsError,
    fs::FsInner,
    repr::{
        BlockNo, IndirectBlock, InodeNo, BLOCK_SIZE, DIRECT_CAP, DOUBLE_INDIRECT_SLOT,
        INDIRECT_CAP, INDIRECT_SLOT, MAX_FILE_BLOCKS, MAX_FILE_SIZE, NUM_BLOCK_PTRS, NUM_DIRECT,
        PTRS_PER_BLOCK,
    },
};

impl FsInner {
    /// Maps logical block `index` of `ino` to a physical block.
    ///
    /// With `alloc` set, a missing block (and any missing indirection block
    /// on the way to it) is allocated; the result is then always `Some`.
    /// Without it, `Ok(None)` reports a hole, which readers skip as zeros.
    pub(crate) fn block_map(
        &self,
        ino: InodeNo,
        index: usize,
        alloc: bool,
    ) -> Result<Option<BlockNo>, FsError> {
        if index < DIRECT_CAP {
            return self.ensure_inode_ptr(ino, index, alloc);
        }

        if index < INDIRECT_CAP {
            let rel = index - DIRECT_CAP;
            let slot = INDIRECT_SLOT + rel / PTRS_PER_BLOCK;
            let Some(ind) = self.ensure_inode_ptr(ino, slot, alloc)? else {
                return Ok(None);
            };
            return self.ensure_indirect_ptr(ind, rel % PTRS_PER_BLOCK, alloc);
        }

        if index < MAX_FILE_BLOCKS {
            let rel = index - INDIRECT_CAP;
            let slot = DOUBLE_INDIRECT_SLOT + rel / (PTRS_PER_BLOCK * PTRS_PER_BLOCK);
            let Some(top) = self.ensure_inode_ptr(ino, slot, alloc)? else {
                return Ok(None);
            };
            let Some(mid) =
                self.ensure_indirect_ptr(top, (rel / PTRS_PER_BLOCK) % PTRS_PER_BLOCK, alloc)?
            else {
                return Ok(None);
            };
            return self.ensure_indirect_ptr(mid, rel % PTRS_PER_BLOCK, alloc);
        }

        Err(FsError::FileTooLarge)
    }

    /// Reads the pointer in inode slot `slot`, allocating and publishing a
    /// fresh block if it is absent and `alloc` is set.
    fn ensure_inode_ptr(
        &self,
        ino: InodeNo,
        slot: usize,
        alloc: bool,
    ) -> Result<Option<BlockNo>, FsError> {
        let mut inode = self.read_inode(ino)?;
        match inode.ptr(slot) {
            Some(bn) => Ok(Some(bn)),
            None if !alloc => Ok(None),
            None => {
                let bn = self.alloc_block()?;
                inode.set_ptr(slot, Some(bn));
                self.update_inode(ino, &inode)?;
                Ok(Some(bn))
            }
        }
    }

    /// Same as [`Self::ensure_inode_ptr`], for slot `slot` of the
    /// indirection block `ind`.
    fn ensure_indirect_ptr(
        &self,
        ind: BlockNo,
        slot: usize,
        alloc: bool,
    ) -> Result<Option<BlockNo>, FsError> {
        let buf = self.cache.get(ind.as_index())?;
        let mut guard = buf.lock();
        if let Some(bn) = guard.map(0, |block: &IndirectBlock| block.get(slot)) {
            return Ok(Some(bn));
        }
        if !alloc {
            return Ok(None);
        }
        let bn = self.alloc_block()?;
        guard.map_mut(0, |block: &mut IndirectBlock| block.set(slot, Some(bn)));
        Ok(Some(bn))
    }

    /// Reads up to `buf.len()` bytes of `ino`'s data starting at byte
    /// `off`, clamped to the file size.
    ///
    /// Returns the number of bytes read; zero at end of file. Holes read as
    /// zeros. If the device fails mid-way, the bytes already read are
    /// reported instead of the error.
    pub(crate) fn read_at(
        &self,
        ino: InodeNo,
        off: u64,
        buf: &mut [u8],
    ) -> Result<usize, FsError> {
        let size = self.read_inode(ino)?.size;
        if off >= size {
            return Ok(0);
        }
        let left = usize::try_from(size - off).unwrap_or(usize::MAX);
        let n = usize::min(buf.len(), left);

        let mut tot = 0;
        while tot < n {
            let pos = off + tot as u64;
            let index = (pos / BLOCK_SIZE as u64) as usize;
            let in_block = (pos % BLOCK_SIZE as u64) as usize;
            let m = usize::min(n - tot, BLOCK_SIZE - in_block);

            match self.read_block_range(ino, index, in_block, &mut buf[tot..tot + m]) {
                Ok(()) => tot += m,
                Err(_) if tot > 0 => break,
                Err(err) => return Err(err),
            }
        }
        Ok(tot)
    }

    fn read_block_range(
        &self,
        ino: InodeNo,
        index: usize,
        in_block: usize,
        dst: &mut [u8],
    ) -> Result<(), FsError> {
        match self.block_map(ino, index, false)? {
            Some(bn) => {
                let buf = self.cache.get(bn.as_index())?;
                let guard = buf.lock();
                dst.copy_from_slice(&guard.bytes()[in_block..in_block + dst.len()]);
            }
            None => dst.fill(0),
        }
        Ok(())
    }

    /// Writes `data` to `ino` starting at byte `off`, allocating blocks as
    /// needed and extending the recorded size when the write ends past it.
    ///
    /// Returns the number of bytes written. On a mid-way failure the size
    /// still reflects the range persisted before the error.
    pub(crate) fn write_at(&self, ino: InodeNo, off: u64, data: &[u8]) -> Result<usize, FsError> {
        let end = off
            .checked_add(data.len() as u64)
            .ok_or(FsError::FileTooLarge)?;
        if end > MAX_FILE_SIZE {
            return Err(FsError::FileTooLarge);
        }

        let mut tot = 0;
        while tot < data.len() {
            let pos = off + tot as u64;
            let index = (pos / BLOCK_SIZE as u64) as usize;
            let in_block = (pos % BLOCK_SIZE as u64) as usize;
            let m = usize::min(data.len() - tot, BLOCK_SIZE - in_block);

            if let Err(err) = self.write_block_range(ino, index, in_block, &data[tot..tot + m]) {
                // the size still covers whatever landed before the failure
                if tot > 0 {
                    let _ = self.extend_size(ino, off + tot as u64);
                }
                return Err(err);
            }
            tot += m;
        }

        self.extend_size(ino, end)?;
        Ok(tot)
    }

    fn write_block_range(
        &self,
        ino: InodeNo,
        index: usize,
        in_block: usize,
        src: &[u8],
    ) -> Result<(), FsError> {
        let bn = self
            .block_map(ino, index, true)?
            .ok_or(FsError::Unspecified(None))?;
        let buf = self.cache.get(bn.as_index())?;
        let mut guard = buf.lock();
        guard.bytes_mut()[in_block..in_block + src.len()].copy_from_slice(src);
        Ok(())
    }

    fn extend_size(&self, ino: InodeNo, end: u64) -> Result<(), FsError> {
        let mut inode = self.read_inode(ino)?;
        if end > inode.size {
            inode.size = end;
            self.update_inode(ino, &inode)?;
        }
        Ok(())
    }

    /// Frees every data and indirection block reachable from `ino` and
    /// zeros its pointer vector and size.
    ///
    /// Leaves are freed before the indirection blocks naming them.
    pub(crate) fn release_blocks(&self, ino: InodeNo) -> Result<(), FsError> {
        let mut inode = self.read_inode(ino)?;

        for slot in 0..NUM_DIRECT {
            if let Some(bn) = inode.ptr(slot) {
                self.free_block(bn)?;
            }
        }
        for slot in INDIRECT_SLOT..DOUBLE_INDIRECT_SLOT {
            if let Some(ind) = inode.ptr(slot) {
                self.release_indirect(ind, 1)?;
            }
        }
        for slot in DOUBLE_INDIRECT_SLOT..NUM_BLOCK_PTRS {
            if let Some(top) = inode.ptr(slot) {
                self.release_indirect(top, 2)?;
            }
        }

        inode.block_list = [0; NUM_BLOCK_PTRS];
        inode.size = 0;
        self.update_inode(ino, &inode)
    }

    fn release_indirect(&self, bn: BlockNo, depth: usize) -> Result<(), FsError> {
        let children: Vec<BlockNo> = {
            let buf = self.cache.get(bn.as_index())?;
            let guard = buf.lock();
            guard.map(0, |block: &IndirectBlock| block.present().collect())
        };
        for child in children {
            if depth > 1 {
                self.release_indirect(child, depth - 1)?;
            } else {
                self.free_block(child)?;
            }
        }
        self.free_block(bn)
    }
}
