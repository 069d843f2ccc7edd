//! Free-space bitmap allocator.
//!
//! One bit per file-system block, packed into the blocks between the super
//! block and the inode table; bit set means block in use. The bitmap is the
//! sole authority on allocation state.

use crate::{
    error::FsError,
    fs::FsInner,
    repr::{BitmapBlock, BlockNo, BITS_PER_BLOCK},
};

impl FsInner {
    /// Allocates a zeroed block.
    ///
    /// The lowest free index wins, which biases allocation toward the
    /// beginning of the device. The block's contents are cleared through the
    /// cache before the number is returned, so callers always see a clean
    /// canvas.
    pub(crate) fn alloc_block(&self) -> Result<BlockNo, FsError> {
        let total = self.superblock.num_blocks as usize;
        for base in (0..total).step_by(BITS_PER_BLOCK) {
            let buf = self.cache.get(self.superblock.bitmap_block(base).as_index())?;
            let mut guard = buf.lock();
            let bit = guard.map(0, |bm: &BitmapBlock| {
                (0..BITS_PER_BLOCK)
                    .take_while(|bit| base + *bit < total)
                    .find(|bit| !bm.is_allocated(*bit))
            });
            let Some(bit) = bit else { continue };
            guard.map_mut(0, |bm: &mut BitmapBlock| bm.allocate(bit));
            drop(guard);

            let bn = BlockNo::new((base + bit) as u32);
            self.zero_block(bn)?;
            return Ok(bn);
        }
        log::warn!("gosfs: out of blocks");
        Err(FsError::NoSpace)
    }

    /// Frees block `bn`. Its contents are left in place.
    ///
    /// # Panics
    ///
    /// Panics if the block is already free.
    pub(crate) fn free_block(&self, bn: BlockNo) -> Result<(), FsError> {
        let buf = self
            .cache
            .get(self.superblock.bitmap_block(bn.as_index()).as_index())?;
        let mut guard = buf.lock();
        let bit = bn.as_index() % BITS_PER_BLOCK;
        guard.map_mut(0, |bm: &mut BitmapBlock| {
            assert!(bm.is_allocated(bit), "freeing free block");
            bm.free(bit);
        });
        Ok(())
    }

    /// Counts the unallocated blocks on the volume.
    pub(crate) fn count_free_blocks(&self) -> Result<usize, FsError> {
        let total = self.superblock.num_blocks as usize;
        let mut free = 0;
        for base in (0..total).step_by(BITS_PER_BLOCK) {
            let buf = self.cache.get(self.superblock.bitmap_block(base).as_index())?;
            let guard = buf.lock();
            free += guard.map(0, |bm: &BitmapBlock| {
                (0..BITS_PER_BLOCK)
                    .take_while(|bit| base + *bit < total)
                    .filter(|bit| !bm.is_allocated(*bit))
                    .count()
            });
        }
        Ok(free)
    }

    fn zero_block(&self, bn: BlockNo) -> Result<(), FsError> {
        self.cache.get(bn.as_index())?.lock().fill_zero();
        Ok(())
    }
}
