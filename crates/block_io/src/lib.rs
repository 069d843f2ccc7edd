//! Write-behind cache for file-system block I/O.
//!
//! A block device speaks sectors; a file system speaks blocks that span a
//! fixed number of consecutive sectors. [`BlockIoCache`] sits between the
//! two: it keeps a bounded pool of block-sized buffers, hands out pinned
//! references to them, tracks which buffers have been modified, and writes
//! modified buffers back when they are recycled or when the whole cache is
//! flushed.
//!
//! Pinning is reference counted: a buffer stays in the cache for as long as
//! any reference returned by [`BlockIoCache::get`] is alive, and becomes
//! eligible for recycling as soon as the last reference is dropped.
//! Acquisition and release are therefore paired on every exit path,
//! including errors.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

use alloc::{boxed::Box, sync::Arc, vec::Vec};
use core::mem;

use dataview::{Pod, PodMethods as _};
use spin::Mutex;

/// Size of one device sector in bytes.
pub const SECTOR_SIZE: usize = 512;

/// A sector-granularity block device.
///
/// `buf` is always exactly [`SECTOR_SIZE`] bytes long.
pub trait BlockDevice: Send + Sync {
    /// Reads sector `index` into `buf`.
    fn read_sector(&self, index: usize, buf: &mut [u8]) -> Result<(), IoError>;

    /// Writes `buf` to sector `index`.
    fn write_sector(&self, index: usize, buf: &[u8]) -> Result<(), IoError>;

    /// Returns the total number of sectors on the device.
    fn num_sectors(&self) -> usize;
}

/// Errors surfaced by a block device or the cache in front of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum IoError {
    #[error("sector {0} out of device range")]
    OutOfRange(usize),
    #[error("read failed at sector {0}")]
    Read(usize),
    #[error("write failed at sector {0}")]
    Write(usize),
}

/// Block-sized byte storage, kept at word alignment so that on-disk records
/// can be viewed in place through [`dataview`].
#[repr(C, align(8))]
struct BlockData<const BLOCK_SIZE: usize>([u8; BLOCK_SIZE]);

unsafe impl<const BLOCK_SIZE: usize> Pod for BlockData<BLOCK_SIZE> {}

/// One cached file-system block.
pub struct Buffer<const BLOCK_SIZE: usize> {
    device: Arc<dyn BlockDevice>,
    block_no: usize,
    data: Box<BlockData<BLOCK_SIZE>>,
    dirty: bool,
}

impl<const BLOCK_SIZE: usize> Buffer<BLOCK_SIZE> {
    const SECTORS_PER_BLOCK: usize = BLOCK_SIZE / SECTOR_SIZE;

    fn read_in(device: Arc<dyn BlockDevice>, block_no: usize) -> Result<Self, IoError> {
        let mut data = Box::new(BlockData([0; BLOCK_SIZE]));
        for i in 0..Self::SECTORS_PER_BLOCK {
            let sector = block_no * Self::SECTORS_PER_BLOCK + i;
            device.read_sector(sector, &mut data.0[i * SECTOR_SIZE..][..SECTOR_SIZE])?;
        }
        Ok(Self {
            device,
            block_no,
            data,
            dirty: false,
        })
    }

    /// Returns the block number this buffer caches.
    pub fn block_no(&self) -> usize {
        self.block_no
    }

    /// Returns the block contents.
    pub fn bytes(&self) -> &[u8] {
        &self.data.0
    }

    /// Returns the block contents for modification, marking the buffer dirty.
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.dirty = true;
        &mut self.data.0
    }

    /// Views the record of type `T` at `offset` into the block.
    pub fn map<T, R>(&self, offset: usize, f: impl FnOnce(&T) -> R) -> R
    where
        T: Pod,
    {
        assert!(offset + mem::size_of::<T>() <= BLOCK_SIZE);
        f(self.data.as_data_view().get(offset))
    }

    /// Views the record of type `T` at `offset` for modification, marking the
    /// buffer dirty.
    pub fn map_mut<T, R>(&mut self, offset: usize, f: impl FnOnce(&mut T) -> R) -> R
    where
        T: Pod,
    {
        assert!(offset + mem::size_of::<T>() <= BLOCK_SIZE);
        self.dirty = true;
        f(self.data.as_data_view_mut().get_mut(offset))
    }

    /// Fills the whole block with zeros, marking the buffer dirty.
    pub fn fill_zero(&mut self) {
        self.dirty = true;
        self.data.0.fill(0);
    }

    /// Writes the buffer back to the device if it has been modified.
    pub fn sync(&mut self) -> Result<(), IoError> {
        if self.dirty {
            for i in 0..Self::SECTORS_PER_BLOCK {
                let sector = self.block_no * Self::SECTORS_PER_BLOCK + i;
                self.device
                    .write_sector(sector, &self.data.0[i * SECTOR_SIZE..][..SECTOR_SIZE])?;
            }
            self.dirty = false;
        }
        Ok(())
    }
}

impl<const BLOCK_SIZE: usize> Drop for Buffer<BLOCK_SIZE> {
    fn drop(&mut self) {
        // Recycling already wrote the buffer back; this catches buffers that
        // are still dirty when the cache itself is torn down.
        let _ = self.sync();
    }
}

/// A bounded write-behind cache of file-system blocks over a sector device.
pub struct BlockIoCache<const BLOCK_SIZE: usize> {
    device: Arc<dyn BlockDevice>,
    capacity: usize,
    buffers: Mutex<Vec<(usize, Arc<Mutex<Buffer<BLOCK_SIZE>>>)>>,
}

impl<const BLOCK_SIZE: usize> BlockIoCache<BLOCK_SIZE> {
    /// Creates a cache of at most `capacity` buffers over `device`.
    ///
    /// # Panics
    ///
    /// Panics if `BLOCK_SIZE` is not a positive multiple of [`SECTOR_SIZE`]
    /// or `capacity` is zero.
    pub fn new(device: Arc<dyn BlockDevice>, capacity: usize) -> Self {
        assert!(BLOCK_SIZE != 0 && BLOCK_SIZE % SECTOR_SIZE == 0);
        assert!(capacity > 0);
        Self {
            device,
            capacity,
            buffers: Mutex::new(Vec::new()),
        }
    }

    /// Returns the number of whole blocks the underlying device holds.
    pub fn num_blocks(&self) -> usize {
        self.device.num_sectors() / (BLOCK_SIZE / SECTOR_SIZE)
    }

    /// Returns a pinned reference to the buffer caching `block_no`, reading
    /// the block from the device on a miss.
    ///
    /// On a miss with the cache full, the oldest unpinned buffer is written
    /// back (if dirty) and recycled.
    ///
    /// # Panics
    ///
    /// Panics if every buffer in the cache is pinned.
    pub fn get(&self, block_no: usize) -> Result<Arc<Mutex<Buffer<BLOCK_SIZE>>>, IoError> {
        if block_no >= self.num_blocks() {
            return Err(IoError::OutOfRange(block_no * (BLOCK_SIZE / SECTOR_SIZE)));
        }

        let mut buffers = self.buffers.lock();

        if let Some(buf) = buffers
            .iter()
            .find_map(|(no, buf)| (*no == block_no).then(|| Arc::clone(buf)))
        {
            return Ok(buf);
        }

        if buffers.len() == self.capacity {
            let idx = buffers
                .iter()
                .position(|(_, buf)| Arc::strong_count(buf) == 1)
                .expect("all block buffers pinned");
            let (_, victim) = buffers.remove(idx);
            victim.lock().sync()?;
        }

        let buf = Arc::new(Mutex::new(Buffer::read_in(
            Arc::clone(&self.device),
            block_no,
        )?));
        buffers.push((block_no, Arc::clone(&buf)));
        Ok(buf)
    }

    /// Writes every modified buffer back to the device.
    pub fn flush(&self) -> Result<(), IoError> {
        let buffers = self.buffers.lock();
        for (_, buf) in buffers.iter() {
            buf.lock().sync()?;
        }
        Ok(())
    }
}
