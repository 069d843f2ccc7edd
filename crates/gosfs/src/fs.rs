//! The mount instance and the volume-level operations.
//!
//! A mounted volume is the cached super block, a block cache opened on the
//! device, and the registry of inodes with live open records. One mutex per
//! instance serializes every externally visible operation, so all volume
//! invariants hold at operation granularity; the mutex is released on every
//! exit path by the lock guard. Distinct mounts are fully independent.

use alloc::{collections::BTreeMap, sync::Arc};

use block_io::{BlockDevice, BlockIoCache};
use dataview::PodMethods as _;
use spin::Mutex;

use crate::{
    error::FsError,
    file::{Dir, File, OpenMode},
    repr::{
        BitmapBlock, BlockNo, DirBlock, DirEntryKind, InodeBlock, InodeFlags, InodeNo, SuperBlock,
        BITS_PER_BLOCK, BLOCK_SIZE, NUM_INODE_BLOCKS,
    },
    stat::Stat,
};

/// Buffers kept by a mount's block cache.
const CACHE_CAPACITY: usize = 32;

pub(crate) struct FsInner {
    pub(crate) superblock: SuperBlock,
    pub(crate) cache: BlockIoCache<BLOCK_SIZE>,
    /// Inodes with live open records, by inode number; delete refuses them.
    open_inodes: BTreeMap<u32, usize>,
}

/// A mounted GOSFS volume.
///
/// Cloning yields another reference to the same mount.
#[derive(Clone)]
pub struct GosFs {
    pub(crate) inner: Arc<Mutex<FsInner>>,
}

impl GosFs {
    /// Writes a fresh, empty file system onto `device`.
    ///
    /// The volume is laid out as super block, bitmap, inode table, then the
    /// data region; the bitmap starts with every block below the data
    /// region marked used. The root directory is materialized at inode
    /// [`InodeNo::ROOT`] with one data block holding its self-reference,
    /// named "/".
    pub fn format(device: &Arc<dyn BlockDevice>) -> Result<(), FsError> {
        let cache = BlockIoCache::<BLOCK_SIZE>::new(Arc::clone(device), CACHE_CAPACITY);
        let num_blocks = cache.num_blocks();
        let num_bitmap_blocks = num_blocks.div_ceil(BITS_PER_BLOCK);

        let mut sb = SuperBlock::zeroed();
        sb.init(num_blocks as u32, num_bitmap_blocks as u32);
        if !sb.is_valid() {
            // device too small for the metadata regions plus one data block
            return Err(FsError::InvalidArgument);
        }

        {
            let buf = cache.get(SuperBlock::SUPER_BLOCK_NO.as_index())?;
            let mut guard = buf.lock();
            guard.fill_zero();
            guard.map_mut(0, |disk_sb: &mut SuperBlock| *disk_sb = sb);
        }

        for i in 0..num_bitmap_blocks {
            cache.get(sb.bitmap_start as usize + i)?.lock().fill_zero();
        }
        for bn in 0..sb.data_start as usize {
            let buf = cache.get(sb.bitmap_block(bn).as_index())?;
            buf.lock()
                .map_mut(0, |bm: &mut BitmapBlock| bm.allocate(bn % BITS_PER_BLOCK));
        }

        for i in 0..NUM_INODE_BLOCKS {
            cache.get(sb.inode_start as usize + i)?.lock().fill_zero();
        }

        // Root directory: the first data block, with the THIS entry.
        let root_block = BlockNo::new(sb.data_start);
        {
            let buf = cache.get(sb.bitmap_block(root_block.as_index()).as_index())?;
            buf.lock().map_mut(0, |bm: &mut BitmapBlock| {
                bm.allocate(root_block.as_index() % BITS_PER_BLOCK);
            });
        }
        {
            let buf = cache.get(root_block.as_index())?;
            let mut guard = buf.lock();
            guard.fill_zero();
            guard.map_mut(0, |block: &mut DirBlock| {
                block.init_free();
                block.entries_mut()[0].set(DirEntryKind::This, InodeNo::ROOT, b"/");
            });
        }
        {
            let buf = cache.get(sb.inode_block(InodeNo::ROOT).as_index())?;
            buf.lock().map_mut(0, |block: &mut InodeBlock| {
                let root = block.inode_mut(InodeNo::ROOT);
                root.allocate(InodeFlags::DIRECTORY);
                root.size = 1;
                root.set_ptr(0, Some(root_block));
            });
        }

        cache.flush()?;
        log::debug!(
            "gosfs: formatted {num_blocks} blocks, data region starts at {}",
            sb.data_start
        );
        Ok(())
    }

    /// Mounts the file system on `device`.
    ///
    /// Fails with [`FsError::InvalidFs`] if block 0 does not carry a valid
    /// GOSFS header.
    pub fn mount(device: Arc<dyn BlockDevice>) -> Result<Self, FsError> {
        let cache = BlockIoCache::<BLOCK_SIZE>::new(device, CACHE_CAPACITY);
        let sb = {
            let buf = cache.get(SuperBlock::SUPER_BLOCK_NO.as_index())?;
            let guard = buf.lock();
            guard.map(0, |sb: &SuperBlock| *sb)
        };
        if !sb.is_valid() || sb.num_blocks as usize > cache.num_blocks() {
            return Err(FsError::InvalidFs);
        }
        log::debug!("gosfs: mounted volume of {} blocks", sb.num_blocks);
        Ok(Self {
            inner: Arc::new(Mutex::new(FsInner {
                superblock: sb,
                cache,
                open_inodes: BTreeMap::new(),
            })),
        })
    }

    /// Opens the file at `path`.
    ///
    /// `mode` must request reading or writing. With [`OpenMode::CREATE`], a
    /// missing file is created as a regular entry in its parent directory;
    /// without it, a missing path fails with [`FsError::NotFound`].
    /// Directories cannot be opened as files.
    pub fn open(&self, path: &str, mode: OpenMode) -> Result<File, FsError> {
        if !mode.intersects(OpenMode::READ | OpenMode::WRITE) {
            return Err(FsError::InvalidArgument);
        }
        let mut inner = self.inner.lock();
        let ino = match inner.resolve(path) {
            Ok(ino) => {
                if inner.read_inode(ino)?.is_dir() {
                    return Err(FsError::InvalidArgument);
                }
                ino
            }
            Err(FsError::NotFound) if mode.contains(OpenMode::CREATE) => inner.create_file(path)?,
            Err(err) => return Err(err),
        };
        inner.acquire(ino);
        drop(inner);
        Ok(File::new(Arc::clone(&self.inner), ino, mode))
    }

    /// Creates the directory named by `path`.
    ///
    /// The new directory starts with one data block holding only its
    /// self-reference.
    pub fn mkdir(&self, path: &str) -> Result<(), FsError> {
        let inner = self.inner.lock();
        let (parent, name) = inner.resolve_parent(path)?;
        let parent_inode = inner.read_inode(parent)?;
        if !parent_inode.is_dir() {
            return Err(FsError::NotFound);
        }
        if inner.dir_lookup(&parent_inode, name.as_bytes())?.is_some() {
            return Err(FsError::InvalidArgument);
        }

        let ino = inner.alloc_inode(InodeFlags::DIRECTORY)?;
        if let Err(err) = inner
            .init_dir(ino, name.as_bytes())
            .and_then(|()| inner.dir_insert(parent, name.as_bytes(), ino))
        {
            let _ = inner.release_blocks(ino);
            let _ = inner.free_inode(ino);
            return Err(err);
        }
        Ok(())
    }

    /// Opens the directory at `path`, snapshotting its live entries for
    /// [`Dir::read_entry`].
    pub fn open_dir(&self, path: &str) -> Result<Dir, FsError> {
        let mut inner = self.inner.lock();
        let ino = inner.resolve(path)?;
        let inode = inner.read_inode(ino)?;
        if !inode.is_dir() {
            return Err(FsError::InvalidArgument);
        }
        let entries = inner.dir_snapshot(&inode)?;
        inner.acquire(ino);
        drop(inner);
        Ok(Dir::new(Arc::clone(&self.inner), ino, entries))
    }

    /// Copies the metadata of the file or directory at `path`.
    pub fn stat(&self, path: &str) -> Result<Stat, FsError> {
        let inner = self.inner.lock();
        let ino = inner.resolve(path)?;
        inner.stat_inode(ino)
    }

    /// Removes the file or directory at `path`, releasing every block it
    /// reached.
    ///
    /// Fails with [`FsError::AccessDenied`] for non-empty directories and
    /// for inodes with live open records. The root cannot be deleted.
    pub fn delete(&self, path: &str) -> Result<(), FsError> {
        let inner = self.inner.lock();
        let (parent, name) = inner.resolve_parent(path)?;
        let parent_inode = inner.read_inode(parent)?;
        if !parent_inode.is_dir() {
            return Err(FsError::NotFound);
        }
        let ino = inner
            .dir_lookup(&parent_inode, name.as_bytes())?
            .ok_or(FsError::NotFound)?;

        if inner.is_open(ino) {
            return Err(FsError::AccessDenied);
        }
        let inode = inner.read_inode(ino)?;
        if inode.is_dir() && !inner.dir_is_empty(&inode)? {
            return Err(FsError::AccessDenied);
        }

        inner.release_blocks(ino)?;
        inner.free_inode(ino)?;
        inner.dir_remove(parent, ino)?;
        Ok(())
    }

    /// Flushes every buffered block back to the device.
    pub fn sync(&self) -> Result<(), FsError> {
        let inner = self.inner.lock();
        inner.cache.flush()?;
        Ok(())
    }

    /// Counts the unallocated blocks on the volume.
    pub fn free_blocks(&self) -> Result<usize, FsError> {
        let inner = self.inner.lock();
        inner.count_free_blocks()
    }
}

impl FsInner {
    /// Allocates an inode for a new regular file and links it into the
    /// parent directory.
    fn create_file(&self, path: &str) -> Result<InodeNo, FsError> {
        let (parent, name) = self.resolve_parent(path)?;
        if !self.read_inode(parent)?.is_dir() {
            return Err(FsError::NotFound);
        }
        let ino = self.alloc_inode(InodeFlags::empty())?;
        if let Err(err) = self.dir_insert(parent, name.as_bytes(), ino) {
            // back the inode out so a full parent directory does not leak it
            let _ = self.free_inode(ino);
            return Err(err);
        }
        Ok(ino)
    }

    pub(crate) fn stat_inode(&self, ino: InodeNo) -> Result<Stat, FsError> {
        let inode = self.read_inode(ino)?;
        Ok(Stat {
            size: inode.size,
            is_directory: inode.is_dir(),
            is_setuid: inode.is_setuid(),
            acl: inode.acl,
        })
    }

    fn acquire(&mut self, ino: InodeNo) {
        *self.open_inodes.entry(ino.value()).or_insert(0) += 1;
    }

    pub(crate) fn release(&mut self, ino: InodeNo) {
        if let Some(count) = self.open_inodes.get_mut(&ino.value()) {
            *count -= 1;
            if *count == 0 {
                self.open_inodes.remove(&ino.value());
            }
        }
    }

    fn is_open(&self, ino: InodeNo) -> bool {
        self.open_inodes.contains_key(&ino.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::MemDisk;

    #[test]
    fn mount_unformatted_volume_fails() {
        let device = MemDisk::device(1024);
        assert_eq!(GosFs::mount(device).err(), Some(FsError::InvalidFs));
    }

    #[test]
    fn mount_rejects_wrong_magic() {
        let device = MemDisk::device(20480);
        GosFs::format(&device).unwrap();
        // corrupt the magic in place
        let mut first = [0u8; block_io::SECTOR_SIZE];
        device.read_sector(0, &mut first).unwrap();
        first[0] ^= 0xff;
        device.write_sector(0, &first).unwrap();

        assert_eq!(GosFs::mount(device).err(), Some(FsError::InvalidFs));
    }

    #[test]
    fn format_needs_room_for_data() {
        // enough sectors for the metadata prefix but no data block
        let device = MemDisk::device(8 * 40);
        assert_eq!(
            GosFs::format(&device).err(),
            Some(FsError::InvalidArgument)
        );
    }

    #[test]
    fn format_then_mount_exposes_empty_root() {
        let device = MemDisk::device(20480);
        GosFs::format(&device).unwrap();
        let fs = GosFs::mount(device).unwrap();

        let stat = fs.stat("/").unwrap();
        assert_eq!(stat.size, 1);
        assert!(stat.is_directory);
        assert!(!stat.is_setuid);

        let mut root = fs.open_dir("/").unwrap();
        let this = root.read_entry().unwrap();
        assert_eq!(this.kind, DirEntryKind::This);
        assert_eq!(this.name, "/");
        assert_eq!(this.ino, InodeNo::ROOT);
        assert_eq!(root.read_entry(), None);
    }
}
