//! On-disk data types for a GOSFS volume.
//!
//! The data layout:
//!
//! | block no.        | # of blocks            | content     | type            |
//! |------------------|------------------------|-------------|-----------------|
//! | 0                | 1                      | super block | [`SuperBlock`]  |
//! | `sb.bitmap_start`| `sb.num_blocks / BPB`  | bitmap      | [`BitmapBlock`] |
//! | `sb.inode_start` | `NUM_INODE_BLOCKS`     | inode table | [`InodeBlock`]  |
//! | `sb.data_start`  | rest                   | data blocks | data, [`DirBlock`] and [`IndirectBlock`] |
//!
//! Only the super block's own position is fixed; the bitmap, inode table and
//! data region are found through the offsets it stores. All integers are
//! little-endian and block pointers are 32 bits wide; a zero pointer means
//! "absent".

use core::mem;

use bitflags::bitflags;
use dataview::{Pod, PodMethods as _};
use strum::FromRepr;

/// Number of device sectors per file-system block.
pub const SECTORS_PER_BLOCK: usize = 8;

/// Size of a file-system block in bytes.
pub const BLOCK_SIZE: usize = block_io::SECTOR_SIZE * SECTORS_PER_BLOCK;

/// Bitmap bits per block.
pub const BITS_PER_BLOCK: usize = BLOCK_SIZE * 8;

/// Number of direct block pointers in an inode.
pub const NUM_DIRECT: usize = 8;

/// Number of singly-indirect block pointers in an inode.
pub const NUM_INDIRECT: usize = 1;

/// Number of doubly-indirect block pointers in an inode.
pub const NUM_DOUBLE_INDIRECT: usize = 1;

/// Total number of block pointers in an inode.
pub const NUM_BLOCK_PTRS: usize = NUM_DIRECT + NUM_INDIRECT + NUM_DOUBLE_INDIRECT;

/// Inode slot holding the singly-indirect pointer.
pub const INDIRECT_SLOT: usize = NUM_DIRECT;

/// Inode slot holding the doubly-indirect pointer.
pub const DOUBLE_INDIRECT_SLOT: usize = NUM_DIRECT + NUM_INDIRECT;

/// Number of block pointers held by one indirection block.
pub const PTRS_PER_BLOCK: usize = BLOCK_SIZE / mem::size_of::<u32>();

/// Highest logical block index reachable through the direct pointers.
pub const DIRECT_CAP: usize = NUM_DIRECT;

/// Highest logical block index reachable through single indirection.
pub const INDIRECT_CAP: usize = DIRECT_CAP + NUM_INDIRECT * PTRS_PER_BLOCK;

/// Maximum number of logical blocks a file can address.
pub const MAX_FILE_BLOCKS: usize =
    INDIRECT_CAP + NUM_DOUBLE_INDIRECT * PTRS_PER_BLOCK * PTRS_PER_BLOCK;

/// Maximum file size in bytes.
pub const MAX_FILE_SIZE: u64 = MAX_FILE_BLOCKS as u64 * BLOCK_SIZE as u64;

/// Maximum filename length; the on-disk field adds one byte for the NUL.
pub const FILENAME_MAX: usize = 127;

/// Number of ACL entries carried by every inode.
pub const MAX_ACL_ENTRIES: usize = 10;

/// Number of inodes a volume holds.
pub const NUM_INODES: usize = 1024;

/// Inodes per inode-table block.
pub const INODES_PER_BLOCK: usize = BLOCK_SIZE / mem::size_of::<Inode>();

/// Number of blocks occupied by the inode table.
pub const NUM_INODE_BLOCKS: usize = NUM_INODES.div_ceil(INODES_PER_BLOCK);

/// Directory entries per directory data block.
pub const DIR_ENTRIES_PER_BLOCK: usize = BLOCK_SIZE / mem::size_of::<DirEntry>();

/// Represents a file-system block number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct BlockNo(u32);

unsafe impl Pod for BlockNo {}

impl BlockNo {
    /// Creates a new `BlockNo` with the given value.
    #[must_use]
    pub const fn new(n: u32) -> Self {
        Self(n)
    }

    /// Returns the value of the block number.
    #[must_use]
    pub const fn value(&self) -> u32 {
        self.0
    }

    /// Converts the block number to an index.
    #[must_use]
    pub const fn as_index(&self) -> usize {
        self.0 as usize
    }
}

/// Represents an inode number (an index into the inode table).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct InodeNo(u32);

unsafe impl Pod for InodeNo {}

impl InodeNo {
    /// The root directory's inode number. Inode 0 stays unused so that a
    /// zero inode field always means a free directory entry.
    pub const ROOT: Self = Self::new(1);

    /// Creates a new `InodeNo` with the given value.
    #[must_use]
    pub const fn new(n: u32) -> Self {
        Self(n)
    }

    /// Returns the value of the inode number.
    #[must_use]
    pub const fn value(&self) -> u32 {
        self.0
    }

    /// Converts the inode number to an index.
    #[must_use]
    pub const fn as_index(&self) -> usize {
        self.0 as usize
    }
}

/// Represents the super block of the file system.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct SuperBlock {
    /// Magic number. Must be [`Self::MAGIC`].
    pub magic: u32,
    /// Size of the super-block structure in bytes.
    pub super_size: u32,
    /// Total number of file-system blocks on the volume.
    pub num_blocks: u32,
    /// Block number of the first bitmap block.
    pub bitmap_start: u32,
    /// Block number of the first inode-table block.
    pub inode_start: u32,
    /// Block number of the first data block.
    pub data_start: u32,
}

unsafe impl Pod for SuperBlock {}

impl SuperBlock {
    /// Magic number identifying a GOSFS volume.
    pub const MAGIC: u32 = 0x0d00_0721;

    /// Block number of the super block.
    pub const SUPER_BLOCK_NO: BlockNo = BlockNo::new(0);

    /// Fills in the super block for a volume of `num_blocks` blocks.
    pub fn init(&mut self, num_blocks: u32, num_bitmap_blocks: u32) {
        self.magic = Self::MAGIC;
        self.super_size = mem::size_of::<Self>() as u32;
        self.num_blocks = num_blocks;
        self.bitmap_start = 1;
        self.inode_start = self.bitmap_start + num_bitmap_blocks;
        self.data_start = self.inode_start + NUM_INODE_BLOCKS as u32;
    }

    /// Returns `true` if the header identifies a well-formed GOSFS volume.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.magic == Self::MAGIC
            && self.super_size as usize >= mem::size_of::<Self>()
            && self.bitmap_start > 0
            && self.inode_start > self.bitmap_start
            && self.data_start > self.inode_start
            && self.data_start < self.num_blocks
    }

    /// Returns the bitmap block covering file-system block `bn`.
    #[must_use]
    pub fn bitmap_block(&self, bn: usize) -> BlockNo {
        BlockNo::new(self.bitmap_start + (bn / BITS_PER_BLOCK) as u32)
    }

    /// Returns the inode-table block containing `ino`.
    #[must_use]
    pub fn inode_block(&self, ino: InodeNo) -> BlockNo {
        BlockNo::new(self.inode_start + (ino.as_index() / INODES_PER_BLOCK) as u32)
    }
}

bitflags! {
    /// Inode flag bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InodeFlags: u64 {
        /// The inode is allocated.
        const USED = 0x1;
        /// The inode describes a directory.
        const DIRECTORY = 0x2;
        /// The file executes with the uid of its owner.
        const SETUID = 0x4;
    }
}

/// One access-control entry; the first entry of an inode's vector describes
/// the file's owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct AclEntry {
    pub uid: u32,
    pub permission: u32,
    pub valid: u32,
}

unsafe impl Pod for AclEntry {}

/// On-disk inode.
///
/// `size` is the file length in bytes for regular files and the number of
/// populated directory entries for directories.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct Inode {
    pub size: u64,
    pub flags: u64,
    /// Direct pointers first, then [`NUM_INDIRECT`] singly-indirect and
    /// [`NUM_DOUBLE_INDIRECT`] doubly-indirect pointers.
    pub block_list: [u32; NUM_BLOCK_PTRS],
    pub acl: [AclEntry; MAX_ACL_ENTRIES],
}

unsafe impl Pod for Inode {}

impl Inode {
    /// Returns the inode's flag bits.
    #[must_use]
    pub fn flags(&self) -> InodeFlags {
        InodeFlags::from_bits_truncate(self.flags)
    }

    /// Returns `true` if the inode is allocated.
    #[must_use]
    pub fn is_used(&self) -> bool {
        self.flags().contains(InodeFlags::USED)
    }

    /// Returns `true` if the inode describes a directory.
    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.flags().contains(InodeFlags::DIRECTORY)
    }

    /// Returns `true` if the setuid bit is set.
    #[must_use]
    pub fn is_setuid(&self) -> bool {
        self.flags().contains(InodeFlags::SETUID)
    }

    /// Marks this inode allocated with the given flags, zeroing its size,
    /// block pointers and ACL vector.
    ///
    /// # Panics
    ///
    /// Panics if the inode is already in use.
    pub fn allocate(&mut self, flags: InodeFlags) {
        assert!(!self.is_used(), "allocating a live inode");
        *self = Self::zeroed();
        self.flags = (flags | InodeFlags::USED).bits();
    }

    /// Returns the block pointer in `slot`, `None` if it is absent.
    #[must_use]
    pub fn ptr(&self, slot: usize) -> Option<BlockNo> {
        match self.block_list[slot] {
            0 => None,
            n => Some(BlockNo::new(n)),
        }
    }

    /// Stores `bn` in `slot`.
    ///
    /// # Panics
    ///
    /// Panics if `bn` is `Some` with value zero.
    pub fn set_ptr(&mut self, slot: usize, bn: Option<BlockNo>) {
        self.block_list[slot] = bn.map_or(0, |bn| {
            assert_ne!(bn.value(), 0);
            bn.value()
        });
    }
}

/// One block of the inode table.
#[repr(transparent)]
pub struct InodeBlock([Inode; INODES_PER_BLOCK]);

unsafe impl Pod for InodeBlock {}

impl InodeBlock {
    #[must_use]
    pub fn inode(&self, ino: InodeNo) -> &Inode {
        &self.0[ino.as_index() % INODES_PER_BLOCK]
    }

    #[must_use]
    pub fn inode_mut(&mut self, ino: InodeNo) -> &mut Inode {
        &mut self.0[ino.as_index() % INODES_PER_BLOCK]
    }
}

/// Type tag of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(i64)]
pub enum DirEntryKind {
    /// Unoccupied slot.
    Free = -1,
    /// A file or subdirectory.
    Regular = 0,
    /// The directory's self-reference, written when the directory is created.
    This = 1,
}

/// One record in a directory's data blocks, mapping a filename to an inode.
#[derive(Clone, Copy)]
#[repr(C)]
pub struct DirEntry {
    name: [u8; FILENAME_MAX + 1],
    kind: i64,
    ino: u64,
}

unsafe impl Pod for DirEntry {}

impl DirEntry {
    /// Returns the entry's type tag; unrecognized tags read as free.
    #[must_use]
    pub fn kind(&self) -> DirEntryKind {
        DirEntryKind::from_repr(self.kind).unwrap_or(DirEntryKind::Free)
    }

    /// Returns `true` if the slot is unoccupied.
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.kind() == DirEntryKind::Free
    }

    /// Returns the inode number the entry references.
    #[must_use]
    pub fn ino(&self) -> Option<InodeNo> {
        match u32::try_from(self.ino) {
            Ok(0) | Err(_) => None,
            Ok(n) => Some(InodeNo::new(n)),
        }
    }

    /// Returns the name of the directory entry.
    #[must_use]
    pub fn name(&self) -> &[u8] {
        let len = self
            .name
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(FILENAME_MAX);
        &self.name[..len]
    }

    /// Checks if the entry name matches `name`, comparing at most
    /// [`FILENAME_MAX`] bytes since stored names are truncated to that
    /// length.
    #[must_use]
    pub fn is_same_name(&self, name: &[u8]) -> bool {
        let len = usize::min(name.len(), FILENAME_MAX);
        self.name() == &name[..len]
    }

    /// Sets the name of the directory entry. Names longer than
    /// [`FILENAME_MAX`] bytes are truncated.
    pub fn set_name(&mut self, name: &[u8]) {
        let len = usize::min(name.len(), FILENAME_MAX);
        self.name[..len].copy_from_slice(&name[..len]);
        self.name[len..].fill(0);
    }

    /// Populates the slot with a live entry.
    pub fn set(&mut self, kind: DirEntryKind, ino: InodeNo, name: &[u8]) {
        self.kind = kind as i64;
        self.ino = u64::from(ino.value());
        self.set_name(name);
    }

    /// Overwrites the slot with a free record: zero inode, zero filename,
    /// free tag.
    pub fn clear(&mut self) {
        self.name.fill(0);
        self.kind = DirEntryKind::Free as i64;
        self.ino = 0;
    }
}

/// One data block of a directory.
#[repr(transparent)]
pub struct DirBlock([DirEntry; DIR_ENTRIES_PER_BLOCK]);

unsafe impl Pod for DirBlock {}

impl DirBlock {
    #[must_use]
    pub fn entries(&self) -> &[DirEntry] {
        &self.0
    }

    #[must_use]
    pub fn entries_mut(&mut self) -> &mut [DirEntry] {
        &mut self.0
    }

    /// Marks every slot free; a freshly allocated directory block must be
    /// initialized this way because an all-zero record does not carry the
    /// free tag.
    pub fn init_free(&mut self) {
        for entry in &mut self.0 {
            entry.clear();
        }
    }
}

/// A block full of block pointers, used for single and double indirection.
#[repr(transparent)]
pub struct IndirectBlock([u32; PTRS_PER_BLOCK]);

unsafe impl Pod for IndirectBlock {}

impl IndirectBlock {
    /// Returns the block pointer in `slot`, `None` if it is absent.
    #[must_use]
    pub fn get(&self, slot: usize) -> Option<BlockNo> {
        match self.0[slot] {
            0 => None,
            n => Some(BlockNo::new(n)),
        }
    }

    /// Stores `bn` in `slot`.
    ///
    /// # Panics
    ///
    /// Panics if `bn` is `Some` with value zero.
    pub fn set(&mut self, slot: usize, bn: Option<BlockNo>) {
        self.0[slot] = bn.map_or(0, |bn| {
            assert_ne!(bn.value(), 0);
            bn.value()
        });
    }

    /// Iterates over every present pointer in slot order.
    pub fn present(&self) -> impl Iterator<Item = BlockNo> + '_ {
        self.0.iter().filter(|n| **n != 0).map(|n| BlockNo::new(*n))
    }
}

/// One block of the free-space bitmap; bit set means block in use.
#[repr(transparent)]
pub struct BitmapBlock([u8; BLOCK_SIZE]);

unsafe impl Pod for BitmapBlock {}

impl BitmapBlock {
    /// Returns `true` if the `n`th block covered by this bitmap block is
    /// allocated.
    #[must_use]
    pub fn is_allocated(&self, n: usize) -> bool {
        assert!(n < BITS_PER_BLOCK);
        self.0[n / 8] & (1 << (n % 8)) != 0
    }

    /// Marks the `n`th block covered by this bitmap block as allocated.
    pub fn allocate(&mut self, n: usize) {
        assert!(n < BITS_PER_BLOCK);
        self.0[n / 8] |= 1 << (n % 8);
    }

    /// Marks the `n`th block covered by this bitmap block as free.
    pub fn free(&mut self, n: usize) {
        assert!(n < BITS_PER_BLOCK);
        self.0[n / 8] &= !(1 << (n % 8));
    }
}

const _: () = {
    assert!(mem::size_of::<SuperBlock>() == 24);
    assert!(mem::size_of::<AclEntry>() == 12);
    assert!(mem::size_of::<Inode>() == 176);
    assert!(mem::size_of::<DirEntry>() == 144);
    assert!(mem::size_of::<IndirectBlock>() == BLOCK_SIZE);
    assert!(mem::size_of::<BitmapBlock>() == BLOCK_SIZE);
    assert!(mem::size_of::<InodeBlock>() <= BLOCK_SIZE);
    assert!(mem::size_of::<DirBlock>() <= BLOCK_SIZE);
    assert!(INODES_PER_BLOCK * NUM_INODE_BLOCKS >= NUM_INODES);
};
