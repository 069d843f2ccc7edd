//! End-to-end tests over a RAM-backed device.

use std::sync::{Arc, Mutex};
use std::thread;

use gosfs::{
    BlockDevice, DirEntryKind, FsError, GosFs, IoError, MountOps, OpenMode, SECTOR_SIZE,
};

struct MemDisk {
    sectors: Mutex<Vec<[u8; SECTOR_SIZE]>>,
}

impl MemDisk {
    fn device(num_sectors: usize) -> Arc<dyn BlockDevice> {
        Arc::new(Self {
            sectors: Mutex::new(vec![[0; SECTOR_SIZE]; num_sectors]),
        })
    }
}

impl BlockDevice for MemDisk {
    fn read_sector(&self, index: usize, buf: &mut [u8]) -> Result<(), IoError> {
        let sectors = self.sectors.lock().unwrap();
        let sector = sectors.get(index).ok_or(IoError::OutOfRange(index))?;
        buf.copy_from_slice(sector);
        Ok(())
    }

    fn write_sector(&self, index: usize, buf: &[u8]) -> Result<(), IoError> {
        let mut sectors = self.sectors.lock().unwrap();
        let sector = sectors.get_mut(index).ok_or(IoError::OutOfRange(index))?;
        sector.copy_from_slice(buf);
        Ok(())
    }

    fn num_sectors(&self) -> usize {
        self.sectors.lock().unwrap().len()
    }
}

/// Formats and mounts a 20 480-sector (10 MiB) volume.
fn fresh_fs() -> GosFs {
    let device = MemDisk::device(20480);
    GosFs::format(&device).unwrap();
    GosFs::mount(device).unwrap()
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 256) as u8).collect()
}

const BLOCK_SIZE: usize = 4096;
const RW: OpenMode = OpenMode::READ.union(OpenMode::WRITE);
const RWC: OpenMode = RW.union(OpenMode::CREATE);

#[test]
fn format_mount_stat_root() {
    let fs = fresh_fs();
    let stat = fs.stat("/").unwrap();
    assert_eq!(stat.size, 1);
    assert!(stat.is_directory);
    assert!(!stat.is_setuid);
    assert!(stat.acl.iter().all(|acl| acl.valid == 0));
}

#[test]
fn mkdir_nested_and_read_entries() {
    let fs = fresh_fs();
    fs.mkdir("/a").unwrap();
    fs.mkdir("/a/b").unwrap();

    let mut dir = fs.open_dir("/a").unwrap();
    let entries: Vec<_> = std::iter::from_fn(|| dir.read_entry()).collect();

    let regular: Vec<_> = entries
        .iter()
        .filter(|e| e.kind == DirEntryKind::Regular)
        .collect();
    assert_eq!(regular.len(), 1);
    assert_eq!(regular[0].name, "b");
    assert!(entries.iter().any(|e| e.kind == DirEntryKind::This));

    let stat = fs.stat("/a/b").unwrap();
    assert!(stat.is_directory);
    assert_eq!(stat.size, 1);
}

#[test]
fn fresh_directory_holds_only_its_self_reference() {
    let fs = fresh_fs();
    fs.mkdir("/d").unwrap();

    let mut dir = fs.open_dir("/d").unwrap();
    let first = dir.read_entry().unwrap();
    assert_eq!(first.kind, DirEntryKind::This);
    assert_eq!(dir.read_entry(), None);

    // seek rewinds the snapshot cursor
    dir.seek(0).unwrap();
    assert_eq!(dir.read_entry().unwrap().kind, DirEntryKind::This);
    assert!(dir.seek(10).is_err());
}

#[test]
fn write_read_round_trips() {
    let fs = fresh_fs();
    for (i, len) in [0, 1, BLOCK_SIZE - 1, BLOCK_SIZE, BLOCK_SIZE + 1, 40_000]
        .into_iter()
        .enumerate()
    {
        let path = format!("/f{i}");
        let data = pattern(len);

        let mut file = fs.open(&path, RWC).unwrap();
        assert_eq!(file.write(&data).unwrap(), len);
        file.seek(0).unwrap();

        let mut back = vec![0u8; len + 7];
        let n = file.read(&mut back).unwrap();
        assert_eq!(n, len);
        assert_eq!(&back[..n], &data[..]);
        assert_eq!(file.read(&mut back).unwrap(), 0);

        assert_eq!(fs.stat(&path).unwrap().size, len as u64);
    }
}

#[test]
fn forty_thousand_bytes_span_the_indirect_region() {
    // 40 000 bytes cover logical blocks 0..=9, two of which sit past the
    // eight direct pointers.
    let fs = fresh_fs();
    let data = pattern(40_000);

    let mut file = fs.open("/log", RWC).unwrap();
    file.write(&data).unwrap();
    file.seek(0).unwrap();

    let mut back = vec![0u8; 40_000];
    assert_eq!(file.read(&mut back).unwrap(), 40_000);
    assert_eq!(back, data);
    assert_eq!(fs.stat("/log").unwrap().size, 40_000);
}

#[test]
fn sparse_write_into_the_double_indirect_region() {
    let fs = fresh_fs();
    let double_start = (8 + 1024) * BLOCK_SIZE as u64;

    let mut file = fs.open("/sparse", OpenMode::WRITE | OpenMode::CREATE).unwrap();
    file.seek(double_start + 5).unwrap();
    file.write(b"xyz").unwrap();
    file.close();

    assert_eq!(fs.stat("/sparse").unwrap().size, double_start + 8);

    let mut file = fs.open("/sparse", OpenMode::READ).unwrap();
    file.seek(double_start).unwrap();
    let mut back = [0xffu8; 8];
    assert_eq!(file.read(&mut back).unwrap(), 8);
    assert_eq!(&back, b"\0\0\0\0\0xyz");

    // the skipped range is a hole and reads as zeros
    let mut hole = [0xffu8; 32];
    file.seek(1000).unwrap();
    assert_eq!(file.read(&mut hole).unwrap(), 32);
    assert!(hole.iter().all(|b| *b == 0));
}

#[test]
fn last_addressable_block_is_writable_and_the_next_is_not() {
    const MAX_FILE_SIZE: u64 = (8 + 1024 + 1024 * 1024) * BLOCK_SIZE as u64;
    let fs = fresh_fs();

    let mut file = fs.open("/edge", OpenMode::WRITE | OpenMode::CREATE).unwrap();
    file.seek(MAX_FILE_SIZE - 1).unwrap();
    assert_eq!(file.write(b"!").unwrap(), 1);
    assert_eq!(fs.stat("/edge").unwrap().size, MAX_FILE_SIZE);

    file.seek(MAX_FILE_SIZE).unwrap();
    assert_eq!(file.write(b"!"), Err(FsError::FileTooLarge));
}

#[test]
fn filenames_truncate_at_the_limit() {
    let fs = fresh_fs();
    let exact = format!("/{}", "a".repeat(127));
    let long = format!("/{}b", "a".repeat(127));

    fs.open(&exact, RWC).unwrap().close();
    assert_eq!(fs.stat(&exact).unwrap().size, 0);

    // the 128th byte is dropped, so the long name collapses onto the short one
    let stat = fs.stat(&long).unwrap();
    assert_eq!(stat.size, 0);
    let mut file = fs.open(&long, RW).unwrap();
    file.write(b"hello").unwrap();
    file.close();
    assert_eq!(fs.stat(&exact).unwrap().size, 5);
}

#[test]
fn open_modes_and_missing_files() {
    let fs = fresh_fs();

    assert_eq!(fs.open("/nope", RW).err(), Some(FsError::NotFound));
    assert_eq!(
        fs.open("/nope", OpenMode::CREATE).err(),
        Some(FsError::InvalidArgument)
    );

    fs.open("/f", RWC).unwrap().close();
    // an existing file opens without CREATE, and is not truncated by CREATE
    let mut file = fs.open("/f", RW).unwrap();
    file.write(b"data").unwrap();
    file.close();
    fs.open("/f", RWC).unwrap().close();
    assert_eq!(fs.stat("/f").unwrap().size, 4);

    let mut file = fs.open("/f", OpenMode::READ).unwrap();
    assert_eq!(file.write(b"x"), Err(FsError::AccessDenied));
    let mut file = fs.open("/f", OpenMode::WRITE).unwrap();
    assert_eq!(file.read(&mut [0; 4]), Err(FsError::AccessDenied));

    // neither entity kind opens as the other
    assert_eq!(fs.open("/", RW).err(), Some(FsError::InvalidArgument));
    assert_eq!(fs.open_dir("/f").err(), Some(FsError::InvalidArgument));
}

#[test]
fn seek_rules() {
    let fs = fresh_fs();
    let mut file = fs.open("/f", RWC).unwrap();
    file.write(&pattern(100)).unwrap();

    // a readable handle may not seek past end
    assert_eq!(file.seek(101), Err(FsError::InvalidArgument));
    file.seek(100).unwrap();

    // a write-only handle may, and a later write extends the file
    let mut wo = fs.open("/f", OpenMode::WRITE).unwrap();
    wo.seek(500).unwrap();
    wo.write(b"end").unwrap();
    assert_eq!(fs.stat("/f").unwrap().size, 503);
}

#[test]
fn relative_and_malformed_paths_are_rejected() {
    let fs = fresh_fs();
    assert_eq!(fs.stat("x").err(), Some(FsError::InvalidArgument));
    assert_eq!(fs.stat("").err(), Some(FsError::InvalidArgument));
    assert_eq!(fs.mkdir("/").err(), Some(FsError::InvalidArgument));
    assert_eq!(fs.delete("/").err(), Some(FsError::InvalidArgument));
    assert_eq!(fs.mkdir("/missing/dir").err(), Some(FsError::NotFound));
}

#[test]
fn mkdir_refuses_existing_names() {
    let fs = fresh_fs();
    fs.mkdir("/a").unwrap();
    assert_eq!(fs.mkdir("/a").err(), Some(FsError::InvalidArgument));
    fs.open("/file", RWC).unwrap().close();
    assert_eq!(fs.mkdir("/file").err(), Some(FsError::InvalidArgument));
}

#[test]
fn create_delete_restores_the_bitmap() {
    let fs = fresh_fs();
    let baseline = fs.free_blocks().unwrap();

    let mut file = fs.open("/x", RWC).unwrap();
    file.write(&pattern(40_000)).unwrap();
    file.close();
    assert!(fs.free_blocks().unwrap() < baseline);

    fs.delete("/x").unwrap();
    assert_eq!(fs.stat("/x").err(), Some(FsError::NotFound));
    assert_eq!(fs.free_blocks().unwrap(), baseline);

    // a second delete finds nothing and changes nothing
    assert_eq!(fs.delete("/x").err(), Some(FsError::NotFound));
    assert_eq!(fs.free_blocks().unwrap(), baseline);
}

#[test]
fn deleting_a_directory_releases_its_block() {
    let fs = fresh_fs();
    let baseline = fs.free_blocks().unwrap();

    fs.mkdir("/d").unwrap();
    assert_eq!(fs.free_blocks().unwrap(), baseline - 1);
    fs.delete("/d").unwrap();
    assert_eq!(fs.free_blocks().unwrap(), baseline);
}

#[test]
fn non_empty_directories_cannot_be_deleted() {
    let fs = fresh_fs();
    fs.mkdir("/d").unwrap();
    fs.open("/d/f", RWC).unwrap().close();

    assert_eq!(fs.delete("/d").err(), Some(FsError::AccessDenied));

    // the directory is still fully usable
    let mut dir = fs.open_dir("/d").unwrap();
    let names: Vec<_> = std::iter::from_fn(|| dir.read_entry())
        .filter(|e| e.kind == DirEntryKind::Regular)
        .map(|e| e.name)
        .collect();
    assert_eq!(names, ["f"]);

    fs.delete("/d/f").unwrap();
    fs.delete("/d").unwrap();
    assert_eq!(fs.stat("/d").err(), Some(FsError::NotFound));
}

#[test]
fn open_files_cannot_be_deleted() {
    let fs = fresh_fs();
    let file = fs.open("/busy", RWC).unwrap();
    assert_eq!(fs.delete("/busy").err(), Some(FsError::AccessDenied));
    file.close();
    fs.delete("/busy").unwrap();
}

#[test]
fn removed_entries_leave_reusable_slots() {
    let fs = fresh_fs();
    for i in 0..40 {
        fs.open(&format!("/f{i}"), RWC).unwrap().close();
    }
    assert_eq!(fs.stat("/").unwrap().size, 41);

    fs.delete("/f3").unwrap();
    fs.delete("/f17").unwrap();
    assert_eq!(fs.stat("/").unwrap().size, 39);

    // freed slots are filled before the directory grows again
    let grown = fs.free_blocks().unwrap();
    fs.open("/g0", RWC).unwrap().close();
    fs.open("/g1", RWC).unwrap().close();
    assert_eq!(fs.free_blocks().unwrap(), grown);
    assert_eq!(fs.stat("/").unwrap().size, 41);
}

#[test]
fn writes_until_no_space_match_the_accounting() {
    let fs = fresh_fs();
    let free = fs.free_blocks().unwrap();

    // data blocks plus the indirection blocks a file of n blocks needs
    let needed = |n: usize| {
        let mut blocks = n;
        if n > 8 {
            blocks += 1;
        }
        if n > 8 + 1024 {
            blocks += 1 + (n - (8 + 1024)).div_ceil(1024);
        }
        blocks
    };
    let expected = (1..)
        .take_while(|n| needed(*n) <= free)
        .last()
        .unwrap();

    let mut file = fs.open("/fill", OpenMode::WRITE | OpenMode::CREATE).unwrap();
    let block = pattern(BLOCK_SIZE);
    let mut written = 0usize;
    loop {
        match file.write(&block) {
            Ok(n) => {
                assert_eq!(n, BLOCK_SIZE);
                written += 1;
            }
            Err(FsError::NoSpace) => break,
            Err(err) => panic!("unexpected error: {err}"),
        }
    }

    assert_eq!(written, expected);
    assert_eq!(fs.free_blocks().unwrap(), free - needed(expected));
}

#[test]
fn data_survives_remount_after_sync() {
    let device = MemDisk::device(20480);
    GosFs::format(&device).unwrap();

    let data = pattern(12_345);
    {
        let fs = GosFs::mount(Arc::clone(&device)).unwrap();
        fs.mkdir("/keep").unwrap();
        let mut file = fs.open("/keep/data", RWC).unwrap();
        file.write(&data).unwrap();
        file.close();
        fs.sync().unwrap();
    }

    let fs = GosFs::mount(device).unwrap();
    let mut file = fs.open("/keep/data", OpenMode::READ).unwrap();
    let mut back = vec![0u8; data.len()];
    assert_eq!(file.read(&mut back).unwrap(), data.len());
    assert_eq!(back, data);
}

#[test]
fn mounts_share_one_serialized_view() {
    let fs = fresh_fs();

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let fs = fs.clone();
            thread::spawn(move || {
                let path = format!("/t{t}");
                let mut file = fs.open(&path, RWC).unwrap();
                let chunk = vec![t as u8 + 1; BLOCK_SIZE];
                for _ in 0..50 {
                    file.write(&chunk).unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    for t in 0..4u8 {
        let path = format!("/t{t}");
        assert_eq!(fs.stat(&path).unwrap().size, 50 * BLOCK_SIZE as u64);
        let mut file = fs.open(&path, OpenMode::READ).unwrap();
        let mut back = vec![0u8; 50 * BLOCK_SIZE];
        assert_eq!(file.read(&mut back).unwrap(), back.len());
        assert!(back.iter().all(|b| *b == t + 1));
    }
}

#[test]
fn whole_file_writes_do_not_interleave() {
    let fs = fresh_fs();
    fs.open("/shared", RWC).unwrap().close();

    let threads: Vec<_> = [0xaau8, 0xbb]
        .into_iter()
        .map(|fill| {
            let fs = fs.clone();
            thread::spawn(move || {
                let mut file = fs.open("/shared", OpenMode::WRITE).unwrap();
                file.write(&vec![fill; 64 * 1024]).unwrap();
            })
        })
        .collect();
    for t in threads {
        t.join().unwrap();
    }

    // each write call runs under the mount mutex, so the last one wins whole
    let mut file = fs.open("/shared", OpenMode::READ).unwrap();
    let mut back = vec![0u8; 64 * 1024];
    assert_eq!(file.read(&mut back).unwrap(), back.len());
    assert!(back.iter().all(|b| *b == back[0]));
    assert!(back[0] == 0xaa || back[0] == 0xbb);
}

#[test]
fn vfs_tables_dispatch_to_the_same_operations() {
    use gosfs::{DirOps, FileOps};

    let fs = fresh_fs();
    let mount: &dyn MountOps = &fs;

    mount.create_directory("/via-vfs").unwrap();
    assert!(mount.stat("/via-vfs").unwrap().is_directory);

    let mut file: Box<dyn FileOps> = Box::new(mount.open("/via-vfs/f", RWC).unwrap());
    file.write(b"x").unwrap();
    file.seek(0).unwrap();
    let mut byte = [0u8; 1];
    assert_eq!(file.read(&mut byte).unwrap(), 1);
    assert_eq!(&byte, b"x");
    assert_eq!(file.stat().unwrap().size, 1);
    file.close();

    let mut dir: Box<dyn DirOps> = Box::new(mount.open_directory("/via-vfs").unwrap());
    let named: Vec<_> = std::iter::from_fn(|| dir.read_entry())
        .filter(|e| e.kind == DirEntryKind::Regular)
        .map(|e| e.name)
        .collect();
    assert_eq!(named, ["f"]);
    dir.close();

    mount.sync().unwrap();
    // closing through the table released the open records, so delete works
    mount.delete("/via-vfs/f").unwrap();
    mount.delete("/via-vfs").unwrap();
    assert_eq!(gosfs::FS_NAME, "gosfs");
}
