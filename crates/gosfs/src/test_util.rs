//! RAM-backed block device for unit tests.

use std::sync::{Arc, Mutex};

use block_io::{BlockDevice, IoError, SECTOR_SIZE};

pub(crate) struct MemDisk {
    sectors: Mutex<Vec<[u8; SECTOR_SIZE]>>,
}

impl MemDisk {
    pub(crate) fn device(num_sectors: usize) -> Arc<dyn BlockDevice> {
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
