use std::collections::BTreeMap;

use spin::Mutex;

use crate::{fit_sector, words_to_bytes, BlockStorage, Result};

/// 易失的内存后端
///
/// 只保存写入过的扇区，其余扇区视作全零。
#[derive(Debug, Default)]
pub struct MemoryBlockStorage {
    total_sectors: u32,
    sectors: Mutex<BTreeMap<u32, Box<[u32]>>>,
}

impl MemoryBlockStorage {
    pub fn new(total_sectors: u32) -> Self {
        Self {
            total_sectors,
            sectors: Mutex::default(),
        }
    }

    /// 已写入过的扇区数
    pub fn resident_sectors(&self) -> usize {
        self.sectors.lock().len()
    }

    /// 导出整个设备的平坦字节镜像（小端序）
    pub fn snapshot_bytes(&self, sector_size: usize) -> Vec<u8> {
        let sectors = self.sectors.lock();
        let mut image = Vec::with_capacity(self.total_sectors as usize * sector_size * 4);
        for lba in 0..self.total_sectors {
            match sectors.get(&lba) {
                Some(words) => image.extend(words_to_bytes(&fit_sector(words, sector_size))),
                None => image.resize(image.len() + sector_size * 4, 0),
            }
        }
        image
    }
}

impl BlockStorage for MemoryBlockStorage {
    fn read(&self, lba: u32, sector_size: usize) -> Result<Vec<u32>> {
        log::trace!("memory read lba={lba}");
        let words = match self.sectors.lock().get(&lba) {
            Some(words) => fit_sector(words, sector_size).into_vec(),
            None => vec![0; sector_size],
        };
        Ok(words)
    }

    fn write(&self, lba: u32, words: &[u32], sector_size: usize) -> Result<()> {
        log::trace!("memory write lba={lba}");
        self.sectors
            .lock()
            .insert(lba, fit_sector(words, sector_size));
        Ok(())
    }

    #[inline]
    fn flush(&self) -> Result<()> {
        Ok(())
    }

    #[inline]
    fn total_sectors(&self) -> u32 {
        self.total_sectors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwritten_sector_reads_zero() {
        let storage = MemoryBlockStorage::new(4);
        assert_eq!(storage.read(3, 8).unwrap(), vec![0; 8]);
        assert_eq!(storage.resident_sectors(), 0);
    }

    #[test]
    fn write_replaces_whole_sector() {
        let storage = MemoryBlockStorage::new(4);
        storage.write(1, &[1, 2, 3, 4], 4).unwrap();
        storage.write(1, &[9], 4).unwrap();
        assert_eq!(storage.read(1, 4).unwrap(), vec![9, 0, 0, 0]);
    }

    #[test]
    fn snapshot_is_flat() {
        let storage = MemoryBlockStorage::new(2);
        storage.write(1, &[0xAABB_CCDD], 1).unwrap();
        assert_eq!(storage.snapshot_bytes(1), [0, 0, 0, 0, 0xDD, 0xCC, 0xBB, 0xAA]);
    }
}
