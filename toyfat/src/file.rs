use block_dev::{bytes_to_words, words_to_bytes};

use crate::layout::{DirEntry, FatEntry};
use crate::{Error, Image, Result};

impl Image {
    /// 读出文件的全部内容。
    /// 以目录项中的大小为准，读够即停，不管链表是否还有后续。
    pub fn read_file(&self, entry: &DirEntry) -> Result<Vec<u8>> {
        let size = entry.size as usize;
        // 大小来自镜像，不可全信
        let mut data = Vec::with_capacity(size.min(self.superblock().sector_bytes() * 16));

        for sector in self.chain(entry.first_sector) {
            if data.len() >= size {
                break;
            }
            let words = self.read_sector(sector?)?;
            data.extend(words_to_bytes(&words));
        }

        if data.len() < size {
            return Err(Error::Corrupted(format!(
                "{:?} claims {size} bytes but its chain holds {}",
                entry.name(),
                data.len()
            )));
        }
        data.truncate(size);
        Ok(data)
    }

    /// 把数据写入新分配的扇区链表，返回首扇区；空数据返回0。
    ///
    /// 失败时回收本次分配的所有扇区，不会留下半个文件。
    pub fn write_file(&mut self, data: &[u8]) -> Result<u32> {
        let mut first = 0;
        match self.write_chain(data, &mut first) {
            Ok(()) => Ok(first),
            Err(e) => {
                if let Err(rollback) = self.free_sector_chain(first) {
                    log::error!("rollback of chain {first} failed: {rollback}");
                }
                Err(e)
            }
        }
    }

    fn write_chain(&mut self, data: &[u8], first: &mut u32) -> Result<()> {
        let mut prev = None;

        for chunk in data.chunks(self.superblock().sector_bytes()) {
            let Some(sector) = self.allocate_sector()? else {
                log::warn!("out of space after {} bytes", data.len() - chunk.len());
                return Err(Error::NoSpace);
            };
            // 先挂到链表上，失败时才能整条回收
            match prev {
                None => *first = sector,
                Some(prev) => self.set_fat_entry(prev, FatEntry::link(sector))?,
            }
            prev = Some(sector);

            // 末尾不足一扇区的部分由存储补零
            self.write_sector(sector, &bytes_to_words(chunk))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use block_dev::MemoryBlockStorage;

    use super::*;
    use crate::layout::EntryFlag;

    fn image(total: u32) -> Image {
        Image::format(Arc::new(MemoryBlockStorage::new(total)), total, 128).unwrap()
    }

    fn entry(first: u32, size: usize) -> DirEntry {
        DirEntry::new("f", EntryFlag::Used, first, size as u32).unwrap()
    }

    #[test]
    fn round_trip() {
        let mut image = image(64);
        for len in [0, 1, 511, 512, 513, 2000] {
            let data: Vec<u8> = (0..len).map(|i| (i * 7 % 251) as u8).collect();
            let first = image.write_file(&data).unwrap();
            assert_eq!(first == 0, len == 0);
            assert_eq!(image.read_file(&entry(first, len)).unwrap(), data);
        }
    }

    #[test]
    fn size_is_authoritative() {
        let mut image = image(64);
        let first = image.write_file(&[0xAB; 1024]).unwrap();
        assert_eq!(image.chain(first).count(), 2);
        assert_eq!(image.read_file(&entry(first, 10)).unwrap(), [0xAB; 10]);
        assert!(matches!(
            image.read_file(&entry(first, 1025)),
            Err(Error::Corrupted(_))
        ));
    }

    #[test]
    fn corrupt_entries_are_reported() {
        let mut image = image(64);
        let first = image.write_file(&[0xCD; 1024]).unwrap();

        // 大小远超链表
        assert!(matches!(
            image.read_file(&entry(first, u32::MAX as usize)),
            Err(Error::Corrupted(_))
        ));

        // 链表指进分配表时不能把表项当成文件内容
        let fat = image.superblock().fat_start;
        image.set_fat_entry(first, FatEntry::link(fat)).unwrap();
        assert!(matches!(
            image.read_file(&entry(first, 1024)),
            Err(Error::Corrupted(_))
        ));
    }

    #[test]
    fn tail_is_zero_padded() {
        let mut image = image(64);
        let first = image.write_file(&[1, 2, 3, 4, 5]).unwrap();
        let words = image.read_sector(first).unwrap();
        assert_eq!(&words[..3], &[0x0403_0201, 0x05, 0]);
        assert!(words[2..].iter().all(|&w| w == 0));
    }

    #[test]
    fn out_of_space_rolls_back() {
        let mut image = image(8);
        let free = image.superblock().free_sectors;
        let too_big = vec![1u8; (free as usize + 1) * 512];

        assert!(matches!(image.write_file(&too_big), Err(Error::NoSpace)));
        assert_eq!(image.superblock().free_sectors, free);
        assert_eq!(image.get_superblock().unwrap().free_sectors, free);
        for sector in image.superblock().data_region() {
            assert!(image.get_fat_entry(sector).unwrap().is_free());
        }

        // 恰好放得下
        let fits = vec![2u8; free as usize * 512];
        let first = image.write_file(&fits).unwrap();
        assert_eq!(image.superblock().free_sectors, 0);
        assert_eq!(image.read_file(&entry(first, fits.len())).unwrap(), fits);
    }
}
