use std::io::Cursor;
use std::ops::Range;

use binrw::{binrw, BinRead, BinWrite};
use block_dev::{bytes_to_words, words_to_bytes};

use crate::layout::DirEntry;
use crate::{Error, Result};

/// 魔数：用于校验镜像合法性
pub const MAGIC: u32 = 0x5446_4154;
pub const VERSION: u32 = 1;

/// 超级块：
/// - 提供镜像合法性校验；
/// - 定位其它连续区域；
/// - 缓存空闲扇区数。
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Superblock {
    pub magic: u32,
    pub version: u32,
    /// 扇区宽度（字）
    pub sector_size: u32,
    pub total_sectors: u32,
    pub fat_start: u32,
    pub fat_sectors: u32,
    pub root_sector: u32,
    pub data_start: u32,
    /// 数据区内空闲扇区的数量，与分配表保持一致
    pub free_sectors: u32,
}

/// 容纳`total_sectors`个表项所需的分配表扇区数
#[inline]
pub fn recommended_fat_sectors(total_sectors: u32, sector_size: u32) -> u32 {
    total_sectors.div_ceil(sector_size)
}

impl Superblock {
    pub const WORDS: usize = 9;

    /// 计算新镜像的布局
    pub fn new(total_sectors: u32, sector_size: u32) -> Result<Self> {
        check_sector_size(sector_size)?;

        let fat_start = 1;
        let fat_sectors = recommended_fat_sectors(total_sectors, sector_size);
        let root_sector = fat_start + fat_sectors;
        let data_start = root_sector + 1;
        // 数据区至少要有一个扇区
        if data_start >= total_sectors {
            return Err(Error::TooSmall {
                total: total_sectors,
                required: data_start + 1,
            });
        }

        Ok(Self {
            magic: MAGIC,
            version: VERSION,
            sector_size,
            total_sectors,
            fat_start,
            fat_sectors,
            root_sector,
            data_start,
            free_sectors: total_sectors - data_start,
        })
    }

    /// 从扇区开头的若干字解析并校验
    pub fn from_words(words: &[u32]) -> Result<Self> {
        let len = words.len().min(Self::WORDS);
        let sb = Self::read(&mut Cursor::new(words_to_bytes(&words[..len])))?;
        sb.validate()?;
        Ok(sb)
    }

    pub fn to_words(&self) -> Vec<u32> {
        let mut cursor = Cursor::new(Vec::with_capacity(Self::WORDS * 4));
        self.write(&mut cursor)
            .expect("writing into a Vec never fails");
        bytes_to_words(&cursor.into_inner())
    }

    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(Error::BadMagic(self.magic));
        }
        if self.version != VERSION {
            return Err(Error::Corrupted(format!(
                "unsupported version {}",
                self.version
            )));
        }
        check_sector_size(self.sector_size)?;

        let corrupt = |what: &str| Err(Error::Corrupted(what.to_owned()));
        if self.fat_start == 0 {
            return corrupt("allocation table overlaps the superblock");
        }
        if self.fat_start as u64 + self.fat_sectors as u64 > self.root_sector as u64 {
            return corrupt("allocation table overlaps the root directory");
        }
        if (self.fat_sectors as u64) * (self.sector_size as u64) < self.total_sectors as u64 {
            return corrupt("allocation table cannot cover every sector");
        }
        if self.root_sector >= self.data_start {
            return corrupt("root directory lies inside the data region");
        }
        if self.data_start > self.total_sectors {
            return corrupt("data region starts past the end of the device");
        }
        if self.free_sectors > self.total_sectors - self.data_start {
            return corrupt("free sector count exceeds the data region");
        }

        Ok(())
    }

    #[inline]
    pub fn sector_words(&self) -> usize {
        self.sector_size as usize
    }

    #[inline]
    pub fn sector_bytes(&self) -> usize {
        self.sector_size as usize * 4
    }

    /// 一个分配表扇区能容纳多少项
    #[inline]
    pub fn fat_entries_per_sector(&self) -> usize {
        self.sector_size as usize
    }

    /// 一个目录扇区能容纳多少目录项
    #[inline]
    pub fn dir_entries_per_sector(&self) -> usize {
        self.sector_size as usize / DirEntry::WORDS
    }

    #[inline]
    pub fn data_region(&self) -> Range<u32> {
        self.data_start..self.total_sectors
    }

    /// 返回`sector`的表项所在位置：**分配表扇区号**以及**扇区内字偏移**
    #[inline]
    pub fn fat_position(&self, sector: u32) -> (u32, usize) {
        let per = self.fat_entries_per_sector() as u32;
        (self.fat_start + sector / per, (sector % per) as usize)
    }
}

fn check_sector_size(sector_size: u32) -> Result<()> {
    if sector_size == 0 || sector_size as usize % DirEntry::WORDS != 0 {
        return Err(Error::BadSectorSize(sector_size));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout() {
        let sb = Superblock::new(1024, 128).unwrap();
        assert_eq!(sb.fat_start, 1);
        assert_eq!(sb.fat_sectors, 8);
        assert_eq!(sb.root_sector, 9);
        assert_eq!(sb.data_start, 10);
        assert_eq!(sb.free_sectors, 1014);
        assert_eq!(sb.dir_entries_per_sector(), 4);
        assert_eq!(sb.fat_position(300), (3, 44));
    }

    #[test]
    fn words_keep_field_order() {
        let sb = Superblock::new(1024, 128).unwrap();
        assert_eq!(
            sb.to_words(),
            [MAGIC, VERSION, 128, 1024, 1, 8, 9, 10, 1014]
        );
        assert_eq!(Superblock::from_words(&sb.to_words()).unwrap(), sb);
    }

    #[test]
    fn rejects_bad_images() {
        let mut words = Superblock::new(64, 32).unwrap().to_words();
        words[0] = 0xDEAD_BEEF;
        assert!(matches!(
            Superblock::from_words(&words),
            Err(Error::BadMagic(0xDEAD_BEEF))
        ));

        let mut sb = Superblock::new(64, 32).unwrap();
        sb.free_sectors = 1000;
        assert!(matches!(sb.validate(), Err(Error::Corrupted(_))));

        assert!(matches!(
            Superblock::new(64, 100),
            Err(Error::BadSectorSize(100))
        ));
        assert!(matches!(
            Superblock::new(3, 128),
            Err(Error::TooSmall { total: 3, required: 4 })
        ));
    }
}
