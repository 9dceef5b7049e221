//! # 镜像引擎
//!
//! [`Image`] 独占一个存储后端与其上的超级块缓存，
//! 负责扇区读写、分配表维护以及扇区的分配与回收。
//! 目录与文件的操作分别在`dir`与`file`模块中实现。

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use block_dev::{BlockStorage, FileBlockStorage};

use crate::layout::{FatEntry, Superblock};
use crate::{Error, Result};

pub struct Image {
    storage: Arc<dyn BlockStorage>,
    /// 超级块缓存，写回时同步更新
    sb: Superblock,
}

impl Image {
    /// 在`storage`上建立新的文件系统
    pub fn format(
        storage: Arc<dyn BlockStorage>,
        total_sectors: u32,
        sector_size: u32,
    ) -> Result<Self> {
        let sb = Superblock::new(total_sectors, sector_size)?;
        if storage.total_sectors() < total_sectors {
            return Err(Error::StorageTooSmall {
                storage: storage.total_sectors(),
                image: total_sectors,
            });
        }

        let image = Self { storage, sb };
        let zero = vec![0; sb.sector_words()];
        for lba in 0..total_sectors {
            image.write_sector(lba, &zero)?;
        }

        // 超级块、分配表与根目录都不参与分配
        let per = sb.fat_entries_per_sector() as u32;
        for table in 0..sb.fat_sectors {
            let first = table * per;
            if first >= sb.data_start {
                break;
            }
            let words: Vec<u32> = (first..first + per)
                .map(|sector| {
                    if sector < sb.data_start {
                        FatEntry::RESERVED.raw()
                    } else {
                        FatEntry::FREE.raw()
                    }
                })
                .collect();
            image.write_sector(sb.fat_start + table, &words)?;
        }

        image.write_sector(0, &sb.to_words())?;
        image.flush()?;
        log::info!(
            "formatted {total_sectors} sectors x {sector_size} words, data starts at {}",
            sb.data_start
        );

        Ok(image)
    }

    /// 读取并校验已有的文件系统
    pub fn load(storage: Arc<dyn BlockStorage>) -> Result<Self> {
        let sb = Superblock::from_words(&storage.read(0, Superblock::WORDS)?)?;
        if storage.total_sectors() < sb.total_sectors {
            return Err(Error::StorageTooSmall {
                storage: storage.total_sectors(),
                image: sb.total_sectors,
            });
        }
        log::info!(
            "loaded image: {} sectors, {} free",
            sb.total_sectors,
            sb.free_sectors
        );

        Ok(Self { storage, sb })
    }

    /// 在宿主文件上创建新镜像，已有内容被丢弃
    pub fn create(path: impl AsRef<Path>, total_sectors: u32, sector_size: u32) -> Result<Self> {
        let path = path.as_ref();
        // 布局不合法时不动已有文件
        Superblock::new(total_sectors, sector_size)?;
        let fd = File::create(path)?;
        fd.set_len(total_sectors as u64 * sector_size as u64 * 4)?;
        drop(fd);

        Self::format(
            Arc::new(FileBlockStorage::new(path, total_sectors)),
            total_sectors,
            sector_size,
        )
    }

    /// 打开宿主文件上的已有镜像
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::NotFound(path.display().to_string()));
        }

        // 先探查超级块才能知道设备大小
        let probe = FileBlockStorage::new(path, 0);
        let sb = Superblock::from_words(&probe.read(0, Superblock::WORDS)?)?;
        probe.close()?;

        Self::load(Arc::new(FileBlockStorage::new(path, sb.total_sectors)))
    }

    /// 落盘并释放存储
    pub fn close(self) -> Result<()> {
        self.storage.flush()?;
        self.storage.close()?;
        Ok(())
    }

    #[inline]
    pub fn flush(&self) -> Result<()> {
        Ok(self.storage.flush()?)
    }

    /// 缓存的超级块
    #[inline]
    pub fn superblock(&self) -> &Superblock {
        &self.sb
    }

    #[inline]
    pub fn storage(&self) -> &Arc<dyn BlockStorage> {
        &self.storage
    }

    /// 从磁盘读取超级块
    pub fn get_superblock(&self) -> Result<Superblock> {
        Superblock::from_words(&self.read_sector(0)?)
    }

    /// 写回超级块并刷新缓存
    pub fn set_superblock(&mut self, sb: Superblock) -> Result<()> {
        self.write_sector(0, &sb.to_words())?;
        self.sb = sb;
        Ok(())
    }

    pub fn get_fat_entry(&self, sector: u32) -> Result<FatEntry> {
        self.check_sector(sector)?;
        let (table, offset) = self.sb.fat_position(sector);
        Ok(FatEntry::from(self.read_sector(table)?[offset]))
    }

    pub fn set_fat_entry(&self, sector: u32, value: FatEntry) -> Result<()> {
        self.check_sector(sector)?;
        let (table, offset) = self.sb.fat_position(sector);
        let mut words = self.read_sector(table)?;
        words[offset] = value.raw();
        self.write_sector(table, &words)
    }

    /// 在数据区中分配一个扇区，其表项被置为链尾。
    /// 没有空闲扇区时返回`None`，调用者不应重试。
    pub fn allocate_sector(&mut self) -> Result<Option<u32>> {
        let per = self.sb.fat_entries_per_sector();
        let mut sector = self.sb.data_start;

        // 逐个分配表扇区地扫描
        while sector < self.sb.total_sectors {
            let (table, start) = self.sb.fat_position(sector);
            let end = (start + (self.sb.total_sectors - sector) as usize).min(per);
            let mut words = self.read_sector(table)?;

            if let Some(i) = words[start..end]
                .iter()
                .position(|&word| FatEntry::from(word).is_free())
            {
                words[start + i] = FatEntry::END_OF_CHAIN.raw();
                self.write_sector(table, &words)?;

                let found = sector + i as u32;
                let mut sb = self.sb;
                sb.free_sectors = sb.free_sectors.checked_sub(1).unwrap_or_else(|| {
                    log::warn!("free sector count was already zero when allocating {found}");
                    0
                });
                self.set_superblock(sb)?;

                log::debug!("allocated sector {found}, {} free", sb.free_sectors);
                return Ok(Some(found));
            }

            sector += (end - start) as u32;
        }

        log::debug!("no free sector left");
        Ok(None)
    }

    /// 回收整个链表。
    /// 遇到链尾、空闲项、保留项或数据区外的扇区即停止。
    pub fn free_sector_chain(&mut self, first: u32) -> Result<()> {
        let mut current = first;
        let mut freed = 0;

        while current != 0 && self.sb.data_region().contains(&current) {
            if freed > self.sb.total_sectors {
                return Err(Error::Corrupted(format!("chain from {first} never ends")));
            }

            let entry = self.get_fat_entry(current)?;
            if entry.is_free() {
                break;
            }
            self.set_fat_entry(current, FatEntry::FREE)?;
            freed += 1;

            match entry.next() {
                Some(next) => current = next,
                None => break,
            }
        }

        if freed > 0 {
            let mut sb = self.sb;
            sb.free_sectors += freed;
            self.set_superblock(sb)?;
            log::debug!("freed {freed} sectors from {first}, {} free", sb.free_sectors);
        }
        Ok(())
    }

    /// 沿链表遍历扇区
    pub fn chain(&self, first: u32) -> Chain<'_> {
        Chain {
            image: self,
            first,
            next: (first != 0).then_some(first),
            hops: 0,
        }
    }
}

impl Image {
    pub(crate) fn read_sector(&self, lba: u32) -> Result<Vec<u32>> {
        self.check_sector(lba)?;
        Ok(self.storage.read(lba, self.sb.sector_words())?)
    }

    pub(crate) fn write_sector(&self, lba: u32, words: &[u32]) -> Result<()> {
        self.check_sector(lba)?;
        Ok(self.storage.write(lba, words, self.sb.sector_words())?)
    }

    pub(crate) fn zero_sector(&self, lba: u32) -> Result<()> {
        self.write_sector(lba, &[])
    }

    #[inline]
    fn check_sector(&self, sector: u32) -> Result<()> {
        if sector < self.sb.total_sectors {
            Ok(())
        } else {
            Err(Error::InvalidSector(sector))
        }
    }
}

/// 扇区链表的迭代器。
/// 跳数超过扇区总数即视为成环，链表进入元数据区（根目录扇区除外）即视为损坏，
/// 返回错误后终止。
pub struct Chain<'a> {
    image: &'a Image,
    first: u32,
    next: Option<u32>,
    hops: u32,
}

impl Iterator for Chain<'_> {
    type Item = Result<u32>;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next.take()?;

        self.hops += 1;
        if self.hops > self.image.sb.total_sectors {
            return Some(Err(Error::Corrupted(format!(
                "chain from {} never ends",
                self.first
            ))));
        }

        let sb = &self.image.sb;
        if current < sb.total_sectors
            && current != sb.root_sector
            && !sb.data_region().contains(&current)
        {
            return Some(Err(Error::Corrupted(format!(
                "chain from {} enters metadata sector {current}",
                self.first
            ))));
        }

        match self.image.get_fat_entry(current) {
            Ok(entry) => {
                self.next = entry.next();
                Some(Ok(current))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use block_dev::MemoryBlockStorage;

    use super::*;

    fn image(total: u32) -> Image {
        Image::format(Arc::new(MemoryBlockStorage::new(total)), total, 32).unwrap()
    }

    #[test]
    fn format_reserves_metadata() {
        let image = image(64);
        let sb = *image.superblock();
        assert_eq!(sb.data_start, 4);
        for sector in 0..sb.data_start {
            assert_eq!(image.get_fat_entry(sector).unwrap(), FatEntry::RESERVED);
        }
        for sector in sb.data_region() {
            assert!(image.get_fat_entry(sector).unwrap().is_free());
        }
        assert_eq!(image.get_superblock().unwrap(), sb);
    }

    #[test]
    fn allocate_until_exhausted() {
        let mut image = image(8);
        let data = image.superblock().data_region();
        let mut got = Vec::new();
        while let Some(sector) = image.allocate_sector().unwrap() {
            got.push(sector);
        }
        assert_eq!(got, data.collect::<Vec<_>>());
        assert_eq!(image.superblock().free_sectors, 0);
        assert_eq!(image.get_superblock().unwrap().free_sectors, 0);
    }

    #[test]
    fn free_walks_the_chain() {
        let mut image = image(64);
        let a = image.allocate_sector().unwrap().unwrap();
        let b = image.allocate_sector().unwrap().unwrap();
        let c = image.allocate_sector().unwrap().unwrap();
        image.set_fat_entry(a, FatEntry::link(c)).unwrap();
        let before = image.superblock().free_sectors;

        assert_eq!(
            image.chain(a).collect::<Result<Vec<_>>>().unwrap(),
            [a, c]
        );
        image.free_sector_chain(a).unwrap();
        assert_eq!(image.superblock().free_sectors, before + 2);
        assert!(image.get_fat_entry(a).unwrap().is_free());
        assert!(image.get_fat_entry(c).unwrap().is_free());
        assert_eq!(image.get_fat_entry(b).unwrap(), FatEntry::END_OF_CHAIN);

        // 0 表示没有链表
        image.free_sector_chain(0).unwrap();
        assert_eq!(image.superblock().free_sectors, before + 2);
    }

    #[test]
    fn cycle_is_reported() {
        let mut image = image(64);
        let a = image.allocate_sector().unwrap().unwrap();
        let b = image.allocate_sector().unwrap().unwrap();
        image.set_fat_entry(a, FatEntry::link(b)).unwrap();
        image.set_fat_entry(b, FatEntry::link(a)).unwrap();

        assert!(matches!(
            image.chain(a).collect::<Result<Vec<_>>>(),
            Err(Error::Corrupted(_))
        ));
    }

    #[test]
    fn chain_stays_out_of_metadata() {
        let mut image = image(64);
        let a = image.allocate_sector().unwrap().unwrap();
        let fat = image.superblock().fat_start;
        image.set_fat_entry(a, FatEntry::link(fat)).unwrap();

        let mut chain = image.chain(a);
        assert_eq!(chain.next().unwrap().unwrap(), a);
        assert!(matches!(chain.next(), Some(Err(Error::Corrupted(_)))));
        assert!(chain.next().is_none());
        assert!(image.chain(0).next().is_none());

        // 根目录扇区本身不在数据区，但可以作为链表起点
        let root = image.superblock().root_sector;
        assert_eq!(image.chain(root).collect::<Result<Vec<_>>>().unwrap(), [root]);
    }

    #[test]
    fn out_of_range_sector() {
        let image = image(64);
        assert!(matches!(
            image.get_fat_entry(64),
            Err(Error::InvalidSector(64))
        ));
    }
}
