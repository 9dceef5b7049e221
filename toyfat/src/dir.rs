//! 目录：由目录项组成的扇区链表。
//!
//! 目录项用其在整个链表中的下标寻址，下标不随扇区重置。

use enumflags2::BitFlags;

use crate::layout::{DirEntry, EntryFlag, FatEntry};
use crate::{Error, Image, Result};

impl Image {
    /// 目录中所有在用的项，附带其全局下标
    pub fn read_directory(&self, first: u32) -> Result<Vec<(u32, DirEntry)>> {
        let mut entries = Vec::new();
        self.for_each_slot(first, |index, entry| {
            if entry.is_used() {
                entries.push((index, entry));
            }
            false
        })?;
        Ok(entries)
    }

    pub fn find_in_directory(&self, dir: u32, name: &str) -> Result<Option<(u32, DirEntry)>> {
        let mut found = None;
        self.for_each_slot(dir, |index, entry| {
            if entry.is_used() && entry.name_eq(name) {
                found = Some((index, entry));
                return true;
            }
            false
        })?;
        Ok(found)
    }

    /// 寻找空槽位（从未使用或已删除）；找不到就为目录追加一个扇区。
    /// 追加时无法分配扇区则返回`None`。
    pub fn find_free_slot(&mut self, dir: u32) -> Result<Option<u32>> {
        let mut free = None;
        let sectors = self.for_each_slot(dir, |index, entry| {
            if entry.is_free_slot() {
                free = Some(index);
                return true;
            }
            false
        })?;
        if free.is_some() {
            return Ok(free);
        }

        let Some(&last) = sectors.last() else {
            return Err(Error::Corrupted(format!("directory at {dir} has no sector")));
        };
        let Some(sector) = self.allocate_sector()? else {
            log::debug!("directory at {dir} cannot grow");
            return Ok(None);
        };
        self.zero_sector(sector)?;
        self.set_fat_entry(last, FatEntry::link(sector))?;
        log::debug!("directory at {dir} grew by sector {sector}");

        Ok(Some((sectors.len() * self.superblock().dir_entries_per_sector()) as u32))
    }

    pub fn read_entry(&self, dir: u32, index: u32) -> Result<DirEntry> {
        let (sector, offset) = self.slot_position(dir, index)?;
        let words = self.read_sector(sector)?;
        DirEntry::from_words(&words[offset..offset + DirEntry::WORDS])
    }

    pub fn write_entry(&self, dir: u32, index: u32, entry: &DirEntry) -> Result<()> {
        let (sector, offset) = self.slot_position(dir, index)?;
        let mut words = self.read_sector(sector)?;
        words[offset..offset + DirEntry::WORDS].copy_from_slice(&entry.to_words());
        self.write_sector(sector, &words)
    }

    /// 在`parent`目录下创建子目录，返回其首扇区。
    /// 空间不足时返回`None`，且不会留下已分配的扇区。
    pub fn create_directory(&mut self, parent: u32, name: &str) -> Result<Option<u32>> {
        DirEntry::validate_name(name)?;
        if self.find_in_directory(parent, name)?.is_some() {
            return Err(Error::AlreadyExists(name.to_owned()));
        }

        let Some(sector) = self.allocate_sector()? else {
            return Ok(None);
        };
        self.zero_sector(sector)?;

        let Some(index) = self.find_free_slot(parent)? else {
            self.free_sector_chain(sector)?;
            return Ok(None);
        };
        let flags: BitFlags<EntryFlag> = EntryFlag::Used | EntryFlag::Directory;
        self.write_entry(parent, index, &DirEntry::new(name, flags, sector, 0)?)?;
        log::debug!("created directory {name:?} at sector {sector}");

        Ok(Some(sector))
    }
}

impl Image {
    /// 按顺序访问目录的每个槽位，`f`返回`true`时提前结束。
    /// 返回访问过的扇区。
    fn for_each_slot(
        &self,
        first: u32,
        mut f: impl FnMut(u32, DirEntry) -> bool,
    ) -> Result<Vec<u32>> {
        let per = self.superblock().dir_entries_per_sector();
        let mut sectors = Vec::new();

        for sector in self.chain(first) {
            let sector = sector?;
            let words = self.read_sector(sector)?;
            let base = sectors.len() * per;
            sectors.push(sector);

            for (i, raw) in words.chunks_exact(DirEntry::WORDS).enumerate() {
                if f((base + i) as u32, DirEntry::from_words(raw)?) {
                    return Ok(sectors);
                }
            }
        }

        Ok(sectors)
    }

    /// 目录项下标所在的扇区及扇区内字偏移
    fn slot_position(&self, dir: u32, index: u32) -> Result<(u32, usize)> {
        let per = self.superblock().dir_entries_per_sector();
        let nth = index as usize / per;
        let sector = self
            .chain(dir)
            .nth(nth)
            .ok_or_else(|| Error::Corrupted(format!("slot {index} is past the end of directory {dir}")))??;

        Ok((sector, index as usize % per * DirEntry::WORDS))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use block_dev::MemoryBlockStorage;

    use super::*;

    fn image(total: u32) -> Image {
        Image::format(Arc::new(MemoryBlockStorage::new(total)), total, 128).unwrap()
    }

    fn add(image: &mut Image, dir: u32, name: &str) -> u32 {
        let index = image.find_free_slot(dir).unwrap().unwrap();
        let entry = DirEntry::new(name, EntryFlag::Used, 0, 0).unwrap();
        image.write_entry(dir, index, &entry).unwrap();
        index
    }

    #[test]
    fn slots_extend_the_chain() {
        let mut image = image(64);
        let root = image.superblock().root_sector;
        let free = image.superblock().free_sectors;

        for (i, name) in ["a", "b", "c", "d", "e"].into_iter().enumerate() {
            assert_eq!(add(&mut image, root, name), i as u32);
        }
        // 第五项迫使根目录追加一个扇区
        assert_eq!(image.superblock().free_sectors, free - 1);
        assert_eq!(image.chain(root).count(), 2);

        let listed: Vec<_> = image
            .read_directory(root)
            .unwrap()
            .into_iter()
            .map(|(i, e)| (i, e.name()))
            .collect();
        assert_eq!(listed.last(), Some(&(4, "e".to_owned())));
        assert_eq!(listed.len(), 5);

        let (index, entry) = image.find_in_directory(root, "e").unwrap().unwrap();
        assert_eq!(index, 4);
        assert_eq!(image.read_entry(root, 4).unwrap(), entry);
    }

    #[test]
    fn deleted_slot_is_reused_first() {
        let mut image = image(64);
        let root = image.superblock().root_sector;
        for name in ["a", "b", "c", "d"] {
            add(&mut image, root, name);
        }

        let (index, mut entry) = image.find_in_directory(root, "b").unwrap().unwrap();
        entry.mark_deleted();
        image.write_entry(root, index, &entry).unwrap();

        assert_eq!(add(&mut image, root, "z"), 1);
        assert_eq!(image.chain(root).count(), 1);
        assert!(image.find_in_directory(root, "b").unwrap().is_none());
    }

    #[test]
    fn create_directory_rolls_back_when_full() {
        // 数据区只有一个扇区
        let mut image = Image::format(Arc::new(MemoryBlockStorage::new(4)), 4, 32).unwrap();
        let root = image.superblock().root_sector;
        assert_eq!(image.superblock().free_sectors, 1);

        // 根目录仅有的一个槽位被占用
        add(&mut image, root, "taken");
        assert_eq!(image.create_directory(root, "sub").unwrap(), None);
        assert_eq!(image.superblock().free_sectors, 1);
    }

    #[test]
    fn duplicate_directory_name() {
        let mut image = image(64);
        let root = image.superblock().root_sector;
        let sub = image.create_directory(root, "sub").unwrap().unwrap();
        assert!(image.read_directory(sub).unwrap().is_empty());
        assert!(matches!(
            image.create_directory(root, "sub"),
            Err(Error::AlreadyExists(_))
        ));
    }
}
