//! 路径层：以`/`分隔的路径，空组件被忽略，总是从根目录出发。

use enumflags2::BitFlags;

use crate::layout::{DirEntry, EntryFlag};
use crate::{Error, Image, Result};

/// 目录项所在的槽位
#[derive(Debug, Clone, Copy)]
struct Slot {
    dir: u32,
    index: u32,
}

/// 已打开的目录：首扇区及其在上级目录中的槽位（根目录没有）
#[derive(Debug, Clone, Copy)]
struct OpenDir {
    first: u32,
    slot: Option<Slot>,
}

fn components(path: &str) -> Vec<&str> {
    path.split('/').filter(|c| !c.is_empty()).collect()
}

/// 拆出父目录各组件与末尾的名字；根路径没有名字
fn split_name(path: &str) -> Result<(Vec<&str>, &str)> {
    let mut parents = components(path);
    let name = parents
        .pop()
        .ok_or_else(|| Error::InvalidName(path.to_owned()))?;
    DirEntry::validate_name(name)?;
    Ok((parents, name))
}

impl Image {
    /// 根目录的合成目录项，大小为其中在用项的个数
    pub fn root_entry(&self) -> Result<DirEntry> {
        let root = self.superblock().root_sector;
        let live = self.read_directory(root)?.len();
        Ok(DirEntry::root(root, live as u32))
    }

    /// 解析路径；路径不存在或中间组件不是目录时返回`None`
    pub fn resolve_path(&self, path: &str) -> Result<Option<DirEntry>> {
        let (parents, name) = match components(path).split_last() {
            None => return self.root_entry().map(Some),
            Some((&name, parents)) => (parents.to_vec(), name),
        };
        let parent = match self.open_dir(&parents, path) {
            Ok(parent) => parent,
            Err(Error::NotFound(_) | Error::NotADirectory(_)) => return Ok(None),
            Err(e) => return Err(e),
        };

        Ok(self.find_in_directory(parent.first, name)?.map(|(_, entry)| entry))
    }

    /// 与[`Image::resolve_path`]相同，但路径不存在是错误
    pub fn stat(&self, path: &str) -> Result<DirEntry> {
        self.resolve_path(path)?
            .ok_or_else(|| Error::NotFound(path.to_owned()))
    }

    /// 创建或替换文件。
    ///
    /// 替换时先写入新数据再回收旧链表，失败时原文件保持不变。
    pub fn add_file(&mut self, path: &str, data: &[u8], executable: bool) -> Result<DirEntry> {
        let (parents, name) = split_name(path)?;
        let parent = self.open_dir(&parents, path)?;
        let size = u32::try_from(data.len()).map_err(|_| Error::NoSpace)?;

        let existing = self.find_in_directory(parent.first, name)?;
        if existing.as_ref().is_some_and(|(_, old)| old.is_dir()) {
            return Err(Error::IsADirectory(path.to_owned()));
        }

        let first = self.write_file(data)?;
        let mut flags = BitFlags::from(EntryFlag::Used);
        if executable {
            flags |= EntryFlag::Executable;
        }
        let entry = DirEntry::new(name, flags, first, size)?;

        match existing {
            Some((index, old)) => {
                self.write_entry_or_free(parent.first, index, &entry)?;
                self.free_sector_chain(old.first_sector)?;
                log::debug!("replaced {path:?}, {size} bytes");
            }
            None => {
                let Some(index) = self.find_free_slot(parent.first)? else {
                    self.free_sector_chain(first)?;
                    return Err(Error::DirectoryFull);
                };
                self.write_entry_or_free(parent.first, index, &entry)?;
                self.adjust_size(parent, 1)?;
                log::debug!("added {path:?}, {size} bytes");
            }
        }

        Ok(entry)
    }

    /// 创建目录，返回其首扇区
    pub fn make_dir(&mut self, path: &str) -> Result<u32> {
        let (parents, name) = split_name(path)?;
        let parent = self.open_dir(&parents, path)?;

        let sector = self
            .create_directory(parent.first, name)?
            .ok_or(Error::NoSpace)?;
        self.adjust_size(parent, 1)?;

        Ok(sector)
    }

    pub fn list_dir(&self, path: &str) -> Result<Vec<DirEntry>> {
        let dir = self.stat(path)?;
        if !dir.is_dir() {
            return Err(Error::NotADirectory(path.to_owned()));
        }

        Ok(self
            .read_directory(dir.first_sector)?
            .into_iter()
            .map(|(_, entry)| entry)
            .collect())
    }

    /// 读出文件内容
    pub fn extract(&self, path: &str) -> Result<Vec<u8>> {
        let entry = self.stat(path)?;
        if entry.is_dir() {
            return Err(Error::IsADirectory(path.to_owned()));
        }
        self.read_file(&entry)
    }

    /// 删除文件或空目录：槽位标记为已删除，数据链表被回收
    pub fn remove(&mut self, path: &str) -> Result<()> {
        let (parents, name) = split_name(path)?;
        let parent = self.open_dir(&parents, path)?;
        let (index, mut entry) = self
            .find_in_directory(parent.first, name)?
            .ok_or_else(|| Error::NotFound(path.to_owned()))?;

        if entry.is_dir() && !self.read_directory(entry.first_sector)?.is_empty() {
            return Err(Error::DirectoryNotEmpty(path.to_owned()));
        }

        let first = entry.first_sector;
        entry.mark_deleted();
        self.write_entry(parent.first, index, &entry)?;
        self.free_sector_chain(first)?;
        self.adjust_size(parent, -1)?;
        log::debug!("removed {path:?}");

        Ok(())
    }
}

impl Image {
    /// 沿`components`逐级进入子目录
    fn open_dir(&self, components: &[&str], path: &str) -> Result<OpenDir> {
        let mut dir = OpenDir {
            first: self.superblock().root_sector,
            slot: None,
        };

        for name in components {
            let (index, entry) = self
                .find_in_directory(dir.first, name)?
                .ok_or_else(|| Error::NotFound(path.to_owned()))?;
            if !entry.is_dir() {
                return Err(Error::NotADirectory(path.to_owned()));
            }
            dir = OpenDir {
                first: entry.first_sector,
                slot: Some(Slot {
                    dir: dir.first,
                    index,
                }),
            };
        }

        Ok(dir)
    }

    /// 更新目录项中记录的子项个数；根目录的个数是现算的
    fn adjust_size(&self, dir: OpenDir, delta: i32) -> Result<()> {
        let Some(Slot { dir: parent, index }) = dir.slot else {
            return Ok(());
        };
        let mut entry = self.read_entry(parent, index)?;
        entry.size = entry.size.saturating_add_signed(delta);
        self.write_entry(parent, index, &entry)
    }

    fn write_entry_or_free(&mut self, dir: u32, index: u32, entry: &DirEntry) -> Result<()> {
        if let Err(e) = self.write_entry(dir, index, entry) {
            if let Err(rollback) = self.free_sector_chain(entry.first_sector) {
                log::error!("rollback of chain {} failed: {rollback}", entry.first_sector);
            }
            return Err(e);
        }
        Ok(())
    }
}
