//! # 磁盘数据结构层
//!
//! 镜像的布局（单位为扇区）：
//! 超级块 | 分配表(FAT) | 根目录 | 数据区
//!
//! 所有字段都是小端序的32位字。

mod dir_entry;
mod fat;
mod super_block;

pub use self::{
    dir_entry::{DirEntry, EntryFlag, NAME_MAX_LEN},
    fat::FatEntry,
    super_block::{recommended_fat_sectors, Superblock, MAGIC, VERSION},
};
