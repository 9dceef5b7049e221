//! # toyfat
//!
//! 以32位字为单位的简易FAT文件系统，镜像可放在内存或宿主文件中。

/* toyfat 的整体架构，自上而下 */

// 一致性检查：核对分配表与目录树
mod check;
pub use check::CheckReport;

// 路径层：按路径增删查改
mod path;

// 文件与目录层：扇区链表上的内容读写
mod dir;
mod file;

// 镜像引擎：扇区读写、分配表维护、扇区分配与回收
mod image;
pub use image::{Chain, Image};

// 磁盘数据结构层
pub mod layout;
pub use layout::{DirEntry, EntryFlag, FatEntry, Superblock};

mod error;
pub use error::{Error, Result};

pub use block_dev::DEFAULT_SECTOR_SIZE;
