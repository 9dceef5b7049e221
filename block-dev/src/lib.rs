//! # 存储后端层
//!
//! 扇区是以**字**（32位）为单位的定长存储单元；
//! [`BlockStorage`] 是对按扇区读写的存储介质的抽象，
//! 块设备外设与文件系统镜像引擎都建立在它之上。
//!
//! 目前有两种实现：
//! - [`MemoryBlockStorage`]：易失的内存后端，稀疏存放已写入的扇区；
//! - [`FileBlockStorage`]：以宿主文件为介质，首次访问时才打开文件。

mod error;
mod file;
mod memory;

pub use self::{
    error::{Error, Result},
    file::FileBlockStorage,
    memory::MemoryBlockStorage,
};

/// 默认扇区宽度：128字，即512字节
pub const DEFAULT_SECTOR_SIZE: usize = 128;

/// 一个字的字节数
pub const WORD_BYTES: usize = 4;

/// 存储后端特质
///
/// 所有方法都只需要共享引用，实现者自行负责内部可变性。
pub trait BlockStorage: Send + Sync {
    /// 读取`lba`号扇区，宽度为`sector_size`字。
    /// 从未写过的扇区读出全零。
    fn read(&self, lba: u32, sector_size: usize) -> Result<Vec<u32>>;

    /// 整扇区覆盖写入。
    /// `words`不足一个扇区时补零，超出部分被截断。
    fn write(&self, lba: u32, words: &[u32], sector_size: usize) -> Result<()>;

    fn flush(&self) -> Result<()>;

    /// 设备的扇区总数
    fn total_sectors(&self) -> u32;

    /// 显式释放底层资源
    fn close(&self) -> Result<()> {
        self.flush()
    }
}

/// 把输入规整为恰好一个扇区宽
pub(crate) fn fit_sector(words: &[u32], sector_size: usize) -> Box<[u32]> {
    let mut sector = vec![0; sector_size];
    let len = words.len().min(sector_size);
    sector[..len].copy_from_slice(&words[..len]);
    sector.into()
}

/// 小端序地展开为字节
pub fn words_to_bytes(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|word| word.to_le_bytes()).collect()
}

/// 小端序地收拢为字，末尾不足一字的部分补零
pub fn bytes_to_words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks(WORD_BYTES)
        .map(|chunk| {
            let mut word = [0; WORD_BYTES];
            word[..chunk.len()].copy_from_slice(chunk);
            u32::from_le_bytes(word)
        })
        .collect()
}
