use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("storage: {0}")]
    Storage(#[from] block_dev::Error),

    #[error("I/O: {0}")]
    Io(#[from] io::Error),

    #[error("malformed on-disk structure: {0}")]
    Decode(#[from] binrw::Error),

    #[error("bad magic number {0:#010x}")]
    BadMagic(u32),

    #[error("image corrupted: {0}")]
    Corrupted(String),

    #[error("sector {0} is outside the device")]
    InvalidSector(u32),

    #[error("{total} sectors cannot hold the layout, at least {required} needed")]
    TooSmall { total: u32, required: u32 },

    #[error("storage has {storage} sectors but the image needs {image}")]
    StorageTooSmall { storage: u32, image: u32 },

    #[error("unsupported sector size of {0} words")]
    BadSectorSize(u32),

    /// 没有空闲扇区
    #[error("no free sector left")]
    NoSpace,

    /// 目录无法再扩展出空槽位
    #[error("directory cannot hold another entry")]
    DirectoryFull,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("is a directory: {0}")]
    IsADirectory(String),

    #[error("directory not empty: {0}")]
    DirectoryNotEmpty(String),

    #[error("invalid name: {0:?}")]
    InvalidName(String),
}

pub type Result<T> = core::result::Result<T, Error>;
