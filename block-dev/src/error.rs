use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("backing file I/O failed: {0}")]
    Io(#[from] io::Error),

    /// 句柄已经关闭，不能再读写
    #[error("storage has already been released")]
    Released,
}

pub type Result<T> = core::result::Result<T, Error>;
