//! 寄存器 ABI
//!
//! 这些数值被客户机程序直接使用，不可更改。

/// 共享区内寄存器的字偏移
pub mod offset {
    pub const STATUS: u32 = 0;
    pub const LBA: u32 = 1;
    pub const COUNT: u32 = 2;
    pub const BUFFER_PTR: u32 = 3;
    /// 只读
    pub const TOTAL_SECTORS: u32 = 4;
    /// 只读
    pub const SECTOR_SIZE: u32 = 5;
    pub const ERROR_CODE: u32 = 6;

    /// I/O 区内命令字的偏移
    pub const COMMAND: u32 = 0;
}

/// 共享区至少要容纳的字数
pub const SHARED_REGION_WORDS: u32 = 7;
/// I/O 区至少要容纳的字数
pub const IO_REGION_WORDS: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum Command {
    Nop = 0,
    Read = 1,
    Write = 2,
    Flush = 3,
}

impl Command {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Nop),
            1 => Some(Self::Read),
            2 => Some(Self::Write),
            3 => Some(Self::Flush),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum Status {
    #[default]
    Ready = 0,
    Busy = 1,
    Error = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum ErrorCode {
    #[default]
    None = 0,
    InvalidLba = 1,
    InvalidCount = 2,
    IoError = 3,
}

impl Status {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::Ready),
            1 => Some(Self::Busy),
            2 => Some(Self::Error),
            _ => None,
        }
    }
}

impl ErrorCode {
    pub fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::None),
            1 => Some(Self::InvalidLba),
            2 => Some(Self::InvalidCount),
            3 => Some(Self::IoError),
            _ => None,
        }
    }
}
