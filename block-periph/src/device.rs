//! # 块设备外设
//!
//! 客户机通过共享区设置参数（LBA、扇区数、缓冲区地址），
//! 再向 I/O 区写入命令字触发处理。
//! 多扇区传输被拆成逐扇区的步骤，每次 [`BlockDevice::tick`] 搬运一个扇区，
//! 期间`STATUS`保持为`BUSY`。

use std::sync::Arc;

use block_dev::BlockStorage;

use crate::memory::{GuestMemory, MemoryError};
use crate::peripheral::{AttachError, Mapping, Peripheral, Region};
use crate::regs::{offset, Command, ErrorCode, Status, IO_REGION_WORDS, SHARED_REGION_WORDS};

pub struct BlockDevice {
    storage: Arc<dyn BlockStorage>,
    /// 扇区宽度（字）
    sector_size: usize,
    regs: Registers,
    /// I/O 区中最后一次写入的命令字
    command: u32,
    pending: Option<Pending>,
    lifecycle: Lifecycle,
}

/// 共享区中可写的寄存器
#[derive(Debug, Default, Clone, Copy)]
struct Registers {
    status: Status,
    lba: u32,
    count: u32,
    buffer_ptr: u32,
    error_code: ErrorCode,
}

enum Lifecycle {
    Created,
    Attached {
        mapping: Mapping,
        memory: Arc<dyn GuestMemory>,
    },
    Detached,
}

/// 尚未完成的命令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Transfer(Transfer),
    Flush,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// 存储 -> 客户机内存
    Read,
    /// 客户机内存 -> 存储
    Write,
}

/// 多扇区传输的循环状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Transfer {
    direction: Direction,
    /// 下一个要搬运的扇区
    lba: u32,
    /// 已搬运的扇区数，也是缓冲区内的扇区下标
    index: u32,
    remaining: u32,
    buffer: u32,
}

#[derive(Debug, thiserror::Error)]
enum TransferError {
    #[error("storage: {0}")]
    Storage(#[from] block_dev::Error),
    #[error("guest memory: {0}")]
    Memory(#[from] MemoryError),
    #[error("no guest memory attached")]
    Unattached,
}

impl BlockDevice {
    pub fn new(storage: Arc<dyn BlockStorage>, sector_size: usize) -> Self {
        Self {
            storage,
            sector_size,
            regs: Registers::default(),
            command: 0,
            pending: None,
            lifecycle: Lifecycle::Created,
        }
    }

    #[inline]
    pub fn status(&self) -> Status {
        self.regs.status
    }

    #[inline]
    pub fn error_code(&self) -> ErrorCode {
        self.regs.error_code
    }

    #[inline]
    pub fn total_sectors(&self) -> u32 {
        self.storage.total_sectors()
    }

    #[inline]
    pub fn sector_size(&self) -> usize {
        self.sector_size
    }

    pub fn is_attached(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Attached { .. })
    }

    /// 一直推进，直到没有未完成的命令
    pub fn run_until_idle(&mut self) {
        while self.tick() {}
    }

    /// 读共享区寄存器
    pub fn read_register(&self, word: u32) -> u32 {
        match word {
            offset::STATUS => self.regs.status as u32,
            offset::LBA => self.regs.lba,
            offset::COUNT => self.regs.count,
            offset::BUFFER_PTR => self.regs.buffer_ptr,
            offset::TOTAL_SECTORS => self.total_sectors(),
            offset::SECTOR_SIZE => self.sector_size as u32,
            offset::ERROR_CODE => self.regs.error_code as u32,
            _ => 0,
        }
    }

    /// 写共享区寄存器，只读寄存器与未知取值被忽略。
    /// 命令执行期间`STATUS`不可写。
    pub fn write_register(&mut self, word: u32, value: u32) {
        match word {
            offset::STATUS if self.pending.is_some() => {
                log::warn!("ignored STATUS store {value:#x} while a command is running")
            }
            offset::STATUS => match Status::from_raw(value) {
                Some(status) => self.regs.status = status,
                None => log::warn!("ignored invalid STATUS value {value:#x}"),
            },
            offset::LBA => self.regs.lba = value,
            offset::COUNT => self.regs.count = value,
            offset::BUFFER_PTR => self.regs.buffer_ptr = value,
            offset::ERROR_CODE => match ErrorCode::from_raw(value) {
                Some(code) => self.regs.error_code = code,
                None => log::warn!("ignored invalid ERROR_CODE value {value:#x}"),
            },
            offset::TOTAL_SECTORS | offset::SECTOR_SIZE => {
                log::warn!("ignored store to read-only register {word}")
            }
            _ => log::warn!("ignored store to unused shared word {word}"),
        }
    }
}

impl BlockDevice {
    /// 处理命令字
    fn dispatch(&mut self, raw: u32) {
        // 不允许打断进行中的命令；STATUS 可被客户机改写，只看待办状态
        if self.pending.is_some() {
            log::warn!("command {raw:#x} rejected: device is busy");
            return;
        }

        let Some(command) = Command::from_raw(raw) else {
            log::warn!("unknown command {raw:#x}");
            self.fail(ErrorCode::IoError);
            return;
        };
        log::info!("dispatch {command:?}");

        match command {
            Command::Nop => {}
            Command::Read => self.begin_transfer(Direction::Read),
            Command::Write => self.begin_transfer(Direction::Write),
            Command::Flush => {
                self.regs.error_code = ErrorCode::None;
                self.regs.status = Status::Busy;
                self.pending = Some(Pending::Flush);
            }
        }
    }

    fn begin_transfer(&mut self, direction: Direction) {
        let Registers {
            lba,
            count,
            buffer_ptr,
            ..
        } = self.regs;
        let total = self.total_sectors();

        if lba >= total {
            log::warn!("{direction:?} rejected: lba={lba} total={total}");
            self.fail(ErrorCode::InvalidLba);
            return;
        }
        if count == 0 || lba as u64 + count as u64 > total as u64 {
            log::warn!("{direction:?} rejected: lba={lba} count={count} total={total}");
            self.fail(ErrorCode::InvalidCount);
            return;
        }

        self.regs.error_code = ErrorCode::None;
        self.regs.status = Status::Busy;
        self.pending = Some(Pending::Transfer(Transfer {
            direction,
            lba,
            index: 0,
            remaining: count,
            buffer: buffer_ptr,
        }));
    }

    /// 搬运传输中的一个扇区
    fn transfer_sector(&self, transfer: &Transfer) -> Result<(), TransferError> {
        let Lifecycle::Attached { memory, .. } = &self.lifecycle else {
            return Err(TransferError::Unattached);
        };
        let address = transfer
            .buffer
            .wrapping_add(transfer.index.wrapping_mul(self.sector_size as u32));

        match transfer.direction {
            Direction::Read => {
                let words = self.storage.read(transfer.lba, self.sector_size)?;
                memory.write(address, &words)?;
            }
            Direction::Write => {
                let mut words = vec![0; self.sector_size];
                memory.read(address, &mut words)?;
                self.storage.write(transfer.lba, &words, self.sector_size)?;
            }
        }

        log::trace!(
            "{:?} lba={} -> buffer {address:#x}",
            transfer.direction,
            transfer.lba
        );
        Ok(())
    }

    #[inline]
    fn fail(&mut self, code: ErrorCode) {
        self.regs.status = Status::Error;
        self.regs.error_code = code;
    }
}

impl Peripheral for BlockDevice {
    fn map(&mut self, mapping: Mapping, memory: Arc<dyn GuestMemory>) -> Result<(), AttachError> {
        match self.lifecycle {
            Lifecycle::Attached { .. } => return Err(AttachError::AlreadyAttached),
            Lifecycle::Detached => return Err(AttachError::Detached),
            Lifecycle::Created => {}
        }
        if mapping.io_size < IO_REGION_WORDS {
            return Err(AttachError::IoRegionTooSmall(mapping.io_size));
        }
        if mapping.shared_size < SHARED_REGION_WORDS {
            return Err(AttachError::SharedRegionTooSmall(mapping.shared_size));
        }

        log::info!(
            "block device attached at {:#x} ({} sectors x {} words)",
            mapping.base,
            self.total_sectors(),
            self.sector_size
        );
        self.lifecycle = Lifecycle::Attached { mapping, memory };
        Ok(())
    }

    fn load(&self, address: u32) -> Option<u32> {
        let Lifecycle::Attached { mapping, .. } = &self.lifecycle else {
            return None;
        };
        match mapping.region(address)? {
            Region::Io(offset::COMMAND) => Some(self.command),
            Region::Io(_) => Some(0),
            Region::Shared(word) => Some(self.read_register(word)),
        }
    }

    fn store(&mut self, address: u32, value: u32) -> bool {
        let Lifecycle::Attached { mapping, .. } = &self.lifecycle else {
            return false;
        };
        match mapping.region(address) {
            Some(Region::Io(word)) => self.notify(word, value),
            Some(Region::Shared(word)) => self.write_register(word, value),
            None => return false,
        }
        true
    }

    fn notify(&mut self, word: u32, value: u32) {
        if word != offset::COMMAND {
            log::warn!("ignored store to unused I/O word {word}");
            return;
        }
        self.command = value;
        self.dispatch(value);
    }

    fn tick(&mut self) -> bool {
        let Some(pending) = self.pending.take() else {
            return false;
        };

        match pending {
            Pending::Flush => match self.storage.flush() {
                Ok(()) => self.regs.status = Status::Ready,
                Err(e) => {
                    log::error!("flush failed: {e}");
                    self.fail(ErrorCode::IoError);
                }
            },
            Pending::Transfer(mut transfer) => match self.transfer_sector(&transfer) {
                Ok(()) => {
                    transfer.lba += 1;
                    transfer.index += 1;
                    transfer.remaining -= 1;
                    if transfer.remaining == 0 {
                        self.regs.status = Status::Ready;
                    } else {
                        self.pending = Some(Pending::Transfer(transfer));
                    }
                }
                Err(e) => {
                    // 放弃剩余扇区，已搬运的保持原样
                    log::error!(
                        "{:?} aborted at lba={} after {} sectors: {e}",
                        transfer.direction,
                        transfer.lba,
                        transfer.index
                    );
                    self.fail(ErrorCode::IoError);
                }
            },
        }

        self.pending.is_some()
    }

    fn unmap(&mut self) {
        if let Some(pending) = self.pending.take() {
            log::warn!("detached with unfinished command {pending:?}");
        }
        self.lifecycle = Lifecycle::Detached;
        log::info!("block device detached");
    }
}
