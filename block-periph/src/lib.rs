//! 寄存器级的虚拟块设备
//!
//! 设备建立在 [`block_dev::BlockStorage`] 之上，
//! 以 DMA 方式在存储与客户机内存之间搬运整扇区。

mod device;
mod memory;
mod peripheral;
pub mod regs;

pub use self::{
    device::BlockDevice,
    memory::{GuestMemory, MemoryError, RamMemory},
    peripheral::{AttachError, Mapping, Peripheral, Region},
    regs::{Command, ErrorCode, Status},
};
