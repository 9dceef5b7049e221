use std::sync::Arc;

use crate::GuestMemory;

/// 宿主环境分配给外设的地址映射
///
/// 地址空间布局：`base` 起依次为 I/O 区与共享区，单位均为字。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mapping {
    pub base: u32,
    pub io_size: u32,
    pub shared_size: u32,
}

/// 地址落在映射的哪个区域
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    Io(u32),
    Shared(u32),
}

impl Mapping {
    pub const fn new(base: u32, io_size: u32, shared_size: u32) -> Self {
        Self {
            base,
            io_size,
            shared_size,
        }
    }

    #[inline]
    pub fn shared_base(&self) -> u32 {
        self.base + self.io_size
    }

    pub fn region(&self, address: u32) -> Option<Region> {
        let offset = address.checked_sub(self.base)?;
        if offset < self.io_size {
            Some(Region::Io(offset))
        } else if offset - self.io_size < self.shared_size {
            Some(Region::Shared(offset - self.io_size))
        } else {
            None
        }
    }
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum AttachError {
    #[error("peripheral is already attached")]
    AlreadyAttached,
    #[error("peripheral was detached and cannot be attached again")]
    Detached,
    #[error("I/O region of {0} words is too small")]
    IoRegionTooSmall(u32),
    #[error("shared region of {0} words is too small")]
    SharedRegionTooSmall(u32),
}

/// 挂在虚拟机总线上的外设
///
/// 外设是轮询式的，不会产生中断。
pub trait Peripheral {
    /// 挂载到虚拟机，整个生命周期只能成功一次
    fn map(&mut self, mapping: Mapping, memory: Arc<dyn GuestMemory>) -> Result<(), AttachError>;

    /// 读映射范围内的字，范围外返回`None`
    fn load(&self, address: u32) -> Option<u32>;

    /// 写映射范围内的字，返回地址是否归本外设所有
    fn store(&mut self, address: u32, value: u32) -> bool;

    /// I/O 区被写入后的回调
    fn notify(&mut self, offset: u32, value: u32);

    /// 推进进行中的工作一步，返回是否仍有未完成的工作
    fn tick(&mut self) -> bool;

    fn unmap(&mut self);
}
