//! 客户机内存访问能力
//!
//! DMA 传输时，设备通过 [`GuestMemory`] 读写客户机地址空间中的一段字。

use spin::Mutex;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum MemoryError {
    #[error("guest access of {len} words at {address:#x} is out of bounds")]
    OutOfBounds { address: u32, len: usize },
}

pub trait GuestMemory: Send + Sync {
    fn read(&self, address: u32, buf: &mut [u32]) -> Result<(), MemoryError>;
    fn write(&self, address: u32, data: &[u32]) -> Result<(), MemoryError>;
}

/// 按字寻址的平坦内存
#[derive(Debug)]
pub struct RamMemory {
    words: Mutex<Vec<u32>>,
}

impl RamMemory {
    pub fn new(words: usize) -> Self {
        Self {
            words: Mutex::new(vec![0; words]),
        }
    }

    pub fn len(&self) -> usize {
        self.words.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn window(address: u32, len: usize, total: usize) -> Result<core::ops::Range<usize>, MemoryError> {
        let start = address as usize;
        match start.checked_add(len) {
            Some(end) if end <= total => Ok(start..end),
            _ => Err(MemoryError::OutOfBounds { address, len }),
        }
    }
}

impl GuestMemory for RamMemory {
    fn read(&self, address: u32, buf: &mut [u32]) -> Result<(), MemoryError> {
        let words = self.words.lock();
        let range = Self::window(address, buf.len(), words.len())?;
        buf.copy_from_slice(&words[range]);
        Ok(())
    }

    fn write(&self, address: u32, data: &[u32]) -> Result<(), MemoryError> {
        let mut words = self.words.lock();
        let range = Self::window(address, data.len(), words.len())?;
        words[range].copy_from_slice(data);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_bounds() {
        let ram = RamMemory::new(4);
        ram.write(2, &[5, 6]).unwrap();
        let mut buf = [0; 3];
        ram.read(1, &mut buf).unwrap();
        assert_eq!(buf, [0, 5, 6]);
        assert_eq!(
            ram.write(3, &[1, 2]),
            Err(MemoryError::OutOfBounds { address: 3, len: 2 })
        );
    }
}
