use derive_more::{From, Into};

/// 分配表中的一项，每个扇区对应一项。
///
/// 除了三个特殊值，其余取值都是链表中下一个扇区的编号。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, From, Into)]
#[repr(transparent)]
pub struct FatEntry(u32);

impl FatEntry {
    /// 扇区未分配
    pub const FREE: Self = Self(0);

    pub const END_OF_CHAIN: Self = Self(u32::MAX);

    /// 超级块、分配表与根目录占用的扇区
    pub const RESERVED: Self = Self(0xFFFF_FFFE);

    #[inline]
    pub const fn link(next: u32) -> Self {
        Self(next)
    }

    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    #[inline]
    pub fn is_free(self) -> bool {
        self == Self::FREE
    }

    /// 链表中的下一个扇区，链表在此终止则为`None`
    pub fn next(self) -> Option<u32> {
        match self {
            Self::FREE | Self::END_OF_CHAIN | Self::RESERVED => None,
            Self(next) => Some(next),
        }
    }
}
