use std::io::Cursor;

use binrw::{binrw, BinRead, BinWrite};
use block_dev::{bytes_to_words, words_to_bytes};
use enumflags2::{bitflags, BitFlags};

use crate::{Error, Result};

/// 名字最多的字符数
pub const NAME_MAX_LEN: usize = 24;

/// 文件系统项的元信息，恒为32字。
///
/// 目录本身也是扇区链表，里面依次存放目录项。
#[binrw]
#[brw(little)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// 空槽位为空集
    #[br(map = |raw: u32| BitFlags::from_bits_truncate(raw))]
    #[bw(map = |flags: &BitFlags<EntryFlag>| flags.bits())]
    pub flags: BitFlags<EntryFlag>,

    /// 数据链表的首扇区，0表示没有数据
    pub first_sector: u32,

    /// 文件：字节数；目录：目录项个数
    pub size: u32,

    _reserved: [u32; 5],

    /// 每个字放一个字符，以NUL填充
    name: [u32; NAME_MAX_LEN],
}

#[bitflags]
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryFlag {
    Used = 0x1,
    Directory = 0x2,
    Executable = 0x4,
    Deleted = 0x8,
}

impl DirEntry {
    pub const WORDS: usize = 32;

    /// 空槽位
    pub fn empty() -> Self {
        Self {
            flags: BitFlags::empty(),
            first_sector: 0,
            size: 0,
            _reserved: [0; 5],
            name: [0; NAME_MAX_LEN],
        }
    }

    /// 根目录没有所在的槽位，其目录项是现场合成的，名字为空
    pub(crate) fn root(first_sector: u32, size: u32) -> Self {
        Self {
            flags: EntryFlag::Used | EntryFlag::Directory,
            first_sector,
            size,
            ..Self::empty()
        }
    }

    pub fn new(
        name: &str,
        flags: impl Into<BitFlags<EntryFlag>>,
        first_sector: u32,
        size: u32,
    ) -> Result<Self> {
        Self::validate_name(name)?;

        let mut raw_name = [0; NAME_MAX_LEN];
        for (word, c) in raw_name.iter_mut().zip(name.chars()) {
            *word = c as u32;
        }

        Ok(Self {
            flags: flags.into(),
            first_sector,
            size,
            _reserved: [0; 5],
            name: raw_name,
        })
    }

    /// 名字非空、不超过[`NAME_MAX_LEN`]个字符，且不含`/`与NUL
    pub fn validate_name(name: &str) -> Result<()> {
        let len = name.chars().count();
        if len == 0 || len > NAME_MAX_LEN || name.contains(['/', '\0']) {
            return Err(Error::InvalidName(name.to_owned()));
        }
        Ok(())
    }

    pub fn name(&self) -> String {
        self.name
            .iter()
            .take_while(|&&word| word != 0)
            .map(|&word| char::from_u32(word).unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect()
    }

    pub fn name_eq(&self, name: &str) -> bool {
        let mut words = self.name.iter().take_while(|&&word| word != 0);
        name.chars()
            .all(|c| words.next().is_some_and(|&word| word == c as u32))
            && words.next().is_none()
    }

    #[inline]
    pub fn is_used(&self) -> bool {
        self.flags.contains(EntryFlag::Used)
    }

    #[inline]
    pub fn is_dir(&self) -> bool {
        self.is_used() && self.flags.contains(EntryFlag::Directory)
    }

    #[inline]
    pub fn is_executable(&self) -> bool {
        self.flags.contains(EntryFlag::Executable)
    }

    /// 从未使用过或已删除的槽位都可以复用
    #[inline]
    pub fn is_free_slot(&self) -> bool {
        !self.is_used()
    }

    /// 标记为已删除，其余字段保留
    pub fn mark_deleted(&mut self) {
        self.flags = EntryFlag::Deleted.into();
    }

    pub fn from_words(words: &[u32]) -> Result<Self> {
        let len = words.len().min(Self::WORDS);
        Ok(Self::read(&mut Cursor::new(words_to_bytes(&words[..len])))?)
    }

    pub fn to_words(&self) -> Vec<u32> {
        let mut cursor = Cursor::new(Vec::with_capacity(Self::WORDS * 4));
        self.write(&mut cursor)
            .expect("writing into a Vec never fails");
        bytes_to_words(&cursor.into_inner())
    }
}
