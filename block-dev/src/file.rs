use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use spin::Mutex;

use crate::{bytes_to_words, fit_sector, words_to_bytes, BlockStorage, Error, Result, WORD_BYTES};

/// 以宿主文件为介质的后端
///
/// `lba`号扇区位于文件的`lba * sector_size * 4`字节处。
#[derive(Debug)]
pub struct FileBlockStorage {
    path: PathBuf,
    total_sectors: u32,
    handle: Mutex<Handle>,
}

/// 文件句柄的生命周期：未打开 -> 已打开 -> 已释放
#[derive(Debug)]
enum Handle {
    Unopened,
    Open(File),
    Released,
}

impl FileBlockStorage {
    /// 不会立即打开文件，首次读写时才打开（不存在则创建）。
    pub fn new(path: impl AsRef<Path>, total_sectors: u32) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            total_sectors,
            handle: Mutex::new(Handle::Unopened),
        }
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_open(&self) -> bool {
        matches!(*self.handle.lock(), Handle::Open(_))
    }

    /// 获取已打开的文件并处理
    fn with_file<V>(&self, f: impl FnOnce(&mut File) -> std::io::Result<V>) -> Result<V> {
        let mut handle = self.handle.lock();
        if let Handle::Unopened = *handle {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(false)
                .open(&self.path)?;
            log::debug!("opened backing file {:?}", self.path);
            *handle = Handle::Open(file);
        }

        match &mut *handle {
            Handle::Open(file) => Ok(f(file)?),
            Handle::Released => Err(Error::Released),
            Handle::Unopened => unreachable!(),
        }
    }

    #[inline]
    fn offset(lba: u32, sector_size: usize) -> u64 {
        lba as u64 * (sector_size * WORD_BYTES) as u64
    }
}

impl BlockStorage for FileBlockStorage {
    fn read(&self, lba: u32, sector_size: usize) -> Result<Vec<u32>> {
        log::trace!("file read lba={lba}");
        let mut buf = vec![0u8; sector_size * WORD_BYTES];
        self.with_file(|file| {
            file.seek(SeekFrom::Start(Self::offset(lba, sector_size)))?;
            // 文件末尾之后的部分保持为零
            let mut filled = 0;
            while filled < buf.len() {
                match file.read(&mut buf[filled..]) {
                    Ok(0) => break,
                    Ok(n) => filled += n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                }
            }
            Ok(())
        })?;
        Ok(bytes_to_words(&buf))
    }

    fn write(&self, lba: u32, words: &[u32], sector_size: usize) -> Result<()> {
        log::trace!("file write lba={lba}");
        let bytes = words_to_bytes(&fit_sector(words, sector_size));
        self.with_file(|file| {
            file.seek(SeekFrom::Start(Self::offset(lba, sector_size)))?;
            file.write_all(&bytes)
        })
    }

    fn flush(&self) -> Result<()> {
        match &mut *self.handle.lock() {
            Handle::Unopened => Ok(()),
            Handle::Open(file) => Ok(file.sync_all()?),
            Handle::Released => Err(Error::Released),
        }
    }

    #[inline]
    fn total_sectors(&self) -> u32 {
        self.total_sectors
    }

    /// 落盘并释放文件描述符，只能成功一次
    fn close(&self) -> Result<()> {
        let mut handle = self.handle.lock();
        match core::mem::replace(&mut *handle, Handle::Released) {
            Handle::Open(file) => {
                let synced = file.sync_all();
                drop(file);
                log::debug!("released backing file {:?}", self.path);
                Ok(synced?)
            }
            Handle::Unopened => Ok(()),
            Handle::Released => Err(Error::Released),
        }
    }
}

impl Drop for FileBlockStorage {
    fn drop(&mut self) {
        if self.is_open() {
            if let Err(e) = self.close() {
                log::error!("failed to release {:?}: {e}", self.path);
            }
        }
    }
}
