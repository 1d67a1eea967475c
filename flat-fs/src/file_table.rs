//! # 打开文件表
//!
//! 记录所有打开的文件。打开同一文件的句柄共享同一个内存中的 inode，
//! 该 inode 按编号缓存并计数，最后一个句柄关闭时才被移出缓存。

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::str::FromStr;
use core::sync::atomic::{AtomicUsize, Ordering};

use enumflags2::{bitflags, BitFlags};
use spin::{Mutex, RwLock};

use crate::block_cache::BlockCacheManager;
use crate::directory::Directory;
use crate::error::{Error, Result};
use crate::inode::Inode;
use crate::layout::InodeState;

/// 用于区分不同文件系统实例的句柄
static NEXT_TABLE_ID: AtomicUsize = AtomicUsize::new(0);

#[bitflags]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read = 0b01,
    Write = 0b10,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// `"r"`：只读，文件不存在时失败
    Read,
    /// `"w"`：只写，先清空文件
    Write,
    /// `"a"`：只写，从文件末尾开始
    Append,
    /// `"w+"`：读写兼备，不清空
    ReadWrite,
}

impl OpenMode {
    pub fn access(self) -> BitFlags<Access> {
        match self {
            Self::Read => Access::Read.into(),
            Self::Write | Self::Append => Access::Write.into(),
            Self::ReadWrite => Access::Read | Access::Write,
        }
    }

    /// 文件不存在时是否创建
    #[inline]
    pub fn creates(self) -> bool {
        self != Self::Read
    }

    #[inline]
    pub fn truncates(self) -> bool {
        self == Self::Write
    }
}

impl FromStr for OpenMode {
    type Err = Error;

    fn from_str(mode: &str) -> Result<Self> {
        match mode {
            "r" => Ok(Self::Read),
            "w" => Ok(Self::Write),
            "a" => Ok(Self::Append),
            "w+" => Ok(Self::ReadWrite),
            _ => Err(Error::InvalidMode),
        }
    }
}

/// 打开文件表项
#[derive(Debug)]
pub struct FileTableEntry {
    table_id: usize,
    fd: usize,
    pub inumber: u32,
    pub mode: OpenMode,
    /// 与打开同一文件的其它表项共享
    pub inode: Arc<RwLock<Inode>>,
    /// 对此表项的任何操作都要持有该锁
    pub inner: Mutex<EntryInner>,
}

#[derive(Debug)]
pub struct EntryInner {
    pub seek: u32,
    /// 共享此表项的句柄数
    pub count: u32,
}

/// 打开文件的句柄
///
/// 关闭时消耗句柄；需要多个句柄共享读写位置时使用 `FileSystem::dup`。
#[derive(Debug)]
pub struct FileHandle(pub(crate) Arc<FileTableEntry>);

impl FileHandle {
    #[inline]
    pub fn inumber(&self) -> u32 {
        self.0.inumber
    }

    #[inline]
    pub fn mode(&self) -> OpenMode {
        self.0.mode
    }
}

pub struct FileTable {
    id: usize,
    cache: Arc<BlockCacheManager>,
    directory: Arc<Mutex<Directory>>,
    inner: Mutex<TableInner>,
}

#[derive(Default)]
struct TableInner {
    next_fd: usize,
    entries: BTreeMap<usize, Arc<FileTableEntry>>,
    /// 内存中的 inode，按编号共享
    inodes: BTreeMap<u32, CachedInode>,
}

/// 被打开的 inode。
///
/// 状态与计数受表锁保护，内容另有读写锁；
/// 打开与关闭只碰前者，因此不会等待正在进行的读写。
struct CachedInode {
    state: InodeState,
    count: u16,
    inode: Arc<RwLock<Inode>>,
}

impl CachedInode {
    fn load(cache: &BlockCacheManager, inumber: u32) -> Self {
        let inode = Inode::load(cache, inumber);
        Self {
            state: inode.state,
            count: inode.count,
            inode: Arc::new(RwLock::new(inode)),
        }
    }
}

impl FileTable {
    pub fn new(cache: Arc<BlockCacheManager>, directory: Arc<Mutex<Directory>>) -> Self {
        Self {
            id: NEXT_TABLE_ID.fetch_add(1, Ordering::Relaxed),
            cache,
            directory,
            inner: Mutex::default(),
        }
    }

    /// 为文件分配表项：按模式查找或创建文件，并推进 inode 的状态。
    /// 与现有持有者冲突时立即返回 `AlreadyInUse`。
    pub fn acquire(&self, name: &str, mode: OpenMode) -> Result<FileHandle> {
        let mut table = self.inner.lock();

        let (inumber, created) = {
            let mut directory = self.directory.lock();
            match directory.resolve(name) {
                Some(inumber) => (inumber, false),
                None if mode.creates() => (directory.allocate(name)?, true),
                None => return Err(Error::NotFound),
            }
        };
        if created {
            Inode::allocated().persist(&self.cache, inumber);
        }

        let cached = table
            .inodes
            .entry(inumber)
            .or_insert_with(|| CachedInode::load(&self.cache, inumber));

        let next = match mode {
            OpenMode::Read if cached.state == InodeState::ExclusiveWrite => None,
            OpenMode::Read => Some(InodeState::SharedRead),
            _ if cached.count > 0 => None,
            _ => Some(InodeState::ExclusiveWrite),
        };
        let Some(state) = next else {
            log::warn!("open {name:?} as {mode:?} refused: {} holders", cached.count);
            if cached.count == 0 {
                table.inodes.remove(&inumber);
            }
            return Err(Error::AlreadyInUse);
        };

        cached.state = state;
        cached.count += 1;
        Inode::persist_state(&self.cache, inumber, state, cached.count);
        let inode = cached.inode.clone();

        // 追加模式要求没有其它持有者，内容锁不会被占用
        let seek = if mode == OpenMode::Append {
            inode.read().length
        } else {
            0
        };

        let fd = table.next_fd;
        table.next_fd += 1;
        let entry = Arc::new(FileTableEntry {
            table_id: self.id,
            fd,
            inumber,
            mode,
            inode,
            inner: Mutex::new(EntryInner { seek, count: 1 }),
        });
        table.entries.insert(fd, entry.clone());
        log::debug!("open {name:?} as {mode:?}: fd={fd}, inode={inumber}");

        Ok(FileHandle(entry))
    }

    /// 释放表项。
    /// 若 inode 已无人持有，则恢复为 `Allocated` 并移出缓存，此时返回 `true`。
    pub fn release(&self, entry: &Arc<FileTableEntry>) -> Result<bool> {
        let mut table = self.inner.lock();
        self.remove_entry(&mut table, entry)?;

        let Some(cached) = table.inodes.get_mut(&entry.inumber) else {
            log::warn!("inode {} was not cached", entry.inumber);
            return Err(Error::InvalidHandle);
        };
        cached.count = cached.count.saturating_sub(1);
        let evicted = cached.count == 0;
        if evicted {
            cached.state = InodeState::Allocated;
        }
        Inode::persist_state(&self.cache, entry.inumber, cached.state, cached.count);
        if evicted {
            table.inodes.remove(&entry.inumber);
        }
        log::debug!("close fd={}: inode={}, evicted={evicted}", entry.fd, entry.inumber);

        Ok(evicted)
    }

    /// 释放以写模式打开的表项，同时删除文件：
    /// inode 变回 `Unused`，目录项被释放。
    /// 整个过程持有表锁，期间不会有人再打开此文件。
    pub fn unlink(&self, entry: &Arc<FileTableEntry>) -> Result<()> {
        let mut table = self.inner.lock();
        let holders = table.inodes.get(&entry.inumber).map_or(0, |cached| cached.count);
        if holders > 1 {
            return Err(Error::AlreadyInUse);
        }
        self.remove_entry(&mut table, entry)?;
        table.inodes.remove(&entry.inumber);

        {
            let mut inode = entry.inode.write();
            inode.count = 0;
            inode.state = InodeState::Unused;
            inode.reset();
            inode.persist(&self.cache, entry.inumber);
        }

        if !self.directory.lock().release(entry.inumber) {
            log::warn!("inode {} had no directory entry", entry.inumber);
        }
        log::debug!("unlink inode {}", entry.inumber);
        Ok(())
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// 在没有打开文件的前提下执行 `f`，期间不允许打开文件
    pub fn reset_with<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let mut table = self.inner.lock();
        if !table.entries.is_empty() {
            return Err(Error::Busy);
        }
        table.inodes.clear();
        f()
    }

    /// 表项是否属于此表
    #[inline]
    pub fn owns(&self, entry: &FileTableEntry) -> bool {
        entry.table_id == self.id
    }

    /// 文件长度：优先取内存中共享的 inode。
    /// 文件正被写入时等待写入结束，但不占用表锁。
    pub fn length_of(&self, inumber: u32) -> u32 {
        let cached = self
            .inner
            .lock()
            .inodes
            .get(&inumber)
            .map(|cached| cached.inode.clone());
        match cached {
            Some(inode) => inode.read().length,
            None => Inode::load(&self.cache, inumber).length,
        }
    }

    fn remove_entry(&self, table: &mut TableInner, entry: &Arc<FileTableEntry>) -> Result<()> {
        match table.entries.get(&entry.fd) {
            Some(registered) if self.owns(entry) && Arc::ptr_eq(registered, entry) => {
                table.entries.remove(&entry.fd);
                Ok(())
            }
            _ => Err(Error::InvalidHandle),
        }
    }
}
