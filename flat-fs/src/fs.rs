//! # 文件系统层
//!
//! 把块分配器、inode、目录与打开文件表组合成一个卷，
//! 对外提供 format/open/close/read/write/seek/delete/sync。

use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::allocator::BlockAllocator;
use crate::block_cache::BlockCacheManager;
use crate::directory::Directory;
use crate::error::{Error, MapError, Result};
use crate::file_table::{Access, FileHandle, FileTable, FileTableEntry, OpenMode};
use crate::inode::Inode;
use crate::layout::InodeState;
use crate::{BlockDevice, DataBlock};
use crate::{BLOCK_SIZE, DEFAULT_INODE_COUNT, MAX_FILE_SIZE, ROOT_NAME};

pub struct FileSystem {
    cache: Arc<BlockCacheManager>,
    allocator: BlockAllocator,
    directory: Arc<Mutex<Directory>>,
    table: FileTable,
    /// 串行化 `sync`：根文件同一时间只能有一个写者
    sync_lock: Mutex<()>,
}

/// `seek` 的基准位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    Start,
    Current,
    End,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub inumber: u32,
    pub length: u32,
}

impl FileSystem {
    /// 在块设备上新建文件系统
    pub fn create(
        block_device: Arc<dyn BlockDevice>,
        total_blocks: u32,
        inode_count: u32,
    ) -> Result<Self> {
        let cache = Arc::new(BlockCacheManager::new(block_device));
        let allocator = BlockAllocator::new(cache.clone());
        allocator.format(total_blocks, inode_count)?;

        let fs = Self::assemble(cache, allocator);
        fs.sync()?;
        Ok(fs)
    }

    /// 挂载块设备上已有的文件系统。
    /// 超级块无效时以默认 inode 数格式化。
    pub fn mount(block_device: Arc<dyn BlockDevice>, total_blocks: u32) -> Result<Self> {
        let cache = Arc::new(BlockCacheManager::new(block_device));
        let allocator = BlockAllocator::new(cache.clone());
        if !allocator.load(total_blocks) {
            log::warn!("no valid super block, formatting with {DEFAULT_INODE_COUNT} inodes");
            allocator.format(total_blocks, DEFAULT_INODE_COUNT)?;
        }
        recover_inodes(&cache, allocator.inode_count());

        let fs = Self::assemble(cache, allocator);
        fs.load_directory()?;
        log::debug!(
            "mount: total_blocks={total_blocks}, inode_count={}, free_blocks={}",
            fs.allocator.inode_count(),
            fs.allocator.free_blocks().len()
        );
        Ok(fs)
    }

    fn assemble(cache: Arc<BlockCacheManager>, allocator: BlockAllocator) -> Self {
        let directory = Arc::new(Mutex::new(Directory::new(allocator.inode_count())));
        let table = FileTable::new(cache.clone(), directory.clone());
        Self {
            cache,
            allocator,
            directory,
            table,
            sync_lock: Mutex::new(()),
        }
    }

    /// 从根文件读出目录
    fn load_directory(&self) -> Result<()> {
        let root = self.open(ROOT_NAME, OpenMode::Read)?;
        let mut data = vec![0; self.size(&root)? as usize];
        let result = self.read(&root, &mut data);
        self.close(root)?;

        let len = result?;
        self.directory.lock().deserialize(&data[..len]);
        Ok(())
    }

    /// 以新的 inode 数重建整个卷，仍有文件打开时失败
    pub fn format(&self, inode_count: u32) -> Result<()> {
        self.table.reset_with(|| {
            self.allocator
                .format(self.allocator.total_blocks(), inode_count)?;
            *self.directory.lock() = Directory::new(inode_count);
            Ok(())
        })?;
        self.sync()
    }

    pub fn open(&self, name: &str, mode: OpenMode) -> Result<FileHandle> {
        let handle = self.table.acquire(name, mode)?;
        if mode.truncates() {
            self.truncate(&mut handle.0.inode.write(), handle.inumber());
        }
        self.cache.sync_all();
        Ok(handle)
    }

    /// 关闭句柄。
    /// 句柄经 `dup` 复制过时，只有最后一个副本关闭才会释放表项。
    /// 返回 inode 是否因此不再有人持有。
    pub fn close(&self, handle: FileHandle) -> Result<bool> {
        let entry = self.entry(&handle)?;
        let mut inner = entry.inner.lock();
        inner.count = inner.count.checked_sub(1).ok_or(Error::InvalidHandle)?;
        if inner.count > 0 {
            return Ok(false);
        }

        let released = self.table.release(entry)?;
        drop(inner);
        self.cache.sync_all();
        Ok(released)
    }

    /// 复制句柄，副本与原句柄共享读写位置
    pub fn dup(&self, handle: &FileHandle) -> Result<FileHandle> {
        let entry = self.entry(handle)?;
        let mut inner = entry.inner.lock();
        if inner.count == 0 {
            return Err(Error::InvalidHandle);
        }
        inner.count += 1;
        Ok(FileHandle(entry.clone()))
    }

    pub fn size(&self, handle: &FileHandle) -> Result<u32> {
        let entry = self.entry(handle)?;
        Ok(entry.inode.read().length)
    }

    /// 从读写位置起读入数据，返回读到的字节数。
    /// 遇到文件末尾或未映射的块即停止。
    pub fn read(&self, handle: &FileHandle, buf: &mut [u8]) -> Result<usize> {
        let entry = self.entry(handle)?;
        if !handle.mode().access().contains(Access::Read) {
            return Err(Error::WrongMode);
        }

        let mut inner = entry.inner.lock();
        let inode = entry.inode.read();
        let mut read_size = 0;

        while read_size < buf.len() && inner.seek < inode.length {
            let Some(block_id) = inode.map_offset(&self.cache, inner.seek) else {
                break;
            };
            let block_offset = inner.seek as usize % BLOCK_SIZE;
            let len = (BLOCK_SIZE - block_offset)
                .min(buf.len() - read_size)
                .min((inode.length - inner.seek) as usize);

            self.cache
                .get(block_id as usize)
                .lock()
                .map(0, |data_block: &DataBlock| {
                    buf[read_size..read_size + len]
                        .copy_from_slice(&data_block[block_offset..block_offset + len])
                });
            read_size += len;
            inner.seek += len as u32;
        }

        Ok(read_size)
    }

    /// 从读写位置起写入数据，按需分配数据块与索引块。
    /// 无论成败，inode 都在最后写回一次。
    pub fn write(&self, handle: &FileHandle, buf: &[u8]) -> Result<usize> {
        let entry = self.entry(handle)?;
        if !handle.mode().access().contains(Access::Write) {
            return Err(Error::WrongMode);
        }

        let mut inner = entry.inner.lock();
        if inner.seek as usize + buf.len() > MAX_FILE_SIZE {
            return Err(Error::FileTooLarge);
        }

        let mut inode = entry.inode.write();
        let result = self.write_blocks(&mut inode, &mut inner.seek, buf);
        inode.persist_map(&self.cache, entry.inumber);
        drop(inode);
        drop(inner);

        if let Err(err) = &result {
            log::warn!("write to inode {} aborted: {err}", entry.inumber);
        }
        self.cache.sync_all();
        result
    }

    fn write_blocks(&self, inode: &mut Inode, seek: &mut u32, buf: &[u8]) -> Result<usize> {
        let mut write_size = 0;

        while write_size < buf.len() {
            let block_id = match inode.map_offset(&self.cache, *seek) {
                Some(block_id) => block_id,
                None => self.map_new_block(inode, *seek)?,
            };
            let block_offset = *seek as usize % BLOCK_SIZE;
            let len = (BLOCK_SIZE - block_offset).min(buf.len() - write_size);

            self.cache
                .get(block_id as usize)
                .lock()
                .map_mut(0, |data_block: &mut DataBlock| {
                    data_block[block_offset..block_offset + len]
                        .copy_from_slice(&buf[write_size..write_size + len])
                });
            write_size += len;
            *seek += len as u32;
            inode.length = inode.length.max(*seek);
        }

        Ok(write_size)
    }

    /// 为偏移所在的槽位分配数据块，必要时先挂上索引块
    fn map_new_block(&self, inode: &mut Inode, offset: u32) -> Result<u32> {
        let block_id = self.allocator.allocate()?;

        let result = match inode.register_block(&self.cache, offset, block_id) {
            Err(MapError::NeedsIndex) => self.attach_index_block(inode).and_then(|()| {
                inode
                    .register_block(&self.cache, offset, block_id)
                    .map_err(Error::from)
            }),
            result => result.map_err(Error::from),
        };

        if let Err(err) = result {
            self.allocator.release(block_id);
            return Err(err);
        }
        Ok(block_id)
    }

    fn attach_index_block(&self, inode: &mut Inode) -> Result<()> {
        let index_block = self.allocator.allocate()?;
        if !inode.attach_index_block(&self.cache, index_block) {
            self.allocator.release(index_block);
            return Err(MapError::IndexUnavailable.into());
        }
        log::trace!("attach index block {index_block}");
        Ok(())
    }

    /// 回收 inode 占用的全部块，包括索引块本身
    fn truncate(&self, inode: &mut Inode, inumber: u32) {
        for block_id in inode.direct_blocks() {
            self.allocator.release(block_id);
        }

        let indirect = inode.indirect();
        if let Some(index_block) = inode.detach_index_block(&self.cache) {
            for block_id in index_block.iter().filter_map(|ptr| ptr.block()) {
                self.allocator.release(block_id);
            }
        }
        if let Some(indirect) = indirect {
            self.allocator.release(indirect);
        }

        inode.reset();
        inode.persist_map(&self.cache, inumber);
    }

    /// 移动读写位置，结果截断在 `[0, length]` 内
    pub fn seek(&self, handle: &FileHandle, offset: i64, whence: Whence) -> Result<u32> {
        let entry = self.entry(handle)?;
        let mut inner = entry.inner.lock();
        let length = entry.inode.read().length;

        let base = match whence {
            Whence::Start => 0,
            Whence::Current => i64::from(inner.seek),
            Whence::End => i64::from(length),
        };
        inner.seek = base.saturating_add(offset).clamp(0, i64::from(length)) as u32;
        Ok(inner.seek)
    }

    /// 删除文件：以写模式打开以回收全部块，再释放 inode 与目录项
    pub fn delete(&self, name: &str) -> Result<()> {
        if name == ROOT_NAME {
            return Err(Error::InvalidName);
        }
        if self.directory.lock().resolve(name).is_none() {
            return Err(Error::NotFound);
        }

        let handle = self.open(name, OpenMode::Write)?;
        if let Err(err) = self.table.unlink(&handle.0) {
            self.close(handle)?;
            return Err(err);
        }
        self.cache.sync_all();
        log::debug!("delete {name:?}");
        Ok(())
    }

    /// 把目录写入根文件，再写回超级块与全部缓存块。
    /// 只有经过这里，目录的改动才会落盘。
    pub fn sync(&self) -> Result<()> {
        let _guard = self.sync_lock.lock();
        let data = self.directory.lock().serialize();
        let root = self.open(ROOT_NAME, OpenMode::Write)?;
        let result = self.write(&root, &data);
        self.close(root)?;
        result?;

        self.allocator.sync();
        self.cache.sync_all();
        log::debug!("sync: {} bytes of directory", data.len());
        Ok(())
    }

    /// 目录中的全部文件
    pub fn list(&self) -> Vec<FileInfo> {
        let files: Vec<(u32, String)> = self
            .directory
            .lock()
            .entries()
            .map(|(inumber, name)| (inumber, name.to_string()))
            .collect();

        files
            .into_iter()
            .map(|(inumber, name)| FileInfo {
                length: self.table.length_of(inumber),
                name,
                inumber,
            })
            .collect()
    }

    /// 是否还有打开的文件
    #[inline]
    pub fn has_open_files(&self) -> bool {
        !self.table.is_empty()
    }

    pub fn free_blocks(&self) -> Vec<u32> {
        self.allocator.free_blocks()
    }

    #[inline]
    pub fn total_blocks(&self) -> u32 {
        self.allocator.total_blocks()
    }

    #[inline]
    pub fn inode_count(&self) -> u32 {
        self.allocator.inode_count()
    }

    fn entry<'a>(&self, handle: &'a FileHandle) -> Result<&'a Arc<FileTableEntry>> {
        if self.table.owns(&handle.0) {
            Ok(&handle.0)
        } else {
            Err(Error::InvalidHandle)
        }
    }
}

/// 异常关机后，磁盘上可能残留打开状态与非零计数，挂载时一并清除
fn recover_inodes(cache: &BlockCacheManager, inode_count: u32) {
    for inumber in 0..inode_count {
        let mut inode = Inode::load(cache, inumber);
        if !inode.state.is_open() && inode.count == 0 {
            continue;
        }

        log::warn!(
            "inode {inumber} left {:?} with count {}, recovering",
            inode.state,
            inode.count
        );
        if inode.state.is_open() {
            inode.state = InodeState::Allocated;
        }
        inode.count = 0;
        inode.persist(cache, inumber);
    }
}

#[cfg(test)]
mod tests {
    use block_dev::RamDisk;

    use super::*;
    use crate::DIRECT_COUNT;

    fn fs(total_blocks: u32, inode_count: u32) -> FileSystem {
        let disk = Arc::new(RamDisk::new(total_blocks as usize));
        FileSystem::create(disk, total_blocks, inode_count).unwrap()
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn write_then_read_back() {
        let fs = fs(1000, 64);
        let data = pattern(1500);

        let file = fs.open("/a", OpenMode::Write).unwrap();
        assert_eq!(fs.write(&file, &data), Ok(1500));
        assert!(fs.close(file).unwrap());

        let file = fs.open("/a", OpenMode::Read).unwrap();
        assert_eq!(fs.size(&file), Ok(1500));
        let mut buf = vec![0; 1500];
        assert_eq!(fs.read(&file, &mut buf), Ok(1500));
        assert_eq!(buf, data);

        assert_eq!(fs.seek(&file, 2000, Whence::Start), Ok(1500));
        assert_eq!(fs.read(&file, &mut buf), Ok(0));
    }

    #[test]
    fn index_block_extends_the_map() {
        let fs = fs(1000, 16);
        let data = pattern((DIRECT_COUNT + 2) * BLOCK_SIZE);

        let file = fs.open("big", OpenMode::Write).unwrap();
        assert_eq!(fs.write(&file, &data), Ok(data.len()));
        {
            let inode = file.0.inode.read();
            assert!(inode.indirect().is_some());
            let offset = (DIRECT_COUNT * BLOCK_SIZE) as u32;
            let block_id = inode.map_offset(&fs.cache, offset).unwrap();
            assert!(inode.direct_blocks().all(|direct| direct != block_id));
            assert_ne!(Some(block_id), inode.indirect());
        }
        fs.close(file).unwrap();

        let file = fs.open("big", OpenMode::Read).unwrap();
        fs.seek(&file, (DIRECT_COUNT * BLOCK_SIZE) as i64 - 4, Whence::Start)
            .unwrap();
        let mut buf = [0; 8];
        assert_eq!(fs.read(&file, &mut buf), Ok(8));
        let start = DIRECT_COUNT * BLOCK_SIZE - 4;
        assert_eq!(buf[..], data[start..start + 8]);
    }

    #[test]
    fn truncate_returns_every_block() {
        let fs = fs(200, 16);
        let free = fs.free_blocks().len();

        let file = fs.open("big", OpenMode::Write).unwrap();
        fs.write(&file, &pattern((DIRECT_COUNT + 3) * BLOCK_SIZE))
            .unwrap();
        fs.close(file).unwrap();
        // 14 个数据块加 1 个索引块
        assert_eq!(fs.free_blocks().len(), free - 15);

        let file = fs.open("big", OpenMode::Write).unwrap();
        assert_eq!(fs.size(&file), Ok(0));
        fs.close(file).unwrap();
        assert_eq!(fs.free_blocks().len(), free);
    }

    #[test]
    fn mode_is_enforced() {
        let fs = fs(100, 16);
        let file = fs.open("a", OpenMode::Append).unwrap();
        let mut buf = [0; 4];
        assert_eq!(fs.read(&file, &mut buf), Err(Error::WrongMode));
        fs.write(&file, b"data").unwrap();
        fs.close(file).unwrap();

        let file = fs.open("a", OpenMode::Read).unwrap();
        assert_eq!(fs.write(&file, b"x"), Err(Error::WrongMode));
    }

    #[test]
    fn append_and_read_write() {
        let fs = fs(100, 16);
        let file = fs.open("a", OpenMode::Write).unwrap();
        fs.write(&file, b"hello").unwrap();
        fs.close(file).unwrap();

        let file = fs.open("a", OpenMode::Append).unwrap();
        fs.write(&file, b" world").unwrap();
        fs.close(file).unwrap();

        let file = fs.open("a", OpenMode::ReadWrite).unwrap();
        fs.seek(&file, 6, Whence::Start).unwrap();
        fs.write(&file, b"W").unwrap();
        fs.seek(&file, 0, Whence::Start).unwrap();
        let mut buf = [0; 16];
        assert_eq!(fs.read(&file, &mut buf), Ok(11));
        assert_eq!(&buf[..11], b"hello World");
    }

    #[test]
    fn seek_clamps() {
        let fs = fs(100, 16);
        let file = fs.open("a", OpenMode::ReadWrite).unwrap();
        fs.write(&file, &pattern(100)).unwrap();

        assert_eq!(fs.seek(&file, -10, Whence::Start), Ok(0));
        assert_eq!(fs.seek(&file, 40, Whence::Current), Ok(40));
        assert_eq!(fs.seek(&file, -5, Whence::Current), Ok(35));
        assert_eq!(fs.seek(&file, -20, Whence::End), Ok(80));
        assert_eq!(fs.seek(&file, 1, Whence::End), Ok(100));
        assert_eq!(fs.seek(&file, i64::MIN, Whence::End), Ok(0));
    }

    #[test]
    fn dup_shares_the_seek_pointer() {
        let fs = fs(100, 16);
        let file = fs.open("a", OpenMode::ReadWrite).unwrap();
        let copy = fs.dup(&file).unwrap();
        fs.write(&file, b"abc").unwrap();
        assert_eq!(fs.seek(&copy, 0, Whence::Current), Ok(3));

        assert_eq!(fs.close(file), Ok(false));
        // 副本仍持有 inode
        assert_eq!(fs.open("a", OpenMode::Read).unwrap_err(), Error::AlreadyInUse);
        assert_eq!(fs.close(copy), Ok(true));
        assert!(fs.open("a", OpenMode::Read).is_ok());
    }

    #[test]
    fn close_reports_whether_inode_is_released() {
        let fs = fs(100, 16);
        fs.close(fs.open("a", OpenMode::Write).unwrap()).unwrap();

        let r1 = fs.open("a", OpenMode::Read).unwrap();
        let r2 = fs.open("a", OpenMode::Read).unwrap();
        let inumber = r1.inumber();
        assert_eq!(fs.close(r1), Ok(false));
        assert_eq!(Inode::load(&fs.cache, inumber).state, InodeState::SharedRead);
        assert_eq!(fs.close(r2), Ok(true));
        assert_eq!(Inode::load(&fs.cache, inumber).state, InodeState::Allocated);
    }

    #[test]
    fn write_past_max_size_fails() {
        let fs = fs(400, 16);
        let file = fs.open("a", OpenMode::Write).unwrap();
        let data = vec![7; MAX_FILE_SIZE];
        assert_eq!(fs.write(&file, &data), Ok(MAX_FILE_SIZE));
        assert_eq!(fs.write(&file, b"x"), Err(Error::FileTooLarge));
        assert_eq!(fs.size(&file), Ok(MAX_FILE_SIZE as u32));
    }

    #[test]
    fn exhaustion_aborts_the_write() {
        let fs = fs(12, 16);
        // 数据区为 2..12，其中两块被根文件占用
        let free = fs.free_blocks().len();
        assert_eq!(free, 8);
        let file = fs.open("a", OpenMode::Write).unwrap();
        let data = pattern((free + 1) * BLOCK_SIZE);
        assert_eq!(fs.write(&file, &data), Err(Error::AllocationExhausted));
        assert_eq!(fs.size(&file), Ok((free * BLOCK_SIZE) as u32));
        fs.close(file).unwrap();

        fs.delete("a").unwrap();
        assert_eq!(fs.free_blocks().len(), free);
    }

    #[test]
    fn foreign_handle_is_invalid() {
        let a = fs(100, 16);
        let b = fs(100, 16);
        let file = a.open("x", OpenMode::Write).unwrap();
        assert_eq!(b.size(&file), Err(Error::InvalidHandle));
        assert_eq!(b.close(file), Err(Error::InvalidHandle));
    }

    #[test]
    fn root_cannot_be_deleted() {
        let fs = fs(100, 16);
        assert_eq!(fs.delete("/"), Err(Error::InvalidName));
        assert_eq!(fs.delete("missing"), Err(Error::NotFound));
    }

    #[test]
    fn format_resets_everything() {
        let fs = fs(100, 16);
        let file = fs.open("a", OpenMode::Write).unwrap();
        fs.write(&file, &pattern(2000)).unwrap();
        assert_eq!(fs.format(32), Err(Error::Busy));
        fs.close(file).unwrap();

        fs.format(32).unwrap();
        assert_eq!(fs.inode_count(), 32);
        assert!(fs.list().is_empty());
        assert_eq!(fs.open("a", OpenMode::Read).unwrap_err(), Error::NotFound);
        assert_eq!(fs.format(0), Err(Error::InvalidGeometry));
    }

    #[test]
    fn list_reports_lengths() {
        let fs = fs(100, 16);
        let file = fs.open("a", OpenMode::Write).unwrap();
        fs.write(&file, &pattern(700)).unwrap();
        let b = fs.open("b", OpenMode::Write).unwrap();
        fs.close(b).unwrap();

        let mut files = fs.list();
        files.sort_by_key(|file| file.inumber);
        assert_eq!(
            files,
            [
                FileInfo {
                    name: "a".into(),
                    inumber: 1,
                    length: 700
                },
                FileInfo {
                    name: "b".into(),
                    inumber: 2,
                    length: 0
                },
            ]
        );
    }

    #[test]
    fn mount_recovers_open_inodes() {
        let disk = Arc::new(RamDisk::new(100));
        {
            let fs = FileSystem::create(disk.clone(), 100, 16).unwrap();
            let file = fs.open("a", OpenMode::Write).unwrap();
            fs.write(&file, b"abc").unwrap();
            fs.sync().unwrap();
            // 不关闭就卸载
            drop(file);
        }

        let fs = FileSystem::mount(disk, 100).unwrap();
        let file = fs.open("a", OpenMode::Read).unwrap();
        assert_eq!(fs.size(&file), Ok(3));
        let inode = Inode::load(&fs.cache, file.inumber());
        assert_eq!(inode.state, InodeState::SharedRead);
        assert_eq!(inode.count, 1);
    }

    #[test]
    fn mount_formats_a_blank_disk() {
        let fs = FileSystem::mount(Arc::new(RamDisk::new(100)), 100).unwrap();
        assert_eq!(fs.inode_count(), DEFAULT_INODE_COUNT);
        assert!(fs.list().is_empty());
    }
}
