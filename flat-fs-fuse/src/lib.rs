use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Mutex;

use flat_fs::{BlockDevice, BLOCK_SIZE};

/// 以宿主机上的文件充当块设备
#[derive(Debug)]
pub struct BlockFile(Mutex<File>);

impl BlockFile {
    #[inline]
    pub fn new(file: File) -> Self {
        Self(Mutex::new(file))
    }

    /// 新建（或清空）镜像文件，大小为 `blocks` 个块
    pub fn create(path: impl AsRef<Path>, blocks: u32) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(blocks as u64 * BLOCK_SIZE as u64)?;
        Ok(Self::new(file))
    }

    /// 打开已有的镜像文件，同时返回其块数
    pub fn open(path: impl AsRef<Path>) -> io::Result<(Self, u32)> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        if len % BLOCK_SIZE as u64 != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("image size {len} is not a multiple of {BLOCK_SIZE}"),
            ));
        }
        let blocks = u32::try_from(len / BLOCK_SIZE as u64)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "image is too large"))?;
        Ok((Self::new(file), blocks))
    }

    fn read_at(&self, block_id: usize, buf: &mut [u8]) -> io::Result<()> {
        let mut file = self.lock()?;
        file.seek(SeekFrom::Start((block_id * BLOCK_SIZE) as u64))?;
        file.read_exact(buf)
    }

    fn write_at(&self, block_id: usize, buf: &[u8]) -> io::Result<()> {
        let mut file = self.lock()?;
        file.seek(SeekFrom::Start((block_id * BLOCK_SIZE) as u64))?;
        file.write_all(buf)
    }

    fn lock(&self) -> io::Result<std::sync::MutexGuard<'_, File>> {
        self.0
            .lock()
            .map_err(|_| io::Error::other("block file lock poisoned"))
    }
}

// 块设备接口不允许失败，宿主机 I/O 出错时直接 panic
impl BlockDevice for BlockFile {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        assert_eq!(buf.len(), BLOCK_SIZE, "not a complete block!");
        if let Err(err) = self.read_at(block_id, buf) {
            panic!("failed to read block {block_id}: {err}");
        }
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        assert_eq!(buf.len(), BLOCK_SIZE, "not a complete block!");
        if let Err(err) = self.write_at(block_id, buf) {
            panic!("failed to write block {block_id}: {err}");
        }
    }
}

/// 把引擎错误转换为宿主机 I/O 错误
pub fn to_io_error(err: flat_fs::Error) -> io::Error {
    let kind = match err {
        flat_fs::Error::NotFound => io::ErrorKind::NotFound,
        flat_fs::Error::AlreadyExists => io::ErrorKind::AlreadyExists,
        flat_fs::Error::InvalidName | flat_fs::Error::InvalidMode => io::ErrorKind::InvalidInput,
        flat_fs::Error::AllocationExhausted | flat_fs::Error::DirectoryFull => {
            io::ErrorKind::StorageFull
        }
        flat_fs::Error::FileTooLarge => io::ErrorKind::FileTooLarge,
        _ => io::ErrorKind::Other,
    };
    io::Error::new(kind, err)
}
