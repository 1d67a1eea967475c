//! # 块设备接口层
//!
//! 块设备是以**块**为单位存储数据的设备，例如磁盘、光盘、U盘等；
//! [`BlockDevice`] 就是对读写块设备的抽象，
//! 实现了此特质的类型称为**块设备驱动**。

#![no_std]

extern crate alloc;

use alloc::vec;
use alloc::vec::Vec;
use core::any::Any;

use spin::Mutex;

/// 块设备驱动特质
///
/// 越界的块号属于调用方违约，驱动可以直接 panic。
pub trait BlockDevice: Send + Sync + Any {
    fn read_block(&self, block_id: usize, buf: &mut [u8]);
    fn write_block(&self, block_id: usize, buf: &[u8]);
}

/// 内存中的块设备，块大小固定
#[derive(Debug)]
pub struct RamDisk {
    block_size: usize,
    data: Mutex<Vec<u8>>,
}

impl RamDisk {
    pub const BLOCK_SIZE: usize = 512;

    #[inline]
    pub fn new(blocks: usize) -> Self {
        Self::with_block_size(blocks, Self::BLOCK_SIZE)
    }

    pub fn with_block_size(blocks: usize, block_size: usize) -> Self {
        Self {
            block_size,
            data: Mutex::new(vec![0; blocks * block_size]),
        }
    }

    #[inline]
    pub fn blocks(&self) -> usize {
        self.data.lock().len() / self.block_size
    }

    /// 整个设备内容的快照
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

impl BlockDevice for RamDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        assert_eq!(buf.len(), self.block_size, "not a complete block!");
        let data = self.data.lock();
        let start = block_id * self.block_size;
        buf.copy_from_slice(&data[start..start + self.block_size]);
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        assert_eq!(buf.len(), self.block_size, "not a complete block!");
        let mut data = self.data.lock();
        let start = block_id * self.block_size;
        data[start..start + self.block_size].copy_from_slice(buf);
    }
}
