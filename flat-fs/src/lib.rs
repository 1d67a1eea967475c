#![no_std]

extern crate alloc;
#[cfg(test)]
extern crate std;

/* flat-fs 的整体架构，自上而下 */

// 文件系统层：对外提供 format/open/read/write/seek/delete/sync
mod fs;

// 打开文件表：管理句柄与内存中的 inode
mod file_table;

// 单层目录：文件名到 inode 编号的映射
mod directory;

// 索引节点层：inode 的读写与块映射
mod inode;

// 空闲块链表与超级块
mod allocator;

// 磁盘数据结构层：表示磁盘文件系统的数据结构
mod layout;

// 块缓存层：内存上的磁盘块数据缓存
mod block_cache;

mod error;

pub use block_dev::BlockDevice;

pub use self::{
    allocator::BlockAllocator,
    block_cache::BlockCacheManager,
    directory::Directory,
    error::{Error, MapError, Result},
    file_table::{Access, FileHandle, OpenMode},
    fs::{FileInfo, FileSystem, Whence},
    inode::Inode,
    layout::InodeState,
};

pub const BLOCK_SIZE: usize = 512;

/// 磁盘上 inode 记录的大小
pub const INODE_SIZE: usize = 32;
pub const INODES_PER_BLOCK: usize = BLOCK_SIZE / INODE_SIZE;

/// 直接索引个数
pub const DIRECT_COUNT: usize = 11;
/// 索引块的编号容量
pub const INDEX_SLOTS: usize = BLOCK_SIZE / 2;
/// 单个文件的最大字节数
pub const MAX_FILE_SIZE: usize = (DIRECT_COUNT + INDEX_SLOTS) * BLOCK_SIZE;

/// 块映射用 16 位有符号数记录块号
pub const MAX_TOTAL_BLOCKS: u32 = i16::MAX as u32 + 1;

/// 挂载时发现超级块无效，格式化所用的 inode 数
pub const DEFAULT_INODE_COUNT: u32 = 64;

/// 文件名的最大字节数
pub const NAME_MAX_LEN: usize = 60;

/// 根目录文件的名字，固定占用 0 号 inode
pub const ROOT_NAME: &str = "/";
pub const ROOT_INODE: u32 = 0;

type DataBlock = [u8; BLOCK_SIZE];
