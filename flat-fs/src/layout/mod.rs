//! # 磁盘数据结构层
//!
//! flat-fs 的磁盘布局：
//! 超级块 | inode 区域 | 数据块区域（空闲块串成单链表）
//!
//! 所有整数按大端序存放，结构体均按 1 字节对齐，可以直接映射在块缓存上。

mod endian;
pub use endian::{BeI16, BeI32};

mod super_block;
pub use super_block::SuperBlock;

mod inode;
pub use inode::{DiskInode, IndexBlock, InodeState};

/// 空闲块头，也属于磁盘文件系统数据结构
mod free_block;
pub use free_block::FreeBlock;

/// 目录项，也属于磁盘文件系统数据结构
mod dir_entry;
pub use dir_entry::DirEntry;

#[cfg(test)]
mod tests {
    use core::mem;

    use super::*;
    use crate::{BLOCK_SIZE, INODE_SIZE};

    #[test]
    fn layout() {
        assert_eq!(12, mem::size_of::<SuperBlock>());
        assert_eq!(INODE_SIZE, mem::size_of::<DiskInode>());
        assert_eq!(BLOCK_SIZE, mem::size_of::<IndexBlock>());
        assert_eq!(4, mem::size_of::<FreeBlock>());
        assert_eq!(DirEntry::SIZE, mem::size_of::<DirEntry>());
        assert_eq!(1, mem::align_of::<DiskInode>());
    }
}
