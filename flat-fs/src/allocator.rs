//! # 块分配器
//!
//! 超级块记录卷的规模与空闲块链表的表头。
//! 空闲块不另设位图：每个空闲块的前 4 字节指向下一个空闲块，串成单链表。

use alloc::sync::Arc;
use alloc::vec::Vec;

use spin::Mutex;

use crate::block_cache::BlockCacheManager;
use crate::error::{Error, Result};
use crate::inode::Inode;
use crate::layout::{DirEntry, FreeBlock, InodeState, SuperBlock};
use crate::{BLOCK_SIZE, INODE_SIZE, MAX_FILE_SIZE, MAX_TOTAL_BLOCKS, ROOT_INODE};

pub struct BlockAllocator {
    cache: Arc<BlockCacheManager>,
    super_block: Mutex<Geometry>,
}

/// 超级块在内存中的副本
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Geometry {
    total_blocks: u32,
    inode_count: u32,
    free_list_head: Option<u32>,
}

impl BlockAllocator {
    pub fn new(cache: Arc<BlockCacheManager>) -> Self {
        Self {
            cache,
            super_block: Mutex::default(),
        }
    }

    /// 读取磁盘上的超级块。
    /// 若其与设备规模不符或已损坏，则返回 `false`，此时需要格式化。
    pub fn load(&self, total_blocks: u32) -> bool {
        let (geometry, head) =
            self.cache
                .get(0)
                .lock()
                .map(0, |super_block: &SuperBlock| {
                    let geometry = Geometry {
                        total_blocks: super_block.total_blocks.get().max(0) as u32,
                        inode_count: super_block.inode_count.get().max(0) as u32,
                        free_list_head: super_block.free_list_head.block(),
                    };
                    (geometry, super_block.free_list_head.get())
                });

        let valid = geometry.total_blocks == total_blocks
            && validate(total_blocks, geometry.inode_count).is_ok()
            && match geometry.free_list_head {
                Some(head) => {
                    (first_data_block(geometry.inode_count)..total_blocks).contains(&head)
                }
                None => head == -1,
            };

        if valid {
            *self.super_block.lock() = geometry;
        }
        valid
    }

    /// 重建 inode 区域与空闲块链表
    pub fn format(&self, total_blocks: u32, inode_count: u32) -> Result<()> {
        validate(total_blocks, inode_count)?;
        let first_data = first_data_block(inode_count);
        log::debug!(
            "format: total_blocks={total_blocks}, inode_count={inode_count}, first_data_block={first_data}"
        );

        for inumber in 0..inode_count {
            let mut inode = Inode::default();
            if inumber == ROOT_INODE {
                inode.state = InodeState::Allocated;
            }
            inode.persist(&self.cache, inumber);
        }

        // 每个数据块指向其后一块，最后一块指向 -1
        for block in first_data..total_blocks {
            let next = (block + 1 < total_blocks).then_some(block + 1);
            self.cache
                .get(block as usize)
                .lock()
                .map_mut(0, |free_block: &mut FreeBlock| {
                    free_block.next.set_block(next)
                });
        }

        *self.super_block.lock() = Geometry {
            total_blocks,
            inode_count,
            free_list_head: (first_data < total_blocks).then_some(first_data),
        };
        self.sync();
        Ok(())
    }

    /// 弹出空闲链表的表头
    pub fn allocate(&self) -> Result<u32> {
        let mut super_block = self.super_block.lock();
        let block = super_block
            .free_list_head
            .ok_or(Error::AllocationExhausted)?;

        super_block.free_list_head =
            self.cache
                .get(block as usize)
                .lock()
                .map_mut(0, |free_block: &mut FreeBlock| {
                    let next = free_block.next.block();
                    free_block.next.set(0);
                    next
                });
        log::trace!("allocate block {block}");
        Ok(block)
    }

    /// 将块压回空闲链表的表头。
    /// 块号不在数据区时返回 `false`。
    pub fn release(&self, block: u32) -> bool {
        let mut super_block = self.super_block.lock();
        if !(first_data_block(super_block.inode_count)..super_block.total_blocks).contains(&block)
        {
            log::warn!("refuse to release block {block} outside the data area");
            return false;
        }

        let head = super_block.free_list_head;
        self.cache
            .get(block as usize)
            .lock()
            .map_mut(0, |free_block: &mut FreeBlock| free_block.next.set_block(head));
        super_block.free_list_head = Some(block);
        log::trace!("release block {block}");
        true
    }

    /// 将内存中的超级块写回 0 号块
    pub fn sync(&self) {
        let geometry = *self.super_block.lock();
        self.cache
            .get(0)
            .lock()
            .map_mut(0, |super_block: &mut SuperBlock| {
                super_block.init(
                    geometry.total_blocks,
                    geometry.inode_count,
                    geometry.free_list_head,
                )
            });
    }

    #[inline]
    pub fn total_blocks(&self) -> u32 {
        self.super_block.lock().total_blocks
    }

    #[inline]
    pub fn inode_count(&self) -> u32 {
        self.super_block.lock().inode_count
    }

    #[inline]
    pub fn first_data_block(&self) -> u32 {
        first_data_block(self.inode_count())
    }

    /// 沿链表列出全部空闲块
    pub fn free_blocks(&self) -> Vec<u32> {
        let super_block = self.super_block.lock();
        let mut blocks = Vec::new();
        let mut next = super_block.free_list_head;

        // 链表长度不会超过总块数，防止损坏的链表成环
        while let Some(block) = next {
            if blocks.len() >= super_block.total_blocks as usize {
                log::warn!("free list is longer than the volume, probably a cycle");
                break;
            }
            blocks.push(block);
            next = self
                .cache
                .get(block as usize)
                .lock()
                .map(0, |free_block: &FreeBlock| free_block.next.block());
        }

        blocks
    }
}

/// inode 区域占用的块数
#[inline]
pub fn inode_blocks(inode_count: u32) -> u32 {
    (inode_count as usize * INODE_SIZE).div_ceil(BLOCK_SIZE) as u32
}

/// 第一个数据块的块号
#[inline]
pub fn first_data_block(inode_count: u32) -> u32 {
    inode_blocks(inode_count) + 1
}

fn validate(total_blocks: u32, inode_count: u32) -> Result<()> {
    if total_blocks > MAX_TOTAL_BLOCKS
        || inode_count == 0
        // 根目录文件要能装下所有目录项
        || inode_count as usize * DirEntry::SIZE > MAX_FILE_SIZE
        || first_data_block(inode_count) >= total_blocks
    {
        return Err(Error::InvalidGeometry);
    }
    Ok(())
}
