//! # 索引节点层
//!
//! 内存中的 inode 与其块映射：11 个直接索引 + 1 个索引块。
//!
//! 这里只维护映射关系，不负责分配与回收块；
//! 分配策略统一放在文件系统层。

use crate::block_cache::BlockCacheManager;
use crate::error::MapError;
use crate::layout::{BeI16, DiskInode, IndexBlock, InodeState};
use crate::{BLOCK_SIZE, DIRECT_COUNT, INDEX_SLOTS, INODE_SIZE, INODES_PER_BLOCK};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inode {
    /// 文件字节数
    pub length: u32,
    /// 指向此 inode 的打开文件表项个数。
    /// 打开期间以打开文件表中的记录为准，这里只反映加载时的值。
    pub count: u16,
    pub state: InodeState,
    direct: [Option<u32>; DIRECT_COUNT],
    indirect: Option<u32>,
}

impl Default for Inode {
    fn default() -> Self {
        Self {
            length: 0,
            count: 0,
            state: InodeState::Unused,
            direct: [None; DIRECT_COUNT],
            indirect: None,
        }
    }
}

impl Inode {
    /// 刚在目录中登记的新文件
    #[inline]
    pub fn allocated() -> Self {
        Self {
            state: InodeState::Allocated,
            ..Default::default()
        }
    }

    /// 通过编号获取 inode 在磁盘上的位置：**块ID**以及**块内偏移**
    #[inline]
    pub fn disk_pos(inumber: u32) -> (usize, usize) {
        let block_id = 1 + inumber as usize / INODES_PER_BLOCK;
        let block_offset = inumber as usize % INODES_PER_BLOCK * INODE_SIZE;
        (block_id, block_offset)
    }

    pub fn load(cache: &BlockCacheManager, inumber: u32) -> Self {
        let (block_id, block_offset) = Self::disk_pos(inumber);
        cache
            .get(block_id)
            .lock()
            .map(block_offset, |disk_inode: &DiskInode| {
                let state = InodeState::try_from(disk_inode.state.get()).unwrap_or_else(|raw| {
                    log::warn!("inode {inumber} has unknown state {raw}");
                    InodeState::Allocated
                });
                let mut direct = [None; DIRECT_COUNT];
                for (slot, ptr) in direct.iter_mut().zip(&disk_inode.direct) {
                    *slot = ptr.block();
                }

                Self {
                    length: disk_inode.length.get().max(0) as u32,
                    count: disk_inode.count.get().max(0) as u16,
                    state,
                    direct,
                    indirect: disk_inode.indirect.block(),
                }
            })
    }

    /// 将记录写回所属块的对应位置，块内其余 inode 不受影响
    pub fn persist(&self, cache: &BlockCacheManager, inumber: u32) {
        let (block_id, block_offset) = Self::disk_pos(inumber);
        cache
            .get(block_id)
            .lock()
            .map_mut(block_offset, |disk_inode: &mut DiskInode| {
                disk_inode.length.set(self.length as i32);
                disk_inode.count.set(self.count as i16);
                disk_inode.state.set(self.state.into());
                for (ptr, &slot) in disk_inode.direct.iter_mut().zip(&self.direct) {
                    ptr.set_block(slot);
                }
                disk_inode.indirect.set_block(self.indirect);
            });
    }

    /// 只写回长度与块映射，状态与计数由打开文件表维护
    pub fn persist_map(&self, cache: &BlockCacheManager, inumber: u32) {
        let (block_id, block_offset) = Self::disk_pos(inumber);
        cache
            .get(block_id)
            .lock()
            .map_mut(block_offset, |disk_inode: &mut DiskInode| {
                disk_inode.length.set(self.length as i32);
                for (ptr, &slot) in disk_inode.direct.iter_mut().zip(&self.direct) {
                    ptr.set_block(slot);
                }
                disk_inode.indirect.set_block(self.indirect);
            });
    }

    /// 只写回状态与计数
    pub fn persist_state(cache: &BlockCacheManager, inumber: u32, state: InodeState, count: u16) {
        let (block_id, block_offset) = Self::disk_pos(inumber);
        cache
            .get(block_id)
            .lock()
            .map_mut(block_offset, |disk_inode: &mut DiskInode| {
                disk_inode.count.set(count as i16);
                disk_inode.state.set(state.into());
            });
    }

    /// 将字节偏移翻译为块号，未映射时返回空
    pub fn map_offset(&self, cache: &BlockCacheManager, offset: u32) -> Option<u32> {
        let slot = offset as usize / BLOCK_SIZE;

        if slot < DIRECT_COUNT {
            self.direct[slot]
        } else if slot - DIRECT_COUNT < INDEX_SLOTS {
            let indirect = self.indirect?;
            cache
                .get(indirect as usize)
                .lock()
                .map(0, |index_block: &IndexBlock| {
                    index_block[slot - DIRECT_COUNT].block()
                })
        } else {
            None
        }
    }

    /// 为字节偏移所在的槽位登记块号
    pub fn register_block(
        &mut self,
        cache: &BlockCacheManager,
        offset: u32,
        block: u32,
    ) -> Result<(), MapError> {
        let slot = offset as usize / BLOCK_SIZE;

        if slot < DIRECT_COUNT {
            if self.direct[slot].is_some() {
                return Err(MapError::AlreadyMapped);
            }
            // 直接索引必须连续填充
            if slot > 0 && self.direct[slot - 1].is_none() {
                return Err(MapError::OutOfOrder);
            }
            self.direct[slot] = Some(block);
            return Ok(());
        }

        let index = slot - DIRECT_COUNT;
        if index >= INDEX_SLOTS {
            return Err(MapError::OutOfRange);
        }
        let indirect = self.indirect.ok_or(MapError::NeedsIndex)?;

        cache
            .get(indirect as usize)
            .lock()
            .map_mut(0, |index_block: &mut IndexBlock| {
                if index_block[index].block().is_some() {
                    return Err(MapError::AlreadyMapped);
                }
                index_block[index].set_block(Some(block));
                Ok(())
            })
    }

    /// 挂上索引块。
    /// 直接索引未用满或已有索引块时返回 `false`。
    pub fn attach_index_block(&mut self, cache: &BlockCacheManager, block: u32) -> bool {
        if self.direct.iter().any(Option::is_none) || self.indirect.is_some() {
            return false;
        }

        cache
            .get(block as usize)
            .lock()
            .map_mut(0, |index_block: &mut IndexBlock| {
                index_block.fill(BeI16::NONE)
            });
        self.indirect = Some(block);
        true
    }

    /// 摘下索引块，返回其内容以便调用方回收其中的数据块
    pub fn detach_index_block(&mut self, cache: &BlockCacheManager) -> Option<IndexBlock> {
        let indirect = self.indirect.take()?;
        let index_block = cache
            .get(indirect as usize)
            .lock()
            .map(0, |index_block: &IndexBlock| *index_block);
        Some(index_block)
    }

    #[inline]
    pub fn indirect(&self) -> Option<u32> {
        self.indirect
    }

    /// 已映射的直接块
    pub fn direct_blocks(&self) -> impl Iterator<Item = u32> + '_ {
        self.direct.iter().filter_map(|&slot| slot)
    }

    /// 清空长度与块映射，不回收任何块
    pub fn reset(&mut self) {
        self.length = 0;
        self.direct = [None; DIRECT_COUNT];
        self.indirect = None;
    }
}

#[cfg(test)]
mod tests {
    use alloc::sync::Arc;

    use block_dev::RamDisk;

    use super::*;

    fn cache() -> BlockCacheManager {
        BlockCacheManager::new(Arc::new(RamDisk::new(64)))
    }

    fn offset(slot: usize) -> u32 {
        (slot * BLOCK_SIZE) as u32
    }

    #[test]
    fn disk_position() {
        assert_eq!(Inode::disk_pos(0), (1, 0));
        assert_eq!(Inode::disk_pos(15), (1, 15 * 32));
        assert_eq!(Inode::disk_pos(16), (2, 0));
        assert_eq!(Inode::disk_pos(33), (3, 32));
    }

    #[test]
    fn persist_then_load() {
        let cache = cache();
        let mut inode = Inode::allocated();
        inode.length = 1500;
        inode.count = 2;
        inode.state = InodeState::SharedRead;
        for slot in 0..3 {
            inode.register_block(&cache, offset(slot), 40 + slot as u32).unwrap();
        }
        inode.persist(&cache, 17);
        Inode::allocated().persist(&cache, 18);

        assert_eq!(Inode::load(&cache, 17), inode);
        assert_eq!(Inode::load(&cache, 18), Inode::allocated());
    }

    #[test]
    fn partial_persists_touch_their_own_fields() {
        let cache = cache();
        let mut inode = Inode::allocated();
        inode.persist(&cache, 5);

        Inode::persist_state(&cache, 5, InodeState::ExclusiveWrite, 1);
        inode.length = 100;
        inode.register_block(&cache, 0, 9).unwrap();
        // 内存中的状态与计数是旧的，不应覆盖磁盘上的值
        inode.persist_map(&cache, 5);

        let loaded = Inode::load(&cache, 5);
        assert_eq!(loaded.state, InodeState::ExclusiveWrite);
        assert_eq!(loaded.count, 1);
        assert_eq!(loaded.length, 100);
        assert_eq!(loaded.map_offset(&cache, 0), Some(9));
    }

    #[test]
    fn record_is_big_endian() {
        let cache = cache();
        let mut inode = Inode::allocated();
        inode.length = 0x0102;
        inode.register_block(&cache, 0, 0x0304).unwrap();
        inode.persist(&cache, 1);

        let (block_id, block_offset) = Inode::disk_pos(1);
        let raw = cache
            .get(block_id)
            .lock()
            .map(block_offset, |raw: &[u8; INODE_SIZE]| *raw);
        assert_eq!(raw[..4], [0, 0, 1, 2]);
        assert_eq!(raw[6..8], [0, 1]);
        assert_eq!(raw[8..10], [3, 4]);
        assert_eq!(raw[10..12], [0xFF, 0xFF]);
        assert_eq!(raw[30..32], [0xFF, 0xFF]);
    }

    #[test]
    fn direct_slots_fill_in_order() {
        let cache = cache();
        let mut inode = Inode::allocated();

        assert_eq!(
            inode.register_block(&cache, offset(1), 10),
            Err(MapError::OutOfOrder)
        );
        inode.register_block(&cache, 0, 10).unwrap();
        assert_eq!(
            inode.register_block(&cache, 100, 11),
            Err(MapError::AlreadyMapped)
        );
        inode.register_block(&cache, offset(1) + 3, 11).unwrap();

        assert_eq!(inode.map_offset(&cache, 511), Some(10));
        assert_eq!(inode.map_offset(&cache, 512), Some(11));
        assert_eq!(inode.map_offset(&cache, offset(2)), None);
    }

    #[test]
    fn indirect_slots_need_an_index_block() {
        let cache = cache();
        let mut inode = Inode::allocated();

        assert!(!inode.attach_index_block(&cache, 30));
        for slot in 0..DIRECT_COUNT {
            inode.register_block(&cache, offset(slot), 10 + slot as u32).unwrap();
        }
        assert_eq!(
            inode.register_block(&cache, offset(DIRECT_COUNT), 40),
            Err(MapError::NeedsIndex)
        );
        assert_eq!(inode.map_offset(&cache, offset(DIRECT_COUNT)), None);

        assert!(inode.attach_index_block(&cache, 30));
        assert!(!inode.attach_index_block(&cache, 31));
        inode.register_block(&cache, offset(DIRECT_COUNT), 40).unwrap();
        assert_eq!(
            inode.register_block(&cache, offset(DIRECT_COUNT), 41),
            Err(MapError::AlreadyMapped)
        );

        assert_eq!(inode.map_offset(&cache, offset(DIRECT_COUNT)), Some(40));
        assert_eq!(inode.map_offset(&cache, offset(DIRECT_COUNT + 1)), None);
        assert_eq!(
            inode.register_block(&cache, offset(DIRECT_COUNT + INDEX_SLOTS), 42),
            Err(MapError::OutOfRange)
        );
        assert_eq!(
            inode.map_offset(&cache, offset(DIRECT_COUNT + INDEX_SLOTS)),
            None
        );
    }

    #[test]
    fn detach_returns_index_contents() {
        let cache = cache();
        let mut inode = Inode::allocated();
        assert!(inode.detach_index_block(&cache).is_none());

        for slot in 0..DIRECT_COUNT {
            inode.register_block(&cache, offset(slot), 10 + slot as u32).unwrap();
        }
        assert!(inode.attach_index_block(&cache, 30));
        inode.register_block(&cache, offset(DIRECT_COUNT), 40).unwrap();
        inode.register_block(&cache, offset(DIRECT_COUNT + 1), 41).unwrap();

        let index_block = inode.detach_index_block(&cache).unwrap();
        let mapped: alloc::vec::Vec<_> = index_block.iter().filter_map(|ptr| ptr.block()).collect();
        assert_eq!(mapped, [40, 41]);
        assert_eq!(inode.indirect(), None);
        assert_eq!(inode.direct_blocks().count(), DIRECT_COUNT);

        inode.reset();
        assert_eq!(inode.direct_blocks().count(), 0);
    }
}
