use super::BeI32;

/// 超级块：
/// - 记录卷的总块数与 inode 个数；
/// - 记录空闲块链表的表头
#[derive(Debug)]
#[repr(C)]
pub struct SuperBlock {
    pub total_blocks: BeI32,
    pub inode_count: BeI32,
    /// `-1` 表示空闲块已用尽
    pub free_list_head: BeI32,
}

impl SuperBlock {
    #[inline]
    pub fn init(&mut self, total_blocks: u32, inode_count: u32, free_list_head: Option<u32>) {
        self.total_blocks.set(total_blocks as i32);
        self.inode_count.set(inode_count as i32);
        self.free_list_head.set_block(free_list_head);
    }
}
