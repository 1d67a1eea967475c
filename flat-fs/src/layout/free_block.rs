use super::BeI32;

/// 空闲块的前 4 字节存放下一个空闲块的块号。
///
/// 同一个块被分配出去后就只是普通数据块，
/// 两种解释只由分配器的账本区分，磁盘上没有标记。
#[derive(Debug)]
#[repr(C)]
pub struct FreeBlock {
    pub next: BeI32,
}
