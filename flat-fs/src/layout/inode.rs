use super::BeI16;
use super::BeI32;
use crate::{DIRECT_COUNT, INDEX_SLOTS};

/// 索引块：整个块连续存储**块编号**，每个编号都指向一个**数据块**
pub type IndexBlock = [BeI16; INDEX_SLOTS];

#[derive(Debug)]
#[repr(C)]
pub struct DiskInode {
    /// 文件字节数
    pub length: BeI32,
    /// 指向此 inode 的打开文件表项个数
    pub count: BeI16,
    pub state: BeI16,
    /// 直接索引块，必须从左到右依次填充
    pub direct: [BeI16; DIRECT_COUNT],
    /// 指向一个索引块
    pub indirect: BeI16,
}

/// inode 的生命周期
///
/// `Unused -> Allocated -> SharedRead | ExclusiveWrite -> Allocated -> Unused`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[repr(i16)]
pub enum InodeState {
    #[default]
    Unused = 0,
    Allocated = 1,
    SharedRead = 2,
    ExclusiveWrite = 3,
}

impl TryFrom<i16> for InodeState {
    type Error = i16;

    fn try_from(raw: i16) -> Result<Self, Self::Error> {
        match raw {
            0 => Ok(Self::Unused),
            1 => Ok(Self::Allocated),
            2 => Ok(Self::SharedRead),
            3 => Ok(Self::ExclusiveWrite),
            raw => Err(raw),
        }
    }
}

impl From<InodeState> for i16 {
    #[inline]
    fn from(state: InodeState) -> Self {
        state as i16
    }
}

impl InodeState {
    /// 是否被打开文件表项持有
    #[inline]
    pub fn is_open(self) -> bool {
        matches!(self, Self::SharedRead | Self::ExclusiveWrite)
    }
}
