use core::{ptr, slice};

use super::BeI32;
use crate::NAME_MAX_LEN;

/// 目录项：名字长度 + 定长名字
#[derive(Debug, Clone, PartialEq, Eq)]
#[repr(C)]
pub struct DirEntry {
    /// 为 0 表示槽位空闲
    name_len: BeI32,
    name: [u8; NAME_MAX_LEN],
}

impl Default for DirEntry {
    fn default() -> Self {
        Self {
            name_len: BeI32::new(0),
            name: [0; NAME_MAX_LEN],
        }
    }
}

impl DirEntry {
    /// 目录项大小恒为64字节
    pub const SIZE: usize = 64;

    /// `name` 的长度须事先检查
    #[inline]
    pub fn new(name: &str) -> Self {
        let bytes = name.as_bytes();
        let mut entry = Self::default();
        entry.name[..bytes.len()].copy_from_slice(bytes);
        entry.name_len.set(bytes.len() as i32);
        entry
    }

    #[inline]
    pub fn is_free(&self) -> bool {
        self.name_len.get() == 0
    }

    pub fn name(&self) -> &[u8] {
        let len = (self.name_len.get().max(0) as usize).min(NAME_MAX_LEN);
        &self.name[..len]
    }

    #[inline]
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// 名字长度越界的项视为损坏
    #[inline]
    pub fn is_valid(&self) -> bool {
        (0..=NAME_MAX_LEN as i32).contains(&self.name_len.get())
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(ptr::from_ref(self).cast(), Self::SIZE) }
    }

    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(ptr::from_mut(self).cast(), Self::SIZE) }
    }
}
