//! # 单层目录
//!
//! 唯一的目录 `/` 把文件名映射到 inode 编号：第 i 个目录项对应 i 号 inode。
//! 目录本身存放在 0 号 inode 对应的根文件中，由文件系统层负责读写。

use alloc::vec;
use alloc::vec::Vec;

use crate::error::{Error, Result};
use crate::layout::DirEntry;
use crate::{NAME_MAX_LEN, ROOT_INODE, ROOT_NAME};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    entries: Vec<DirEntry>,
}

impl Directory {
    pub fn new(inode_count: u32) -> Self {
        let mut entries = vec![DirEntry::default(); inode_count as usize];
        entries[ROOT_INODE as usize] = DirEntry::new(ROOT_NAME);
        Self { entries }
    }

    /// 为新文件分配 inode 编号并登记文件名
    pub fn allocate(&mut self, name: &str) -> Result<u32> {
        validate_name(name)?;

        let mut free = None;
        for (inumber, entry) in self.entries.iter().enumerate().skip(1) {
            if entry.name() == name.as_bytes() {
                return Err(Error::AlreadyExists);
            }
            if free.is_none() && entry.is_free() {
                free = Some(inumber);
            }
        }

        let inumber = free.ok_or(Error::DirectoryFull)?;
        self.entries[inumber] = DirEntry::new(name);
        Ok(inumber as u32)
    }

    /// 释放目录项，槽位可被再次分配
    pub fn release(&mut self, inumber: u32) -> bool {
        if inumber == ROOT_INODE {
            return false;
        }
        match self.entries.get_mut(inumber as usize) {
            Some(entry) if !entry.is_free() => {
                entry.clear();
                true
            }
            _ => false,
        }
    }

    /// 根据文件名获取 inode 编号
    pub fn resolve(&self, name: &str) -> Option<u32> {
        if name == ROOT_NAME {
            return Some(ROOT_INODE);
        }
        self.entries
            .iter()
            .skip(1)
            .position(|entry| !entry.is_free() && entry.name() == name.as_bytes())
            .map(|index| index as u32 + 1)
    }

    /// 已登记的文件，不含根目录自身
    pub fn entries(&self) -> impl Iterator<Item = (u32, &str)> {
        self.entries
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, entry)| !entry.is_free())
            .filter_map(|(inumber, entry)| {
                core::str::from_utf8(entry.name())
                    .ok()
                    .map(|name| (inumber as u32, name))
            })
    }

    pub fn serialize(&self) -> Vec<u8> {
        self.entries
            .iter()
            .flat_map(|entry| entry.as_bytes().iter().copied())
            .collect()
    }

    /// 从根文件内容重建目录，缺失的尾部目录项视为空闲
    pub fn deserialize(&mut self, data: &[u8]) {
        for (index, entry) in self.entries.iter_mut().enumerate() {
            entry.clear();
            let start = index * DirEntry::SIZE;
            if let Some(bytes) = data.get(start..start + DirEntry::SIZE) {
                entry.as_bytes_mut().copy_from_slice(bytes);
                if !entry.is_valid() {
                    log::warn!("directory entry {index} is corrupted, dropping it");
                    entry.clear();
                }
            }
        }
        self.entries[ROOT_INODE as usize] = DirEntry::new(ROOT_NAME);
    }
}

/// 文件名须非空、不超过 [`NAME_MAX_LEN`] 字节，且不能是根目录
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > NAME_MAX_LEN || name == ROOT_NAME {
        return Err(Error::InvalidName);
    }
    Ok(())
}
