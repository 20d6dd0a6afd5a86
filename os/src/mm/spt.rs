//! # 补充页表
//!
//! 每个地址空间一张，记录虚拟页号到页面记录的映射。页面记录在首次引用时
//! （装载程序段、栈增长、mmap）创建，在地址空间销毁或 munmap 时删除。

use super::page::Page;
use super::VirtPageNum;
use crate::error::VmError;
use alloc::collections::BTreeMap;
use alloc::vec::Vec;

pub struct SupplementalPageTable {
    pages: BTreeMap<VirtPageNum, Page>,
}

impl SupplementalPageTable {
    pub fn new() -> Self {
        Self {
            pages: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, page: Page) -> Result<(), VmError> {
        if self.pages.contains_key(&page.vpn) {
            return Err(VmError::AlreadyMapped);
        }
        self.pages.insert(page.vpn, page);
        Ok(())
    }

    pub fn find(&self, vpn: VirtPageNum) -> Option<&Page> {
        self.pages.get(&vpn)
    }

    pub fn find_mut(&mut self, vpn: VirtPageNum) -> Option<&mut Page> {
        self.pages.get_mut(&vpn)
    }

    pub fn remove(&mut self, vpn: VirtPageNum) -> Option<Page> {
        self.pages.remove(&vpn)
    }

    pub fn contains(&self, vpn: VirtPageNum) -> bool {
        self.pages.contains_key(&vpn)
    }

    /// `[start, start + count)` 中是否有任何已记录的页面
    pub fn overlaps(&self, start: VirtPageNum, count: usize) -> bool {
        self.pages
            .range(start..start.offset(count))
            .next()
            .is_some()
    }

    pub fn vpns(&self) -> Vec<VirtPageNum> {
        self.pages.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn drain(&mut self) -> Vec<Page> {
        core::mem::take(&mut self.pages).into_values().collect()
    }
}
