//! # 页表
//!
//! 每个地址空间一张页表，记录已经装入页帧的虚拟页。页表项沿用 RISC-V SV39 的
//! 位域格式（物理页号位于第 10 位以上，低 8 位为标志位），由内核在用户内存访问时
//! 维护访问位与脏位，供页面置换和文件回写使用。
//!
//! 补充页表记录“这一页应该是什么”，页表只记录“这一页现在在哪个页帧”。

use super::{PhysPageNum, VirtPageNum};
use alloc::collections::BTreeMap;
use bitflags::*;

bitflags! {
    /// 页表项标志位
    ///
    /// - **V (Valid)**: 页表项有效位，为 0 时表示页面未映射
    /// - **R/W/X**: 读/写/执行权限
    /// - **U (User)**: 用户态可访问
    /// - **G (Global)**: 全局页面
    /// - **A (Accessed)**: 访问位，访问页面时设置
    /// - **D (Dirty)**: 脏页位，写入页面时设置
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct PTEFlags: u8 {
        const V = 1 << 0;
        const R = 1 << 1;
        const W = 1 << 2;
        const X = 1 << 3;
        const U = 1 << 4;
        const G = 1 << 5;
        const A = 1 << 6;
        const D = 1 << 7;
    }
}

/// 页表项
///
/// ```text
/// 63        54 53       10 9        8 7      0
/// ┌───────────┬───────────┬──────────┬────────┐
/// │ reserved  │    PPN    │ reserved │ flags  │
/// └───────────┴───────────┴──────────┴────────┘
/// ```
#[repr(C)]
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct PageTableEntry {
    pub bits: usize,
}

impl PageTableEntry {
    pub fn new(ppn: PhysPageNum, flags: PTEFlags) -> Self {
        PageTableEntry {
            bits: ppn.0 << 10 | flags.bits() as usize,
        }
    }

    pub fn empty() -> Self {
        PageTableEntry { bits: 0 }
    }

    pub fn ppn(&self) -> PhysPageNum {
        PhysPageNum(self.bits >> 10 & ((1usize << 44) - 1))
    }

    pub fn flags(&self) -> PTEFlags {
        PTEFlags::from_bits_truncate(self.bits as u8)
    }

    pub fn is_valid(&self) -> bool {
        self.flags().contains(PTEFlags::V)
    }

    pub fn writable(&self) -> bool {
        self.flags().contains(PTEFlags::W)
    }

    pub fn accessed(&self) -> bool {
        self.flags().contains(PTEFlags::A)
    }

    pub fn dirty(&self) -> bool {
        self.flags().contains(PTEFlags::D)
    }

    fn set(&mut self, flag: PTEFlags, value: bool) {
        let mut flags = self.flags();
        flags.set(flag, value);
        self.bits = self.ppn().0 << 10 | flags.bits() as usize;
    }
}

/// 地址空间的页表
pub struct PageTable {
    entries: BTreeMap<VirtPageNum, PageTableEntry>,
}

impl PageTable {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// 建立映射
    ///
    /// ## Panics
    ///
    /// 虚拟页已经映射时 panic
    pub fn map(&mut self, vpn: VirtPageNum, ppn: PhysPageNum, flags: PTEFlags) {
        let old = self
            .entries
            .insert(vpn, PageTableEntry::new(ppn, flags | PTEFlags::V));
        assert!(
            old.is_none_or(|pte| !pte.is_valid()),
            "{:?} is mapped before mapping",
            vpn
        );
    }

    /// 解除映射，返回原来的页表项
    pub fn unmap(&mut self, vpn: VirtPageNum) -> Option<PageTableEntry> {
        self.entries.remove(&vpn)
    }

    pub fn translate(&self, vpn: VirtPageNum) -> Option<PageTableEntry> {
        self.entries.get(&vpn).copied().filter(|pte| pte.is_valid())
    }

    /// 记录一次访问，写访问同时置脏
    pub fn touch(&mut self, vpn: VirtPageNum, write: bool) {
        if let Some(pte) = self.entries.get_mut(&vpn) {
            pte.set(PTEFlags::A, true);
            if write {
                pte.set(PTEFlags::D, true);
            }
        }
    }

    pub fn set_accessed(&mut self, vpn: VirtPageNum, value: bool) {
        if let Some(pte) = self.entries.get_mut(&vpn) {
            pte.set(PTEFlags::A, value);
        }
    }

    pub fn set_dirty(&mut self, vpn: VirtPageNum, value: bool) {
        if let Some(pte) = self.entries.get_mut(&vpn) {
            pte.set(PTEFlags::D, value);
        }
    }

    pub fn is_dirty(&self, vpn: VirtPageNum) -> bool {
        self.translate(vpn).is_some_and(|pte| pte.dirty())
    }

    pub fn is_accessed(&self, vpn: VirtPageNum) -> bool {
        self.translate(vpn).is_some_and(|pte| pte.accessed())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
