//! # 内存地址管理模块
//!
//! 提供虚拟地址、虚拟页号与物理页号的类型安全封装。
//!
//! ## 主要类型
//!
//! - [`VirtAddr`] - 用户虚拟地址
//! - [`VirtPageNum`] - 虚拟页号，补充页表与页表的索引
//! - [`PhysPageNum`] - 物理页号，即页帧池中的页帧编号
//!
//! ## 地址空间划分
//!
//! ```text
//! usize::MAX ┌──────────────┐
//!            │  内核空间    │  is_kernel_vaddr
//! USER_STACK ├──────────────┤
//!            │  用户空间    │  is_user_vaddr
//!          0 └──────────────┘
//! ```

use crate::config::{PAGE_SIZE, PAGE_SIZE_BITS, USER_STACK};
use core::fmt::{self, Debug, Formatter};

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct VirtAddr(pub usize);

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct VirtPageNum(pub usize);

#[derive(Copy, Clone, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct PhysPageNum(pub usize);

impl Debug for VirtAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("VA:{:#x}", self.0))
    }
}

impl Debug for VirtPageNum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("VPN:{:#x}", self.0))
    }
}

impl Debug for PhysPageNum {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("PPN:{:#x}", self.0))
    }
}

impl From<usize> for VirtAddr {
    fn from(v: usize) -> Self {
        Self(v)
    }
}

impl From<VirtAddr> for usize {
    fn from(v: VirtAddr) -> Self {
        v.0
    }
}

impl From<VirtPageNum> for VirtAddr {
    fn from(v: VirtPageNum) -> Self {
        Self(v.0 << PAGE_SIZE_BITS)
    }
}

impl VirtAddr {
    /// 向下取整到所在页
    pub fn floor(&self) -> VirtPageNum {
        VirtPageNum(self.0 / PAGE_SIZE)
    }

    /// 向上取整到页边界
    pub fn ceil(&self) -> VirtPageNum {
        VirtPageNum(self.0.div_ceil(PAGE_SIZE))
    }

    pub fn page_offset(&self) -> usize {
        self.0 & (PAGE_SIZE - 1)
    }

    pub fn aligned(&self) -> bool {
        self.page_offset() == 0
    }
}

impl VirtPageNum {
    pub fn addr(&self) -> VirtAddr {
        (*self).into()
    }

    pub fn offset(&self, pages: usize) -> VirtPageNum {
        VirtPageNum(self.0 + pages)
    }
}

/// 地址是否位于用户空间
pub fn is_user_vaddr(va: usize) -> bool {
    va < USER_STACK
}

/// 地址是否位于内核空间
pub fn is_kernel_vaddr(va: usize) -> bool {
    !is_user_vaddr(va)
}
