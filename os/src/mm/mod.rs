//! # 虚拟内存管理模块
//!
//! 为用户进程提供按需分页的虚拟内存：补充页表记录每一页的来源，共享的页帧池在
//! 耗尽时驱逐页面到交换区或写回文件，缺页处理负责装入页面和增长用户栈。
//!
//! ## 模块组织
//!
//! - [`address`] - 地址和页号的类型安全封装
//! - [`page_table`] - 软件页表，记录驻留页面及其访问位、脏位
//! - [`page`] - 页面记录与三种后备存储（延迟加载、匿名、文件）
//! - [`spt`] - 补充页表
//! - [`frame_table`] - 页帧池与置换顺序
//! - [`swap`] - 交换设备与槽位图
//! - [`mmap`] - 内存映射文件区域
//! - [`memory_set`] - 地址空间与 [`VmManager`]
//!
//! ## 页面生命周期
//!
//! ```text
//!  alloc_page          缺页 / claim           驱逐
//! ──────────► 未驻留 ─────────────────► 驻留 ─────────► 未驻留（交换槽 / 文件）
//!                ▲                                          │
//!                └──────────────────────────────────────────┘
//! ```

mod address;
mod frame_table;
mod memory_set;
mod mmap;
mod page;
mod page_table;
mod spt;
mod swap;

pub use address::{PhysPageNum, VirtAddr, VirtPageNum, is_kernel_vaddr, is_user_vaddr};
pub use frame_table::{FrameOwner, FrameTable};
pub use memory_set::{AddressSpace, SpaceId, VmManager};
pub use mmap::MmapRegion;
pub use page::{AnonPage, Backing, FilePage, LoadAux, Page, PageLoader, PageType, UninitPage};
pub use page_table::{PTEFlags, PageTable, PageTableEntry};
pub use spt::SupplementalPageTable;
pub use swap::{Bitmap, BlockDevice, RamDisk, SwapTable};
