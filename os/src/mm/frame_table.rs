//! # 页帧表
//!
//! 管理用户页帧池。页帧池在启动时一次性分配，页帧编号由
//! `buddy_system_allocator::FrameAllocator` 分配与回收，每个页帧槽位记录占用它的
//! 页面（地址空间 + 虚拟页号），页面记录里反过来保存页帧编号：
//!
//! ```text
//!   FrameTable                           SupplementalPageTable (space 3)
//!  ┌──────────────────────────┐         ┌──────────────────────────┐
//!  │ PPN 0 │ owner (3, 0x10)  │ ◄─────► │ VPN 0x10 │ frame: PPN 0  │
//!  │ PPN 1 │ owner (5, 0x22)  │         │ VPN 0x11 │ frame: -      │
//!  │ PPN 2 │ (free)           │         └──────────────────────────┘
//!  └──────────────────────────┘
//! ```
//!
//! ## 置换顺序
//!
//! `order` 按页帧被占用的先后排列。选择牺牲页帧时依次尝试：
//! 1. 访问位与脏位都为 0 的页帧
//! 2. 脏位为 0 的页帧
//! 3. 队首页帧（FIFO）

use super::{PhysPageNum, SpaceId, VirtPageNum};
use crate::config::PAGE_SIZE;
use alloc::collections::VecDeque;
use alloc::vec;
use alloc::vec::Vec;
use buddy_system_allocator::FrameAllocator;

/// 占用页帧的页面
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FrameOwner {
    pub space: SpaceId,
    pub vpn: VirtPageNum,
}

pub struct FrameTable {
    allocator: FrameAllocator<32>,
    memory: Vec<[u8; PAGE_SIZE]>,
    owners: Vec<Option<FrameOwner>>,
    order: VecDeque<PhysPageNum>,
}

impl FrameTable {
    pub fn new(frames: usize) -> Self {
        let mut allocator = FrameAllocator::<32>::new();
        allocator.add_frame(0, frames);
        Self {
            allocator,
            memory: vec![[0u8; PAGE_SIZE]; frames],
            owners: vec![None; frames],
            order: VecDeque::new(),
        }
    }

    /// 从页帧池分配一个清零的页帧，池空时返回 `None`
    pub fn alloc(&mut self, owner: FrameOwner) -> Option<PhysPageNum> {
        let ppn = PhysPageNum(self.allocator.alloc(1)?);
        self.memory[ppn.0].fill(0);
        self.attach(ppn, owner);
        Some(ppn)
    }

    /// 归还页帧
    ///
    /// ## Panics
    ///
    /// 页帧未被占用时 panic
    pub fn free(&mut self, ppn: PhysPageNum) {
        assert!(
            self.owners[ppn.0].take().is_some(),
            "frame {:?} has not been allocated!",
            ppn
        );
        self.order.retain(|p| *p != ppn);
        self.allocator.dealloc(ppn.0, 1);
    }

    /// 解除页帧与页面的绑定，页帧仍然保持已分配状态
    pub fn detach(&mut self, ppn: PhysPageNum) -> Option<FrameOwner> {
        self.order.retain(|p| *p != ppn);
        self.owners[ppn.0].take()
    }

    /// 把已分配的页帧绑定到新页面，排到置换顺序的队尾
    pub fn attach(&mut self, ppn: PhysPageNum, owner: FrameOwner) {
        self.owners[ppn.0] = Some(owner);
        self.order.push_back(ppn);
    }

    pub fn owner(&self, ppn: PhysPageNum) -> Option<FrameOwner> {
        self.owners[ppn.0]
    }

    pub fn bytes(&self, ppn: PhysPageNum) -> &[u8; PAGE_SIZE] {
        &self.memory[ppn.0]
    }

    pub fn bytes_mut(&mut self, ppn: PhysPageNum) -> &mut [u8; PAGE_SIZE] {
        &mut self.memory[ppn.0]
    }

    /// 页帧之间拷贝
    pub fn copy(&mut self, src: PhysPageNum, dst: PhysPageNum) {
        let data = self.memory[src.0];
        self.memory[dst.0] = data;
    }

    /// 选择牺牲页帧
    ///
    /// ## Arguments
    ///
    /// * `bits` - 查询页帧对应页表项的 (访问位, 脏位)
    pub fn select_victim(&self, bits: impl Fn(FrameOwner) -> (bool, bool)) -> Option<PhysPageNum> {
        let state: Vec<(PhysPageNum, bool, bool)> = self
            .order
            .iter()
            .filter_map(|ppn| {
                self.owners[ppn.0].map(|owner| {
                    let (accessed, dirty) = bits(owner);
                    (*ppn, accessed, dirty)
                })
            })
            .collect();
        state
            .iter()
            .find(|(_, accessed, dirty)| !accessed && !dirty)
            .or_else(|| state.iter().find(|(_, _, dirty)| !dirty))
            .or_else(|| state.first())
            .map(|(ppn, _, _)| *ppn)
    }

    /// 已占用的页帧数
    pub fn in_use(&self) -> usize {
        self.owners.iter().filter(|o| o.is_some()).count()
    }

    pub fn capacity(&self) -> usize {
        self.owners.len()
    }
}
