//! # 交换区管理
//!
//! 交换设备被看作由固定大小槽位组成的平坦数组，每个槽位恰好容纳一页：
//!
//! ```text
//! sector:  0 ... 7 │ 8 ... 15 │ 16 ... 23 │ ...
//! slot:       0    │    1     │     2     │ ...
//! ```
//!
//! 槽位的占用情况记录在内存中的位图里，位图按 `u64` 分组查找第一个空位。

use crate::config::{PAGE_SIZE, SECTOR_SIZE, SECTORS_PER_SLOT};
use crate::error::VmError;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use log::trace;
use spin::Mutex;

/// 块设备接口
///
/// 以扇区为单位读写，`buf` 的长度恰好为一个扇区。
pub trait BlockDevice: Send + Sync {
    fn read_block(&self, block_id: usize, buf: &mut [u8]);
    fn write_block(&self, block_id: usize, buf: &[u8]);
    /// 设备包含的扇区数
    fn num_blocks(&self) -> usize;
}

/// 内存块设备，用作宿主机上的交换设备
pub struct RamDisk {
    sectors: Mutex<Vec<[u8; SECTOR_SIZE]>>,
}

impl RamDisk {
    pub fn new(sectors: usize) -> Self {
        Self {
            sectors: Mutex::new(vec![[0u8; SECTOR_SIZE]; sectors]),
        }
    }

    /// 容纳 `slots` 个交换槽的设备
    pub fn with_slots(slots: usize) -> Self {
        Self::new(slots * SECTORS_PER_SLOT)
    }
}

impl BlockDevice for RamDisk {
    fn read_block(&self, block_id: usize, buf: &mut [u8]) {
        buf.copy_from_slice(&self.sectors.lock()[block_id]);
    }

    fn write_block(&self, block_id: usize, buf: &[u8]) {
        self.sectors.lock()[block_id].copy_from_slice(buf);
    }

    fn num_blocks(&self) -> usize {
        self.sectors.lock().len()
    }
}

/// 位图
///
/// 采用首次适应算法，在第一个非满的 u64 中取最低的空位。
pub struct Bitmap {
    bits: Vec<u64>,
    capacity: usize,
}

impl Bitmap {
    pub fn new(capacity: usize) -> Self {
        let mut bits = vec![0u64; capacity.div_ceil(64)];
        // 超出容量的尾部位预先置 1
        if capacity % 64 != 0 {
            if let Some(last) = bits.last_mut() {
                *last = !0u64 << (capacity % 64);
            }
        }
        Self { bits, capacity }
    }

    pub fn alloc(&mut self) -> Option<usize> {
        let (bits64_pos, inner_pos) = self
            .bits
            .iter()
            .enumerate()
            .find(|(_, bits64)| **bits64 != u64::MAX)
            .map(|(pos, bits64)| (pos, bits64.trailing_ones() as usize))?;
        self.bits[bits64_pos] |= 1u64 << inner_pos;
        Some(bits64_pos * 64 + inner_pos)
    }

    /// ## Panics
    ///
    /// 释放未被占用的位时 panic
    pub fn dealloc(&mut self, bit: usize) {
        let (bits64_pos, inner_pos) = (bit / 64, bit % 64);
        assert!(
            bit < self.capacity && self.bits[bits64_pos] & (1u64 << inner_pos) > 0,
            "bit {} is not allocated",
            bit
        );
        self.bits[bits64_pos] &= !(1u64 << inner_pos);
    }

    pub fn is_set(&self, bit: usize) -> bool {
        bit < self.capacity && self.bits[bit / 64] & (1u64 << (bit % 64)) > 0
    }

    pub fn count_set(&self) -> usize {
        (0..self.capacity).filter(|bit| self.is_set(*bit)).count()
    }

    pub fn maximum(&self) -> usize {
        self.capacity
    }
}

/// 交换槽表
pub struct SwapTable {
    device: Arc<dyn BlockDevice>,
    used: Bitmap,
}

impl SwapTable {
    pub fn new(device: Arc<dyn BlockDevice>) -> Self {
        let slots = device.num_blocks() / SECTORS_PER_SLOT;
        Self {
            device,
            used: Bitmap::new(slots),
        }
    }

    /// 把一页写入新的交换槽，返回槽位编号
    pub fn swap_out(&mut self, page: &[u8; PAGE_SIZE]) -> Result<usize, VmError> {
        let slot = self.used.alloc().ok_or(VmError::SwapFull)?;
        for (i, sector) in page.chunks(SECTOR_SIZE).enumerate() {
            self.device.write_block(slot * SECTORS_PER_SLOT + i, sector);
        }
        trace!("swap out -> slot {}", slot);
        Ok(slot)
    }

    /// 读回交换槽并释放它
    pub fn swap_in(&mut self, slot: usize, page: &mut [u8; PAGE_SIZE]) {
        self.read_slot(slot, page);
        self.used.dealloc(slot);
        trace!("swap in <- slot {}", slot);
    }

    /// 只读取交换槽，不释放（fork 复制换出的页面时使用）
    pub fn read_slot(&self, slot: usize, page: &mut [u8; PAGE_SIZE]) {
        for (i, sector) in page.chunks_mut(SECTOR_SIZE).enumerate() {
            self.device.read_block(slot * SECTORS_PER_SLOT + i, sector);
        }
    }

    pub fn free(&mut self, slot: usize) {
        self.used.dealloc(slot);
    }

    pub fn slots_in_use(&self) -> usize {
        self.used.count_set()
    }

    pub fn capacity(&self) -> usize {
        self.used.maximum()
    }
}
