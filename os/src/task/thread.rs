//! # 线程控制块
//!
//! 每个内核线程（包括承载用户进程的线程）对应一个 [`ThreadControlBlock`]。
//! 控制块采用内外分离的设计：
//!
//! - **不变部分**：线程号、名字、魔数、进程握手信号量
//! - **可变部分**：调度状态、优先级与捐赠信息、MLFQS 统计、进程资源，
//!   放在 [`UPSafeCell`] 中，只在关中断时访问
//!
//! ## 线程状态转换
//!
//! ```text
//!   create ──► Blocked ──unblock──► Ready ◄──yield/preempt──┐
//!                 ▲                   │                      │
//!                 │                   ▼ dispatch             │
//!                 └──────block────── Running ────────────────┘
//!                                     │ exit
//!                                     ▼
//!                                   Dying ──► 由下一次调度回收
//! ```

use super::fixed_point::FixedPoint;
use super::tid::Tid;
use crate::config::{NICE_DEFAULT, PRI_MAX, PRI_MIN};
use crate::process::{Handshake, ProcessControl};
use crate::sync::{Lock, UPSafeCell};
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cell::RefMut;

/// 控制块完整性标记，被覆盖说明内核栈溢出
pub const THREAD_MAGIC: u32 = 0xcd6a_bf4b;

/// 线程状态
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ThreadStatus {
    Running,
    Ready,
    Blocked,
    Dying,
}

pub struct ThreadControlBlock {
    pub tid: Tid,
    pub name: String,
    magic: u32,
    /// fork/wait/exit 的握手信号量
    pub handshake: Handshake,
    inner: UPSafeCell<ThreadControlBlockInner>,
}

pub struct ThreadControlBlockInner {
    pub status: ThreadStatus,
    /// 有效优先级（含捐赠）
    pub priority: usize,
    /// 未被捐赠时的原始优先级
    pub base_priority: usize,
    /// 向本线程捐赠优先级的线程
    pub donors: Vec<Arc<ThreadControlBlock>>,
    /// 正在等待的锁
    pub waiting_on: Option<Arc<Lock>>,
    pub nice: i32,
    pub recent_cpu: FixedPoint,
    /// 睡眠线程的唤醒时刻
    pub wake_tick: u64,
    pub process: ProcessControl,
}

impl ThreadControlBlockInner {
    /// 有效优先级 = max(原始优先级, 所有捐赠者的有效优先级)
    pub fn refresh_priority(&mut self) {
        let donated = self
            .donors
            .iter()
            .map(|donor| donor.inner_exclusive_access().priority)
            .max()
            .unwrap_or(PRI_MIN);
        self.priority = self.base_priority.max(donated);
    }

    /// 移除所有因等待 `lock` 而捐赠的线程
    pub fn remove_donors_of(&mut self, lock: &Arc<Lock>) {
        self.donors.retain(|donor| {
            let waiting = donor.inner_exclusive_access();
            !matches!(&waiting.waiting_on, Some(l) if Arc::ptr_eq(l, lock))
        });
    }
}

impl ThreadControlBlock {
    pub fn new(tid: Tid, name: &str, priority: usize) -> Self {
        debug_assert!(priority <= PRI_MAX);
        Self {
            tid,
            name: String::from(name),
            magic: THREAD_MAGIC,
            handshake: Handshake::new(),
            inner: unsafe {
                UPSafeCell::new(ThreadControlBlockInner {
                    status: ThreadStatus::Blocked,
                    priority,
                    base_priority: priority,
                    donors: Vec::new(),
                    waiting_on: None,
                    nice: NICE_DEFAULT,
                    recent_cpu: FixedPoint::ZERO,
                    wake_tick: 0,
                    process: ProcessControl::new(),
                })
            },
        }
    }

    pub fn inner_exclusive_access(&self) -> RefMut<'_, ThreadControlBlockInner> {
        self.inner.exclusive_access()
    }

    pub fn is_intact(&self) -> bool {
        self.magic == THREAD_MAGIC
    }

    pub fn status(&self) -> ThreadStatus {
        self.inner_exclusive_access().status
    }

    pub fn priority(&self) -> usize {
        self.inner_exclusive_access().priority
    }
}
