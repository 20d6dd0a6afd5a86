//! # 互斥锁与优先级捐赠
//!
//! 锁是一个初值为 1 的信号量加上持有者。获取失败时等待者把自己登记到持有者的
//! 捐赠者集合，并沿锁链向上传递优先级：
//!
//! ```text
//!   H (63) ──等待 lock B──► M (31 → 63) ──等待 lock A──► L (1 → 63)
//! ```
//!
//! 释放时移除所有因这把锁而捐赠的线程，重新计算有效优先级；锁的下一个持有者
//! 接手这些仍在排队的捐赠者。MLFQS 下不捐赠。

use super::{Semaphore, UPSafeCell};
use crate::task::{Scheduler, ThreadControlBlock};
use alloc::sync::Arc;

pub struct Lock {
    holder: UPSafeCell<Option<Arc<ThreadControlBlock>>>,
    sema: Semaphore,
}

impl Lock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            holder: unsafe { UPSafeCell::new(None) },
            sema: Semaphore::new(1),
        })
    }

    pub fn holder(&self) -> Option<Arc<ThreadControlBlock>> {
        self.holder.exclusive_access().clone()
    }

    pub fn held_by_current(&self, sched: &Scheduler) -> bool {
        let current = sched.current();
        self.holder
            .exclusive_access()
            .as_ref()
            .is_some_and(|h| h.tid == current.tid)
    }

    /// 获取锁，必要时阻塞并捐赠优先级
    ///
    /// ## Panics
    ///
    /// 当前线程已经持有这把锁时 panic
    pub fn acquire(self: &Arc<Self>, sched: &Scheduler) {
        assert!(!self.held_by_current(sched), "lock acquired recursively");
        let old = sched.intr_disable();
        let current = sched.current();
        if !sched.mlfqs() {
            if let Some(holder) = self.holder() {
                current.inner_exclusive_access().waiting_on = Some(self.clone());
                holder.inner_exclusive_access().donors.push(current.clone());
                sched.donate(&current);
            }
        }
        self.sema.down(sched);
        {
            let mut cur = current.inner_exclusive_access();
            cur.waiting_on = None;
            if !sched.mlfqs() {
                // 仍在排队的线程改为向新持有者捐赠
                cur.donors.extend(self.sema.waiters());
                cur.refresh_priority();
            }
        }
        *self.holder.exclusive_access() = Some(current);
        sched.intr_set(old);
    }

    /// 尝试获取锁，不阻塞也不捐赠
    pub fn try_acquire(self: &Arc<Self>, sched: &Scheduler) -> bool {
        assert!(!self.held_by_current(sched), "lock acquired recursively");
        let old = sched.intr_disable();
        let ok = self.sema.try_down(sched);
        if ok {
            *self.holder.exclusive_access() = Some(sched.current());
        }
        sched.intr_set(old);
        ok
    }

    /// 释放锁
    ///
    /// ## Panics
    ///
    /// 当前线程不是持有者时 panic
    pub fn release(self: &Arc<Self>, sched: &Scheduler) {
        assert!(
            self.held_by_current(sched),
            "lock released by a thread that does not hold it"
        );
        let old = sched.intr_disable();
        let current = sched.current();
        if !sched.mlfqs() {
            let mut cur = current.inner_exclusive_access();
            cur.remove_donors_of(self);
            cur.refresh_priority();
        }
        *self.holder.exclusive_access() = None;
        self.sema.up(sched);
        sched.yield_if_outranked();
        sched.intr_set(old);
    }
}
