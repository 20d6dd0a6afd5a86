//! # 计数信号量
//!
//! `down` 在计数为 0 时阻塞调用者；`up` 唤醒等待者中有效优先级最高的一个
//! （同优先级先来先醒）。被唤醒的线程优先级更高时立即得到处理器。

use super::UPSafeCell;
use crate::task::{Scheduler, ThreadControlBlock};
use alloc::sync::Arc;
use alloc::vec::Vec;

pub struct Semaphore {
    inner: UPSafeCell<SemaphoreInner>,
}

pub struct SemaphoreInner {
    pub count: usize,
    pub waiters: Vec<Arc<ThreadControlBlock>>,
}

impl Semaphore {
    pub fn new(count: usize) -> Self {
        Self {
            inner: unsafe {
                UPSafeCell::new(SemaphoreInner {
                    count,
                    waiters: Vec::new(),
                })
            },
        }
    }

    /// P 操作
    pub fn down(&self, sched: &Scheduler) {
        let old = sched.intr_disable();
        loop {
            {
                let mut inner = self.inner.exclusive_access();
                if inner.count > 0 {
                    inner.count -= 1;
                    break;
                }
                inner.waiters.push(sched.current());
            }
            sched.block_current();
        }
        sched.intr_set(old);
    }

    /// 不阻塞的 P 操作，成功返回 `true`
    pub fn try_down(&self, sched: &Scheduler) -> bool {
        let old = sched.intr_disable();
        let ok = {
            let mut inner = self.inner.exclusive_access();
            if inner.count > 0 {
                inner.count -= 1;
                true
            } else {
                false
            }
        };
        sched.intr_set(old);
        ok
    }

    /// V 操作
    pub fn up(&self, sched: &Scheduler) {
        let old = sched.intr_disable();
        let woken = {
            let mut inner = self.inner.exclusive_access();
            inner.count += 1;
            // 最高优先级中最早等待的一个
            let best = inner
                .waiters
                .iter()
                .enumerate()
                .fold(None::<(usize, usize)>, |best, (i, t)| {
                    let priority = t.priority();
                    match best {
                        Some((_, p)) if p >= priority => best,
                        _ => Some((i, priority)),
                    }
                });
            best.map(|(i, _)| inner.waiters.remove(i))
        };
        if let Some(thread) = woken {
            sched.wake(&thread);
        }
        sched.intr_set(old);
    }

    pub fn count(&self) -> usize {
        self.inner.exclusive_access().count
    }

    /// 当前阻塞在该信号量上的线程
    pub fn waiters(&self) -> Vec<Arc<ThreadControlBlock>> {
        self.inner.exclusive_access().waiters.clone()
    }

    pub fn waiter_count(&self) -> usize {
        self.inner.exclusive_access().waiters.len()
    }
}
