//! # 条件变量
//!
//! 每个等待者有一个私有的信号量；`signal` 唤醒优先级最高的等待者。

use super::{Lock, Semaphore, UPSafeCell};
use crate::task::{Scheduler, ThreadControlBlock};
use alloc::sync::Arc;
use alloc::vec::Vec;

pub struct Condvar {
    waiters: UPSafeCell<Vec<(Arc<ThreadControlBlock>, Arc<Semaphore>)>>,
}

impl Condvar {
    pub fn new() -> Self {
        Self {
            waiters: unsafe { UPSafeCell::new(Vec::new()) },
        }
    }

    /// 原子地释放 `lock` 并等待信号，返回前重新获取 `lock`
    pub fn wait(&self, lock: &Arc<Lock>, sched: &Scheduler) {
        assert!(lock.held_by_current(sched));
        let sema = Arc::new(Semaphore::new(0));
        self.waiters
            .exclusive_access()
            .push((sched.current(), sema.clone()));
        lock.release(sched);
        sema.down(sched);
        lock.acquire(sched);
    }

    /// 唤醒一个等待者
    pub fn signal(&self, lock: &Arc<Lock>, sched: &Scheduler) {
        assert!(lock.held_by_current(sched));
        let woken = {
            let mut waiters = self.waiters.exclusive_access();
            let best = waiters
                .iter()
                .enumerate()
                .fold(None::<(usize, usize)>, |best, (i, (t, _))| {
                    let priority = t.priority();
                    match best {
                        Some((_, p)) if p >= priority => best,
                        _ => Some((i, priority)),
                    }
                });
            best.map(|(i, _)| waiters.remove(i))
        };
        if let Some((_, sema)) = woken {
            sema.up(sched);
        }
    }

    /// 唤醒所有等待者
    pub fn broadcast(&self, lock: &Arc<Lock>, sched: &Scheduler) {
        while !self.waiters.exclusive_access().is_empty() {
            self.signal(lock, sched);
        }
    }
}
