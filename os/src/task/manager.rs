//! # 就绪队列与睡眠队列
//!
//! ## 就绪队列
//!
//! 使用 `Vec<VecDeque<Arc<ThreadControlBlock>>>` 作为多级就绪队列：
//! - **多级队列**：每个优先级 (PRI_MIN..=PRI_MAX) 一个双端队列
//! - **优先级调度**：总是从最高优先级非空队列的队首取线程
//! - **同级 FIFO**：同一优先级内先入先出
//!
//! 线程在队列中时优先级可能改变（被捐赠、MLFQS 重新计算），
//! 因此提供 [`ReadyQueue::reposition`] 和 [`ReadyQueue::rebuild`] 重新归队。
//!
//! ```text
//!  63 │ ▢ ▢          ← fetch 从这里开始
//!  .. │
//!  31 │ ▢ ▢ ▢ ▢      ← add 追加到对应级别队尾
//!  .. │
//!   0 │ ▢
//! ```
//!
//! ## 睡眠队列
//!
//! 按唤醒时刻升序排列，同一时刻先入先出。

use super::thread::ThreadControlBlock;
use super::tid::Tid;
use crate::config::{PRI_MAX, PRI_MIN};
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;

pub struct ReadyQueue {
    levels: Vec<VecDeque<Arc<ThreadControlBlock>>>,
    /// 队列中的线程总数
    len: usize,
}

impl ReadyQueue {
    pub fn new() -> Self {
        Self {
            levels: (PRI_MIN..=PRI_MAX).map(|_| VecDeque::new()).collect(),
            len: 0,
        }
    }

    /// 将线程追加到 `priority` 级别的队尾
    pub fn add(&mut self, thread: Arc<ThreadControlBlock>, priority: usize) {
        self.levels[priority.min(PRI_MAX)].push_back(thread);
        self.len += 1;
    }

    /// 将线程插入到 `priority` 级别的队首
    pub fn push_front(&mut self, thread: Arc<ThreadControlBlock>, priority: usize) {
        self.levels[priority.min(PRI_MAX)].push_front(thread);
        self.len += 1;
    }

    /// 取出最高优先级队列的队首线程
    pub fn fetch(&mut self) -> Option<Arc<ThreadControlBlock>> {
        let thread = self
            .levels
            .iter_mut()
            .rev()
            .find(|level| !level.is_empty())
            .and_then(|level| level.pop_front());
        if thread.is_some() {
            self.len -= 1;
        }
        thread
    }

    /// 最高就绪优先级
    pub fn max_priority(&self) -> Option<usize> {
        self.levels.iter().rposition(|level| !level.is_empty())
    }

    pub fn remove(&mut self, tid: Tid) -> Option<Arc<ThreadControlBlock>> {
        for level in self.levels.iter_mut() {
            if let Some(pos) = level.iter().position(|t| t.tid == tid) {
                self.len -= 1;
                return level.remove(pos);
            }
        }
        None
    }

    /// 优先级变化后把线程移动到新级别的队尾
    pub fn reposition(&mut self, tid: Tid, priority: usize) -> bool {
        match self.remove(tid) {
            Some(thread) => {
                self.add(thread, priority);
                true
            }
            None => false,
        }
    }

    /// 按新的优先级重新归队，保持原有的相对先后顺序
    pub fn rebuild(&mut self, priority_of: impl Fn(&ThreadControlBlock) -> usize) {
        let mut all: Vec<Arc<ThreadControlBlock>> = Vec::with_capacity(self.len);
        // 按当前出队顺序收集，保证稳定性
        while let Some(thread) = self.fetch() {
            all.push(thread);
        }
        for thread in all {
            let priority = priority_of(&thread);
            self.add(thread, priority);
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains(&self, tid: Tid) -> bool {
        self.levels.iter().any(|l| l.iter().any(|t| t.tid == tid))
    }
}

/// 睡眠队列
pub struct SleepQueue {
    sleepers: VecDeque<(u64, Arc<ThreadControlBlock>)>,
}

impl SleepQueue {
    pub fn new() -> Self {
        Self {
            sleepers: VecDeque::new(),
        }
    }

    /// 按唤醒时刻插入，排在同一时刻已有线程之后
    pub fn insert(&mut self, wake_tick: u64, thread: Arc<ThreadControlBlock>) {
        let pos = self
            .sleepers
            .iter()
            .position(|(tick, _)| *tick > wake_tick)
            .unwrap_or(self.sleepers.len());
        self.sleepers.insert(pos, (wake_tick, thread));
    }

    /// 取出所有在 `now` 之前到期的线程，按到期顺序返回
    pub fn drain_expired(&mut self, now: u64) -> Vec<Arc<ThreadControlBlock>> {
        let mut woken = Vec::new();
        while let Some((tick, _)) = self.sleepers.front() {
            if *tick > now {
                break;
            }
            if let Some((_, thread)) = self.sleepers.pop_front() {
                woken.push(thread);
            }
        }
        woken
    }

    pub fn len(&self) -> usize {
        self.sleepers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sleepers.is_empty()
    }
}
