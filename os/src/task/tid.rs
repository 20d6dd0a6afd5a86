//! # 线程号分配
//!
//! 线程号单调递增、永不复用：已退出子进程的线程号在父进程等待之前一直有效，
//! 复用会让 `wait` 认错对象。

use crate::error::ThreadError;
use core::fmt::{self, Display, Formatter};

/// 线程标识符
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tid(pub usize);

impl Display for Tid {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 线程号分配器
pub struct TidAllocator {
    next: usize,
}

impl TidAllocator {
    /// 从 1 开始分配，0 保留为无效线程号
    pub fn new() -> Self {
        Self { next: 1 }
    }

    pub fn alloc(&mut self) -> Result<Tid, ThreadError> {
        let tid = self.next;
        self.next = self.next.checked_add(1).ok_or(ThreadError::TidExhausted)?;
        Ok(Tid(tid))
    }
}
