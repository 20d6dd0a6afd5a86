//! # 进程生命周期
//!
//! 用户进程就是带有地址空间的内核线程。进程相关的资源挂在线程控制块的
//! [`ProcessControl`] 中，父子之间通过三组信号量 [`Handshake`] 协调：
//!
//! ```text
//!   parent                                  child
//!   ──────                                  ─────
//!   fork ─── create + register ──────────►  duplicate space / files
//!     │ fork_done.down                        │
//!     │ ◄──────────────────── fork_done.up ───┘
//!   wait(tid)                                 ...
//!     │ exited.down                         exit(status)
//!     │ ◄────────────────────── exited.up ────┤
//!     │ 读取 exit_status                      │ reaped.down
//!     └─ reaped.up ─────────────────────────► │ 被回收
//! ```
//!
//! 父进程先于子进程退出时会对每个剩余子进程执行 `reaped.up`，子进程退出时不再阻塞。
//!
//! ## 模块组织
//!
//! - [`args`]      - exec 时用户栈上的参数布局
//! - [`fd_table`]  - 文件描述符表
//! - `lifecycle`   - fork / exec / wait / exit
//! - `files`       - 文件、用户内存与 mmap 原语

pub mod args;
mod fd_table;
mod files;
mod lifecycle;

pub use fd_table::FdTable;

use crate::fs::OpenFile;
use crate::mm::SpaceId;
use crate::sync::Semaphore;
use crate::task::ThreadControlBlock;
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;

/// 线程控制块中与进程相关的可变部分
pub struct ProcessControl {
    /// 是否是用户进程，只有用户进程退出时打印退出信息
    pub is_user: bool,
    pub parent: Option<Weak<ThreadControlBlock>>,
    /// 尚未被等待的子进程，持有它们的控制块直到读取退出状态
    pub children: Vec<Arc<ThreadControlBlock>>,
    pub exit_status: i32,
    /// 子进程在 fork_done 之前写入复制结果
    pub fork_ok: bool,
    pub space: Option<SpaceId>,
    pub fd_table: FdTable,
    /// 正在运行的可执行文件，持有期间禁止写入
    pub executable: Option<Arc<OpenFile>>,
}

impl ProcessControl {
    pub fn new() -> Self {
        Self {
            is_user: false,
            parent: None,
            children: Vec::new(),
            exit_status: 0,
            fork_ok: false,
            space: None,
            fd_table: FdTable::new(),
            executable: None,
        }
    }
}

/// 父子进程间的握手信号量，初值都为 0
pub struct Handshake {
    /// 子进程完成 fork 复制（成功或失败）
    pub fork_done: Semaphore,
    /// 子进程已经退出，退出状态可读
    pub exited: Semaphore,
    /// 父进程已经读取退出状态或已经退出，子进程可以被回收
    pub reaped: Semaphore,
}

impl Handshake {
    pub fn new() -> Self {
        Self {
            fork_done: Semaphore::new(0),
            exited: Semaphore::new(0),
            reaped: Semaphore::new(0),
        }
    }
}
