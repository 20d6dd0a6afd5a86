//! # 线程管理模块
//!
//! 单处理器上的内核线程与调度。
//!
//! ## 模块组织
//!
//! - [`fixed_point`] - 17.14 定点数，用于 MLFQS 统计
//! - [`manager`]     - 按优先级分级的就绪队列与按唤醒时刻排序的睡眠队列
//! - [`mlfqs`]       - MLFQS 的优先级、load_avg 与 recent_cpu 公式
//! - [`scheduler`]   - 调度器 [`Scheduler`]：创建、阻塞、唤醒、让出、退出、时钟中断
//! - [`thread`]      - 线程控制块 [`ThreadControlBlock`]
//! - [`tid`]         - 线程号分配
//!
//! ## 调度模型
//!
//! ```text
//!   ready[63] ─┐
//!   ready[62]  │  fetch: 最高非空级别的队首
//!     ...      ├──────────────────────────────► Running
//!   ready[0]  ─┘                                   │
//!        ▲                                         │ 时间片用完 / yield
//!        └─────────────────────────────────────────┘
//! ```
//!
//! 调度器不是全局变量，由 [`Kernel`](crate::Kernel) 持有并显式传递。

pub mod fixed_point;
mod manager;
pub mod mlfqs;
mod scheduler;
mod thread;
mod tid;

pub use fixed_point::FixedPoint;
pub use manager::{ReadyQueue, SleepQueue};
pub use scheduler::{Scheduler, TickStats};
pub use thread::{THREAD_MAGIC, ThreadControlBlock, ThreadControlBlockInner, ThreadStatus};
pub use tid::{Tid, TidAllocator};
