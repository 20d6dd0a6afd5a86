//! # 平台抽象层
//!
//! 内核核心与硬件之间的接缝。所有体系结构相关的操作（中断开关、上下文切换、
//! 内核栈的创建与回收、停机等待中断、进入用户态、串口输出）都通过 [`Platform`]
//! 提供，内核核心本身不包含任何汇编。
//!
//! ## 上下文切换约定
//!
//! ```text
//!  thread A                       thread B
//!  ───────                        ───────
//!  do_schedule()
//!    switch(A, B) ───────────────► (从上次 switch 返回 / 首次运行 entry)
//!                                    ...
//!  (从 switch 返回) ◄───────────── switch(B, A)
//! ```
//!
//! `switch` 必须在中断关闭时调用；被切换回来的线程自行恢复它之前保存的中断状态。
//! 新线程的 `entry` 运行前中断处于关闭状态，由内核在入口处打开。

use crate::task::Tid;
use crate::trap::TrapContext;
use alloc::boxed::Box;

/// 中断状态
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum IntrLevel {
    Off,
    On,
}

/// 新线程的入口，永不返回
pub type ThreadEntry = Box<dyn FnOnce() + Send + 'static>;

/// 硬件平台接口
pub trait Platform: Send + Sync {
    /// 当前中断状态
    fn intr_get(&self) -> IntrLevel;

    /// 设置中断状态，返回之前的状态
    fn intr_set(&self, level: IntrLevel) -> IntrLevel;

    /// 关中断，返回之前的状态
    fn intr_disable(&self) -> IntrLevel {
        self.intr_set(IntrLevel::Off)
    }

    /// 开中断，返回之前的状态
    fn intr_enable(&self) -> IntrLevel {
        self.intr_set(IntrLevel::On)
    }

    /// 为线程 `tid` 准备内核栈，使其第一次被切换到时执行 `entry`
    fn spawn(&self, tid: Tid, entry: ThreadEntry);

    /// 保存 `from` 的执行上下文并恢复 `to` 的上下文
    ///
    /// 当 `from` 再次被调度时返回。
    fn switch(&self, from: Tid, to: Tid);

    /// 释放已经死亡的线程的内核栈
    fn reclaim(&self, tid: Tid);

    /// 开中断并等待下一个中断
    fn halt(&self);

    /// 以 `cx` 恢复用户态执行
    fn enter_user(&self, cx: &TrapContext) -> !;

    /// 控制台输出
    fn console_write(&self, s: &str);
}
