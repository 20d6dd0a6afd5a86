//! # 陷阱处理
//!
//! 平台层在中断或异常到来时调用 [`Kernel`] 上的入口：
//!
//! ```text
//!  时钟中断 ──► Kernel::timer_interrupt
//!                 begin_interrupt → tick → end_interrupt ──► 需要时 yield
//!
//!  系统调用 ──► Kernel::syscall_entry   记录用户栈指针
//!
//!  缺页异常 ──► Kernel::page_fault
//!                 VmManager::handle_fault ──► 失败时以 −1 结束进程
//! ```
//!
//! 中断处理期间唤醒的线程不会立即抢占，抢占推迟到处理结束时进行。

mod context;

pub use context::TrapContext;

use crate::Kernel;
use crate::mm::VirtAddr;
use log::{trace, warn};

impl Kernel {
    /// 时钟中断入口
    pub fn timer_interrupt(&self) {
        let old = self.sched.intr_disable();
        self.sched.begin_interrupt();
        self.sched.tick();
        if self.sched.end_interrupt() {
            self.sched.yield_now();
        }
        self.sched.intr_set(old);
    }

    /// 系统调用入口
    ///
    /// 记录进入内核时的用户栈指针。系统调用期间内核代替用户访问内存而缺页时，
    /// 以它判定是否属于栈增长。
    pub fn syscall_entry(&self, cx: &TrapContext) {
        if let Some(space) = self.current_space() {
            self.with_vm(|vm| vm.set_user_sp(space, cx.sp()));
        }
    }

    /// 缺页异常入口
    ///
    /// ## Arguments
    ///
    /// * `addr` - 引起缺页的地址
    /// * `user` - 是否发生在用户态
    /// * `write` - 是否为写访问
    /// * `not_present` - 页面是否不存在（否则是权限错误）
    /// * `sp` - 用户态缺页时的用户栈指针
    ///
    /// 无法处理的缺页以 −1 结束当前进程，不返回。
    pub fn page_fault(&self, addr: VirtAddr, user: bool, write: bool, not_present: bool, sp: usize) {
        trace!(
            "page fault at {:#x} ({}, {}, {})",
            addr.0,
            if user { "user" } else { "kernel" },
            if write { "write" } else { "read" },
            if not_present { "not present" } else { "rights" },
        );
        let space = self.sched.current().inner_exclusive_access().process.space;
        let Some(space) = space else {
            warn!("page fault at {:#x} without address space", addr.0);
            self.exit(-1)
        };
        if let Err(err) =
            self.with_vm(|vm| vm.handle_fault(space, addr, user, write, not_present, sp))
        {
            warn!("{}: page fault at {:#x}: {}", self.thread_name(), addr.0, err);
            self.exit(-1)
        }
    }
}
