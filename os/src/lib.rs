//! # nimloth-kernel
//!
//! 单处理器教学内核的核心：线程调度、进程生命周期与虚拟内存。
//!
//! ## 模块组织
//!
//! ```text
//!   kernel ─── Kernel：聚合以下子系统的显式上下文
//!     │
//!     ├── task      线程控制块、就绪/睡眠队列、调度器、MLFQS
//!     ├── sync      UPSafeCell、信号量、带优先级捐赠的锁、条件变量
//!     ├── process   fork / exec / wait / exit，文件描述符表
//!     ├── mm        补充页表、页帧表与换出、交换区、mmap、软件 MMU
//!     ├── trap      时钟中断与缺页入口
//!     │
//!     ├── fs        文件系统接口与内存文件系统
//!     ├── loader    可执行文件装载接口与 ELF 装载器
//!     └── platform  中断、上下文切换、控制台等硬件接口
//! ```
//!
//! 内核核心不包含汇编，也不假设运行在哪种硬件上：所有硬件操作都经过
//! [`platform::Platform`]。因此整个核心可以在宿主机上用普通线程模拟 CPU 来测试。

#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[macro_use]
pub mod console;
pub mod config;
pub mod error;
pub mod fs;
mod kernel;
pub mod loader;
pub mod log;
pub mod mm;
pub mod platform;
pub mod process;
pub mod sync;
pub mod task;
pub mod trap;

pub use kernel::Kernel;
