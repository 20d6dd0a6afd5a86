//! # 同步原语
//!
//! - [`UPSafeCell`] - 单处理器上的内部可变性，只在关中断时访问
//! - [`Semaphore`] - 计数信号量，按优先级唤醒
//! - [`Lock`] - 互斥锁，支持优先级捐赠
//! - [`Condvar`] - 条件变量
//!
//! 阻塞型原语都显式接收 [`Scheduler`](crate::task::Scheduler)，不依赖全局状态。

mod condvar;
mod lock;
mod semaphore;
mod up;

pub use condvar::Condvar;
pub use lock::Lock;
pub use semaphore::Semaphore;
pub use up::UPSafeCell;
