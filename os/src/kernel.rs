//! # 内核上下文
//!
//! [`Kernel`] 聚合了内核核心的全部状态，代替全局变量在各个子系统之间显式传递：
//!
//! ```text
//!   Kernel
//!   ├── config     运行期配置
//!   ├── platform   中断 / 上下文切换 / 控制台
//!   ├── sched      调度器（线程、就绪队列、时钟）
//!   ├── vm         地址空间、页帧、交换区
//!   ├── fs         文件系统
//!   └── loader     可执行文件装载器
//! ```
//!
//! ## 启动流程
//!
//! 1. 初始化日志
//! 2. 把执行启动代码的上下文登记为 `main` 线程
//! 3. 创建 idle 线程
//! 4. 开中断，时钟中断开始驱动调度

use crate::config::KernelConfig;
use crate::error::ThreadError;
use crate::fs::FileSystem;
use crate::loader::ExecLoader;
use crate::mm::{BlockDevice, VmManager};
use crate::platform::Platform;
use crate::task::{Scheduler, Tid};
use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use log::info;

pub struct Kernel {
    pub(crate) config: KernelConfig,
    pub(crate) platform: Arc<dyn Platform>,
    pub(crate) sched: Scheduler,
    pub(crate) vm: VmManager,
    pub(crate) fs: Arc<dyn FileSystem>,
    pub(crate) loader: Arc<dyn ExecLoader>,
}

impl Kernel {
    /// 启动内核核心
    ///
    /// ## Arguments
    ///
    /// * `config` - 运行期配置
    /// * `platform` - 硬件平台
    /// * `fs` - 文件系统
    /// * `loader` - 可执行文件装载器
    /// * `swap` - 交换设备
    ///
    /// ## Returns
    ///
    /// 返回时调用者已经是 `main` 线程，中断已经打开
    pub fn boot(
        config: KernelConfig,
        platform: Arc<dyn Platform>,
        fs: Arc<dyn FileSystem>,
        loader: Arc<dyn ExecLoader>,
        swap: Arc<dyn BlockDevice>,
    ) -> Result<Arc<Kernel>, ThreadError> {
        crate::log::init(config.log_level);
        platform.intr_disable();
        let kernel = Arc::new(Kernel {
            sched: Scheduler::new(platform.clone(), config.policy),
            vm: VmManager::new(config.user_frames, swap),
            config,
            platform,
            fs,
            loader,
        });
        kernel.sched.adopt_initial("main")?;
        let idle = kernel.clone();
        kernel.sched.create_idle(Box::new(move || idle.idle()))?;
        info!(
            "boot: {:?} scheduler, {} user frames",
            kernel.config.policy, kernel.config.user_frames
        );
        kernel.sched.intr_enable();
        Ok(kernel)
    }

    /// idle 线程：没有就绪线程时停机等待中断
    ///
    /// 第一次运行时立即阻塞自己，之后只在就绪队列为空时被调度器直接选中。
    fn idle(&self) -> ! {
        loop {
            self.sched.intr_disable();
            self.sched.block_current();
            self.platform.halt();
        }
    }

    /// 创建内核线程并使其就绪
    ///
    /// 新线程开中断后执行 `entry`，`entry` 返回后线程退出。
    /// 新线程优先级更高时立即抢占调用者。
    pub fn thread_create<F>(
        self: &Arc<Self>,
        name: &str,
        priority: usize,
        entry: F,
    ) -> Result<Tid, ThreadError>
    where
        F: FnOnce(&Arc<Kernel>) + Send + 'static,
    {
        let kernel = self.clone();
        let thread = self.sched.create(
            name,
            priority,
            Box::new(move || {
                kernel.sched.intr_enable();
                entry(&kernel);
                kernel.thread_exit()
            }),
        )?;
        let tid = thread.tid;
        self.sched.wake(&thread);
        Ok(tid)
    }

    /// 关中断执行虚拟内存操作
    pub(crate) fn with_vm<R>(&self, f: impl FnOnce(&VmManager) -> R) -> R {
        let old = self.sched.intr_disable();
        let result = f(&self.vm);
        self.sched.intr_set(old);
        result
    }

    /// 结束当前线程；用户进程先释放进程资源
    pub fn thread_exit(&self) -> ! {
        self.process_exit();
        self.sched.exit_current()
    }

    pub fn current_tid(&self) -> Tid {
        self.sched.current_tid()
    }

    pub fn thread_name(&self) -> String {
        self.sched.current().name.clone()
    }

    /// 自 `then` 以来经过的时钟中断数
    pub fn timer_elapsed(&self, then: u64) -> u64 {
        self.sched.elapsed(then)
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    pub fn sched(&self) -> &Scheduler {
        &self.sched
    }

    pub fn vm(&self) -> &VmManager {
        &self.vm
    }

    pub fn fs(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }
}
