//! 宿主机上的测试平台
//!
//! 每个内核线程由一个宿主线程承载，宿主线程之间传递一根“接力棒”，
//! 保证任一时刻只有一个内核线程在运行，与单处理器一致：
//!
//! ```text
//!   switch(A, B):  running = B; notify_all; A 等待 running == A
//!   reclaim(T):    标记 T 已回收; T 醒来后以 Reaped 展开自己的栈; join(T)
//!   halt():        开中断并投递一次时钟中断（只有 idle 线程调用）
//! ```
//!
//! 测试函数所在的线程就是内核的 `main` 线程。

#![allow(dead_code)]

use nimloth_kernel::config::KernelConfig;
use nimloth_kernel::fs::RamFs;
use nimloth_kernel::loader::{ElfLoader, build_elf};
use nimloth_kernel::mm::{RamDisk, VirtAddr};
use nimloth_kernel::platform::{IntrLevel, Platform, ThreadEntry};
use nimloth_kernel::task::Tid;
use nimloth_kernel::trap::TrapContext;
use nimloth_kernel::{Kernel, console};
use std::collections::{HashMap, HashSet};
use std::mem::size_of;
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Once, OnceLock, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// 主线程等待接力棒的最长时间
const DEADLOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// idle 线程连续停机这么多次仍没有其它线程可运行，视为死锁
const IDLE_HALT_LIMIT: usize = 200_000;

/// 被回收线程展开栈时携带的标记
struct Reaped;

/// 用户程序：以进入用户态时的寄存器运行，返回即 `exit(0)`
pub type Program = Arc<dyn Fn(&Arc<Kernel>, &TrapContext) + Send + Sync>;

struct Baton {
    running: usize,
    reaped: HashSet<usize>,
    /// 某个内核线程意外 panic 的信息
    failure: Option<String>,
}

pub struct HostPlatform {
    me: Weak<HostPlatform>,
    baton: Mutex<Baton>,
    turn: Condvar,
    intr_on: AtomicBool,
    main: AtomicUsize,
    idle: AtomicUsize,
    idle_halts: AtomicUsize,
    handles: Mutex<HashMap<usize, JoinHandle<()>>>,
    kernel: OnceLock<Weak<Kernel>>,
    programs: Mutex<HashMap<usize, Program>>,
    console: Mutex<String>,
}

impl HostPlatform {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|me| HostPlatform {
            me: me.clone(),
            baton: Mutex::new(Baton {
                running: 0,
                reaped: HashSet::new(),
                failure: None,
            }),
            turn: Condvar::new(),
            intr_on: AtomicBool::new(false),
            main: AtomicUsize::new(0),
            idle: AtomicUsize::new(0),
            idle_halts: AtomicUsize::new(0),
            handles: Mutex::new(HashMap::new()),
            kernel: OnceLock::new(),
            programs: Mutex::new(HashMap::new()),
            console: Mutex::new(String::new()),
        })
    }

    /// 把当前宿主线程登记为持有接力棒的 `main` 线程
    fn attach(&self, kernel: &Arc<Kernel>) {
        let main = kernel.current_tid().0;
        self.main.store(main, Ordering::SeqCst);
        self.baton.lock().unwrap().running = main;
        let _ = self.kernel.set(Arc::downgrade(kernel));
    }

    fn kernel(&self) -> Arc<Kernel> {
        self.kernel
            .get()
            .and_then(Weak::upgrade)
            .expect("kernel is not attached")
    }

    /// 登记入口地址为 `entry` 的用户程序
    pub fn register_program(&self, entry: usize, program: Program) {
        self.programs.lock().unwrap().insert(entry, program);
    }

    /// 到目前为止的控制台输出
    pub fn console(&self) -> String {
        self.console.lock().unwrap().clone()
    }

    /// 等待轮到 `tid` 运行
    fn wait_turn(&self, mut baton: MutexGuard<'_, Baton>, tid: usize) {
        let is_main = tid == self.main.load(Ordering::SeqCst);
        let start = Instant::now();
        loop {
            if baton.reaped.contains(&tid) {
                drop(baton);
                resume_unwind(Box::new(Reaped));
            }
            if let Some(failure) = baton.failure.clone() {
                if is_main {
                    drop(baton);
                    panic!("{}", failure);
                }
            }
            if baton.running == tid {
                return;
            }
            if is_main && start.elapsed() > DEADLOCK_TIMEOUT {
                drop(baton);
                panic!("deadlock: main thread never rescheduled");
            }
            baton = self
                .turn
                .wait_timeout(baton, Duration::from_millis(50))
                .unwrap()
                .0;
        }
    }

    fn record_failure(&self, tid: usize, message: String) {
        let mut baton = self.baton.lock().unwrap();
        baton.failure = Some(format!("kernel thread {} panicked: {}", tid, message));
        self.turn.notify_all();
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        String::from("<non-string panic>")
    }
}

impl Platform for HostPlatform {
    fn intr_get(&self) -> IntrLevel {
        if self.intr_on.load(Ordering::SeqCst) {
            IntrLevel::On
        } else {
            IntrLevel::Off
        }
    }

    fn intr_set(&self, level: IntrLevel) -> IntrLevel {
        let old = self.intr_on.swap(level == IntrLevel::On, Ordering::SeqCst);
        if old { IntrLevel::On } else { IntrLevel::Off }
    }

    fn spawn(&self, tid: Tid, entry: ThreadEntry) {
        let platform = self.me.upgrade().expect("platform dropped");
        let handle = std::thread::Builder::new()
            .name(format!("kthread-{}", tid.0))
            .spawn(move || {
                let started = catch_unwind(AssertUnwindSafe(|| {
                    platform.wait_turn(platform.baton.lock().unwrap(), tid.0);
                    entry();
                }));
                if let Err(payload) = started {
                    if !payload.is::<Reaped>() {
                        platform.record_failure(tid.0, panic_message(&*payload));
                    }
                }
            })
            .expect("cannot spawn host thread");
        self.handles.lock().unwrap().insert(tid.0, handle);
    }

    fn switch(&self, from: Tid, to: Tid) {
        if to.0 != self.idle.load(Ordering::SeqCst) {
            self.idle_halts.store(0, Ordering::SeqCst);
        }
        let mut baton = self.baton.lock().unwrap();
        baton.running = to.0;
        self.turn.notify_all();
        self.wait_turn(baton, from.0);
    }

    fn reclaim(&self, tid: Tid) {
        self.baton.lock().unwrap().reaped.insert(tid.0);
        self.turn.notify_all();
        let handle = self.handles.lock().unwrap().remove(&tid.0);
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }

    fn halt(&self) {
        let kernel = self.kernel();
        self.idle
            .store(kernel.current_tid().0, Ordering::SeqCst);
        if self.idle_halts.fetch_add(1, Ordering::SeqCst) > IDLE_HALT_LIMIT {
            panic!("every thread is blocked");
        }
        self.intr_set(IntrLevel::On);
        kernel.timer_interrupt();
    }

    fn enter_user(&self, cx: &TrapContext) -> ! {
        let kernel = self.kernel();
        let program = self.programs.lock().unwrap().get(&cx.sepc).cloned();
        let Some(program) = program else {
            panic!("no program at {:#x}", cx.sepc);
        };
        self.intr_set(IntrLevel::On);
        program(&kernel, cx);
        kernel.exit(0)
    }

    fn console_write(&self, s: &str) {
        self.console.lock().unwrap().push_str(s);
    }
}

/// 启动好的测试内核
pub struct TestKernel {
    pub kernel: Arc<Kernel>,
    pub platform: Arc<HostPlatform>,
    pub fs: Arc<RamFs>,
}

impl TestKernel {
    /// 安装一个可执行文件：入口所在页可写，内容为 `data`
    pub fn install(&self, name: &str, entry: usize, data: &[u8], program: Program) {
        self.install_with(name, entry, data, true, program);
    }

    pub fn install_with(
        &self,
        name: &str,
        entry: usize,
        data: &[u8],
        writable: bool,
        program: Program,
    ) {
        let elf = build_elf(entry, &[(entry & !0xfff, data, data.len().max(1), writable)]);
        self.fs.insert(name, &elf);
        self.platform.register_program(entry, program);
    }

    /// 登记一个不对应任何文件的入口，用作 fork 子进程的返回地址
    pub fn register(&self, entry: usize, program: Program) {
        self.platform.register_program(entry, program);
    }

    pub fn console(&self) -> String {
        self.platform.console()
    }
}

/// 以 `config` 启动内核，调用者成为 `main` 线程
pub fn boot(config: KernelConfig) -> TestKernel {
    boot_with(config, 64)
}

/// 以 `config` 和 `swap_slots` 个交换槽启动内核
pub fn boot_with(config: KernelConfig, swap_slots: usize) -> TestKernel {
    static SINK: Once = Once::new();
    SINK.call_once(|| console::set_sink(Arc::new(|s: &str| eprint!("{}", s))));

    let platform = HostPlatform::new();
    let fs = Arc::new(RamFs::new());
    let swap = Arc::new(RamDisk::with_slots(swap_slots));
    let kernel = Kernel::boot(
        config,
        platform.clone(),
        fs.clone(),
        Arc::new(ElfLoader),
        swap,
    )
    .expect("boot failed");
    platform.attach(&kernel);
    TestKernel {
        kernel,
        platform,
        fs,
    }
}

pub fn boot_default() -> TestKernel {
    boot(KernelConfig::default())
}

/// 模拟 `n` 次时钟中断
pub fn ticks(kernel: &Kernel, n: usize) {
    for _ in 0..n {
        kernel.timer_interrupt();
    }
}

/// 从用户内存读取以 NUL 结尾的字符串
pub fn read_user_str(kernel: &Kernel, mut va: usize) -> String {
    let mut bytes = Vec::new();
    loop {
        let mut byte = [0u8; 1];
        kernel.user_read(VirtAddr(va), &mut byte);
        if byte[0] == 0 {
            break;
        }
        bytes.push(byte[0]);
        va += 1;
    }
    String::from_utf8(bytes).unwrap()
}

/// 从用户内存读取一个字
pub fn read_user_word(kernel: &Kernel, va: usize) -> usize {
    let mut word = [0u8; size_of::<usize>()];
    kernel.user_read(VirtAddr(va), &mut word);
    usize::from_le_bytes(word)
}

/// 测试中记录事件顺序
#[derive(Clone, Default)]
pub struct Trace(Arc<Mutex<Vec<String>>>);

impl Trace {
    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}
