//! # 调度器
//!
//! 单处理器调度器，支持两种互斥的策略：
//!
//! - **优先级轮转**：总是运行最高有效优先级的就绪线程，同级按时间片轮转，
//!   锁上的等待者向持有者捐赠优先级
//! - **MLFQS**：优先级由 recent_cpu 与 nice 周期性地重新计算，忽略显式设置
//!
//! ## 调度流程
//!
//! ```text
//!  yield / block / exit
//!          │
//!          ▼
//!    do_schedule(status)
//!      1. 回收上一轮死亡的线程
//!      2. 当前线程状态 ← status
//!      3. next ← 就绪队列最高优先级 / idle
//!      4. 当前线程若已死亡，放入待回收列表
//!      5. Platform::switch(cur, next)
//! ```
//!
//! 所有状态修改都在关中断时进行，`UPSafeCell` 的借用不会跨越 `switch`。

use super::fixed_point::FixedPoint;
use super::manager::{ReadyQueue, SleepQueue};
use super::mlfqs::{self, PRIORITY_INTERVAL};
use super::thread::{ThreadControlBlock, ThreadStatus};
use super::tid::{Tid, TidAllocator};
use crate::config::{
    MAX_DONATION_DEPTH, PRI_DEFAULT, PRI_MAX, PRI_MIN, SchedPolicy, TIME_SLICE, TIMER_FREQ,
};
use crate::error::ThreadError;
use crate::platform::{IntrLevel, Platform, ThreadEntry};
use crate::sync::UPSafeCell;
use alloc::collections::BTreeMap;
use alloc::format;
use alloc::sync::Arc;
use alloc::vec::Vec;
use log::{debug, trace};

/// 时钟中断统计
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TickStats {
    /// idle 线程运行时的时钟中断数
    pub idle: u64,
    /// 内核线程运行时的时钟中断数
    pub kernel: u64,
    /// 用户进程运行时的时钟中断数
    pub user: u64,
}

pub struct Scheduler {
    platform: Arc<dyn Platform>,
    policy: SchedPolicy,
    inner: UPSafeCell<SchedulerInner>,
}

struct SchedulerInner {
    current: Option<Arc<ThreadControlBlock>>,
    idle: Option<Arc<ThreadControlBlock>>,
    /// 启动线程，永不回收
    initial: Option<Tid>,
    ready: ReadyQueue,
    sleeping: SleepQueue,
    /// 所有未死亡的线程
    all: BTreeMap<Tid, Arc<ThreadControlBlock>>,
    /// 已经死亡、等待下一次调度时回收的线程
    destruction: Vec<Arc<ThreadControlBlock>>,
    tids: TidAllocator,
    ticks: u64,
    /// 当前线程已经使用的时间片
    slice_ticks: usize,
    in_interrupt: bool,
    yield_on_return: bool,
    load_avg: FixedPoint,
    stats: TickStats,
}

impl SchedulerInner {
    fn is_idle(&self, thread: &Arc<ThreadControlBlock>) -> bool {
        self.idle.as_ref().is_some_and(|idle| idle.tid == thread.tid)
    }
}

impl Scheduler {
    pub fn new(platform: Arc<dyn Platform>, policy: SchedPolicy) -> Self {
        Self {
            platform,
            policy,
            inner: unsafe {
                UPSafeCell::new(SchedulerInner {
                    current: None,
                    idle: None,
                    initial: None,
                    ready: ReadyQueue::new(),
                    sleeping: SleepQueue::new(),
                    all: BTreeMap::new(),
                    destruction: Vec::new(),
                    tids: TidAllocator::new(),
                    ticks: 0,
                    slice_ticks: 0,
                    in_interrupt: false,
                    yield_on_return: false,
                    load_avg: FixedPoint::ZERO,
                    stats: TickStats::default(),
                })
            },
        }
    }

    pub fn mlfqs(&self) -> bool {
        self.policy == SchedPolicy::Mlfqs
    }

    pub fn intr_disable(&self) -> IntrLevel {
        self.platform.intr_disable()
    }

    pub fn intr_enable(&self) -> IntrLevel {
        self.platform.intr_enable()
    }

    pub fn intr_set(&self, level: IntrLevel) -> IntrLevel {
        self.platform.intr_set(level)
    }

    /// 把正在执行启动代码的上下文登记为启动线程
    pub fn adopt_initial(&self, name: &str) -> Result<Arc<ThreadControlBlock>, ThreadError> {
        let mut inner = self.inner.exclusive_access();
        let tid = inner.tids.alloc()?;
        let thread = Arc::new(ThreadControlBlock::new(tid, name, PRI_DEFAULT));
        thread.inner_exclusive_access().status = ThreadStatus::Running;
        inner.all.insert(tid, thread.clone());
        inner.current = Some(thread.clone());
        inner.initial = Some(tid);
        Ok(thread)
    }

    /// 创建线程，新线程处于阻塞状态
    ///
    /// MLFQS 下新线程继承创建者的 nice 与 recent_cpu，优先级由公式计算。
    pub fn create(
        &self,
        name: &str,
        priority: usize,
        entry: ThreadEntry,
    ) -> Result<Arc<ThreadControlBlock>, ThreadError> {
        if priority > PRI_MAX {
            return Err(ThreadError::BadPriority(priority));
        }
        let thread = {
            let mut inner = self.inner.exclusive_access();
            let tid = inner.tids.alloc()?;
            let thread = Arc::new(ThreadControlBlock::new(tid, name, priority));
            if self.mlfqs() {
                if let Some(parent) = inner.current.as_ref() {
                    let (nice, recent_cpu) = {
                        let parent = parent.inner_exclusive_access();
                        (parent.nice, parent.recent_cpu)
                    };
                    let mut child = thread.inner_exclusive_access();
                    child.nice = nice;
                    child.recent_cpu = recent_cpu;
                    child.priority = mlfqs::priority(recent_cpu, nice);
                    child.base_priority = child.priority;
                }
            }
            inner.all.insert(tid, thread.clone());
            thread
        };
        self.platform.spawn(thread.tid, entry);
        debug!("create thread {} ({})", thread.tid, thread.name);
        Ok(thread)
    }

    /// 创建 idle 线程，只在没有其它就绪线程时运行
    pub fn create_idle(&self, entry: ThreadEntry) -> Result<Arc<ThreadControlBlock>, ThreadError> {
        let thread = {
            let mut inner = self.inner.exclusive_access();
            let tid = inner.tids.alloc()?;
            let thread = Arc::new(ThreadControlBlock::new(tid, "idle", PRI_MIN));
            inner.idle = Some(thread.clone());
            thread
        };
        self.platform.spawn(thread.tid, entry);
        Ok(thread)
    }

    /// 当前运行的线程
    ///
    /// ## Panics
    ///
    /// 控制块魔数被破坏或状态不是 Running 时 panic
    pub fn current(&self) -> Arc<ThreadControlBlock> {
        let current = self.inner.exclusive_access().current.clone();
        let Some(thread) = current else {
            panic!("no running thread");
        };
        assert!(thread.is_intact(), "thread {} is corrupted", thread.tid);
        assert_eq!(thread.status(), ThreadStatus::Running);
        thread
    }

    pub fn current_tid(&self) -> Tid {
        self.current().tid
    }

    pub fn is_idle(&self, thread: &Arc<ThreadControlBlock>) -> bool {
        self.inner.with(|inner| inner.is_idle(thread))
    }

    /// 按线程号查找未死亡的线程
    pub fn find(&self, tid: Tid) -> Option<Arc<ThreadControlBlock>> {
        self.inner.with(|inner| inner.all.get(&tid).cloned())
    }

    pub fn thread_count(&self) -> usize {
        self.inner.with(|inner| inner.all.len())
    }

    pub fn ready_count(&self) -> usize {
        self.inner.with(|inner| inner.ready.len())
    }

    /// 阻塞当前线程，直到被 [`Scheduler::unblock`] 或 [`Scheduler::wake`]
    ///
    /// ## Panics
    ///
    /// 中断未关闭时 panic
    pub fn block_current(&self) {
        assert_eq!(self.platform.intr_get(), IntrLevel::Off);
        self.do_schedule(ThreadStatus::Blocked);
    }

    /// 把阻塞线程放入就绪队列，不抢占当前线程
    pub fn unblock(&self, thread: &Arc<ThreadControlBlock>) {
        let old = self.intr_disable();
        {
            let mut inner = self.inner.exclusive_access();
            let priority = {
                let mut t = thread.inner_exclusive_access();
                assert_eq!(t.status, ThreadStatus::Blocked);
                t.status = ThreadStatus::Ready;
                t.priority
            };
            inner.ready.add(thread.clone(), priority);
        }
        self.intr_set(old);
    }

    /// 唤醒阻塞线程
    ///
    /// 被唤醒的线程优先级高于当前线程时立即切换过去（当前线程排回同级队首）；
    /// 在中断上下文中则推迟到中断返回时让出。
    pub fn wake(&self, thread: &Arc<ThreadControlBlock>) {
        let old = self.intr_disable();
        let preempt = {
            let mut inner = self.inner.exclusive_access();
            let priority = {
                let mut t = thread.inner_exclusive_access();
                assert_eq!(t.status, ThreadStatus::Blocked);
                t.status = ThreadStatus::Ready;
                t.priority
            };
            let Some(current) = inner.current.clone() else {
                panic!("no running thread");
            };
            let cur_idle = inner.is_idle(&current);
            let outranks = cur_idle || priority > current.priority();
            if inner.in_interrupt || !outranks {
                inner.ready.add(thread.clone(), priority);
                if outranks {
                    inner.yield_on_return = true;
                }
                false
            } else {
                if !cur_idle {
                    let cur_priority = current.priority();
                    inner.ready.push_front(current, cur_priority);
                }
                inner.ready.push_front(thread.clone(), priority);
                true
            }
        };
        if preempt {
            self.do_schedule(ThreadStatus::Ready);
        }
        self.intr_set(old);
    }

    /// 让出处理器，当前线程排到同级队尾
    pub fn yield_now(&self) {
        let old = self.intr_disable();
        {
            let mut inner = self.inner.exclusive_access();
            if let Some(current) = inner.current.clone() {
                if !inner.is_idle(&current) {
                    let priority = current.priority();
                    inner.ready.add(current, priority);
                }
            }
        }
        self.do_schedule(ThreadStatus::Ready);
        self.intr_set(old);
    }

    /// 就绪队列中有更高优先级的线程时让出处理器
    pub fn yield_if_outranked(&self) {
        let old = self.intr_disable();
        let outranked = {
            let mut inner = self.inner.exclusive_access();
            let current = inner.current.clone();
            let outranked = match (inner.ready.max_priority(), current) {
                (Some(max), Some(current)) => inner.is_idle(&current) || max > current.priority(),
                _ => false,
            };
            if outranked && inner.in_interrupt {
                inner.yield_on_return = true;
                false
            } else {
                outranked
            }
        };
        if outranked {
            self.yield_now();
        }
        self.intr_set(old);
    }

    /// 结束当前线程，永不返回
    pub fn exit_current(&self) -> ! {
        self.intr_disable();
        self.do_schedule(ThreadStatus::Dying);
        unreachable!("dying thread was scheduled again");
    }

    /// 睡眠 `ticks` 个时钟中断
    pub fn sleep(&self, ticks: u64) {
        if ticks == 0 {
            return;
        }
        let deadline = self.ticks() + ticks;
        self.sleep_until(deadline);
    }

    /// 睡眠到时钟中断计数达到 `deadline`
    pub fn sleep_until(&self, deadline: u64) {
        let old = self.intr_disable();
        {
            let mut inner = self.inner.exclusive_access();
            if deadline <= inner.ticks {
                drop(inner);
                self.intr_set(old);
                return;
            }
            let Some(current) = inner.current.clone() else {
                panic!("no running thread");
            };
            assert!(!inner.is_idle(&current), "idle thread cannot sleep");
            current.inner_exclusive_access().wake_tick = deadline;
            inner.sleeping.insert(deadline, current);
        }
        self.block_current();
        self.intr_set(old);
    }

    pub fn ticks(&self) -> u64 {
        let old = self.intr_disable();
        let ticks = self.inner.with(|inner| inner.ticks);
        self.intr_set(old);
        ticks
    }

    /// 自 `then` 以来经过的时钟中断数
    pub fn elapsed(&self, then: u64) -> u64 {
        self.ticks() - then
    }

    pub fn stats(&self) -> TickStats {
        self.inner.with(|inner| inner.stats)
    }

    pub fn print_stats(&self) {
        let stats = self.stats();
        self.platform.console_write(&format!(
            "Thread: {} idle ticks, {} kernel ticks, {} user ticks\n",
            stats.idle, stats.kernel, stats.user
        ));
    }

    /// 时钟中断处理
    ///
    /// 在中断上下文中、关中断时调用。需要抢占时只设置标记，由中断返回路径
    /// [`Scheduler::end_interrupt`] 让出处理器。
    pub fn tick(&self) {
        let mut inner = self.inner.exclusive_access();
        let Some(current) = inner.current.clone() else {
            return;
        };
        inner.ticks += 1;
        let ticks = inner.ticks;
        let cur_idle = inner.is_idle(&current);
        if cur_idle {
            inner.stats.idle += 1;
        } else if current.inner_exclusive_access().process.space.is_some() {
            inner.stats.user += 1;
        } else {
            inner.stats.kernel += 1;
        }

        if self.mlfqs() {
            if !cur_idle {
                let mut cur = current.inner_exclusive_access();
                cur.recent_cpu = cur.recent_cpu + 1;
            }
            if ticks % TIMER_FREQ == 0 {
                let ready_threads = inner.ready.len() + usize::from(!cur_idle);
                inner.load_avg = mlfqs::next_load_avg(inner.load_avg, ready_threads);
                let load_avg = inner.load_avg;
                for thread in inner.all.values() {
                    let mut t = thread.inner_exclusive_access();
                    t.recent_cpu = mlfqs::decay_recent_cpu(t.recent_cpu, load_avg, t.nice);
                }
                trace!("load_avg {:?} with {} ready", load_avg, ready_threads);
            }
            if ticks % PRIORITY_INTERVAL == 0 {
                for thread in inner.all.values() {
                    let mut t = thread.inner_exclusive_access();
                    t.priority = mlfqs::priority(t.recent_cpu, t.nice);
                    t.base_priority = t.priority;
                }
                inner.ready.rebuild(|t| t.priority());
                if inner
                    .ready
                    .max_priority()
                    .is_some_and(|max| cur_idle || max > current.priority())
                {
                    inner.yield_on_return = true;
                }
            }
        }

        for thread in inner.sleeping.drain_expired(ticks) {
            let priority = {
                let mut t = thread.inner_exclusive_access();
                t.status = ThreadStatus::Ready;
                t.priority
            };
            if cur_idle || priority > current.priority() {
                inner.yield_on_return = true;
            }
            inner.ready.add(thread, priority);
        }

        inner.slice_ticks += 1;
        if inner.slice_ticks >= TIME_SLICE {
            inner.yield_on_return = true;
        }
    }

    /// 进入中断上下文
    pub fn begin_interrupt(&self) {
        let mut inner = self.inner.exclusive_access();
        inner.in_interrupt = true;
        inner.yield_on_return = false;
    }

    /// 离开中断上下文，返回是否需要让出处理器
    pub fn end_interrupt(&self) -> bool {
        let mut inner = self.inner.exclusive_access();
        inner.in_interrupt = false;
        core::mem::take(&mut inner.yield_on_return)
    }

    /// 沿锁链传递当前线程的优先级
    ///
    /// `donor` 已经登记在持有者的捐赠者集合中；每一跳重新计算持有者的有效优先级，
    /// 持有者若在就绪队列中则移动到新的级别。最多传递 [`MAX_DONATION_DEPTH`] 跳。
    pub fn donate(&self, donor: &Arc<ThreadControlBlock>) {
        let mut donor = donor.clone();
        for _ in 0..MAX_DONATION_DEPTH {
            let lock = donor.inner_exclusive_access().waiting_on.clone();
            let Some(holder) = lock.and_then(|lock| lock.holder()) else {
                break;
            };
            let (status, priority) = {
                let mut h = holder.inner_exclusive_access();
                h.refresh_priority();
                (h.status, h.priority)
            };
            if status == ThreadStatus::Ready {
                self.inner
                    .exclusive_access()
                    .ready
                    .reposition(holder.tid, priority);
            }
            trace!("donate to {} -> priority {}", holder.tid, priority);
            donor = holder;
        }
    }

    /// 设置当前线程的原始优先级，MLFQS 下忽略
    pub fn set_priority(&self, priority: usize) {
        if self.mlfqs() {
            return;
        }
        let old = self.intr_disable();
        {
            let current = self.current();
            let mut cur = current.inner_exclusive_access();
            cur.base_priority = priority.clamp(PRI_MIN, PRI_MAX);
            cur.refresh_priority();
        }
        self.yield_if_outranked();
        self.intr_set(old);
    }

    pub fn get_priority(&self) -> usize {
        self.current().priority()
    }

    /// 设置当前线程的 nice 值并重新计算它的优先级
    pub fn set_nice(&self, nice: i32) {
        let old = self.intr_disable();
        {
            let current = self.current();
            let mut cur = current.inner_exclusive_access();
            cur.nice = mlfqs::clamp_nice(nice);
            if self.mlfqs() {
                cur.priority = mlfqs::priority(cur.recent_cpu, cur.nice);
                cur.base_priority = cur.priority;
            }
        }
        self.yield_if_outranked();
        self.intr_set(old);
    }

    pub fn get_nice(&self) -> i32 {
        self.current().inner_exclusive_access().nice
    }

    /// 100 倍系统负载，四舍五入
    pub fn get_load_avg(&self) -> i32 {
        let old = self.intr_disable();
        let load_avg = self.inner.with(|inner| inner.load_avg);
        self.intr_set(old);
        (load_avg * 100).round()
    }

    /// 当前线程 100 倍的 recent_cpu，四舍五入
    pub fn get_recent_cpu(&self) -> i32 {
        (self.current().inner_exclusive_access().recent_cpu * 100).round()
    }

    /// 调度：把当前线程置为 `status` 并切换到下一个线程
    fn do_schedule(&self, status: ThreadStatus) {
        assert_eq!(self.platform.intr_get(), IntrLevel::Off);
        let reclaimed = core::mem::take(&mut self.inner.exclusive_access().destruction);
        for thread in reclaimed.iter() {
            self.platform.reclaim(thread.tid);
            trace!("reclaim thread {}", thread.tid);
        }
        drop(reclaimed);

        let (prev, next) = {
            let mut inner = self.inner.exclusive_access();
            let Some(prev) = inner.current.take() else {
                panic!("no running thread");
            };
            prev.inner_exclusive_access().status = status;
            let next = match inner.ready.fetch().or_else(|| inner.idle.clone()) {
                Some(next) => next,
                None if status == ThreadStatus::Ready => prev.clone(),
                None => panic!("no thread to run"),
            };
            next.inner_exclusive_access().status = ThreadStatus::Running;
            inner.current = Some(next.clone());
            inner.slice_ticks = 0;
            if status == ThreadStatus::Dying {
                inner.all.remove(&prev.tid);
                if inner.initial != Some(prev.tid) {
                    inner.destruction.push(prev.clone());
                }
            }
            (prev.tid, next.tid)
        };
        if prev != next {
            trace!("switch {} -> {}", prev, next);
            self.platform.switch(prev, next);
        }
    }
}
