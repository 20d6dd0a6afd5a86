//! # 错误类型
//!
//! 内核各子系统向调用者报告的可恢复错误。用户态程序引起的错误从不 panic，
//! 而是沿调用链返回；只有内核不变式被破坏时才会 panic。

use alloc::string::String;
use core::fmt::{self, Display, Formatter};

/// 内核命令行解析错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    UnknownOption(String),
    MissingValue(&'static str),
    BadValue(&'static str, String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::UnknownOption(opt) => write!(f, "unknown option `{}`", opt),
            ConfigError::MissingValue(opt) => write!(f, "option `{}` needs a value", opt),
            ConfigError::BadValue(opt, value) => {
                write!(f, "bad value `{}` for option `{}`", value, opt)
            }
        }
    }
}

/// 线程创建错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadError {
    /// 线程号耗尽
    TidExhausted,
    /// 优先级超出 [PRI_MIN, PRI_MAX]
    BadPriority(usize),
}

impl Display for ThreadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ThreadError::TidExhausted => write!(f, "thread ids exhausted"),
            ThreadError::BadPriority(p) => write!(f, "priority {} out of range", p),
        }
    }
}

/// 虚拟内存管理错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// 页帧池耗尽且没有可驱逐的页帧
    OutOfFrames,
    /// 交换设备没有空闲槽位
    SwapFull,
    /// 虚拟页没有对应的页记录
    NotMapped,
    /// 虚拟页已经存在页记录
    AlreadyMapped,
    /// 地址不在用户空间或未对齐
    BadAddress,
    /// 地址空间句柄无效
    NoSuchSpace,
    /// 文件或交换设备读写失败
    Io,
}

impl Display for VmError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let msg = match self {
            VmError::OutOfFrames => "out of frames",
            VmError::SwapFull => "swap device full",
            VmError::NotMapped => "page not mapped",
            VmError::AlreadyMapped => "page already mapped",
            VmError::BadAddress => "bad user address",
            VmError::NoSuchSpace => "no such address space",
            VmError::Io => "i/o error",
        };
        f.write_str(msg)
    }
}

/// 缺页处理失败的原因，均为致命错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultError {
    /// 访问内核地址
    KernelAddress,
    /// 写只读页
    WriteProtected,
    /// 地址没有页记录且不是合法的栈增长
    Unmapped,
    /// 超出最大栈尺寸
    StackLimit,
    /// 认领页面时资源分配失败
    Memory(VmError),
}

impl Display for FaultError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            FaultError::KernelAddress => write!(f, "kernel address access"),
            FaultError::WriteProtected => write!(f, "write to read-only page"),
            FaultError::Unmapped => write!(f, "unmapped address"),
            FaultError::StackLimit => write!(f, "stack limit exceeded"),
            FaultError::Memory(err) => write!(f, "cannot claim page: {}", err),
        }
    }
}

impl From<VmError> for FaultError {
    fn from(err: VmError) -> Self {
        FaultError::Memory(err)
    }
}

/// 可执行文件装载错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// 文件格式无法识别
    BadFormat(&'static str),
    /// 段描述非法
    BadSegment(usize),
    /// 读文件失败
    Io,
}

impl Display for LoadError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::BadFormat(why) => write!(f, "bad executable: {}", why),
            LoadError::BadSegment(idx) => write!(f, "invalid segment #{}", idx),
            LoadError::Io => write!(f, "short read"),
        }
    }
}

/// 进程生命周期操作错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessError {
    /// 目标不是调用者的子进程（或已被等待过）
    NotChild,
    /// fork 的子进程报告失败
    ForkFailed,
    /// 找不到可执行文件
    NotFound(String),
    /// 可执行文件装载失败
    LoadFailed(LoadError),
    /// 文件描述符表已满
    TooManyFiles,
    /// 文件描述符无效
    BadFd(usize),
    /// 当前线程不是用户进程
    NoAddressSpace,
    /// 内存分配失败
    Memory(VmError),
    /// 线程创建失败
    Thread(ThreadError),
}

impl Display for ProcessError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ProcessError::NotChild => write!(f, "not a waitable child"),
            ProcessError::ForkFailed => write!(f, "fork failed"),
            ProcessError::NotFound(name) => write!(f, "{}: not found", name),
            ProcessError::LoadFailed(err) => write!(f, "load failed: {}", err),
            ProcessError::TooManyFiles => write!(f, "too many open files"),
            ProcessError::BadFd(fd) => write!(f, "bad file descriptor {}", fd),
            ProcessError::NoAddressSpace => write!(f, "no address space"),
            ProcessError::Memory(err) => write!(f, "{}", err),
            ProcessError::Thread(err) => write!(f, "{}", err),
        }
    }
}

impl From<VmError> for ProcessError {
    fn from(err: VmError) -> Self {
        ProcessError::Memory(err)
    }
}

impl From<LoadError> for ProcessError {
    fn from(err: LoadError) -> Self {
        ProcessError::LoadFailed(err)
    }
}

impl From<ThreadError> for ProcessError {
    fn from(err: ThreadError) -> Self {
        ProcessError::Thread(err)
    }
}
