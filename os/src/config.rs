//! # 内核配置
//!
//! 定义了内核使用的编译期常量（页大小、优先级范围、时钟频率、用户地址空间布局等），
//! 以及启动时由内核命令行决定的运行期配置 [`KernelConfig`]。
//!
//! ## 命令行格式
//!
//! ```text
//! -o mlfqs -ul=64 -log=DEBUG
//! ```
//!
//! - `-o mlfqs` - 使用多级反馈队列调度器代替优先级轮转
//! - `-ul=N`    - 用户页帧池大小（页数）
//! - `-log=LV`  - 日志级别 (ERROR/WARN/INFO/DEBUG/TRACE/OFF)

use crate::error::ConfigError;
use log::LevelFilter;

/// 页面大小 (4KB)
pub const PAGE_SIZE: usize = 0x1000;

/// 页面大小的位数 (12 位)
pub const PAGE_SIZE_BITS: usize = 0xc;

/// 最低优先级
pub const PRI_MIN: usize = 0;

/// 默认优先级
pub const PRI_DEFAULT: usize = 31;

/// 最高优先级
pub const PRI_MAX: usize = 63;

/// nice 值下限
pub const NICE_MIN: i32 = -20;

/// 默认 nice 值
pub const NICE_DEFAULT: i32 = 0;

/// nice 值上限
pub const NICE_MAX: i32 = 20;

/// 每个线程的时间片长度（时钟中断次数）
pub const TIME_SLICE: usize = 4;

/// 每秒时钟中断次数
pub const TIMER_FREQ: u64 = 100;

/// 优先级捐赠沿锁链传递的最大深度
pub const MAX_DONATION_DEPTH: usize = 8;

/// 用户地址空间上界，同时也是用户栈顶
///
/// ```text
/// USER_STACK ─────────────┐  (0x4000_0000)
///   用户栈（向下增长）    │  最多 STACK_LIMIT
/// USER_STACK - STACK_LIMIT┘
///   ... mmap / 堆 ...
///   程序段 (.text/.data/.bss)
/// PAGE_SIZE               ← 最低可映射地址
/// 0                       ← 空指针页，永不映射
/// ```
pub const USER_STACK: usize = 0x4000_0000;

/// 用户栈的最大尺寸 (1MB)
pub const STACK_LIMIT: usize = 0x10_0000;

/// 栈增长判定时允许低于栈指针的字节数（一次压栈的宽度）
pub const STACK_SLACK: usize = 8;

/// 交换设备扇区大小
pub const SECTOR_SIZE: usize = 512;

/// 一个交换槽包含的扇区数
pub const SECTORS_PER_SLOT: usize = PAGE_SIZE / SECTOR_SIZE;

/// 每个进程文件描述符表的容量
pub const FD_LIMIT: usize = 130;

/// exec 命令行允许的最大参数个数
pub const MAX_ARGS: usize = 64;

/// 默认用户页帧池大小
pub const DEFAULT_USER_FRAMES: usize = 256;

/// 调度策略
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SchedPolicy {
    /// 优先级轮转 + 优先级捐赠
    RoundRobin,
    /// 多级反馈队列调度
    Mlfqs,
}

/// 运行期内核配置
#[derive(Clone, Debug)]
pub struct KernelConfig {
    pub policy: SchedPolicy,
    pub user_frames: usize,
    pub log_level: LevelFilter,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            policy: SchedPolicy::RoundRobin,
            user_frames: DEFAULT_USER_FRAMES,
            log_level: default_log_level(),
        }
    }
}

impl KernelConfig {
    /// 解析内核命令行
    ///
    /// ## Arguments
    ///
    /// * `cmdline` - 以空白分隔的选项串
    ///
    /// ## Returns
    ///
    /// 解析成功返回配置，遇到未知选项或非法取值返回 [`ConfigError`]
    pub fn from_cmdline(cmdline: &str) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let mut words = cmdline.split_whitespace();
        while let Some(word) = words.next() {
            if word == "-o" {
                match words.next() {
                    Some("mlfqs") => config.policy = SchedPolicy::Mlfqs,
                    Some(other) => return Err(ConfigError::UnknownOption(other.into())),
                    None => return Err(ConfigError::MissingValue("-o")),
                }
            } else if let Some(value) = word.strip_prefix("-ul=") {
                let frames = value
                    .parse::<usize>()
                    .map_err(|_| ConfigError::BadValue("-ul", value.into()))?;
                if frames == 0 {
                    return Err(ConfigError::BadValue("-ul", value.into()));
                }
                config.user_frames = frames;
            } else if let Some(value) = word.strip_prefix("-log=") {
                config.log_level = parse_level(value)
                    .ok_or_else(|| ConfigError::BadValue("-log", value.into()))?;
            } else {
                return Err(ConfigError::UnknownOption(word.into()));
            }
        }
        Ok(config)
    }

    pub fn with_policy(mut self, policy: SchedPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_user_frames(mut self, frames: usize) -> Self {
        self.user_frames = frames;
        self
    }

    pub fn mlfqs(&self) -> bool {
        self.policy == SchedPolicy::Mlfqs
    }
}

fn parse_level(value: &str) -> Option<LevelFilter> {
    match value {
        "OFF" => Some(LevelFilter::Off),
        "ERROR" => Some(LevelFilter::Error),
        "WARN" => Some(LevelFilter::Warn),
        "INFO" => Some(LevelFilter::Info),
        "DEBUG" => Some(LevelFilter::Debug),
        "TRACE" => Some(LevelFilter::Trace),
        _ => None,
    }
}

/// 编译期环境变量 `LOG` 决定的默认日志级别
fn default_log_level() -> LevelFilter {
    option_env!("LOG")
        .and_then(parse_level)
        .unwrap_or(LevelFilter::Info)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mlfqs_and_frames() {
        let config = KernelConfig::from_cmdline("-o mlfqs -ul=12 -log=TRACE").unwrap();
        assert_eq!(config.policy, SchedPolicy::Mlfqs);
        assert_eq!(config.user_frames, 12);
        assert_eq!(config.log_level, LevelFilter::Trace);
    }

    #[test]
    fn empty_cmdline_is_default() {
        let config = KernelConfig::from_cmdline("").unwrap();
        assert_eq!(config.policy, SchedPolicy::RoundRobin);
        assert_eq!(config.user_frames, DEFAULT_USER_FRAMES);
    }

    #[test]
    fn rejects_unknown_options() {
        assert!(matches!(
            KernelConfig::from_cmdline("-o fifo"),
            Err(ConfigError::UnknownOption(_))
        ));
        assert!(matches!(
            KernelConfig::from_cmdline("-ul=0"),
            Err(ConfigError::BadValue("-ul", _))
        ));
        assert!(matches!(
            KernelConfig::from_cmdline("-o"),
            Err(ConfigError::MissingValue("-o"))
        ));
        assert!(KernelConfig::from_cmdline("-q").is_err());
    }
}
