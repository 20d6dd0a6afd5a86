//! # 日志系统模块
//!
//! 为 `log` crate 提供后端 [`SimpleLogger`]，将日志经 [`crate::console`] 输出。
//!
//! ## 日志格式
//!
//! ```text
//! LEVEL [T0001] [module::name] [file.rs:42] message
//! ```
//!
//! ## 颜色方案
//!
//! - **ERROR**: 红色 (31)
//! - **WARN**: 亮黄色 (93)
//! - **INFO**: 蓝色 (34)
//! - **DEBUG**: 绿色 (32)
//! - **TRACE**: 暗灰色 (90)

use core::sync::atomic::{AtomicUsize, Ordering};
use log::{Level, LevelFilter, Log, Metadata, Record};


/// 简单日志实现，级别过滤交给 `log::max_level`
struct SimpleLogger;

impl Log for SimpleLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let color = match record.level() {
            Level::Error => 31,
            Level::Warn => 93,
            Level::Info => 34,
            Level::Debug => 32,
            Level::Trace => 90,
        };
        let file = record
            .file()
            .map(|f| f.rsplit('/').next().unwrap_or(f))
            .unwrap_or("unknown");
        println!(
            "\u{1B}[{}m{:>5} [T{:>4}] [{}] [{}:{}] {}\u{1B}[0m",
            color,
            record.level(),
            timestamp(),
            record.target(),
            file,
            record.line().unwrap_or(0),
            record.args()
        );
    }

    fn flush(&self) {}
}

/// 日志序号，用于标识日志的先后顺序
static SEQUENCE: AtomicUsize = AtomicUsize::new(0);

fn timestamp() -> usize {
    SEQUENCE.fetch_add(1, Ordering::Relaxed) + 1
}

/// 初始化日志系统
///
/// 重复调用只会更新日志级别；`set_logger` 只在第一次调用时成功。
pub fn init(level: LevelFilter) {
    static LOGGER: SimpleLogger = SimpleLogger;

    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}
