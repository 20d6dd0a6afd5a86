//! # 控制台输出模块
//!
//! 提供 `print!` 和 `println!` 宏。实际的字符输出由平台层通过
//! [`set_sink`] 注册的回调完成；未注册时输出被丢弃。
//!
//! ## 使用示例
//!
//! ```ignore
//! console::set_sink(|s| uart_write(s));
//! println!("{}: exit({})", name, status);
//! ```

use alloc::sync::Arc;
use core::fmt::{self, Write};
use lazy_static::lazy_static;
use spin::Mutex;

/// 控制台输出回调
pub type ConsoleSink = Arc<dyn Fn(&str) + Send + Sync>;

lazy_static! {
    static ref SINK: Mutex<Option<ConsoleSink>> = Mutex::new(None);
}

/// 注册控制台输出回调，替换之前的回调
pub fn set_sink(sink: ConsoleSink) {
    *SINK.lock() = Some(sink);
}

/// 标准输出
///
/// 持有回调的一份拷贝，避免在格式化期间一直持有全局锁。
struct Stdout(Option<ConsoleSink>);

impl Write for Stdout {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        if let Some(sink) = &self.0 {
            sink(s);
        }
        Ok(())
    }
}

/// 格式化输出函数，`print!` 和 `println!` 的底层实现
pub fn print(args: fmt::Arguments) {
    let sink = SINK.lock().clone();
    // Stdout 的写入不会失败
    let _ = Stdout(sink).write_fmt(args);
}

/// 格式化打印宏（不换行）
#[macro_export]
macro_rules! print {
    ($fmt: literal $(, $($arg: tt)+)?) => {
        $crate::console::print(format_args!($fmt $(, $($arg)+)?))
    }
}

/// 格式化打印宏（带换行）
#[macro_export]
macro_rules! println {
    ($fmt: literal $(, $($arg: tt)+)?) => {
        $crate::console::print(format_args!(concat!($fmt, "\n") $(, $($arg)+)?))
    }
}
