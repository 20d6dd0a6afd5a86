//! # 多级反馈队列调度公式
//!
//! ```text
//! load_avg   = (59/60)·load_avg + (1/60)·ready_threads          每秒
//! recent_cpu = (2·load_avg)/(2·load_avg + 1)·recent_cpu + nice  每秒
//! recent_cpu = recent_cpu + 1                                   每个时钟中断（运行线程）
//! priority   = PRI_MAX − recent_cpu/4 − 2·nice                  每 4 个时钟中断
//! ```
//!
//! 这里只有纯函数，遍历线程与重新排队由调度器完成。

use super::fixed_point::FixedPoint;
use crate::config::{NICE_MAX, NICE_MIN, PRI_MAX, PRI_MIN};

/// 重新计算优先级的间隔（时钟中断数）
pub const PRIORITY_INTERVAL: u64 = 4;

/// 由 recent_cpu 与 nice 计算优先级，结果限制在 [PRI_MIN, PRI_MAX]
pub fn priority(recent_cpu: FixedPoint, nice: i32) -> usize {
    let pri = FixedPoint::from_int(PRI_MAX as i32) - recent_cpu / 4 - nice * 2;
    pri.trunc().clamp(PRI_MIN as i32, PRI_MAX as i32) as usize
}

/// 系统负载的指数滑动平均
pub fn next_load_avg(load_avg: FixedPoint, ready_threads: usize) -> FixedPoint {
    FixedPoint::ratio(59, 60) * load_avg + FixedPoint::ratio(1, 60) * ready_threads as i32
}

/// 每秒一次的 recent_cpu 衰减
pub fn decay_recent_cpu(recent_cpu: FixedPoint, load_avg: FixedPoint, nice: i32) -> FixedPoint {
    let twice = load_avg * 2;
    (twice / (twice + 1)) * recent_cpu + nice
}

pub fn clamp_nice(nice: i32) -> i32 {
    nice.clamp(NICE_MIN, NICE_MAX)
}
