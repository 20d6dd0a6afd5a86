//! # 17.14 定点数
//!
//! MLFQS 需要的小数运算。内核不使用浮点，这里用 32 位整数的低 14 位表示小数部分：
//!
//! ```text
//!  31  30            14 13            0
//! ┌───┬────────────────┬───────────────┐
//! │ S │   整数 (17位)  │  小数 (14位)  │
//! └───┴────────────────┴───────────────┘
//! ```
//!
//! 定点数与整数相乘、相除不需要缩放；两个定点数相乘、相除时用 64 位中间值避免溢出。

use core::fmt::{self, Debug, Formatter};
use core::ops::{Add, Div, Mul, Sub};

/// 小数部分的位数
const FRACTION_BITS: u32 = 14;

/// 缩放因子 F = 2^14
const F: i32 = 1 << FRACTION_BITS;

#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct FixedPoint(i32);

impl FixedPoint {
    pub const ZERO: FixedPoint = FixedPoint(0);

    pub const fn from_int(n: i32) -> Self {
        Self(n * F)
    }

    /// 分数 `num / den`
    pub const fn ratio(num: i32, den: i32) -> Self {
        Self(((num as i64 * F as i64) / den as i64) as i32)
    }

    /// 向零取整
    pub const fn trunc(self) -> i32 {
        self.0 / F
    }

    /// 四舍五入到最近的整数
    pub const fn round(self) -> i32 {
        if self.0 >= 0 {
            (self.0 + F / 2) / F
        } else {
            (self.0 - F / 2) / F
        }
    }

    pub const fn raw(self) -> i32 {
        self.0
    }
}

impl Debug for FixedPoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "FP({}+{}/{})", self.0 / F, self.0 % F, F)
    }
}

impl Add for FixedPoint {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl Sub for FixedPoint {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl Mul for FixedPoint {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        Self(((self.0 as i64) * (rhs.0 as i64) / F as i64) as i32)
    }
}

impl Div for FixedPoint {
    type Output = Self;
    fn div(self, rhs: Self) -> Self {
        Self(((self.0 as i64) * F as i64 / rhs.0 as i64) as i32)
    }
}

impl Add<i32> for FixedPoint {
    type Output = Self;
    fn add(self, rhs: i32) -> Self {
        Self(self.0 + rhs * F)
    }
}

impl Sub<i32> for FixedPoint {
    type Output = Self;
    fn sub(self, rhs: i32) -> Self {
        Self(self.0 - rhs * F)
    }
}

impl Mul<i32> for FixedPoint {
    type Output = Self;
    fn mul(self, rhs: i32) -> Self {
        Self(self.0 * rhs)
    }
}

impl Div<i32> for FixedPoint {
    type Output = Self;
    fn div(self, rhs: i32) -> Self {
        Self(self.0 / rhs)
    }
}
