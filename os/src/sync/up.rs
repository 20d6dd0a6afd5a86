//! # 单处理器安全单元
//!
//! 内核全局状态都放在 [`UPSafeCell`] 中。调度器、页帧表这类数据只在关中断时
//! 访问，借用必须在下一次 `switch` 之前结束。

use core::cell::{RefCell, RefMut};

/// 单处理器安全单元
///
/// ## Safety
///
/// 该结构体实现了 `Sync`，调用者需保证：
/// - 访问期间中断已关闭
/// - 借用不跨越上下文切换
pub struct UPSafeCell<T> {
    inner: RefCell<T>,
}

unsafe impl<T> Sync for UPSafeCell<T> {}

impl<T> UPSafeCell<T> {
    /// ## Safety
    ///
    /// 只能在单处理器内核中使用，见类型文档
    pub unsafe fn new(value: T) -> Self {
        Self {
            inner: RefCell::new(value),
        }
    }

    /// 获取独占可变引用
    ///
    /// ## Panics
    ///
    /// 已被借用时 panic，说明某条路径在持有借用时发生了重入
    pub fn exclusive_access(&self) -> RefMut<'_, T> {
        match self.inner.try_borrow_mut() {
            Ok(guard) => guard,
            Err(_) => panic!(
                "UPSafeCell<{}> re-entered while borrowed",
                core::any::type_name::<T>()
            ),
        }
    }

    /// 在一次借用内执行 `f`，返回后借用即释放
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.exclusive_access())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_releases_the_borrow() {
        let cell = unsafe { UPSafeCell::new(1u32) };
        let after = cell.with(|v| {
            *v += 1;
            *v
        });
        assert_eq!(after, 2);
        *cell.exclusive_access() += 1;
        assert_eq!(cell.with(|v| *v), 3);
    }

    #[test]
    #[should_panic(expected = "re-entered")]
    fn nested_access_panics() {
        let cell = unsafe { UPSafeCell::new(0u8) };
        let _outer = cell.exclusive_access();
        cell.with(|_| ());
    }
}
