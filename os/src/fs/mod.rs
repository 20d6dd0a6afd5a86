//! # 文件接口
//!
//! 文件系统本身不属于内核核心，内核只通过下面两个 trait 使用它：
//!
//! - [`File`] - 一个打开的 inode，按偏移量读写，可以被独立地重新打开
//! - [`FileSystem`] - 按名字打开、创建、删除文件
//!
//! [`OpenFile`] 在 [`File`] 之上维护读写位置和禁止写入标志，是文件描述符表中的表项。

mod open_file;
mod ram;

pub use open_file::OpenFile;
pub use ram::{RamFile, RamFs};

use alloc::sync::Arc;

pub trait File: Send + Sync {
    /// 从 `offset` 读入 `buf`，返回实际读取的字节数
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize;
    /// 从 `offset` 写入 `buf`，返回实际写入的字节数；文件被禁止写入时返回 0
    fn write_at(&self, offset: usize, buf: &[u8]) -> usize;
    fn length(&self) -> usize;
    /// 重新打开同一个文件，得到独立的句柄
    fn reopen(&self) -> Option<Arc<dyn File>>;
    fn deny_write(&self);
    fn allow_write(&self);
}

pub trait FileSystem: Send + Sync {
    fn open(&self, name: &str) -> Option<Arc<dyn File>>;
    fn create(&self, name: &str, size: usize) -> bool;
    fn remove(&self, name: &str) -> bool;
}
