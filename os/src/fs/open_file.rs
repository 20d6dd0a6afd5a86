//! # 打开的文件
//!
//! 文件描述符指向的对象：底层文件句柄 + 当前读写位置 + 是否禁止了写入。
//!
//! ```text
//! fd 2 ──► OpenFile { pos: 120, denied: false } ──► Arc<dyn File> (inode)
//! fd 3 ──► OpenFile { pos: 0,   denied: true  } ──┘
//! ```
//!
//! 正在运行的可执行文件以 `denied = true` 打开，`OpenFile` 被丢弃时自动恢复写入。

use super::File;
use crate::sync::UPSafeCell;
use alloc::sync::Arc;

pub struct OpenFile {
    file: Arc<dyn File>,
    inner: UPSafeCell<OpenFileInner>,
}

struct OpenFileInner {
    pos: usize,
    denied: bool,
}

impl OpenFile {
    pub fn new(file: Arc<dyn File>) -> Self {
        Self {
            file,
            inner: unsafe {
                UPSafeCell::new(OpenFileInner {
                    pos: 0,
                    denied: false,
                })
            },
        }
    }

    /// 从当前位置读取，位置前移实际读取的字节数
    pub fn read(&self, buf: &mut [u8]) -> usize {
        let mut inner = self.inner.exclusive_access();
        let n = self.file.read_at(inner.pos, buf);
        inner.pos += n;
        n
    }

    /// 在当前位置写入，位置前移实际写入的字节数
    pub fn write(&self, buf: &[u8]) -> usize {
        let mut inner = self.inner.exclusive_access();
        let n = self.file.write_at(inner.pos, buf);
        inner.pos += n;
        n
    }

    /// 设置读写位置，允许超过文件末尾
    pub fn seek(&self, pos: usize) {
        self.inner.exclusive_access().pos = pos;
    }

    pub fn tell(&self) -> usize {
        self.inner.exclusive_access().pos
    }

    pub fn length(&self) -> usize {
        self.file.length()
    }

    /// 禁止写入底层文件，直到本对象被丢弃
    pub fn deny_write(&self) {
        let mut inner = self.inner.exclusive_access();
        if !inner.denied {
            inner.denied = true;
            self.file.deny_write();
        }
    }

    /// 复制：重新打开底层文件，保留读写位置和禁止写入状态
    pub fn duplicate(&self) -> Option<OpenFile> {
        let (pos, denied) = {
            let inner = self.inner.exclusive_access();
            (inner.pos, inner.denied)
        };
        let copy = OpenFile::new(self.file.reopen()?);
        copy.seek(pos);
        if denied {
            copy.deny_write();
        }
        Some(copy)
    }

    pub fn file(&self) -> &Arc<dyn File> {
        &self.file
    }
}

impl Drop for OpenFile {
    fn drop(&mut self) {
        if self.inner.exclusive_access().denied {
            self.file.allow_write();
        }
    }
}
