//! # 文件描述符表
//!
//! fd 0 和 1 保留给控制台，不对应表项；其余描述符从 2 开始按最小可用编号分配，
//! 表项总数（含保留项）不超过 [`FD_LIMIT`]。

use crate::config::FD_LIMIT;
use crate::error::ProcessError;
use crate::fs::OpenFile;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

/// 控制台保留的描述符数
pub const RESERVED_FDS: usize = 2;

pub struct FdTable {
    files: Vec<Option<Arc<OpenFile>>>,
}

impl FdTable {
    pub fn new() -> Self {
        Self {
            files: vec![None, None],
        }
    }

    /// 分配最小的空闲描述符
    pub fn alloc(&mut self, file: Arc<OpenFile>) -> Result<usize, ProcessError> {
        if let Some(fd) = (RESERVED_FDS..self.files.len()).find(|fd| self.files[*fd].is_none()) {
            self.files[fd] = Some(file);
            return Ok(fd);
        }
        if self.files.len() >= FD_LIMIT {
            return Err(ProcessError::TooManyFiles);
        }
        self.files.push(Some(file));
        Ok(self.files.len() - 1)
    }

    pub fn get(&self, fd: usize) -> Option<Arc<OpenFile>> {
        self.files.get(fd).and_then(|f| f.clone())
    }

    /// 关闭描述符，返回被关闭的文件
    pub fn close(&mut self, fd: usize) -> Option<Arc<OpenFile>> {
        if fd < RESERVED_FDS {
            return None;
        }
        self.files.get_mut(fd).and_then(|f| f.take())
    }

    /// fork 时复制：每个打开的文件独立重新打开，保留读写位置
    pub fn duplicate(&self) -> Option<FdTable> {
        let mut files = Vec::with_capacity(self.files.len());
        for file in self.files.iter() {
            files.push(match file {
                Some(file) => Some(Arc::new(file.duplicate()?)),
                None => None,
            });
        }
        Some(FdTable { files })
    }

    /// 关闭所有描述符
    pub fn clear(&mut self) {
        self.files.truncate(RESERVED_FDS);
    }

    /// 打开的文件数
    pub fn open_count(&self) -> usize {
        self.files.iter().filter(|f| f.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{FileSystem, RamFs};

    fn open(fs: &RamFs) -> Arc<OpenFile> {
        Arc::new(OpenFile::new(fs.open("f").unwrap()))
    }

    #[test]
    fn lowest_free_fd_is_reused() {
        let fs = RamFs::new();
        fs.insert("f", b"hello");
        let mut table = FdTable::new();
        assert_eq!(table.alloc(open(&fs)), Ok(2));
        assert_eq!(table.alloc(open(&fs)), Ok(3));
        assert!(table.close(2).is_some());
        assert!(table.close(2).is_none());
        assert!(table.close(1).is_none());
        assert_eq!(table.alloc(open(&fs)), Ok(2));
        assert_eq!(table.open_count(), 2);
    }

    #[test]
    fn table_is_bounded() {
        let fs = RamFs::new();
        fs.insert("f", b"x");
        let mut table = FdTable::new();
        for fd in RESERVED_FDS..FD_LIMIT {
            assert_eq!(table.alloc(open(&fs)), Ok(fd));
        }
        assert_eq!(table.alloc(open(&fs)), Err(ProcessError::TooManyFiles));
    }

    #[test]
    fn duplicate_keeps_positions() {
        let fs = RamFs::new();
        fs.insert("f", b"abcdef");
        let mut table = FdTable::new();
        let fd = table.alloc(open(&fs)).unwrap();
        table.get(fd).unwrap().seek(3);
        let copy = table.duplicate().unwrap();
        let mut buf = [0u8; 3];
        assert_eq!(copy.get(fd).unwrap().read(&mut buf), 3);
        assert_eq!(&buf, b"def");
        assert_eq!(table.get(fd).unwrap().tell(), 3);
    }
}
