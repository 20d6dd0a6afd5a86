//! # 内存文件系统
//!
//! 所有文件内容保存在内存中的简单文件系统，供宿主机测试和演示使用。
//! 文件在创建时确定大小，写入不会扩展文件。
//!
//! 同一个名字多次打开得到共享同一个 inode 的不同句柄；禁止写入计数记录在 inode 上，
//! 因此通过任何句柄禁止写入都会影响所有句柄。

use super::{File, FileSystem};
use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;
use spin::Mutex;

struct Inode {
    data: Mutex<Vec<u8>>,
    deny_write_cnt: Mutex<usize>,
}

pub struct RamFile {
    inode: Arc<Inode>,
}

impl File for RamFile {
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> usize {
        let data = self.inode.data.lock();
        if offset >= data.len() {
            return 0;
        }
        let n = buf.len().min(data.len() - offset);
        buf[..n].copy_from_slice(&data[offset..offset + n]);
        n
    }

    fn write_at(&self, offset: usize, buf: &[u8]) -> usize {
        if *self.inode.deny_write_cnt.lock() > 0 {
            return 0;
        }
        let mut data = self.inode.data.lock();
        if offset >= data.len() {
            return 0;
        }
        let n = buf.len().min(data.len() - offset);
        data[offset..offset + n].copy_from_slice(&buf[..n]);
        n
    }

    fn length(&self) -> usize {
        self.inode.data.lock().len()
    }

    fn reopen(&self) -> Option<Arc<dyn File>> {
        Some(Arc::new(RamFile {
            inode: self.inode.clone(),
        }))
    }

    fn deny_write(&self) {
        *self.inode.deny_write_cnt.lock() += 1;
    }

    fn allow_write(&self) {
        let mut cnt = self.inode.deny_write_cnt.lock();
        assert!(*cnt > 0, "allow_write without deny_write");
        *cnt -= 1;
    }
}

#[derive(Default)]
pub struct RamFs {
    files: Mutex<BTreeMap<String, Arc<Inode>>>,
}

impl RamFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以给定内容创建（或覆盖）文件
    pub fn insert(&self, name: &str, content: &[u8]) {
        self.files.lock().insert(
            String::from(name),
            Arc::new(Inode {
                data: Mutex::new(content.to_vec()),
                deny_write_cnt: Mutex::new(0),
            }),
        );
    }

    /// 读出文件的全部内容
    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        self.files
            .lock()
            .get(name)
            .map(|inode| inode.data.lock().clone())
    }
}

impl FileSystem for RamFs {
    fn open(&self, name: &str) -> Option<Arc<dyn File>> {
        let inode = self.files.lock().get(name)?.clone();
        Some(Arc::new(RamFile { inode }))
    }

    fn create(&self, name: &str, size: usize) -> bool {
        if name.is_empty() || self.files.lock().contains_key(name) {
            return false;
        }
        self.insert(name, &vec![0u8; size]);
        true
    }

    fn remove(&self, name: &str) -> bool {
        self.files.lock().remove(name).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::OpenFile;

    #[test]
    fn read_write_within_length() {
        let fs = RamFs::new();
        assert!(fs.create("a", 8));
        assert!(!fs.create("a", 8));
        let file = fs.open("a").unwrap();
        assert_eq!(file.write_at(6, b"xyz"), 2);
        let mut buf = [0u8; 8];
        assert_eq!(file.read_at(0, &mut buf), 8);
        assert_eq!(&buf[6..], b"xy");
        assert_eq!(file.read_at(8, &mut buf), 0);
    }

    #[test]
    fn deny_write_is_shared_by_handles() {
        let fs = RamFs::new();
        fs.insert("prog", b"hello");
        let exe = OpenFile::new(fs.open("prog").unwrap());
        exe.deny_write();
        let other = fs.open("prog").unwrap();
        assert_eq!(other.write_at(0, b"j"), 0);
        drop(exe);
        assert_eq!(other.write_at(0, b"j"), 1);
        assert_eq!(fs.contents("prog").unwrap(), b"jello");
    }

    #[test]
    fn open_file_position_and_duplicate() {
        let fs = RamFs::new();
        fs.insert("f", b"abcdef");
        let file = OpenFile::new(fs.open("f").unwrap());
        let mut buf = [0u8; 2];
        assert_eq!(file.read(&mut buf), 2);
        assert_eq!(file.tell(), 2);
        let dup = file.duplicate().unwrap();
        assert_eq!(dup.read(&mut buf), 2);
        assert_eq!(&buf, b"cd");
        assert_eq!(file.tell(), 2);
        file.seek(100);
        assert_eq!(file.read(&mut buf), 0);
        assert_eq!(file.length(), 6);
    }

    #[test]
    fn removed_file_stays_readable_through_open_handles() {
        let fs = RamFs::new();
        fs.insert("gone", b"data");
        let file = fs.open("gone").unwrap();
        assert!(fs.remove("gone"));
        assert!(fs.open("gone").is_none());
        let mut buf = [0u8; 4];
        assert_eq!(file.read_at(0, &mut buf), 4);
    }
}
