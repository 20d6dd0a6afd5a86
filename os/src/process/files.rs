//! # 文件、用户内存与 mmap 原语
//!
//! 这些是系统调用层之下的内核原语：参数已经解码，缓冲区在内核中。
//! fd 0 是控制台输入，fd 1 是控制台输出。

use super::fd_table::RESERVED_FDS;
use crate::Kernel;
use crate::error::ProcessError;
use crate::fs::OpenFile;
use crate::mm::{SpaceId, VirtAddr};
use alloc::string::String;
use alloc::sync::Arc;
use log::{trace, warn};

const STDIN: usize = 0;
const STDOUT: usize = 1;

impl Kernel {
    fn current_file(&self, fd: usize) -> Result<Arc<OpenFile>, ProcessError> {
        self.sched
            .current()
            .inner_exclusive_access()
            .process
            .fd_table
            .get(fd)
            .ok_or(ProcessError::BadFd(fd))
    }

    pub(crate) fn current_space(&self) -> Option<SpaceId> {
        self.sched.current().inner_exclusive_access().process.space
    }

    /// 打开文件，返回新的描述符
    pub fn open(&self, name: &str) -> Result<usize, ProcessError> {
        let file = self
            .fs
            .open(name)
            .ok_or_else(|| ProcessError::NotFound(String::from(name)))?;
        self.sched
            .current()
            .inner_exclusive_access()
            .process
            .fd_table
            .alloc(Arc::new(OpenFile::new(file)))
    }

    pub fn close(&self, fd: usize) -> Result<(), ProcessError> {
        self.sched
            .current()
            .inner_exclusive_access()
            .process
            .fd_table
            .close(fd)
            .map(|_| ())
            .ok_or(ProcessError::BadFd(fd))
    }

    /// 从描述符读取，返回读取的字节数；控制台没有输入
    pub fn read(&self, fd: usize, buf: &mut [u8]) -> Result<usize, ProcessError> {
        match fd {
            STDIN => Ok(0),
            STDOUT => Err(ProcessError::BadFd(fd)),
            _ => Ok(self.current_file(fd)?.read(buf)),
        }
    }

    /// 向描述符写入，返回写入的字节数；被禁止写入的文件写入 0 字节
    pub fn write(&self, fd: usize, buf: &[u8]) -> Result<usize, ProcessError> {
        match fd {
            STDOUT => {
                self.platform
                    .console_write(&String::from_utf8_lossy(buf));
                Ok(buf.len())
            }
            STDIN => Err(ProcessError::BadFd(fd)),
            _ => Ok(self.current_file(fd)?.write(buf)),
        }
    }

    pub fn seek(&self, fd: usize, pos: usize) -> Result<(), ProcessError> {
        self.current_file(fd)?.seek(pos);
        Ok(())
    }

    pub fn tell(&self, fd: usize) -> Result<usize, ProcessError> {
        Ok(self.current_file(fd)?.tell())
    }

    pub fn filesize(&self, fd: usize) -> Result<usize, ProcessError> {
        Ok(self.current_file(fd)?.length())
    }

    pub fn create(&self, name: &str, size: usize) -> bool {
        self.fs.create(name, size)
    }

    pub fn remove(&self, name: &str) -> bool {
        self.fs.remove(name)
    }

    /// 从当前进程的用户内存读取，非法访问以 −1 结束进程
    pub fn user_read(&self, va: VirtAddr, buf: &mut [u8]) {
        let Some(space) = self.current_space() else {
            self.exit(-1)
        };
        if let Err(err) = self.with_vm(|vm| vm.copy_in(space, va, buf)) {
            warn!("{}: bad read at {:#x}: {}", self.thread_name(), va.0, err);
            self.exit(-1)
        }
    }

    /// 向当前进程的用户内存写入，非法访问以 −1 结束进程
    pub fn user_write(&self, va: VirtAddr, data: &[u8]) {
        let Some(space) = self.current_space() else {
            self.exit(-1)
        };
        if let Err(err) = self.with_vm(|vm| vm.copy_out(space, va, data)) {
            warn!("{}: bad write at {:#x}: {}", self.thread_name(), va.0, err);
            self.exit(-1)
        }
    }

    /// 把 `fd` 打开的文件从 `offset` 起映射到 `addr`
    ///
    /// ## Returns
    ///
    /// 成功返回映射的起始地址；地址、长度、偏移非法，描述符是控制台或无效，
    /// 文件长度为 0，或与已有页面重叠时返回 `None`
    pub fn mmap(
        &self,
        addr: VirtAddr,
        length: usize,
        writable: bool,
        fd: usize,
        offset: usize,
    ) -> Option<VirtAddr> {
        if fd < RESERVED_FDS {
            return None;
        }
        let file = self.current_file(fd).ok()?;
        let space = self.current_space()?;
        match self.with_vm(|vm| vm.mmap(space, addr, length, writable, file.file(), offset)) {
            Ok(base) => Some(base),
            Err(err) => {
                trace!("mmap {:#x}+{:#x} refused: {}", addr.0, length, err);
                None
            }
        }
    }

    /// 解除从 `addr` 开始的映射，脏页写回文件
    pub fn munmap(&self, addr: VirtAddr) -> Result<(), ProcessError> {
        let space = self.current_space().ok_or(ProcessError::NoAddressSpace)?;
        self.with_vm(|vm| vm.munmap(space, addr))?;
        Ok(())
    }
}
