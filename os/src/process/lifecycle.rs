//! # fork / exec / wait / exit

use super::args;
use crate::Kernel;
use crate::config::{PRI_DEFAULT, USER_STACK};
use crate::error::{FaultError, LoadError, ProcessError};
use crate::fs::{File, OpenFile};
use crate::loader::ExecImage;
use crate::mm::{Backing, LoadAux, SpaceId, UninitPage, VirtAddr};
use crate::task::{ThreadControlBlock, Tid};
use crate::trap::TrapContext;
use alloc::boxed::Box;
use alloc::format;
use alloc::string::String;
use alloc::sync::Arc;
use core::convert::Infallible;
use log::{debug, warn};

impl Kernel {
    /// 创建执行 `cmdline` 的用户进程，登记为当前线程的子进程
    ///
    /// 新进程装载失败时以 −1 退出，父进程通过 [`Kernel::wait`] 得知。
    pub fn process_execute(self: &Arc<Self>, cmdline: &str) -> Result<Tid, ProcessError> {
        let name = args::split_args(cmdline)
            .first()
            .map(|name| String::from(*name))
            .ok_or_else(|| ProcessError::NotFound(String::new()))?;
        let cmdline = String::from(cmdline);
        let kernel = self.clone();
        let child = self.sched.create(
            &name,
            PRI_DEFAULT,
            Box::new(move || {
                kernel.sched.intr_enable();
                let Err(err) = kernel.exec(&cmdline);
                warn!("exec `{}` failed: {}", cmdline, err);
                kernel.exit(-1)
            }),
        )?;
        self.adopt_child(&child);
        self.sched.wake(&child);
        Ok(child.tid)
    }

    /// 把新建的线程登记为当前线程的子进程
    fn adopt_child(&self, child: &Arc<ThreadControlBlock>) {
        let parent = self.sched.current();
        {
            let mut inner = child.inner_exclusive_access();
            inner.process.is_user = true;
            inner.process.parent = Some(Arc::downgrade(&parent));
        }
        parent
            .inner_exclusive_access()
            .process
            .children
            .push(child.clone());
    }

    /// 复制当前进程
    ///
    /// ## Arguments
    ///
    /// * `name` - 子进程的名字
    /// * `cx` - 父进程进入内核时保存的用户寄存器
    ///
    /// ## Returns
    ///
    /// 父进程得到子进程的线程号；子进程从 `cx` 处返回用户态，`a0 = 0`。
    /// 子进程复制失败时返回 [`ProcessError::ForkFailed`]，失败的子进程自行退出。
    pub fn fork(self: &Arc<Self>, name: &str, cx: &TrapContext) -> Result<Tid, ProcessError> {
        let parent = self.sched.current();
        if parent.inner_exclusive_access().process.space.is_none() {
            return Err(ProcessError::NoAddressSpace);
        }
        let cx = *cx;
        let kernel = self.clone();
        let child = self.sched.create(
            name,
            parent.priority(),
            Box::new(move || {
                kernel.sched.intr_enable();
                kernel.fork_child(cx)
            }),
        )?;
        self.adopt_child(&child);
        self.sched.wake(&child);

        child.handshake.fork_done.down(&self.sched);
        if child.inner_exclusive_access().process.fork_ok {
            debug!("fork {} -> {}", parent.tid, child.tid);
            return Ok(child.tid);
        }
        parent
            .inner_exclusive_access()
            .process
            .children
            .retain(|c| c.tid != child.tid);
        child.handshake.reaped.up(&self.sched);
        Err(ProcessError::ForkFailed)
    }

    /// 子进程一侧的 fork：复制父进程的资源后进入用户态
    fn fork_child(&self, mut cx: TrapContext) -> ! {
        let current = self.sched.current();
        match self.duplicate_parent(&current) {
            Ok(space) => {
                current.inner_exclusive_access().process.fork_ok = true;
                current.handshake.fork_done.up(&self.sched);
                cx.set_ret(0);
                self.with_vm(|vm| vm.set_user_sp(space, cx.sp()));
                self.platform.enter_user(&cx)
            }
            Err(err) => {
                warn!("fork child {}: {}", current.tid, err);
                current.handshake.fork_done.up(&self.sched);
                self.exit(-1)
            }
        }
    }

    /// 复制父进程的地址空间、文件描述符表与可执行文件
    ///
    /// 父进程此时阻塞在 fork_done 上，它的状态不会变化。
    fn duplicate_parent(&self, child: &Arc<ThreadControlBlock>) -> Result<SpaceId, ProcessError> {
        let parent = child
            .inner_exclusive_access()
            .process
            .parent
            .as_ref()
            .and_then(|p| p.upgrade())
            .ok_or(ProcessError::ForkFailed)?;
        let (parent_space, fd_table, executable) = {
            let inner = parent.inner_exclusive_access();
            let space = inner.process.space.ok_or(ProcessError::NoAddressSpace)?;
            let fd_table = inner
                .process
                .fd_table
                .duplicate()
                .ok_or(ProcessError::ForkFailed)?;
            let executable = match &inner.process.executable {
                Some(exe) => Some(Arc::new(exe.duplicate().ok_or(ProcessError::ForkFailed)?)),
                None => None,
            };
            (space, fd_table, executable)
        };
        let space = self.with_vm(|vm| vm.duplicate_space(parent_space))?;
        let mut inner = child.inner_exclusive_access();
        inner.process.space = Some(space);
        inner.process.fd_table = fd_table;
        inner.process.executable = executable;
        Ok(space)
    }

    /// 用 `cmdline` 指定的程序替换当前进程的映像
    ///
    /// 成功时进入新程序，不返回。失败时当前进程已经没有地址空间，调用者应当退出。
    pub fn exec(&self, cmdline: &str) -> Result<Infallible, ProcessError> {
        let words = args::split_args(cmdline);
        let name = *words
            .first()
            .ok_or_else(|| ProcessError::NotFound(String::new()))?;
        let current = self.sched.current();
        let old = {
            let mut inner = current.inner_exclusive_access();
            inner.process.is_user = true;
            inner.process.executable = None;
            inner.process.space.take()
        };
        if let Some(old) = old {
            self.with_vm(|vm| vm.destroy_space(old));
        }

        let file = self
            .fs
            .open(name)
            .ok_or_else(|| ProcessError::NotFound(String::from(name)))?;
        let image = self.loader.load(&*file)?;
        let space = self.with_vm(|vm| vm.create_space());
        let cx = match self.load_image(space, &file, &image, &words) {
            Ok(cx) => cx,
            Err(err) => {
                self.with_vm(|vm| vm.destroy_space(space));
                return Err(err);
            }
        };

        let executable = OpenFile::new(file);
        executable.deny_write();
        {
            let mut inner = current.inner_exclusive_access();
            inner.process.space = Some(space);
            inner.process.executable = Some(Arc::new(executable));
        }
        debug!("exec `{}` in {}, entry {:#x}", cmdline, space, cx.sepc);
        self.platform.enter_user(&cx)
    }

    /// 登记程序段与栈，布置参数，返回进入新程序的寄存器
    fn load_image(
        &self,
        space: SpaceId,
        file: &Arc<dyn File>,
        image: &ExecImage,
        words: &[&str],
    ) -> Result<TrapContext, ProcessError> {
        for seg in image.segments.iter() {
            for page in seg.pages() {
                let aux = LoadAux {
                    file: file.reopen().ok_or(LoadError::Io)?,
                    offset: page.file_offset,
                    read_bytes: page.read_bytes,
                };
                self.with_vm(|vm| {
                    vm.alloc_page(
                        space,
                        page.va,
                        seg.writable,
                        Backing::Uninit(UninitPage::segment(aux)),
                    )
                })?;
            }
        }
        self.with_vm(|vm| vm.setup_stack(space))?;

        let layout = args::build(USER_STACK, words)
            .ok_or(LoadError::BadFormat("argument list too long"))?;
        self.with_vm(|vm| vm.copy_out(space, VirtAddr(layout.sp), &layout.image))
            .map_err(|err| match err {
                FaultError::Memory(err) => ProcessError::Memory(err),
                _ => ProcessError::NoAddressSpace,
            })?;
        self.with_vm(|vm| vm.set_user_sp(space, layout.sp));

        let mut cx = TrapContext::app_init_context(image.entry, layout.sp);
        cx.set_ret(layout.argc);
        cx.set_arg1(layout.argv);
        Ok(cx)
    }

    /// 等待子进程 `tid` 退出并返回它的退出状态
    ///
    /// 每个子进程只能被等待一次；`tid` 不是调用者尚未等待过的子进程时返回
    /// [`ProcessError::NotChild`]。
    pub fn wait(&self, tid: Tid) -> Result<i32, ProcessError> {
        let current = self.sched.current();
        let child = current
            .inner_exclusive_access()
            .process
            .children
            .iter()
            .find(|c| c.tid == tid)
            .cloned()
            .ok_or(ProcessError::NotChild)?;
        child.handshake.exited.down(&self.sched);
        let status = child.inner_exclusive_access().process.exit_status;
        current
            .inner_exclusive_access()
            .process
            .children
            .retain(|c| c.tid != tid);
        child.handshake.reaped.up(&self.sched);
        debug!("{} reaped {} with status {}", current.tid, tid, status);
        Ok(status)
    }

    /// 以 `status` 结束当前进程
    pub fn exit(&self, status: i32) -> ! {
        self.sched
            .current()
            .inner_exclusive_access()
            .process
            .exit_status = status;
        self.thread_exit()
    }

    /// 释放当前线程的进程资源，与父子进程完成退出握手
    pub(crate) fn process_exit(&self) {
        let current = self.sched.current();
        let (is_user, status, space, executable, children, has_parent) = {
            let mut inner = current.inner_exclusive_access();
            let process = &mut inner.process;
            process.fd_table.clear();
            (
                process.is_user,
                process.exit_status,
                process.space.take(),
                process.executable.take(),
                core::mem::take(&mut process.children),
                process.parent.is_some(),
            )
        };
        if is_user {
            self.platform
                .console_write(&format!("{}: exit({})\n", current.name, status));
        }
        if let Some(space) = space {
            self.with_vm(|vm| vm.destroy_space(space));
        }
        drop(executable);
        for child in children {
            child.inner_exclusive_access().process.parent = None;
            child.handshake.reaped.up(&self.sched);
        }
        current.handshake.exited.up(&self.sched);
        if has_parent {
            current.handshake.reaped.down(&self.sched);
        }
        debug!("exit {} ({}) with {}", current.tid, current.name, status);
    }
}
