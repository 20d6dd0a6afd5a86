//! # 地址空间与虚拟内存管理器
//!
//! [`VmManager`] 持有所有用户地址空间、共享的页帧池和交换设备。所有操作都在一次
//! 独占借用内完成，因此跨地址空间的页面置换不会引起重入。
//!
//! ## 结构
//!
//! ```text
//! VmManager
//! ├── FrameTable          页帧池（所有地址空间共享）
//! ├── SwapTable           交换槽位图
//! └── spaces: SpaceId ──► AddressSpace
//!                         ├── PageTable              已驻留页面的映射与 A/D 位
//!                         ├── SupplementalPageTable  所有页面记录
//!                         ├── Vec<MmapRegion>        内存映射区域
//!                         └── stack_floor / user_sp  栈增长判定
//! ```
//!
//! ## 缺页处理
//!
//! 1. 内核地址、已驻留页面上的缺页、写只读页面：致命
//! 2. 有页面记录：认领（分配页帧，按后备类型装入内容，建立映射）
//! 3. 无页面记录但满足栈增长条件：从栈底向下补齐零页并认领
//! 4. 其它：致命
//!
//! ## 栈增长条件
//!
//! ```text
//! USER_STACK - STACK_LIMIT <= addr < USER_STACK  并且  addr >= sp - STACK_SLACK
//! ```

use super::frame_table::{FrameOwner, FrameTable};
use super::mmap::{self, MmapRegion};
use super::page::{AnonPage, Backing, FilePage, Page, UninitPage};
use super::page_table::{PTEFlags, PageTable};
use super::spt::SupplementalPageTable;
use super::swap::{BlockDevice, SwapTable};
use super::{PhysPageNum, VirtAddr, VirtPageNum, is_kernel_vaddr, is_user_vaddr};
use crate::config::{PAGE_SIZE, STACK_LIMIT, STACK_SLACK, USER_STACK};
use crate::error::{FaultError, VmError};
use crate::fs::File;
use crate::sync::UPSafeCell;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt::{self, Display, Formatter};
use log::{debug, trace, warn};

/// 地址空间句柄
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SpaceId(pub usize);

impl Display for SpaceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "as{}", self.0)
    }
}

/// 一个用户进程的地址空间
pub struct AddressSpace {
    page_table: PageTable,
    spt: SupplementalPageTable,
    mmaps: Vec<MmapRegion>,
    /// 最低的已分配栈页，没有栈页时等于 `USER_STACK` 所在页
    stack_floor: VirtPageNum,
    /// 最近一次从用户态进入内核时的栈指针
    user_sp: usize,
}

impl AddressSpace {
    fn new() -> Self {
        Self {
            page_table: PageTable::new(),
            spt: SupplementalPageTable::new(),
            mmaps: Vec::new(),
            stack_floor: VirtAddr(USER_STACK).floor(),
            user_sp: USER_STACK,
        }
    }
}

struct VmInner {
    frames: FrameTable,
    swap: SwapTable,
    spaces: BTreeMap<SpaceId, AddressSpace>,
    next_space: usize,
}

pub struct VmManager {
    inner: UPSafeCell<VmInner>,
}

impl VmManager {
    /// ## Arguments
    ///
    /// * `frames` - 用户页帧池的页数
    /// * `swap` - 交换设备
    pub fn new(frames: usize, swap: Arc<dyn BlockDevice>) -> Self {
        Self {
            inner: unsafe {
                UPSafeCell::new(VmInner {
                    frames: FrameTable::new(frames),
                    swap: SwapTable::new(swap),
                    spaces: BTreeMap::new(),
                    next_space: 1,
                })
            },
        }
    }

    pub fn create_space(&self) -> SpaceId {
        self.inner.exclusive_access().create_space()
    }

    /// 销毁地址空间：回写并解除所有映射区域，释放页帧和交换槽
    pub fn destroy_space(&self, id: SpaceId) {
        self.inner.exclusive_access().destroy_space(id)
    }

    /// 复制地址空间（fork），失败时不留下任何部分复制的状态
    pub fn duplicate_space(&self, parent: SpaceId) -> Result<SpaceId, VmError> {
        self.inner.exclusive_access().duplicate_space(parent)
    }

    /// 在 `va` 所在页登记一个尚未驻留的页面
    pub fn alloc_page(
        &self,
        id: SpaceId,
        va: VirtAddr,
        writable: bool,
        backing: Backing,
    ) -> Result<(), VmError> {
        if !is_user_vaddr(va.0) {
            return Err(VmError::BadAddress);
        }
        let mut inner = self.inner.exclusive_access();
        let space = inner.spaces.get_mut(&id).ok_or(VmError::NoSuchSpace)?;
        space.spt.insert(Page::new(va.floor(), writable, backing))
    }

    /// 认领页面：分配页帧、装入内容、建立映射
    pub fn claim(&self, id: SpaceId, va: VirtAddr) -> Result<(), VmError> {
        self.inner.exclusive_access().claim(id, va.floor())
    }

    /// 建立初始栈：`USER_STACK - PAGE_SIZE` 处的一个零页
    pub fn setup_stack(&self, id: SpaceId) -> Result<(), VmError> {
        self.inner
            .exclusive_access()
            .grow_stack(id, VirtAddr(USER_STACK - PAGE_SIZE).floor())
    }

    /// 处理缺页
    ///
    /// ## Arguments
    ///
    /// * `addr` - 引起缺页的地址
    /// * `user` - 缺页是否发生在用户态；内核态缺页使用保存的用户栈指针
    /// * `write` - 是否为写访问
    /// * `not_present` - 页面是否不存在（否则是权限错误）
    /// * `sp` - 用户态缺页时的栈指针
    pub fn handle_fault(
        &self,
        id: SpaceId,
        addr: VirtAddr,
        user: bool,
        write: bool,
        not_present: bool,
        sp: usize,
    ) -> Result<(), FaultError> {
        self.inner
            .exclusive_access()
            .handle_fault(id, addr, user, write, not_present, sp)
    }

    /// 从用户内存 `va` 处读取 `buf.len()` 字节
    pub fn copy_in(&self, id: SpaceId, va: VirtAddr, buf: &mut [u8]) -> Result<(), FaultError> {
        let mut inner = self.inner.exclusive_access();
        let mut done = 0;
        while done < buf.len() {
            let addr = checked_add(va.0, done)?;
            let ppn = inner.access(id, addr, false)?;
            let off = VirtAddr(addr).page_offset();
            let n = (PAGE_SIZE - off).min(buf.len() - done);
            buf[done..done + n].copy_from_slice(&inner.frames.bytes(ppn)[off..off + n]);
            done += n;
        }
        Ok(())
    }

    /// 向用户内存 `va` 处写入 `data`
    pub fn copy_out(&self, id: SpaceId, va: VirtAddr, data: &[u8]) -> Result<(), FaultError> {
        let mut inner = self.inner.exclusive_access();
        let mut done = 0;
        while done < data.len() {
            let addr = checked_add(va.0, done)?;
            let ppn = inner.access(id, addr, true)?;
            let off = VirtAddr(addr).page_offset();
            let n = (PAGE_SIZE - off).min(data.len() - done);
            inner.frames.bytes_mut(ppn)[off..off + n].copy_from_slice(&data[done..done + n]);
            done += n;
        }
        Ok(())
    }

    /// 映射文件，返回映射的起始地址
    pub fn mmap(
        &self,
        id: SpaceId,
        addr: VirtAddr,
        length: usize,
        writable: bool,
        file: &Arc<dyn File>,
        offset: usize,
    ) -> Result<VirtAddr, VmError> {
        self.inner
            .exclusive_access()
            .mmap(id, addr, length, writable, file, offset)
    }

    /// 解除从 `addr` 开始的映射，脏页写回文件
    ///
    /// 写回失败时映射仍被解除，返回 [`VmError::Io`]
    pub fn munmap(&self, id: SpaceId, addr: VirtAddr) -> Result<(), VmError> {
        let mut inner = self.inner.exclusive_access();
        let space = inner.spaces.get_mut(&id).ok_or(VmError::NoSuchSpace)?;
        let idx = space
            .mmaps
            .iter()
            .position(|r| r.base == addr)
            .ok_or(VmError::NotMapped)?;
        let region = space.mmaps.remove(idx);
        inner.unmap_region(id, &region)
    }

    pub fn set_user_sp(&self, id: SpaceId, sp: usize) {
        if let Some(space) = self.inner.exclusive_access().spaces.get_mut(&id) {
            space.user_sp = sp;
        }
    }

    pub fn is_resident(&self, id: SpaceId, va: VirtAddr) -> bool {
        self.inner
            .exclusive_access()
            .spaces
            .get(&id)
            .and_then(|s| s.spt.find(va.floor()))
            .is_some_and(|p| p.frame.is_some())
    }

    pub fn is_dirty(&self, id: SpaceId, va: VirtAddr) -> bool {
        self.inner
            .exclusive_access()
            .spaces
            .get(&id)
            .is_some_and(|s| s.page_table.is_dirty(va.floor()))
    }

    /// `va` 所在页面记录的后备类型
    pub fn page_kind(&self, id: SpaceId, va: VirtAddr) -> Option<&'static str> {
        self.inner
            .exclusive_access()
            .spaces
            .get(&id)
            .and_then(|s| s.spt.find(va.floor()))
            .map(|p| p.backing.kind())
    }

    pub fn page_count(&self, id: SpaceId) -> usize {
        self.inner
            .exclusive_access()
            .spaces
            .get(&id)
            .map_or(0, |s| s.spt.len())
    }

    pub fn stack_floor(&self, id: SpaceId) -> Option<VirtAddr> {
        self.inner
            .exclusive_access()
            .spaces
            .get(&id)
            .map(|s| s.stack_floor.addr())
    }

    pub fn frames_in_use(&self) -> usize {
        self.inner.exclusive_access().frames.in_use()
    }

    pub fn swap_slots_in_use(&self) -> usize {
        self.inner.exclusive_access().swap.slots_in_use()
    }

    pub fn space_count(&self) -> usize {
        self.inner.exclusive_access().spaces.len()
    }
}

fn checked_add(base: usize, off: usize) -> Result<usize, FaultError> {
    base.checked_add(off).ok_or(FaultError::KernelAddress)
}

impl VmInner {
    fn create_space(&mut self) -> SpaceId {
        let id = SpaceId(self.next_space);
        self.next_space += 1;
        self.spaces.insert(id, AddressSpace::new());
        debug!("create {}", id);
        id
    }

    fn destroy_space(&mut self, id: SpaceId) {
        let regions = match self.spaces.get_mut(&id) {
            Some(space) => core::mem::take(&mut space.mmaps),
            None => return,
        };
        for region in regions.iter() {
            if let Err(err) = self.unmap_region(id, region) {
                warn!("{} exits with unsaved mapping at {:?}: {}", id, region.base, err);
            }
        }
        let Some(mut space) = self.spaces.remove(&id) else {
            return;
        };
        for page in space.spt.drain() {
            if let Some(ppn) = page.frame {
                self.frames.free(ppn);
            }
            if let Backing::Anon(AnonPage {
                swap_slot: Some(slot),
            }) = page.backing
            {
                self.swap.free(slot);
            }
        }
        debug!("destroy {}", id);
    }

    /// 取得一个空闲页帧，池空时驱逐一个页面
    fn get_frame(&mut self, owner: FrameOwner) -> Result<PhysPageNum, VmError> {
        if let Some(ppn) = self.frames.alloc(owner) {
            return Ok(ppn);
        }
        let ppn = self.evict()?;
        self.frames.bytes_mut(ppn).fill(0);
        self.frames.attach(ppn, owner);
        Ok(ppn)
    }

    /// 驱逐一个页面，返回已解除绑定的页帧
    fn evict(&mut self) -> Result<PhysPageNum, VmError> {
        let spaces = &self.spaces;
        let victim = self
            .frames
            .select_victim(|owner| {
                spaces.get(&owner.space).map_or((false, false), |s| {
                    (
                        s.page_table.is_accessed(owner.vpn),
                        s.page_table.is_dirty(owner.vpn),
                    )
                })
            })
            .ok_or(VmError::OutOfFrames)?;
        let owner = self.frames.owner(victim).ok_or(VmError::OutOfFrames)?;
        let space = self
            .spaces
            .get_mut(&owner.space)
            .ok_or(VmError::NoSuchSpace)?;
        let dirty = space.page_table.is_dirty(owner.vpn);
        let page = space.spt.find_mut(owner.vpn).ok_or(VmError::NotMapped)?;
        let writable = page.writable;
        match &mut page.backing {
            Backing::Anon(anon) => {
                let slot = self.swap.swap_out(self.frames.bytes(victim))?;
                anon.swap_slot = Some(slot);
            }
            Backing::File(file) => {
                if writable && dirty && !file.write_back(self.frames.bytes(victim)) {
                    warn!("write back of {:?} in {} failed", owner.vpn, owner.space);
                    return Err(VmError::Io);
                }
            }
            // 驻留页面在认领时已经完成初始化
            Backing::Uninit(_) => {}
        }
        page.frame = None;
        space.page_table.unmap(owner.vpn);
        self.frames.detach(victim);
        debug!(
            "evict {:?} of {} from {:?} (dirty: {})",
            owner.vpn, owner.space, victim, dirty
        );
        Ok(victim)
    }

    fn claim(&mut self, id: SpaceId, vpn: VirtPageNum) -> Result<(), VmError> {
        let space = self.spaces.get(&id).ok_or(VmError::NoSuchSpace)?;
        match space.spt.find(vpn) {
            None => return Err(VmError::NotMapped),
            Some(page) if page.frame.is_some() => return Ok(()),
            Some(_) => {}
        }
        let ppn = self.get_frame(FrameOwner { space: id, vpn })?;
        let space = self.spaces.get_mut(&id).ok_or(VmError::NoSuchSpace)?;
        let Some(page) = space.spt.find_mut(vpn) else {
            self.frames.free(ppn);
            return Err(VmError::NotMapped);
        };
        let frame = self.frames.bytes_mut(ppn);
        let (loaded, next) = match &mut page.backing {
            Backing::Uninit(uninit) => {
                let ok = uninit.load(frame);
                (ok, ok.then(|| uninit.initialized()))
            }
            Backing::Anon(anon) => {
                match anon.swap_slot.take() {
                    Some(slot) => self.swap.swap_in(slot, frame),
                    None => frame.fill(0),
                }
                (true, None)
            }
            Backing::File(file) => (file.read_into(frame), None),
        };
        if let Some(backing) = next {
            page.backing = backing;
        }
        if !loaded {
            self.frames.free(ppn);
            warn!("cannot load {:?} of {}", vpn, id);
            return Err(VmError::Io);
        }
        page.frame = Some(ppn);
        let mut flags = PTEFlags::R | PTEFlags::U;
        if page.writable {
            flags |= PTEFlags::W;
        }
        space.page_table.map(vpn, ppn, flags);
        trace!("claim {:?} of {} -> {:?}", vpn, id, ppn);
        Ok(())
    }

    /// 栈向下增长到 `vpn`，并认领 `vpn`
    fn grow_stack(&mut self, id: SpaceId, vpn: VirtPageNum) -> Result<(), VmError> {
        let space = self.spaces.get_mut(&id).ok_or(VmError::NoSuchSpace)?;
        let top = space.stack_floor.max(vpn.offset(1));
        for v in (vpn.0..top.0).map(VirtPageNum) {
            if !space.spt.contains(v) {
                space
                    .spt
                    .insert(Page::new(v, true, Backing::Uninit(UninitPage::zeroed())))?;
            }
        }
        space.stack_floor = space.stack_floor.min(vpn);
        self.claim(id, vpn)
    }

    fn handle_fault(
        &mut self,
        id: SpaceId,
        addr: VirtAddr,
        user: bool,
        write: bool,
        not_present: bool,
        sp: usize,
    ) -> Result<(), FaultError> {
        trace!(
            "fault at {:?} in {} (user: {}, write: {}, not present: {})",
            addr, id, user, write, not_present
        );
        if is_kernel_vaddr(addr.0) {
            return Err(FaultError::KernelAddress);
        }
        if !not_present {
            return Err(FaultError::WriteProtected);
        }
        let space = self.spaces.get_mut(&id).ok_or(VmError::NoSuchSpace)?;
        // 用户态缺页带来最新的栈指针，供之后内核态访问判定栈增长
        let sp = if user {
            space.user_sp = sp;
            sp
        } else {
            space.user_sp
        };
        let vpn = addr.floor();
        if let Some(page) = space.spt.find(vpn) {
            if write && !page.writable {
                return Err(FaultError::WriteProtected);
            }
            return Ok(self.claim(id, vpn)?);
        }
        let near_sp = addr.0 + STACK_SLACK >= sp;
        if near_sp && addr.0 >= USER_STACK - STACK_LIMIT {
            return Ok(self.grow_stack(id, vpn)?);
        }
        if near_sp {
            return Err(FaultError::StackLimit);
        }
        Err(FaultError::Unmapped)
    }

    /// 软件 MMU：翻译一个用户地址，必要时触发缺页，并维护访问位与脏位
    fn access(&mut self, id: SpaceId, addr: usize, write: bool) -> Result<PhysPageNum, FaultError> {
        if is_kernel_vaddr(addr) {
            return Err(FaultError::KernelAddress);
        }
        let vpn = VirtAddr(addr).floor();
        let resident = self
            .spaces
            .get(&id)
            .ok_or(VmError::NoSuchSpace)?
            .page_table
            .translate(vpn)
            .is_some();
        if !resident {
            self.handle_fault(id, VirtAddr(addr), false, write, true, 0)?;
        }
        let space = self.spaces.get_mut(&id).ok_or(VmError::NoSuchSpace)?;
        let pte = space
            .page_table
            .translate(vpn)
            .ok_or(FaultError::Unmapped)?;
        if write && !pte.writable() {
            return Err(FaultError::WriteProtected);
        }
        space.page_table.touch(vpn, write);
        Ok(pte.ppn())
    }

    fn duplicate_space(&mut self, parent: SpaceId) -> Result<SpaceId, VmError> {
        if !self.spaces.contains_key(&parent) {
            return Err(VmError::NoSuchSpace);
        }
        let child = self.create_space();
        match self.copy_space(parent, child) {
            Ok(()) => {
                debug!("duplicate {} -> {}", parent, child);
                Ok(child)
            }
            Err(err) => {
                warn!("duplicate {} failed: {}", parent, err);
                self.destroy_space(child);
                Err(err)
            }
        }
    }

    fn copy_space(&mut self, parent: SpaceId, child: SpaceId) -> Result<(), VmError> {
        let (vpns, regions, floor, user_sp) = {
            let space = self.spaces.get(&parent).ok_or(VmError::NoSuchSpace)?;
            let regions = space
                .mmaps
                .iter()
                .map(|r| r.duplicate().ok_or(VmError::Io))
                .collect::<Result<Vec<_>, _>>()?;
            (space.spt.vpns(), regions, space.stack_floor, space.user_sp)
        };
        {
            let space = self.spaces.get_mut(&child).ok_or(VmError::NoSuchSpace)?;
            space.mmaps = regions;
            space.stack_floor = floor;
            space.user_sp = user_sp;
        }
        for vpn in vpns {
            self.copy_page(parent, child, vpn)?;
        }
        Ok(())
    }

    fn copy_page(&mut self, parent: SpaceId, child: SpaceId, vpn: VirtPageNum) -> Result<(), VmError> {
        let (writable, backing, resident) = {
            let page = self
                .spaces
                .get(&parent)
                .and_then(|s| s.spt.find(vpn))
                .ok_or(VmError::NotMapped)?;
            let backing = match &page.backing {
                Backing::Uninit(uninit) => Backing::Uninit(uninit.duplicate().ok_or(VmError::Io)?),
                Backing::Anon(_) => Backing::Anon(AnonPage::default()),
                Backing::File(file) => Backing::File(FilePage {
                    file: file.file.reopen().ok_or(VmError::Io)?,
                    offset: file.offset,
                    read_bytes: file.read_bytes,
                }),
            };
            (page.writable, backing, page.frame.is_some())
        };
        let eager = match &backing {
            Backing::Uninit(_) => false,
            Backing::Anon(_) => true,
            Backing::File(_) => resident,
        };
        self.spaces
            .get_mut(&child)
            .ok_or(VmError::NoSuchSpace)?
            .spt
            .insert(Page::new(vpn, writable, backing))?;
        if !eager {
            return Ok(());
        }

        let dst = self.get_frame(FrameOwner { space: child, vpn })?;
        // 分配页帧可能驱逐了父进程的这一页，重新读取它的状态
        let (src, slot, dirty) = {
            let space = self.spaces.get(&parent).ok_or(VmError::NoSuchSpace)?;
            let page = space.spt.find(vpn).ok_or(VmError::NotMapped)?;
            let slot = match &page.backing {
                Backing::Anon(anon) => anon.swap_slot,
                _ => None,
            };
            (page.frame, slot, space.page_table.is_dirty(vpn))
        };
        let child_space = self.spaces.get_mut(&child).ok_or(VmError::NoSuchSpace)?;
        let Some(page) = child_space.spt.find_mut(vpn) else {
            self.frames.free(dst);
            return Err(VmError::NotMapped);
        };
        match (src, slot, &page.backing) {
            (Some(src), _, _) => self.frames.copy(src, dst),
            (None, Some(slot), _) => self.swap.read_slot(slot, self.frames.bytes_mut(dst)),
            // 文件页已被写回，留待缺页时从文件读入
            (None, None, Backing::File(_)) => {
                self.frames.free(dst);
                return Ok(());
            }
            _ => {}
        }
        page.frame = Some(dst);
        let mut flags = PTEFlags::R | PTEFlags::U;
        if writable {
            flags |= PTEFlags::W;
        }
        child_space.page_table.map(vpn, dst, flags);
        if dirty || matches!(page.backing, Backing::Anon(_)) {
            child_space.page_table.set_dirty(vpn, true);
        }
        Ok(())
    }

    fn mmap(
        &mut self,
        id: SpaceId,
        addr: VirtAddr,
        length: usize,
        writable: bool,
        file: &Arc<dyn File>,
        offset: usize,
    ) -> Result<VirtAddr, VmError> {
        let pages = mmap::check_request(addr, length, offset)?;
        if file.length() == 0 {
            return Err(VmError::Io);
        }
        let space = self.spaces.get_mut(&id).ok_or(VmError::NoSuchSpace)?;
        if space.spt.overlaps(addr.floor(), pages) {
            return Err(VmError::AlreadyMapped);
        }
        let region = MmapRegion {
            base: addr,
            length,
            file: file.reopen().ok_or(VmError::Io)?,
            offset,
            pages,
            writable,
        };
        for page in region.build_pages()? {
            space.spt.insert(page)?;
        }
        debug!("mmap {:?} ({} pages) in {}", addr, pages, id);
        space.mmaps.push(region);
        Ok(addr)
    }

    /// 拆除整个映射区域；任何一页写回失败都会在拆除完成后报告
    fn unmap_region(&mut self, id: SpaceId, region: &MmapRegion) -> Result<(), VmError> {
        let space = self.spaces.get_mut(&id).ok_or(VmError::NoSuchSpace)?;
        let mut result = Ok(());
        for vpn in region.vpns() {
            let Some(page) = space.spt.remove(vpn) else {
                continue;
            };
            let Some(ppn) = page.frame else {
                continue;
            };
            if let Backing::File(file) = &page.backing {
                if page.writable
                    && space.page_table.is_dirty(vpn)
                    && !file.write_back(self.frames.bytes(ppn))
                {
                    warn!("write back of {:?} in {} failed", vpn, id);
                    result = Err(VmError::Io);
                }
            }
            space.page_table.unmap(vpn);
            self.frames.free(ppn);
        }
        debug!("munmap {:?} in {}", region.base, id);
        result
    }
}
