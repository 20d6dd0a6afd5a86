//! # 内存映射文件
//!
//! 一个映射区域把文件 `[offset, offset + length)` 映射到从 `base` 开始的连续虚拟页：
//!
//! ```text
//! base                                     base + pages * PAGE_SIZE
//! ┌──────────┬──────────┬──────────┬───────┐
//! │  page 0  │  page 1  │  page 2  │ 0 0 0 │  ← 文件末尾之后填零，不回写
//! └──────────┴──────────┴──────────┴───────┘
//!   offset     +PAGE      +2*PAGE
//! ```
//!
//! 每一页都是延迟加载的文件页，持有一个独立重新打开的文件句柄。

use super::page::{Backing, LoadAux, Page, UninitPage};
use super::{VirtAddr, VirtPageNum, is_user_vaddr};
use crate::config::PAGE_SIZE;
use crate::error::VmError;
use crate::fs::File;
use alloc::sync::Arc;
use alloc::vec::Vec;

pub struct MmapRegion {
    pub base: VirtAddr,
    pub length: usize,
    /// 区域自己的重新打开的句柄
    pub file: Arc<dyn File>,
    pub offset: usize,
    pub pages: usize,
    pub writable: bool,
}

impl MmapRegion {
    pub fn start(&self) -> VirtPageNum {
        self.base.floor()
    }

    pub fn vpns(&self) -> impl Iterator<Item = VirtPageNum> + '_ {
        (0..self.pages).map(|i| self.start().offset(i))
    }

    /// 为区域的每一页生成延迟加载的页面记录
    pub fn build_pages(&self) -> Result<Vec<Page>, VmError> {
        let file_len = self.file.length();
        let mut pages = Vec::with_capacity(self.pages);
        for (i, vpn) in self.vpns().enumerate() {
            let page_offset = self.offset + i * PAGE_SIZE;
            let read_bytes = PAGE_SIZE
                .min(self.length - i * PAGE_SIZE)
                .min(file_len.saturating_sub(page_offset));
            let aux = LoadAux {
                file: self.file.reopen().ok_or(VmError::Io)?,
                offset: page_offset,
                read_bytes,
            };
            pages.push(Page::new(
                vpn,
                self.writable,
                Backing::Uninit(UninitPage::mapped(aux)),
            ));
        }
        Ok(pages)
    }

    /// fork 时复制区域记录
    pub fn duplicate(&self) -> Option<MmapRegion> {
        Some(MmapRegion {
            base: self.base,
            length: self.length,
            file: self.file.reopen()?,
            offset: self.offset,
            pages: self.pages,
            writable: self.writable,
        })
    }
}

/// 检查映射请求的地址部分，返回区域的页数
///
/// 地址非空且页对齐、长度非零、文件偏移页对齐、整个区域位于用户空间且不回绕。
pub fn check_request(addr: VirtAddr, length: usize, offset: usize) -> Result<usize, VmError> {
    if addr.0 == 0 || !addr.aligned() || length == 0 || offset % PAGE_SIZE != 0 {
        return Err(VmError::BadAddress);
    }
    let end = addr.0.checked_add(length).ok_or(VmError::BadAddress)?;
    if !is_user_vaddr(end - 1) {
        return Err(VmError::BadAddress);
    }
    Ok(length.div_ceil(PAGE_SIZE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::USER_STACK;
    use crate::fs::{FileSystem, RamFs};

    #[test]
    fn request_rejections() {
        assert_eq!(check_request(VirtAddr(0), PAGE_SIZE, 0), Err(VmError::BadAddress));
        assert_eq!(check_request(VirtAddr(0x1001), PAGE_SIZE, 0), Err(VmError::BadAddress));
        assert_eq!(check_request(VirtAddr(0x1000), 0, 0), Err(VmError::BadAddress));
        assert_eq!(check_request(VirtAddr(0x1000), 10, 7), Err(VmError::BadAddress));
        assert_eq!(
            check_request(VirtAddr(USER_STACK - PAGE_SIZE), 2 * PAGE_SIZE, 0),
            Err(VmError::BadAddress)
        );
        assert_eq!(
            check_request(VirtAddr(usize::MAX & !(PAGE_SIZE - 1)), 2 * PAGE_SIZE, 0),
            Err(VmError::BadAddress)
        );
        assert_eq!(check_request(VirtAddr(0x1000), PAGE_SIZE + 1, 0), Ok(2));
    }

    #[test]
    fn tail_page_reads_only_file_bytes() {
        let fs = RamFs::new();
        fs.insert("data", &[1u8; PAGE_SIZE + 100]);
        let region = MmapRegion {
            base: VirtAddr(0x1000_0000),
            length: 3 * PAGE_SIZE,
            file: fs.open("data").unwrap(),
            offset: 0,
            pages: 3,
            writable: true,
        };
        let pages = region.build_pages().unwrap();
        let read_bytes: Vec<usize> = pages
            .iter()
            .map(|p| match &p.backing {
                Backing::Uninit(UninitPage {
                    loader: Some((_, aux)),
                    ..
                }) => aux.read_bytes,
                _ => usize::MAX,
            })
            .collect();
        assert_eq!(read_bytes, [PAGE_SIZE, 100, 0]);
        assert_eq!(pages[2].vpn, VirtPageNum(0x1000_2));
    }
}
