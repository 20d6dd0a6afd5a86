//! # 可执行文件装载接口
//!
//! 内核不解析可执行文件格式，只消费装载器给出的段描述：
//!
//! ```text
//!  file ──► ExecLoader::load ──► ExecImage { entry, segments: [Segment, ...] }
//!                                              │
//!                                              ▼  validate_segment
//!                                  每页一个延迟加载的页面记录
//! ```
//!
//! 一个段被拆成若干页，每页从文件读取 `read_bytes` 字节，其余填零：
//!
//! ```text
//!   vaddr & !PGMASK         vaddr              vaddr+filesz     vaddr+memsz
//!   ├───────────────────────┼──────────────────┼────────────────┼──────┤
//!   │ 文件中同页偏移的内容  │   文件内容       │     零         │ 零   │
//! ```

mod elf;

pub use elf::{ElfLoader, build_elf};

use crate::config::PAGE_SIZE;
use crate::error::LoadError;
use crate::fs::File;
use crate::mm::{VirtAddr, is_user_vaddr};
use alloc::vec::Vec;

/// 可装载段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    pub vaddr: usize,
    pub mem_size: usize,
    pub file_offset: usize,
    pub file_size: usize,
    pub writable: bool,
}

/// 段中的一页
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentPage {
    pub va: VirtAddr,
    pub file_offset: usize,
    pub read_bytes: usize,
}

impl Segment {
    /// 按页拆分段
    pub fn pages(&self) -> Vec<SegmentPage> {
        let page_offset = self.vaddr % PAGE_SIZE;
        let total = (page_offset + self.mem_size).div_ceil(PAGE_SIZE) * PAGE_SIZE;
        let mut read_left = if self.file_size > 0 {
            page_offset + self.file_size
        } else {
            0
        };
        let mut file_offset = self.file_offset - page_offset;
        let base = self.vaddr - page_offset;
        (0..total / PAGE_SIZE)
            .map(|i| {
                let read_bytes = read_left.min(PAGE_SIZE);
                let page = SegmentPage {
                    va: VirtAddr(base + i * PAGE_SIZE),
                    file_offset,
                    read_bytes,
                };
                read_left -= read_bytes;
                file_offset += read_bytes;
                page
            })
            .collect()
    }
}

/// 装载结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecImage {
    pub entry: usize,
    pub segments: Vec<Segment>,
}

/// 可执行文件格式解析器
pub trait ExecLoader: Send + Sync {
    fn load(&self, file: &dyn File) -> Result<ExecImage, LoadError>;
}

/// 检查段描述是否合法
///
/// - 文件偏移与虚拟地址的页内偏移一致
/// - 文件偏移不超过文件长度
/// - `mem_size >= file_size` 且 `mem_size != 0`
/// - 整个段位于用户空间，不回绕
/// - 不映射第 0 页
pub fn validate_segment(seg: &Segment, file_len: usize) -> bool {
    if seg.file_offset % PAGE_SIZE != seg.vaddr % PAGE_SIZE {
        return false;
    }
    if seg.file_offset > file_len {
        return false;
    }
    if seg.mem_size < seg.file_size || seg.mem_size == 0 {
        return false;
    }
    let Some(end) = seg.vaddr.checked_add(seg.mem_size) else {
        return false;
    };
    if !is_user_vaddr(seg.vaddr) || !is_user_vaddr(end - 1) {
        return false;
    }
    seg.vaddr >= PAGE_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::USER_STACK;

    fn seg(vaddr: usize, file_offset: usize, file_size: usize, mem_size: usize) -> Segment {
        Segment {
            vaddr,
            mem_size,
            file_offset,
            file_size,
            writable: false,
        }
    }

    #[test]
    fn validation_rejections() {
        assert!(validate_segment(&seg(0x1000, 0, 0x10, 0x20), 0x100));
        assert!(!validate_segment(&seg(0x1010, 0, 0x10, 0x20), 0x100));
        assert!(!validate_segment(&seg(0x1000, 0x2000, 0x10, 0x20), 0x100));
        assert!(!validate_segment(&seg(0x1000, 0, 0x20, 0x10), 0x100));
        assert!(!validate_segment(&seg(0x1000, 0, 0, 0), 0x100));
        assert!(!validate_segment(&seg(0, 0, 0x10, 0x20), 0x100));
        assert!(!validate_segment(&seg(USER_STACK - 0x10, 0, 0, 0x20), 0x100));
        assert!(!validate_segment(
            &seg(usize::MAX & !0xfff, 0, 0, 0x2000),
            0x100
        ));
    }

    #[test]
    fn pages_split_read_and_zero_bytes() {
        // 段从页内 0x100 处开始，文件内容 0x1000 字节，.bss 再多 0x1800
        let pages = seg(0x1_0100, 0x100, 0x1000, 0x2800).pages();
        assert_eq!(
            pages,
            [
                SegmentPage {
                    va: VirtAddr(0x1_0000),
                    file_offset: 0,
                    read_bytes: 0x1000
                },
                SegmentPage {
                    va: VirtAddr(0x1_1000),
                    file_offset: 0x1000,
                    read_bytes: 0x100
                },
                SegmentPage {
                    va: VirtAddr(0x1_2000),
                    file_offset: 0x1100,
                    read_bytes: 0
                },
            ]
        );
        let bss = seg(0x2_0000, 0, 0, 0x10).pages();
        assert_eq!(bss.len(), 1);
        assert_eq!(bss[0].read_bytes, 0);
    }
}
