//! # 页面记录与后备存储
//!
//! 每个虚拟页在补充页表中有一条 [`Page`] 记录，其后备存储是一个封闭的集合：
//!
//! ```text
//!                 首次缺页：执行 loader
//!   Uninit ──────────────────────────────┬──► Anon  ◄──► 交换槽
//!   (loader + 参数, 尚无页帧)            └──► File  ◄──► 文件 (offset, read_bytes)
//! ```
//!
//! - **Uninit**：延迟加载页，携带加载函数与参数以及加载后的目标类型
//! - **Anon**：匿名页，零填充或由交换槽保存
//! - **File**：文件映射页，由独立重新打开的文件句柄保存，可写且为脏时才回写

use super::{PhysPageNum, VirtPageNum};
use crate::config::PAGE_SIZE;
use crate::fs::File;
use alloc::sync::Arc;

/// 加载函数：把页面内容写入 `page`，成功返回 `true`
pub type PageLoader = fn(page: &mut [u8; PAGE_SIZE], aux: &LoadAux) -> bool;

/// 加载参数
#[derive(Clone)]
pub struct LoadAux {
    pub file: Arc<dyn File>,
    pub offset: usize,
    /// 从文件读取的字节数，其余字节填零
    pub read_bytes: usize,
}

impl LoadAux {
    /// 使用独立重新打开的文件句柄复制一份参数
    pub fn reopened(&self) -> Option<LoadAux> {
        Some(LoadAux {
            file: self.file.reopen()?,
            offset: self.offset,
            read_bytes: self.read_bytes,
        })
    }
}

/// 延迟加载页完成加载后的类型
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PageType {
    Anon,
    File,
}

#[derive(Clone)]
pub struct UninitPage {
    /// `None` 表示零填充
    pub loader: Option<(PageLoader, LoadAux)>,
    pub target: PageType,
}

impl UninitPage {
    /// 零填充的匿名页（栈）
    pub fn zeroed() -> Self {
        Self {
            loader: None,
            target: PageType::Anon,
        }
    }

    /// 可执行文件段中的一页，加载后成为匿名页
    pub fn segment(aux: LoadAux) -> Self {
        Self {
            loader: Some((load_from_file, aux)),
            target: PageType::Anon,
        }
    }

    /// 内存映射文件中的一页
    pub fn mapped(aux: LoadAux) -> Self {
        Self {
            loader: Some((load_from_file, aux)),
            target: PageType::File,
        }
    }

    /// 执行加载函数
    pub fn load(&self, page: &mut [u8; PAGE_SIZE]) -> bool {
        match &self.loader {
            Some((loader, aux)) => loader(page, aux),
            None => {
                page.fill(0);
                true
            }
        }
    }

    /// 加载完成后的后备存储
    pub fn initialized(&self) -> Backing {
        match (self.target, &self.loader) {
            (PageType::File, Some((_, aux))) => Backing::File(FilePage {
                file: aux.file.clone(),
                offset: aux.offset,
                read_bytes: aux.read_bytes,
            }),
            _ => Backing::Anon(AnonPage { swap_slot: None }),
        }
    }

    /// fork 时复制：文件参数使用重新打开的句柄
    pub fn duplicate(&self) -> Option<UninitPage> {
        let loader = match &self.loader {
            Some((f, aux)) => Some((*f, aux.reopened()?)),
            None => None,
        };
        Some(UninitPage {
            loader,
            target: self.target,
        })
    }
}

#[derive(Clone, Debug, Default)]
pub struct AnonPage {
    /// 最近一次换出时写入的交换槽
    pub swap_slot: Option<usize>,
}

#[derive(Clone)]
pub struct FilePage {
    pub file: Arc<dyn File>,
    pub offset: usize,
    pub read_bytes: usize,
}

impl FilePage {
    /// 从文件读入页面，剩余部分填零
    pub fn read_into(&self, page: &mut [u8; PAGE_SIZE]) -> bool {
        let n = self.file.read_at(self.offset, &mut page[..self.read_bytes]);
        page[n..].fill(0);
        n == self.read_bytes
    }

    /// 把页面的有效部分写回文件
    pub fn write_back(&self, page: &[u8; PAGE_SIZE]) -> bool {
        self.file.write_at(self.offset, &page[..self.read_bytes]) == self.read_bytes
    }
}

/// 页面后备存储
pub enum Backing {
    Uninit(UninitPage),
    Anon(AnonPage),
    File(FilePage),
}

impl Backing {
    pub fn kind(&self) -> &'static str {
        match self {
            Backing::Uninit(_) => "uninit",
            Backing::Anon(_) => "anon",
            Backing::File(_) => "file",
        }
    }
}

/// 补充页表中的页面记录
pub struct Page {
    pub vpn: VirtPageNum,
    pub writable: bool,
    pub backing: Backing,
    /// 当前占用的页帧
    pub frame: Option<PhysPageNum>,
}

impl Page {
    pub fn new(vpn: VirtPageNum, writable: bool, backing: Backing) -> Self {
        Self {
            vpn,
            writable,
            backing,
            frame: None,
        }
    }
}

/// 通用的文件加载函数：读 `read_bytes` 字节，其余填零
fn load_from_file(page: &mut [u8; PAGE_SIZE], aux: &LoadAux) -> bool {
    let n = aux.file.read_at(aux.offset, &mut page[..aux.read_bytes]);
    page[aux.read_bytes..].fill(0);
    n == aux.read_bytes
}
