//! # 用户栈上的参数布局
//!
//! exec 把命令行各个单词压入新程序的用户栈，布局如下（高地址在上）：
//!
//! ```text
//!  top  ┌───────────────────────┐
//!       │ "argv[n-1]\0"         │ ← 最先压入
//!       │  ...                  │
//!       │ "argv[0]\0"           │ ← 最后压入
//!       ├───────────────────────┤
//!       │ 对齐填充              │ ← sp 向下对齐到字长
//!       │ NULL                  │ ← argv[argc]
//!       │ &argv[n-1]            │
//!       │  ...                  │
//!       │ &argv[0]              │ ← a1 = argv
//!       │ 0 (返回地址)          │ ← sp
//!       └───────────────────────┘
//! ```
//!
//! 整个布局必须放进栈顶的一页。

use crate::config::{MAX_ARGS, PAGE_SIZE};
use alloc::vec;
use alloc::vec::Vec;
use core::mem::size_of;

/// 计算好的参数区
#[derive(Debug, PartialEq, Eq)]
pub struct ArgLayout {
    /// 初始栈指针
    pub sp: usize,
    /// argv 数组的地址
    pub argv: usize,
    pub argc: usize,
    /// 写到 `[sp, top)` 的内容
    pub image: Vec<u8>,
}

/// 把命令行切分成参数，连续空格视作一个
pub fn split_args(cmdline: &str) -> Vec<&str> {
    cmdline.split(' ').filter(|word| !word.is_empty()).collect()
}

/// 在栈顶 `top` 之下布置参数
///
/// ## Returns
///
/// 参数为空、超过 [`MAX_ARGS`] 个或者放不进一页时返回 `None`
pub fn build(top: usize, args: &[&str]) -> Option<ArgLayout> {
    const WORD: usize = size_of::<usize>();
    if args.is_empty() || args.len() > MAX_ARGS {
        return None;
    }
    let mut sp = top;
    let mut addrs = vec![0usize; args.len()];
    for (i, arg) in args.iter().enumerate().rev() {
        sp -= arg.len() + 1;
        addrs[i] = sp;
    }
    sp &= !(WORD - 1);
    sp -= WORD;
    sp -= WORD * args.len();
    let argv = sp;
    sp -= WORD;
    if top - sp > PAGE_SIZE {
        return None;
    }

    let mut image = vec![0u8; top - sp];
    for (arg, addr) in args.iter().zip(addrs.iter()) {
        let at = addr - sp;
        image[at..at + arg.len()].copy_from_slice(arg.as_bytes());
    }
    for (i, addr) in addrs.iter().enumerate() {
        let at = argv - sp + i * WORD;
        image[at..at + WORD].copy_from_slice(&addr.to_le_bytes());
    }
    Some(ArgLayout {
        sp,
        argv,
        argc: args.len(),
        image,
    })
}
