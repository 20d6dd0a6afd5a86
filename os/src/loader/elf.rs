//! # ELF 装载器
//!
//! 基于 `xmas-elf` 解析 ELF64 可执行文件，只关心 `PT_LOAD` 类型的程序头。

use super::{ExecImage, ExecLoader, Segment, validate_segment};
use crate::error::LoadError;
use crate::fs::File;
use alloc::vec;
use alloc::vec::Vec;
use log::debug;
use xmas_elf::ElfFile;
use xmas_elf::program::Type;

const ELF_MAGIC: [u8; 4] = [0x7f, 0x45, 0x4c, 0x46];

pub struct ElfLoader;

impl ExecLoader for ElfLoader {
    fn load(&self, file: &dyn File) -> Result<ExecImage, LoadError> {
        let file_len = file.length();
        let mut data = vec![0u8; file_len];
        if file.read_at(0, &mut data) != file_len {
            return Err(LoadError::Io);
        }
        let elf = ElfFile::new(&data).map_err(LoadError::BadFormat)?;
        // elf.header.pt1：固定格式部分，pt2：可变格式部分
        if elf.header.pt1.magic != ELF_MAGIC {
            return Err(LoadError::BadFormat("invalid elf magic"));
        }
        let ph_count = elf.header.pt2.ph_count();
        let mut segments = Vec::new();
        for i in 0..ph_count {
            let ph = elf.program_header(i).map_err(LoadError::BadFormat)?;
            if ph.get_type().map_err(LoadError::BadFormat)? != Type::Load {
                continue;
            }
            let seg = Segment {
                vaddr: ph.virtual_addr() as usize,
                mem_size: ph.mem_size() as usize,
                file_offset: ph.offset() as usize,
                file_size: ph.file_size() as usize,
                writable: ph.flags().is_write(),
            };
            if !validate_segment(&seg, file_len) {
                return Err(LoadError::BadSegment(i as usize));
            }
            segments.push(seg);
        }
        let entry = elf.header.pt2.entry_point() as usize;
        debug!("elf: entry {:#x}, {} segments", entry, segments.len());
        Ok(ExecImage { entry, segments })
    }
}

/// 构造只含 `PT_LOAD` 程序头的最小 ELF64 镜像
///
/// 每个段为 `(vaddr, 内容, mem_size, 可写)`，内容紧跟在程序头之后按页对齐存放。
pub fn build_elf(entry: usize, segments: &[(usize, &[u8], usize, bool)]) -> Vec<u8> {
    const EHDR_SIZE: usize = 64;
    const PHDR_SIZE: usize = 56;
    let page = crate::config::PAGE_SIZE;
    let mut offsets = Vec::new();
    let mut cursor = (EHDR_SIZE + PHDR_SIZE * segments.len()).next_multiple_of(page);
    for (vaddr, content, _, _) in segments {
        // 文件偏移与虚拟地址页内偏移一致
        let offset = cursor + vaddr % page;
        offsets.push(offset);
        cursor = (offset + content.len()).next_multiple_of(page);
    }

    let mut out = Vec::with_capacity(cursor);
    out.extend_from_slice(&ELF_MAGIC);
    out.extend_from_slice(&[2, 1, 1, 0]);
    out.extend_from_slice(&[0u8; 8]);
    out.extend_from_slice(&2u16.to_le_bytes()); // ET_EXEC
    out.extend_from_slice(&0xf3u16.to_le_bytes()); // EM_RISCV
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&(entry as u64).to_le_bytes());
    out.extend_from_slice(&(EHDR_SIZE as u64).to_le_bytes());
    out.extend_from_slice(&0u64.to_le_bytes());
    out.extend_from_slice(&0u32.to_le_bytes());
    out.extend_from_slice(&(EHDR_SIZE as u16).to_le_bytes());
    out.extend_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
    out.extend_from_slice(&(segments.len() as u16).to_le_bytes());
    out.extend_from_slice(&64u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());
    out.extend_from_slice(&0u16.to_le_bytes());

    for ((vaddr, content, mem_size, writable), offset) in segments.iter().zip(&offsets) {
        let flags: u32 = if *writable { 0b110 } else { 0b101 };
        out.extend_from_slice(&1u32.to_le_bytes()); // PT_LOAD
        out.extend_from_slice(&flags.to_le_bytes());
        out.extend_from_slice(&(*offset as u64).to_le_bytes());
        out.extend_from_slice(&(*vaddr as u64).to_le_bytes());
        out.extend_from_slice(&(*vaddr as u64).to_le_bytes());
        out.extend_from_slice(&(content.len() as u64).to_le_bytes());
        out.extend_from_slice(&(*mem_size as u64).to_le_bytes());
        out.extend_from_slice(&(page as u64).to_le_bytes());
    }
    for ((_, content, _, _), offset) in segments.iter().zip(&offsets) {
        out.resize(*offset, 0);
        out.extend_from_slice(content);
    }
    out
}
