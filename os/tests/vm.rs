mod common;

use common::{Trace, boot_default, boot_with};
use nimloth_kernel::config::{KernelConfig, PAGE_SIZE, USER_STACK};
use nimloth_kernel::error::{ProcessError, VmError};
use nimloth_kernel::loader::build_elf;
use nimloth_kernel::mm::VirtAddr;
use std::sync::Arc;

const ENTRY: usize = 0x1_0000;
const MAP: usize = 0x1000_0000;

fn read_bytes(k: &nimloth_kernel::Kernel, va: usize, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    k.user_read(VirtAddr(va), &mut buf);
    buf
}

#[test]
fn mapped_file_is_read_written_and_written_back() {
    let tk = boot_default();
    tk.fs.insert("data.txt", b"hello mmap");
    let trace = Trace::default();
    let t = trace.clone();
    tk.install(
        "mapper",
        ENTRY,
        b"code",
        Arc::new(move |k, _| {
            let fd = k.open("data.txt").unwrap();
            let base = k.mmap(VirtAddr(MAP), 10, true, fd, 0).unwrap();
            t.push(String::from_utf8(read_bytes(k, base.0, 10)).unwrap());
            t.push(format!("tail {:?}", read_bytes(k, base.0 + 10, 2)));
            k.user_write(base, b"HELLO");
            // 关闭描述符不影响映射
            k.close(fd).unwrap();
            t.push(String::from_utf8(read_bytes(k, base.0, 10)).unwrap());
            t.push(format!("{:?}", k.munmap(base)));
            t.push(format!("{:?}", k.munmap(base)));
        }),
    );
    let tid = tk.kernel.process_execute("mapper").unwrap();
    assert_eq!(tk.kernel.wait(tid), Ok(0));
    assert_eq!(
        trace.events(),
        [
            "hello mmap".to_string(),
            "tail [0, 0]".to_string(),
            "HELLO mmap".to_string(),
            "Ok(())".to_string(),
            format!("{:?}", Err::<(), _>(ProcessError::Memory(VmError::NotMapped))),
        ]
    );
    assert_eq!(tk.fs.contents("data.txt").unwrap(), b"HELLO mmap");
}

#[test]
fn exit_writes_back_live_mappings() {
    let tk = boot_default();
    tk.fs.insert("log", &[b'.'; PAGE_SIZE + 4]);
    tk.install(
        "writer",
        ENTRY,
        b"code",
        Arc::new(|k, _| {
            let fd = k.open("log").unwrap();
            let base = k.mmap(VirtAddr(MAP), PAGE_SIZE + 4, true, fd, 0).unwrap();
            k.user_write(VirtAddr(base.0 + PAGE_SIZE), b"end!");
        }),
    );
    let tid = tk.kernel.process_execute("writer").unwrap();
    assert_eq!(tk.kernel.wait(tid), Ok(0));
    let content = tk.fs.contents("log").unwrap();
    assert_eq!(content.len(), PAGE_SIZE + 4);
    assert_eq!(&content[PAGE_SIZE..], b"end!");
    assert!(content[..PAGE_SIZE].iter().all(|b| *b == b'.'));
}

#[test]
fn bad_mapping_requests_return_none() {
    let tk = boot_default();
    tk.fs.insert("data.txt", b"hello mmap");
    tk.fs.insert("empty", b"");
    let trace = Trace::default();
    let t = trace.clone();
    tk.install(
        "mapper",
        ENTRY,
        b"code",
        Arc::new(move |k, _| {
            let fd = k.open("data.txt").unwrap();
            let empty = k.open("empty").unwrap();
            let stack_page = USER_STACK - PAGE_SIZE;
            let refused = [
                k.mmap(VirtAddr(0), 10, true, fd, 0),
                k.mmap(VirtAddr(MAP + 1), 10, true, fd, 0),
                k.mmap(VirtAddr(MAP), 0, true, fd, 0),
                k.mmap(VirtAddr(MAP), 10, true, fd, 1),
                k.mmap(VirtAddr(MAP), 10, true, 0, 0),
                k.mmap(VirtAddr(MAP), 10, true, 1, 0),
                k.mmap(VirtAddr(MAP), 10, true, 77, 0),
                k.mmap(VirtAddr(MAP), 10, true, empty, 0),
                k.mmap(VirtAddr(ENTRY), 10, true, fd, 0),
                k.mmap(VirtAddr(stack_page), 10, true, fd, 0),
            ];
            t.push(format!("{}", refused.iter().all(Option::is_none)));
            let first = k.mmap(VirtAddr(MAP), 10, true, fd, 0);
            let overlap = k.mmap(VirtAddr(MAP), 10, true, fd, 0);
            t.push(format!("{:?} {:?}", first, overlap));
        }),
    );
    let tid = tk.kernel.process_execute("mapper").unwrap();
    assert_eq!(tk.kernel.wait(tid), Ok(0));
    assert_eq!(
        trace.events(),
        [
            "true".to_string(),
            format!("{:?} None", Some(VirtAddr(MAP))),
        ]
    );
}

#[test]
fn access_after_munmap_kills_the_process() {
    let tk = boot_default();
    tk.fs.insert("data.txt", b"hello mmap");
    let trace = Trace::default();
    let t = trace.clone();
    tk.install(
        "mapper",
        ENTRY,
        b"code",
        Arc::new(move |k, _| {
            let fd = k.open("data.txt").unwrap();
            let base = k.mmap(VirtAddr(MAP), 10, false, fd, 0).unwrap();
            k.munmap(base).unwrap();
            t.push("unmapped");
            read_bytes(k, base.0, 1);
            t.push("survived");
        }),
    );
    let tid = tk.kernel.process_execute("mapper").unwrap();
    assert_eq!(tk.kernel.wait(tid), Ok(-1));
    assert_eq!(trace.events(), ["unmapped"]);
    assert_eq!(tk.console(), "mapper: exit(-1)\n");
}

#[test]
fn writing_a_read_only_segment_kills_the_process() {
    let tk = boot_default();
    let trace = Trace::default();
    let t = trace.clone();
    tk.install_with(
        "rodata",
        ENTRY,
        b"constant",
        false,
        Arc::new(move |k, _| {
            t.push(String::from_utf8(read_bytes(k, ENTRY, 8)).unwrap());
            k.user_write(VirtAddr(ENTRY), b"C");
            t.push("survived");
        }),
    );
    let tid = tk.kernel.process_execute("rodata").unwrap();
    assert_eq!(tk.kernel.wait(tid), Ok(-1));
    assert_eq!(trace.events(), ["constant"]);
}

#[test]
fn user_write_fault_on_read_only_page_is_fatal() {
    let tk = boot_default();
    tk.install_with(
        "rodata",
        ENTRY,
        b"constant",
        false,
        Arc::new(|k, cx| {
            k.page_fault(VirtAddr(ENTRY), true, true, true, cx.sp());
            k.exit(0)
        }),
    );
    let tid = tk.kernel.process_execute("rodata").unwrap();
    assert_eq!(tk.kernel.wait(tid), Ok(-1));
}

#[test]
fn stack_grows_below_the_stack_pointer() {
    let tk = boot_default();
    let trace = Trace::default();
    let t = trace.clone();
    tk.install(
        "deep",
        ENTRY,
        b"code",
        Arc::new(move |k, cx| {
            // 一次向下移动两页的 push
            let sp = cx.sp() - 2 * PAGE_SIZE;
            k.page_fault(VirtAddr(sp - 8), true, true, true, sp);
            k.user_write(VirtAddr(sp - 8), b"pushed!");
            t.push(String::from_utf8(read_bytes(k, sp - 8, 7)).unwrap());
            // 中间被补齐的页可以直接访问
            t.push(format!("{:?}", read_bytes(k, sp + PAGE_SIZE, 2)));
            // 远离栈指针的访问
            read_bytes(k, USER_STACK - 64 * PAGE_SIZE, 1);
            t.push("survived");
        }),
    );
    let tid = tk.kernel.process_execute("deep").unwrap();
    assert_eq!(tk.kernel.wait(tid), Ok(-1));
    assert_eq!(trace.events(), ["pushed!", "[0, 0]"]);
}

#[test]
fn syscall_buffer_below_a_grown_stack_is_reachable() {
    let tk = boot_default();
    let trace = Trace::default();
    let t = trace.clone();
    tk.install(
        "deep",
        ENTRY,
        b"code",
        Arc::new(move |k, cx| {
            let sp = (cx.sp() & !(PAGE_SIZE - 1)) - 2 * PAGE_SIZE;
            k.page_fault(VirtAddr(sp), true, true, true, sp);
            t.push("grew");
            // 系统调用把缓冲区放在新的栈指针下方
            k.user_write(VirtAddr(sp - 8), b"x");
            t.push(String::from_utf8(read_bytes(k, sp - 8, 1)).unwrap());
        }),
    );
    let tid = tk.kernel.process_execute("deep").unwrap();
    assert_eq!(tk.kernel.wait(tid), Ok(0));
    assert_eq!(trace.events(), ["grew", "x"]);
}

#[test]
fn syscall_entry_saves_the_user_stack_pointer() {
    let tk = boot_default();
    let trace = Trace::default();
    let t = trace.clone();
    tk.install(
        "caller",
        ENTRY,
        b"code",
        Arc::new(move |k, cx| {
            let sp = (cx.sp() & !(PAGE_SIZE - 1)) - PAGE_SIZE;
            let mut entry_cx = *cx;
            entry_cx.set_sp(sp);
            k.syscall_entry(&entry_cx);
            k.user_write(VirtAddr(sp - 8), b"arg");
            t.push(String::from_utf8(read_bytes(k, sp - 8, 3)).unwrap());
        }),
    );
    let tid = tk.kernel.process_execute("caller").unwrap();
    assert_eq!(tk.kernel.wait(tid), Ok(0));
    assert_eq!(trace.events(), ["arg"]);
}

#[test]
fn null_and_kernel_pointers_kill_only_the_process() {
    let tk = boot_default();
    for (name, entry, addr) in [
        ("null", ENTRY, 0),
        ("kernel", ENTRY + 0x1_0000, USER_STACK + PAGE_SIZE),
    ] {
        tk.install(
            name,
            entry,
            b"code",
            Arc::new(move |k, _| {
                read_bytes(k, addr, 4);
            }),
        );
        let tid = tk.kernel.process_execute(name).unwrap();
        assert_eq!(tk.kernel.wait(tid), Ok(-1));
    }
    assert_eq!(tk.console(), "null: exit(-1)\nkernel: exit(-1)\n");
}

#[test]
fn processes_share_the_frame_pool_through_swap() {
    let tk = boot_with(KernelConfig::default().with_user_frames(4), 16);
    let elf = build_elf(ENTRY, &[(ENTRY, &b"code"[..], 3 * PAGE_SIZE, true)]);
    tk.fs.insert("a", &elf);
    tk.fs.insert("b", &elf);
    let trace = Trace::default();
    let t = trace.clone();
    tk.register(
        ENTRY,
        Arc::new(move |k, _| {
            let name = k.thread_name();
            let tag = name.as_bytes()[0];
            for i in 0..3 {
                k.user_write(VirtAddr(ENTRY + i * PAGE_SIZE + 0x100), &[tag + i as u8; 32]);
            }
            if name == "a" {
                k.sched().sleep(5);
            }
            let intact = (0..3).all(|i| {
                read_bytes(k, ENTRY + i * PAGE_SIZE + 0x100, 32) == [tag + i as u8; 32]
            });
            t.push(format!("{} {}", name, intact));
        }),
    );
    let a = tk.kernel.process_execute("a").unwrap();
    let b = tk.kernel.process_execute("b").unwrap();
    assert_eq!(tk.kernel.wait(a), Ok(0));
    assert_eq!(tk.kernel.wait(b), Ok(0));
    assert_eq!(trace.events(), ["b true", "a true"]);
    assert_eq!(tk.console(), "b: exit(0)\na: exit(0)\n");
    let vm = tk.kernel.vm();
    assert_eq!(vm.frames_in_use(), 0);
    assert_eq!(vm.swap_slots_in_use(), 0);
}
