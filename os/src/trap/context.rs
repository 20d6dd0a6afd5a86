//! # 陷阱上下文
//!
//! 用户态进入内核时保存的寄存器快照。寄存器编号遵循 RISC-V 调用约定：
//!
//! ```text
//! x[2]  = sp   用户栈指针
//! x[10] = a0   系统调用返回值 / argc
//! x[11] = a1   argv
//! sepc         返回用户态后执行的地址
//! ```

/// 用户寄存器快照
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct TrapContext {
    /// 通用寄存器 x0-x31
    pub x: [usize; 32],
    /// 返回用户态的地址
    pub sepc: usize,
}

impl TrapContext {
    pub const SP: usize = 2;
    pub const A0: usize = 10;
    pub const A1: usize = 11;

    /// 构造进入新程序入口时的上下文
    ///
    /// ## Arguments
    ///
    /// * `entry` - 程序入口地址
    /// * `sp` - 初始用户栈指针
    pub fn app_init_context(entry: usize, sp: usize) -> Self {
        let mut cx = Self {
            x: [0; 32],
            sepc: entry,
        };
        cx.set_sp(sp);
        cx
    }

    pub fn set_sp(&mut self, sp: usize) {
        self.x[Self::SP] = sp;
    }

    pub fn sp(&self) -> usize {
        self.x[Self::SP]
    }

    /// 系统调用返回值寄存器
    pub fn ret(&self) -> usize {
        self.x[Self::A0]
    }

    pub fn set_ret(&mut self, value: usize) {
        self.x[Self::A0] = value;
    }

    pub fn arg1(&self) -> usize {
        self.x[Self::A1]
    }

    pub fn set_arg1(&mut self, value: usize) {
        self.x[Self::A1] = value;
    }
}
