//! aarch64 context switching (AAPCS64)

use super::EntryFn;
use std::arch::naked_asm;

/// Callee-saved registers of a suspended context
#[repr(C)]
#[derive(Debug, Default)]
pub struct Context {
    x19_x28: [u64; 10], // 0x00
    fp: u64,            // 0x50
    lr: u64,            // 0x58
    sp: u64,            // 0x60
    d8_d15: [u64; 8],   // 0x68
}

impl Context {
    /// Aim this context at `entry(arg)` running on the stack ending at `stack_top`
    pub fn prepare(&mut self, stack_top: *mut u8, entry: EntryFn, arg: usize) {
        let mut regs = [0u64; 10];
        regs[0] = entry as usize as u64; // x19
        regs[1] = arg as u64; // x20
        *self = Context {
            x19_x28: regs,
            lr: coroutine_trampoline as usize as u64,
            sp: (stack_top as u64) & !0xF,
            ..Context::default()
        };
    }
}

#[unsafe(naked)]
unsafe extern "C" fn coroutine_trampoline() {
    naked_asm!(
        "mov x0, x20",
        "blr x19",
        "brk #1",
    );
}

/// Save callee-saved registers into `old` and resume `new`.
///
/// # Safety
///
/// `new` must hold a context produced by `prepare` or by an earlier
/// `switch`, whose stack is still mapped.
#[unsafe(naked)]
pub unsafe extern "C" fn switch(_old: *mut Context, _new: *const Context) {
    naked_asm!(
        "stp x19, x20, [x0, #0x00]",
        "stp x21, x22, [x0, #0x10]",
        "stp x23, x24, [x0, #0x20]",
        "stp x25, x26, [x0, #0x30]",
        "stp x27, x28, [x0, #0x40]",
        "stp x29, x30, [x0, #0x50]",
        "mov x9, sp",
        "str x9, [x0, #0x60]",
        "stp d8, d9, [x0, #0x68]",
        "stp d10, d11, [x0, #0x78]",
        "stp d12, d13, [x0, #0x88]",
        "stp d14, d15, [x0, #0x98]",
        "ldp x19, x20, [x1, #0x00]",
        "ldp x21, x22, [x1, #0x10]",
        "ldp x23, x24, [x1, #0x20]",
        "ldp x25, x26, [x1, #0x30]",
        "ldp x27, x28, [x1, #0x40]",
        "ldp x29, x30, [x1, #0x50]",
        "ldr x9, [x1, #0x60]",
        "mov sp, x9",
        "ldp d8, d9, [x1, #0x68]",
        "ldp d10, d11, [x1, #0x78]",
        "ldp d12, d13, [x1, #0x88]",
        "ldp d14, d15, [x1, #0x98]",
        "ret",
    );
}
