//! x86_64 context switching (System V ABI)

use super::EntryFn;
use std::arch::naked_asm;

/// Callee-saved registers of a suspended context
#[repr(C)]
#[derive(Debug, Default)]
pub struct Context {
    rsp: u64, // 0x00
    rip: u64, // 0x08
    rbx: u64, // 0x10
    rbp: u64, // 0x18
    r12: u64, // 0x20
    r13: u64, // 0x28
    r14: u64, // 0x30
    r15: u64, // 0x38
}

impl Context {
    /// Aim this context at `entry(arg)` running on the stack ending at `stack_top`.
    ///
    /// The trampoline is entered by `jmp`, then reaches `entry` with a
    /// `call`, so the stack pointer starts 16-byte aligned.
    pub fn prepare(&mut self, stack_top: *mut u8, entry: EntryFn, arg: usize) {
        *self = Context {
            rsp: (stack_top as u64) & !0xF,
            rip: coroutine_trampoline as usize as u64,
            r12: entry as usize as u64,
            r13: arg as u64,
            ..Context::default()
        };
    }
}

#[unsafe(naked)]
unsafe extern "C" fn coroutine_trampoline() {
    naked_asm!(
        "mov rdi, r13",
        "call r12",
        // entry never returns
        "ud2",
    );
}

/// Save callee-saved registers into `old` and resume `new`.
///
/// Returns when some other context switches back into `old`.
///
/// # Safety
///
/// `new` must hold a context produced by `prepare` or by an earlier
/// `switch`, whose stack is still mapped.
#[unsafe(naked)]
pub unsafe extern "C" fn switch(_old: *mut Context, _new: *const Context) {
    naked_asm!(
        "mov [rdi + 0x00], rsp",
        "lea rax, [rip + 1f]",
        "mov [rdi + 0x08], rax",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], rbp",
        "mov [rdi + 0x20], r12",
        "mov [rdi + 0x28], r13",
        "mov [rdi + 0x30], r14",
        "mov [rdi + 0x38], r15",
        "mov rsp, [rsi + 0x00]",
        "mov rax, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov rbp, [rsi + 0x18]",
        "mov r12, [rsi + 0x20]",
        "mov r13, [rsi + 0x28]",
        "mov r14, [rsi + 0x30]",
        "mov r15, [rsi + 0x38]",
        "jmp rax",
        "1:",
        "ret",
    );
}
