//! Architecture-specific context switching
//!
//! Each backend provides a `Context` holding the callee-saved register set,
//! `Context::prepare` to aim a fresh context at an entry function on a new
//! stack, and `switch` to save the current registers and load another set.

cfg_if::cfg_if! {
    if #[cfg(target_arch = "x86_64")] {
        mod x86_64;
        pub use self::x86_64::*;
    } else if #[cfg(target_arch = "aarch64")] {
        mod aarch64;
        pub use self::aarch64::*;
    } else {
        compile_error!("strand-runtime supports x86_64 and aarch64 only");
    }
}

/// Entry point of a coroutine; receives the argument given to `prepare`
pub type EntryFn = extern "C" fn(usize) -> !;
