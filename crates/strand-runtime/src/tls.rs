//! Thread-local pointer to the scheduler core running on this thread
//!
//! Coroutines never migrate, so a coroutine always observes the core of
//! the OS thread it was created on.

use std::cell::Cell;

use crate::worker::Core;

thread_local! {
    static CURRENT_CORE: Cell<*const Core> = const { Cell::new(std::ptr::null()) };
}

/// Install `core` for this worker thread (null to clear)
#[inline]
pub(crate) fn set_core(core: *const Core) {
    CURRENT_CORE.with(|cell| cell.set(core));
}

/// Run `f` with the current core, if this is a worker thread
#[inline]
pub(crate) fn with_core<R>(f: impl FnOnce(&Core) -> R) -> Option<R> {
    let ptr = CURRENT_CORE.with(|cell| cell.get());
    if ptr.is_null() {
        None
    } else {
        // Safety: the pointer is set by the worker loop to a Core living on
        // its own stack and cleared before that frame returns
        Some(f(unsafe { &*ptr }))
    }
}

/// True if we are on a worker thread (in a coroutine or the core loop)
#[inline]
pub(crate) fn on_worker() -> bool {
    CURRENT_CORE.with(|cell| !cell.get().is_null())
}
