//! # strand - coroutine scheduler for live media relays
//!
//! Cooperative coroutines on a fixed set of worker threads, woken by one
//! shared epoll readiness loop, plus a ring buffer that fans a single
//! media producer out to many consumers.
//!
//! ## Features
//!
//! - **Stackful coroutines**: hand-written context switch on mmap'd stacks
//!   with guard pages; pinned to the core that created them
//! - **Suspension points**: `sleep`, `yield_now`, socket I/O, `poll`,
//!   mutex contention, event waits and GOP reads
//! - **Cross-core dispatch**: spawn on a random or specific core; a full
//!   core answers `Busy` instead of queueing without bound
//! - **GOP buffer**: bounded fan-out with at most one generation of
//!   staleness per consumer and no producer backpressure
//!
//! ## Quick Start
//!
//! ```ignore
//! use strand::{GopBuffer, GopConfig, Packet, Runtime, RuntimeConfig};
//!
//! let rt = Runtime::new(RuntimeConfig::from_env())?;
//! let buf = GopBuffer::<Packet>::new(rt.handle(), GopConfig::default(), Vec::new())?;
//!
//! let mut listener = buf.create_listener()?;
//! rt.handle().schedule(move || {
//!     while let Ok(pkt) = listener.get() {
//!         println!("pts {}", pkt.pts);
//!     }
//! }, 0)?;
//!
//! rt.block_on(move || {
//!     buf.put(Packet::new(0, 0, true, vec![0u8; 188])).unwrap();
//! })?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//!   producer ──put──▶ GopBuffer ──event──▶ GopListener × N
//!                                               │
//!   ┌───────────┐  ┌───────────┐  ┌───────────┐ │ socket send
//!   │  Core 0   │  │  Core 1   │  │  Core N   │◀┘
//!   │ coroutines│  │ coroutines│  │ coroutines│
//!   └─────┬─────┘  └─────┬─────┘  └─────┬─────┘
//!         └──── waiters ─┼──────────────┘
//!                        ▼
//!               ┌─────────────────┐
//!               │ readiness thread│  epoll_wait
//!               └─────────────────┘
//! ```

// Core types
pub use strand_core::{
    CoroutineId, CoroutineState, Interest, SchedError, SchedResult, TaskRef,
};

// Runtime
pub use strand_runtime::{
    current_task, is_in_coroutine, poll, sleep, sleep_us, yield_now, Event, Handle, MsgFlags,
    Mutex, MutexGuard, PollFd, Runtime, RuntimeConfig, Socket, Stats,
};

// GOP fan-out
pub use strand_gop::{
    EofReason, Frame, GopBuffer, GopConfig, GopError, GopListener, GopResult, ListenerCloser,
    MediaKind, MediaUnit, Packet, StreamInfo, UnitMode,
};
