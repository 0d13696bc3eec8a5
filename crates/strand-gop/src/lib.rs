//! # strand-gop
//!
//! Bounded fan-out of one producer's media units to many consumers.
//!
//! A [`GopBuffer`] is a fixed-capacity ring written by exactly one
//! producer. Each consumer reads through its own [`GopListener`] cursor at
//! its own pace. The producer never waits for consumers: a listener that
//! falls more than one generation behind is moved forward to the start of
//! the current generation and loses what it skipped.
//!
//! ## Generations
//!
//! The ring starts a new generation when it fills up or, for packets, when
//! a keyframe arrives, so a generation is one group of pictures. Writes of
//! the new generation overwrite the old one from slot 0, and a listener
//! may keep draining the old generation's tail until its cursor is
//! overwritten.
//!
//! ## Modules
//!
//! - `media` - Packets, frames and stream metadata
//! - `config` - Buffer configuration
//! - `error` - `GopError` and end-of-stream reasons
//! - `buffer` - The ring buffer (producer side)
//! - `listener` - Consumer cursors

pub mod media;
pub mod config;
pub mod error;
pub mod buffer;
pub mod listener;

pub use media::{Frame, MediaKind, MediaUnit, Packet, StreamInfo, UnitMode};
pub use config::GopConfig;
pub use error::{EofReason, GopError, GopResult};
pub use buffer::GopBuffer;
pub use listener::{GopListener, ListenerCloser};
