//! The GOP ring buffer (producer side)

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, PoisonError};
use std::time::Duration;

use strand_core::SchedError;
use strand_runtime::{is_in_coroutine, sleep, yield_now, Event, Handle};
use tracing::{debug, trace};

use crate::config::GopConfig;
use crate::error::{EofReason, GopError, GopResult};
use crate::listener::GopListener;
use crate::media::{MediaKind, MediaUnit, StreamInfo, UnitMode};

/// Poll interval of `cleanup` while listeners are still attached
const CLEANUP_POLL: Duration = Duration::from_millis(10);

pub(crate) struct Ring<U> {
    pub(crate) slots: Vec<Option<U>>,
    /// Next slot to write; also the fill level of the current generation
    pub(crate) wpos: usize,
    /// Fill level of the previous generation when it rotated out
    pub(crate) old_size: usize,
    pub(crate) generation: u64,
    pub(crate) streams: Vec<StreamInfo>,
    pub(crate) eof: Option<EofReason>,
    pub(crate) finished: bool,
    /// Non-key video is dropped while set (packet mode with gating)
    awaiting_key: bool,
}

impl<U: MediaUnit> Ring<U> {
    pub(crate) fn kind_of(&self, stream_index: usize) -> Option<MediaKind> {
        self.streams.iter().find(|s| s.index == stream_index).map(|s| s.kind)
    }

    pub(crate) fn has_kind(&self, kind: MediaKind) -> bool {
        self.streams.iter().any(|s| s.kind == kind)
    }

    /// Whether `unit` starts a new group of pictures.
    ///
    /// Audio codecs flag every packet as key, so audio never rotates the
    /// ring; on an all-audio buffer only a full ring rotates.
    fn starts_gop(&self, unit: &U) -> bool {
        U::MODE == UnitMode::Packet
            && unit.is_key()
            && self.kind_of(unit.stream_index()) != Some(MediaKind::Audio)
    }

    fn rotate(&mut self) {
        self.old_size = self.wpos;
        self.wpos = 0;
        self.generation += 1;
    }
}

/// Fixed-capacity ring of media units with one producer and many listeners
pub struct GopBuffer<U: MediaUnit> {
    pub(crate) ring: RwLock<Ring<U>>,
    pub(crate) event: Event,
    pub(crate) config: GopConfig,
    /// Live listeners
    pub(crate) refs: AtomicUsize,
}

impl<U: MediaUnit> GopBuffer<U> {
    pub fn new(handle: &Handle, config: GopConfig, streams: Vec<StreamInfo>) -> GopResult<Arc<Self>> {
        if config.capacity == 0 {
            return Err(SchedError::InvalidConfig("gop capacity must be > 0").into());
        }
        let ring = Ring {
            slots: (0..config.capacity).map(|_| None).collect(),
            wpos: 0,
            old_size: 0,
            generation: 0,
            streams,
            eof: None,
            finished: false,
            awaiting_key: U::MODE == UnitMode::Packet && config.wait_keyframe,
        };
        debug!(capacity = config.capacity, mode = ?U::MODE, "gop buffer created");
        Ok(Arc::new(Self {
            ring: RwLock::new(ring),
            event: Event::new(handle)?,
            config,
            refs: AtomicUsize::new(0),
        }))
    }

    #[inline]
    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Ring<U>> {
        self.ring.read().unwrap_or_else(PoisonError::into_inner)
    }

    #[inline]
    fn write(&self) -> RwLockWriteGuard<'_, Ring<U>> {
        self.ring.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn config(&self) -> &GopConfig {
        &self.config
    }

    pub fn set_streams(&self, streams: Vec<StreamInfo>) {
        self.write().streams = streams;
    }

    pub fn streams(&self) -> Vec<StreamInfo> {
        self.read().streams.clone()
    }

    pub fn generation(&self) -> u64 {
        self.read().generation
    }

    pub fn listener_count(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }

    pub fn is_eof(&self) -> bool {
        self.read().eof.is_some()
    }

    /// Append a unit and wake every listener.
    ///
    /// Never waits for readers. After EOF the stored reason is returned
    /// and the unit is discarded. Yields once afterwards so listeners on
    /// this core get to run between writes.
    pub fn put(&self, unit: U) -> GopResult<()> {
        {
            let mut ring = self.write();
            if let Some(reason) = ring.eof {
                return Err(GopError::Eof(reason));
            }
            if ring.finished {
                return Err(GopError::Exit);
            }

            let starts_gop = ring.starts_gop(&unit);
            if starts_gop || ring.wpos == ring.slots.len() {
                ring.rotate();
                if U::MODE == UnitMode::Packet && self.config.wait_keyframe {
                    ring.awaiting_key = true;
                }
                trace!(generation = ring.generation, old_size = ring.old_size, "rotated");
            }

            if ring.awaiting_key {
                let video = ring.kind_of(unit.stream_index()) == Some(MediaKind::Video);
                if video && !unit.is_key() {
                    trace!(stream = unit.stream_index(), "dropped non-key video while gated");
                    return Ok(());
                }
                // A video keyframe, or any start of a GOP on a buffer
                // without video, opens the gate
                if (video && unit.is_key()) || starts_gop || !ring.has_kind(MediaKind::Video) {
                    ring.awaiting_key = false;
                }
            }

            let wpos = ring.wpos;
            ring.slots[wpos] = Some(unit);
            ring.wpos += 1;
        }

        self.event.set()?;
        yield_now();
        Ok(())
    }

    /// Mark the stream ended; every current and future `get` returns `reason`
    pub fn put_eof(&self, reason: EofReason) -> GopResult<()> {
        {
            let mut ring = self.write();
            if ring.eof.is_none() {
                ring.eof = Some(reason);
                debug!(%reason, "gop eof");
            }
        }
        self.event.set()?;
        Ok(())
    }

    /// Open a cursor at the start of the current generation.
    ///
    /// Fails once the buffer has been cleaned up.
    pub fn create_listener(self: &Arc<Self>) -> GopResult<GopListener<U>> {
        let ring = self.read();
        if ring.finished {
            return Err(GopError::Eof(ring.eof.unwrap_or(EofReason::Cancelled)));
        }
        let generation = ring.generation;
        drop(ring);

        self.refs.fetch_add(1, Ordering::AcqRel);
        GopListener::new(Arc::clone(self), generation)
    }

    /// Shut the buffer down and wait for every listener to go away.
    ///
    /// Listeners see `Exit` from their next `get`. Suspends until the
    /// listener count reaches zero, so it must run inside a coroutine.
    /// Slot storage is released afterwards.
    pub fn cleanup(&self) -> GopResult<()> {
        if !is_in_coroutine() {
            return Err(SchedError::NotInCoroutine.into());
        }

        self.write().finished = true;
        self.event.set()?;

        while self.refs.load(Ordering::Acquire) > 0 {
            sleep(CLEANUP_POLL);
        }

        let mut ring = self.write();
        ring.slots = Vec::new();
        ring.wpos = 0;
        ring.old_size = 0;
        debug!(generation = ring.generation, "gop buffer cleaned up");
        Ok(())
    }
}

impl<U: MediaUnit> std::fmt::Debug for GopBuffer<U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ring = self.read();
        f.debug_struct("GopBuffer")
            .field("capacity", &self.config.capacity)
            .field("wpos", &ring.wpos)
            .field("old_size", &ring.old_size)
            .field("generation", &ring.generation)
            .field("eof", &ring.eof)
            .field("listeners", &self.listener_count())
            .finish()
    }
}
