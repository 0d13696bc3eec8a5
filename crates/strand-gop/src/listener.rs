//! Consumer cursors
//!
//! A listener's cursor is touched only by its own consumer, so it needs no
//! locking of its own; the buffer's read lock covers the slots it copies.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use strand_core::TaskRef;
use strand_runtime::current_task;
use tracing::trace;

use crate::buffer::{GopBuffer, Ring};
use crate::error::{GopError, GopResult};
use crate::media::{MediaKind, MediaUnit};

pub struct GopListener<U: MediaUnit> {
    buffer: Arc<GopBuffer<U>>,
    pos: usize,
    generation: u64,
    skip_video: bool,
    finished: Arc<AtomicBool>,
    /// Coroutine registered with the buffer's event, if any
    registered: Option<TaskRef>,
}

impl<U: MediaUnit> GopListener<U> {
    pub(crate) fn new(buffer: Arc<GopBuffer<U>>, generation: u64) -> GopResult<Self> {
        let mut listener = Self {
            buffer,
            pos: 0,
            generation,
            skip_video: false,
            finished: Arc::new(AtomicBool::new(false)),
            registered: None,
        };
        // Created outside a coroutine: registration waits for the first get
        if current_task().is_some() {
            listener.register()?;
        }
        Ok(listener)
    }

    /// Let a lagging audio-only consumer skip video instead of reading it
    pub fn enable_skip_video(&mut self, on: bool) {
        self.skip_video = on;
    }

    pub fn buffer(&self) -> &Arc<GopBuffer<U>> {
        &self.buffer
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Handle that finishes this listener from elsewhere
    pub fn closer(&self) -> ListenerCloser<U> {
        ListenerCloser {
            finished: Arc::clone(&self.finished),
            buffer: Arc::downgrade(&self.buffer),
        }
    }

    /// Next unit, suspending the calling coroutine until one is visible.
    ///
    /// Returns `Eof` once the producer ended the stream and `Exit` once the
    /// listener or buffer was shut down; both repeat on every later call.
    pub fn get(&mut self) -> GopResult<U> {
        self.register()?;
        loop {
            if let Some(unit) = self.try_get()? {
                return Ok(unit);
            }
            // A timeout only means "look again"
            self.buffer.event.wait(self.buffer.config.wait_timeout)?;
        }
    }

    /// Next unit if one is visible right now
    pub fn try_get(&mut self) -> GopResult<Option<U>> {
        let buffer = Arc::clone(&self.buffer);
        let ring = buffer.read();

        if let Some(reason) = ring.eof {
            return Err(GopError::Eof(reason));
        }
        if ring.finished || self.finished.load(Ordering::Acquire) {
            return Err(GopError::Exit);
        }

        let visible = self.visible(&ring);
        if self.pos < visible {
            let unit = ring.slots[self.pos].clone();
            self.pos += 1;
            Ok(unit)
        } else {
            Ok(None)
        }
    }

    /// How far this cursor may read, moving it forward if it lags too far
    fn visible(&mut self, ring: &Ring<U>) -> usize {
        loop {
            if self.generation == ring.generation {
                return ring.wpos;
            }

            let lag = ring.generation - self.generation;
            // Slots below wpos already hold the new generation
            if lag >= 2 || self.pos < ring.wpos || self.pos >= ring.old_size {
                trace!(
                    from_generation = self.generation,
                    to_generation = ring.generation,
                    pos = self.pos,
                    "listener reset"
                );
                self.generation = ring.generation;
                self.pos = 0;
                return ring.wpos;
            }

            if self.skips_video(ring) {
                while self.pos < ring.old_size && self.is_video_at(ring, self.pos) {
                    self.pos += 1;
                }
                if self.pos >= ring.old_size {
                    // Previous generation exhausted: take the reset above
                    continue;
                }
            }
            return ring.old_size;
        }
    }

    fn skips_video(&self, ring: &Ring<U>) -> bool {
        self.skip_video && ring.has_kind(MediaKind::Audio) && ring.has_kind(MediaKind::Video)
    }

    fn is_video_at(&self, ring: &Ring<U>, pos: usize) -> bool {
        ring.slots[pos]
            .as_ref()
            .is_some_and(|u| ring.kind_of(u.stream_index()) == Some(MediaKind::Video))
    }

    /// Register the calling coroutine with the buffer's event
    fn register(&mut self) -> GopResult<()> {
        let task = current_task();
        if task == self.registered {
            return Ok(());
        }
        self.deregister();
        self.buffer.event.add_waiter()?;
        self.registered = task;
        Ok(())
    }

    fn deregister(&mut self) {
        if let Some(task) = self.registered.take() {
            self.buffer.event.remove_waiter_of(task);
        }
    }
}

impl<U: MediaUnit> Drop for GopListener<U> {
    fn drop(&mut self) {
        self.deregister();
        self.buffer.refs.fetch_sub(1, Ordering::AcqRel);
    }
}

impl<U: MediaUnit> std::fmt::Debug for GopListener<U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GopListener")
            .field("pos", &self.pos)
            .field("generation", &self.generation)
            .field("skip_video", &self.skip_video)
            .finish()
    }
}

/// Finishes a listener from another coroutine or thread
pub struct ListenerCloser<U: MediaUnit> {
    finished: Arc<AtomicBool>,
    buffer: Weak<GopBuffer<U>>,
}

impl<U: MediaUnit> Clone for ListenerCloser<U> {
    fn clone(&self) -> Self {
        Self { finished: Arc::clone(&self.finished), buffer: Weak::clone(&self.buffer) }
    }
}

impl<U: MediaUnit> ListenerCloser<U> {
    /// The listener's next `get` returns `Exit`
    pub fn close(&self) {
        self.finished.store(true, Ordering::Release);
        if let Some(buffer) = self.buffer.upgrade() {
            let _ = buffer.event.set();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GopConfig;
    use crate::error::EofReason;
    use crate::media::{Packet, StreamInfo};
    use std::sync::mpsc;
    use std::time::Duration;
    use strand_core::SchedError;
    use strand_runtime::{sleep, Handle, Runtime, RuntimeConfig};

    fn runtime(workers: usize) -> Runtime {
        Runtime::new(RuntimeConfig::new().workers(workers)).unwrap()
    }

    fn pkt(pts: i64) -> Packet {
        Packet::new(0, pts, false, vec![pts as u8])
    }

    fn no_gate(capacity: usize) -> GopConfig {
        GopConfig::new(capacity).wait_keyframe(false)
    }

    fn drain(l: &mut GopListener<Packet>) -> Vec<i64> {
        let mut out = Vec::new();
        while let Some(p) = l.try_get().unwrap() {
            out.push(p.pts);
        }
        out
    }

    #[test]
    fn test_in_order_within_generation() {
        let rt = runtime(1);
        let buf = GopBuffer::new(rt.handle(), no_gate(16), Vec::new()).unwrap();
        let mut l = buf.create_listener().unwrap();
        for pts in 1..=10 {
            buf.put(pkt(pts)).unwrap();
        }
        assert_eq!(drain(&mut l), (1..=10).collect::<Vec<_>>());
        assert_eq!(l.try_get().unwrap(), None);
    }

    #[test]
    fn test_capacity_four_rotation_scenario() {
        let rt = runtime(1);
        let buf = GopBuffer::new(rt.handle(), no_gate(4), Vec::new()).unwrap();
        let mut l = buf.create_listener().unwrap();

        for pts in 1..=4 {
            buf.put(pkt(pts)).unwrap();
        }
        assert_eq!(drain(&mut l), vec![1, 2, 3, 4]);

        buf.put(pkt(5)).unwrap();
        buf.put(pkt(6)).unwrap();
        assert_eq!(buf.generation(), 1);
        assert_eq!(drain(&mut l), vec![5, 6]);
        assert_eq!(l.generation(), 1);
    }

    #[test]
    fn test_drained_listener_follows_rotation_immediately() {
        let rt = runtime(1);
        let buf = GopBuffer::new(rt.handle(), no_gate(4), Vec::new()).unwrap();
        let mut l = buf.create_listener().unwrap();
        for pts in 1..=4 {
            buf.put(pkt(pts)).unwrap();
        }
        assert_eq!(drain(&mut l), vec![1, 2, 3, 4]);

        buf.put(pkt(5)).unwrap();
        assert_eq!(drain(&mut l), vec![5]);
        buf.put(pkt(6)).unwrap();
        assert_eq!(drain(&mut l), vec![6]);
    }

    #[test]
    fn test_lagging_listener_drains_previous_tail() {
        let rt = runtime(1);
        let buf = GopBuffer::new(rt.handle(), no_gate(4), Vec::new()).unwrap();
        let mut l = buf.create_listener().unwrap();
        for pts in 1..=4 {
            buf.put(pkt(pts)).unwrap();
        }
        assert_eq!(l.try_get().unwrap().map(|p| p.pts), Some(1));
        assert_eq!(l.try_get().unwrap().map(|p| p.pts), Some(2));

        // Overwrites slot 0 only
        buf.put(pkt(5)).unwrap();
        assert_eq!(drain(&mut l), vec![3, 4, 5]);
    }

    #[test]
    fn test_overwritten_cursor_resets() {
        let rt = runtime(1);
        let buf = GopBuffer::new(rt.handle(), no_gate(4), Vec::new()).unwrap();
        let mut l = buf.create_listener().unwrap();
        for pts in 1..=4 {
            buf.put(pkt(pts)).unwrap();
        }
        assert_eq!(l.try_get().unwrap().map(|p| p.pts), Some(1));

        buf.put(pkt(5)).unwrap();
        buf.put(pkt(6)).unwrap();
        // Slot 1 now holds P6, so the cursor moves to the new generation
        assert_eq!(drain(&mut l), vec![5, 6]);
    }

    #[test]
    fn test_lag_of_two_resets_to_current_generation() {
        let rt = runtime(1);
        let buf = GopBuffer::new(rt.handle(), no_gate(4), Vec::new()).unwrap();
        let mut l = buf.create_listener().unwrap();
        for pts in 1..=10 {
            buf.put(pkt(pts)).unwrap();
        }
        assert_eq!(buf.generation(), 2);
        assert_eq!(drain(&mut l), vec![9, 10]);
    }

    #[test]
    fn test_skip_video_fast_forward() {
        let rt = runtime(1);
        let streams = vec![
            StreamInfo::new(0, MediaKind::Video, "h264"),
            StreamInfo::new(1, MediaKind::Audio, "aac"),
        ];
        let buf = GopBuffer::new(rt.handle(), no_gate(4), streams).unwrap();
        let mut l = buf.create_listener().unwrap();
        l.enable_skip_video(true);

        let v = |pts| Packet::new(0, pts, false, vec![0u8]);
        let a = |pts| Packet::new(1, pts, true, vec![1u8]);
        buf.put(a(1)).unwrap();
        buf.put(v(2)).unwrap();
        buf.put(a(3)).unwrap();
        buf.put(v(4)).unwrap();
        assert_eq!(l.try_get().unwrap().map(|p| p.pts), Some(1));

        // Full ring rotates; the listener now lags one generation
        buf.put(a(5)).unwrap();
        // Video at pos 1 is skipped, audio at pos 2 delivered
        assert_eq!(l.try_get().unwrap().map(|p| p.pts), Some(3));
        // Only video left in the old generation: falls through to the reset
        assert_eq!(l.try_get().unwrap().map(|p| p.pts), Some(5));
    }

    #[test]
    fn test_eof_reaches_existing_and_new_listeners() {
        let rt = runtime(1);
        let buf = GopBuffer::new(rt.handle(), no_gate(4), Vec::new()).unwrap();
        let mut early = buf.create_listener().unwrap();
        buf.put(pkt(1)).unwrap();
        buf.put_eof(EofReason::EndOfStream).unwrap();
        let _ = buf.put(pkt(2));

        let mut late = buf.create_listener().unwrap();
        for l in [&mut early, &mut late] {
            assert_eq!(l.try_get(), Err(GopError::Eof(EofReason::EndOfStream)));
            assert_eq!(l.try_get(), Err(GopError::Eof(EofReason::EndOfStream)));
        }
    }

    #[test]
    fn test_get_suspends_until_put() {
        let rt = runtime(2);
        let buf = GopBuffer::new(rt.handle(), no_gate(8), Vec::new()).unwrap();

        let producer = Arc::clone(&buf);
        let got = rt
            .block_on(move || {
                let mut l = producer.create_listener().unwrap();
                let buf = Arc::clone(&producer);
                let target = 1 - strand_runtime::current_task().unwrap().core;
                Handle::current()
                    .spawn_on(target, move || {
                        for pts in 1..=3 {
                            sleep(Duration::from_millis(10));
                            buf.put(pkt(pts)).unwrap();
                        }
                        // Let the listener catch up: EOF preempts unread units
                        sleep(Duration::from_millis(50));
                        buf.put_eof(EofReason::EndOfStream).unwrap();
                    }, 0)
                    .unwrap();

                let mut got = Vec::new();
                loop {
                    match l.get() {
                        Ok(p) => got.push(p.pts),
                        Err(e) => break (got, e),
                    }
                }
            })
            .unwrap();
        assert_eq!(got, (vec![1, 2, 3], GopError::Eof(EofReason::EndOfStream)));
    }

    #[test]
    fn test_reassigned_listener_keeps_registration() {
        let rt = runtime(1);
        let buf = GopBuffer::<Packet>::new(rt.handle(), no_gate(8), Vec::new()).unwrap();
        let b = Arc::clone(&buf);
        let (count, fired, count_after_drop) = rt
            .block_on(move || {
                let mut l = b.create_listener().unwrap();
                assert_eq!(l.position(), 0);
                // The replacement is built before the old listener drops
                l = b.create_listener().unwrap();
                let count = b.event.waiter_count();

                b.event.set().unwrap();
                sleep(Duration::from_millis(20));
                let fired = b.event.wait(Some(Duration::from_millis(100))).unwrap();

                drop(l);
                (count, fired, b.event.waiter_count())
            })
            .unwrap();
        assert_eq!(count, 1);
        assert!(fired, "set while busy was lost");
        assert_eq!(count_after_drop, 0);
    }

    #[test]
    fn test_get_outside_coroutine() {
        let rt = runtime(1);
        let buf = GopBuffer::<Packet>::new(rt.handle(), no_gate(4), Vec::new()).unwrap();
        let mut l = buf.create_listener().unwrap();
        assert_eq!(l.get(), Err(GopError::Sched(SchedError::NotInCoroutine)));
    }

    #[test]
    fn test_closer_exits_waiting_listener() {
        let rt = runtime(2);
        let buf = GopBuffer::<Packet>::new(rt.handle(), no_gate(4), Vec::new()).unwrap();
        let mut l = buf.create_listener().unwrap();
        let closer = l.closer();
        let (tx, rx) = mpsc::channel();

        rt.handle().spawn_on(0, move || tx.send(l.get()).unwrap(), 0).unwrap();

        std::thread::sleep(Duration::from_millis(20));
        closer.close();
        assert!(closer.is_closed());
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), Err(GopError::Exit));

        for _ in 0..200 {
            if buf.listener_count() == 0 {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(buf.listener_count(), 0);
    }

    #[test]
    fn test_cleanup_waits_for_listeners() {
        let rt = runtime(2);
        let buf = GopBuffer::<Packet>::new(rt.handle(), no_gate(4), Vec::new()).unwrap();
        let (tx, rx) = mpsc::channel();

        for core in 0..2 {
            let tx = tx.clone();
            let mut l = buf.create_listener().unwrap();
            rt.handle().spawn_on(core, move || tx.send(l.get()).unwrap(), 0).unwrap();
        }
        assert_eq!(buf.listener_count(), 2);

        let b = Arc::clone(&buf);
        rt.block_on(move || b.cleanup()).unwrap().unwrap();
        assert_eq!(buf.listener_count(), 0);
        for _ in 0..2 {
            assert_eq!(rx.recv().unwrap(), Err(GopError::Exit));
        }
        assert!(matches!(buf.create_listener(), Err(GopError::Eof(EofReason::Cancelled))));
    }
}
