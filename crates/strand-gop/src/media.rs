//! Media units carried by a GOP buffer
//!
//! Payloads are [`Bytes`], so handing a unit to every listener clones a
//! reference count rather than the data.

use bytes::Bytes;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Video,
    Audio,
    Data,
    Subtitle,
}

/// Metadata of one elementary stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub index: usize,
    pub kind: MediaKind,
    /// Codec name as reported by the demuxer ("h264", "aac", ...)
    pub codec: String,
    /// Timestamp units as numerator/denominator seconds
    pub time_base: (i32, i32),
}

impl StreamInfo {
    pub fn new(index: usize, kind: MediaKind, codec: impl Into<String>) -> Self {
        Self { index, kind, codec: codec.into(), time_base: (1, 90_000) }
    }
}

/// Whether a buffer holds compressed packets or decoded frames.
///
/// Fixed per buffer through its unit type. Keyframe rotation and gating
/// apply to packets only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitMode {
    Packet,
    Frame,
}

pub trait MediaUnit: Clone + Send + Sync + 'static {
    const MODE: UnitMode;

    fn stream_index(&self) -> usize;

    fn is_key(&self) -> bool;
}

/// Compressed packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub stream_index: usize,
    pub pts: i64,
    pub dts: i64,
    pub duration: i64,
    pub key: bool,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(stream_index: usize, pts: i64, key: bool, payload: impl Into<Bytes>) -> Self {
        Self { stream_index, pts, dts: pts, duration: 0, key, payload: payload.into() }
    }
}

impl MediaUnit for Packet {
    const MODE: UnitMode = UnitMode::Packet;

    #[inline]
    fn stream_index(&self) -> usize {
        self.stream_index
    }

    #[inline]
    fn is_key(&self) -> bool {
        self.key
    }
}

/// Decoded frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub stream_index: usize,
    pub pts: i64,
    pub key: bool,
    /// Video dimensions; zero for audio
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
}

impl Frame {
    pub fn new(stream_index: usize, pts: i64, data: impl Into<Bytes>) -> Self {
        Self { stream_index, pts, key: false, width: 0, height: 0, data: data.into() }
    }
}

impl MediaUnit for Frame {
    const MODE: UnitMode = UnitMode::Frame;

    #[inline]
    fn stream_index(&self) -> usize {
        self.stream_index
    }

    #[inline]
    fn is_key(&self) -> bool {
        self.key
    }
}
