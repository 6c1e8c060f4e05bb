//! Container demuxers.
//!
//! A [`ContainerDemuxer`] consumes the decrypted bytes of one segment at a
//! time and reports what it found through a [`DemuxSink`]: GOP-aligned sample
//! batches for the remuxer, the fragment's parsed timing, and parsing errors.

use bytes::Bytes;

use crate::error::PlaybackError;
use crate::playlist::FragmentRef;
use crate::remux::RemuxBatch;

pub mod aac;
pub mod ts;

pub use self::aac::AACDemuxer;
pub use self::ts::TSDemuxer;

/// Everything the demuxer needs to know about one pushed chunk besides its
/// bytes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PushMeta {
    pub audio_codec: Option<String>,
    pub video_codec: Option<String>,
    /// Seconds; where the segment is expected to start on the timeline.
    pub time_offset: f64,
    pub cc: i64,
    pub level: usize,
    pub sn: u64,
    /// Total duration of the level, seconds.
    pub duration: f64,
    pub accurate: bool,
    pub first: bool,
    pub final_chunk: bool,
    /// Last sequence number of the playlist.
    pub last_sn: Option<u64>,
    /// Load attempt the chunk belongs to, echoed back on parsing events.
    pub load_idx: Option<u64>,
}

impl PushMeta {
    pub fn frag_ref(&self) -> FragmentRef {
        FragmentRef {
            level: self.level,
            sn: self.sn,
            load_idx: self.load_idx,
        }
    }
}

/// Presentation timing of a fully parsed fragment, seconds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedTiming {
    /// `None` when the fragment yielded no samples.
    pub start_pts: Option<f64>,
    pub end_pts: Option<f64>,
    pub pts_dts_shift: f64,
    /// Start of the GOP held back for the next fragment.
    pub last_gop_pts: Option<f64>,
}

#[derive(Debug, Clone)]
pub enum DemuxEvent {
    Remux(RemuxBatch),
    /// The remuxer must drop its state. Set on discontinuity, clear on a
    /// level switch.
    ResetRemuxer { discontinuity: bool },
    Parsed(ParsedTiming),
    Error(PlaybackError),
    /// Video frames dropped so far in the current fragment.
    SkipCount(u32),
}

pub trait DemuxSink {
    fn emit(&mut self, event: DemuxEvent);
}

impl DemuxSink for Vec<DemuxEvent> {
    fn emit(&mut self, event: DemuxEvent) {
        self.push(event);
    }
}

pub trait ContainerDemuxer: Send {
    fn push(&mut self, data: Bytes, meta: &PushMeta, sink: &mut dyn DemuxSink);

    /// Flushes pending samples and forgets every stream.
    fn destroy(&mut self, sink: &mut dyn DemuxSink);
}

/// Cross-segment timestamp continuity, 90 kHz.
///
/// `next_*` values are relative to `init_dts`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Timeline {
    pub init_dts: Option<i64>,
    pub next_video_dts: Option<i64>,
    pub next_audio_pts: Option<i64>,
}

/// Moves `value` by multiples of 2^33 until it lies within 2^32 of
/// `reference`.
pub fn normalize_pts(value: i64, reference: Option<i64>) -> i64 {
    let Some(reference) = reference else {
        return value;
    };
    let wrap = ts::TIMESTAMP_WRAP;
    let offset = if reference < value { -wrap } else { wrap };
    let mut value = value;
    while (value - reference).abs() > wrap / 2 {
        value += offset;
    }
    value
}
