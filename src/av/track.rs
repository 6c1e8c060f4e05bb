use bytes::Bytes;

use super::{AudioSample, CaptionSample, Id3Sample, TimedSample, VideoSample};

/// Samples of one elementary stream waiting for the next remux call.
#[derive(Debug, Clone, PartialEq)]
pub struct Track<S, C> {
    /// Transport-stream PID, `None` until the program map names it.
    pub id: Option<u16>,
    pub samples: Vec<S>,
    /// Running byte length of `samples`.
    pub len: usize,
    /// Number of remux calls this track has fed.
    pub sequence_number: u64,
    pub duration: f64,
    pub config: C,
}

impl<S: TimedSample, C: Default> Default for Track<S, C> {
    fn default() -> Self {
        Self {
            id: None,
            samples: Vec::new(),
            len: 0,
            sequence_number: 0,
            duration: 0.0,
            config: C::default(),
        }
    }
}

impl<S: TimedSample, C: Clone> Track<S, C> {
    pub fn push(&mut self, sample: S) {
        self.len += sample.byte_len();
        self.samples.push(sample);
    }

    pub fn recalc(&mut self) {
        self.len = self.samples.iter().map(TimedSample::byte_len).sum();
    }

    /// Drops every queued sample but keeps the id and codec config.
    pub fn clear_samples(&mut self) {
        self.samples.clear();
        self.len = 0;
    }

    /// Moves the queued samples out, leaving an empty track with the same
    /// identity behind.
    pub fn take(&mut self) -> Self {
        let samples = std::mem::take(&mut self.samples);
        let len = self.len;
        self.len = 0;
        Self {
            id: self.id,
            samples,
            len,
            sequence_number: self.sequence_number,
            duration: self.duration,
            config: self.config.clone(),
        }
    }

    /// Keeps samples timed at or before `end` and returns the rest.
    pub fn split_after(&mut self, end: i64) -> Vec<S> {
        let (keep, rest): (Vec<S>, Vec<S>) = std::mem::take(&mut self.samples)
            .into_iter()
            .partition(|s| s.dts() <= end);
        self.samples = keep;
        self.recalc();
        rest
    }

    /// Puts samples back in front of any queued ones.
    pub fn restore(&mut self, mut saved: Vec<S>) {
        saved.append(&mut self.samples);
        self.samples = saved;
        self.recalc();
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VideoConfig {
    pub codec: Option<String>,
    pub width: u32,
    pub height: u32,
    pub sps: Option<Bytes>,
    pub pps: Option<Bytes>,
    /// NAL units queued across all samples.
    pub nb_nalu: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioConfig {
    pub codec: Option<String>,
    pub sample_rate: Option<u32>,
    pub channel_count: u8,
    /// AudioSpecificConfig bytes for the init segment.
    pub config: Vec<u8>,
    /// Container the samples came from, `video/mp2t` or `audio/adts`.
    pub container: &'static str,
}

pub type VideoTrack = Track<VideoSample, VideoConfig>;
pub type AudioTrack = Track<AudioSample, AudioConfig>;
pub type Id3Track = Track<Id3Sample, ()>;
pub type TextTrack = Track<CaptionSample, ()>;

impl TextTrack {
    /// Inserts a caption keeping the track ordered by presentation time.
    pub fn insert_sorted(&mut self, sample: CaptionSample) {
        let idx = self.samples.partition_point(|s| s.pts <= sample.pts);
        self.len += sample.bytes.len();
        self.samples.insert(idx, sample);
    }
}
