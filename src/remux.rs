//! Remuxer boundary.
//!
//! The demuxers hand GOP-aligned [`RemuxBatch`]es to a [`Remuxer`], which
//! turns them into init segments and media buffers for the sink. The MP4
//! fragment writer lives outside this crate; [`ElementaryRemuxer`] is a
//! minimal implementation that forwards raw elementary payloads with their
//! computed timing, and [`PassthroughRemuxer`] hands transport stream bytes
//! to sinks that play MPEG-TS natively.

use std::sync::Arc;

use bytes::Bytes;

use crate::av::{AudioTrack, Id3Track, TextTrack, TrackType, VideoTrack, PES_TIMESCALE};
use crate::Result;

/// Samples handed to the remuxer in one call, ownership included.
#[derive(Debug, Clone, Default)]
pub struct RemuxBatch {
    pub audio: AudioTrack,
    pub video: VideoTrack,
    pub id3: Id3Track,
    pub text: TextTrack,
    /// Seconds on the presentation timeline where this batch is expected to
    /// start when timestamps are not contiguous.
    pub time_offset: f64,
    pub contiguous: bool,
    pub accurate: bool,
    /// Last batch before a reset or the end of the stream.
    pub flush: bool,
    /// 90 kHz origin subtracted from every sample timestamp.
    pub init_dts: i64,
    /// Original container bytes, set only for passthrough remuxers.
    pub raw: Option<Bytes>,
}

impl RemuxBatch {
    pub fn is_empty(&self) -> bool {
        self.audio.samples.is_empty() && self.video.samples.is_empty() && self.raw.is_none()
    }
}

/// One track of an init segment.
#[derive(Debug, Clone, PartialEq)]
pub struct InitTrack {
    pub kind: TrackType,
    pub container: String,
    pub codec: Option<String>,
    /// Codec id as the manifest should have advertised it.
    pub level_codec: Option<String>,
    pub init_segment: Option<Bytes>,
}

/// Media produced for one track by one remux call.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsingData {
    pub kind: TrackType,
    pub start_pts: f64,
    pub end_pts: f64,
    pub start_dts: f64,
    pub end_dts: f64,
    pub buffers: Vec<Bytes>,
    /// Samples carried.
    pub nb: usize,
    pub dropped: u32,
    /// Audio/video start drift in seconds, video only.
    pub delta_pts: Option<f64>,
    pub flush: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RemuxOutput {
    InitSegment(Vec<InitTrack>),
    Data(ParsingData),
}

pub trait Remuxer: Send {
    /// Passthrough remuxers only need codec ids and receive raw container
    /// bytes.
    fn passthrough(&self) -> bool {
        false
    }

    fn remux(&mut self, batch: RemuxBatch) -> Result<Vec<RemuxOutput>>;

    /// Drops timing state. A discontinuity also forgets the timestamp origin.
    fn reset(&mut self, discontinuity: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemuxerKind {
    Mp4,
    Passthrough,
}

pub type RemuxerFactory = Arc<dyn Fn(RemuxerKind) -> Box<dyn Remuxer> + Send + Sync>;

/// Forwards each track's elementary payloads untouched.
///
/// Video buffers are the NAL units of every sample, audio buffers the raw
/// AAC frames. Timing is expressed in seconds relative to the batch's
/// `init_dts`.
#[derive(Debug, Default)]
pub struct ElementaryRemuxer {
    init_sent: bool,
    frame_duration: Option<f64>,
}

impl ElementaryRemuxer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an [`ElementaryRemuxer`] for MP4 output and a
    /// [`PassthroughRemuxer`] whenever passthrough is requested.
    pub fn factory() -> RemuxerFactory {
        Arc::new(|kind: RemuxerKind| match kind {
            RemuxerKind::Mp4 => Box::new(ElementaryRemuxer::new()) as Box<dyn Remuxer>,
            RemuxerKind::Passthrough => Box::new(PassthroughRemuxer::new()),
        })
    }

    fn init_tracks(batch: &RemuxBatch) -> Vec<InitTrack> {
        let mut tracks = Vec::new();
        if batch.audio.config.codec.is_some() {
            tracks.push(InitTrack {
                kind: TrackType::Audio,
                container: batch.audio.config.container.to_string(),
                codec: batch.audio.config.codec.clone(),
                level_codec: batch.audio.config.codec.clone(),
                init_segment: Some(Bytes::from(batch.audio.config.config.clone())),
            });
        }
        if batch.video.config.codec.is_some() {
            let mut init = Vec::new();
            if let Some(sps) = &batch.video.config.sps {
                init.extend_from_slice(sps);
            }
            if let Some(pps) = &batch.video.config.pps {
                init.extend_from_slice(pps);
            }
            tracks.push(InitTrack {
                kind: TrackType::Video,
                container: "video/mp2t".to_string(),
                codec: batch.video.config.codec.clone(),
                level_codec: batch.video.config.codec.clone(),
                init_segment: Some(Bytes::from(init)),
            });
        }
        tracks
    }
}

impl Remuxer for ElementaryRemuxer {
    fn remux(&mut self, batch: RemuxBatch) -> Result<Vec<RemuxOutput>> {
        let mut out = Vec::new();
        let scale = PES_TIMESCALE as f64;
        let origin = batch.init_dts;

        if !self.init_sent {
            let tracks = Self::init_tracks(&batch);
            if !tracks.is_empty() {
                out.push(RemuxOutput::InitSegment(tracks));
                self.init_sent = true;
            }
        }
        if let Some(rate) = batch.audio.config.sample_rate {
            self.frame_duration = Some(1024.0 * scale / rate as f64);
        }

        let audio = &batch.audio.samples;
        if let (Some(first), Some(last)) = (audio.first(), audio.last()) {
            let frame = self.frame_duration.unwrap_or(0.0);
            let start = (first.pts - origin) as f64 / scale;
            let end = ((last.pts - origin) as f64 + frame) / scale;
            out.push(RemuxOutput::Data(ParsingData {
                kind: TrackType::Audio,
                start_pts: start,
                end_pts: end,
                start_dts: start,
                end_dts: end,
                buffers: audio.iter().map(|s| s.unit.clone()).collect(),
                nb: audio.len(),
                dropped: 0,
                delta_pts: None,
                flush: batch.flush,
            }));
        }

        let video = &batch.video.samples;
        if let (Some(first), Some(last)) = (video.first(), video.last()) {
            let step = if video.len() > 1 {
                (last.dts - first.dts) as f64 / (video.len() - 1) as f64
            } else {
                0.0
            };
            let min_pts = video.iter().map(|s| s.pts).min().unwrap_or(first.pts);
            let max_pts = video.iter().map(|s| s.pts).max().unwrap_or(last.pts);
            let delta_pts = audio
                .first()
                .map(|a| (first.pts - a.pts).abs() as f64 / scale);
            out.push(RemuxOutput::Data(ParsingData {
                kind: TrackType::Video,
                start_pts: (min_pts - origin) as f64 / scale,
                end_pts: ((max_pts - origin) as f64 + step) / scale,
                start_dts: (first.dts - origin) as f64 / scale,
                end_dts: ((last.dts - origin) as f64 + step) / scale,
                buffers: video
                    .iter()
                    .flat_map(|s| s.units.iter().map(|u| u.data.clone()))
                    .collect(),
                nb: video.len(),
                dropped: if first.key { 0 } else { 1 },
                delta_pts,
                flush: batch.flush,
            }));
        }

        Ok(out)
    }

    fn reset(&mut self, discontinuity: bool) {
        if discontinuity {
            self.init_sent = false;
        }
    }
}

/// Forwards the original container bytes with codec ids only.
///
/// Media is reported as one buffer per call, starting at the batch's
/// `time_offset`. Batches without raw bytes produce nothing.
#[derive(Debug, Default)]
pub struct PassthroughRemuxer {
    init_sent: bool,
}

impl PassthroughRemuxer {
    pub fn new() -> Self {
        Self::default()
    }

    fn init_tracks(batch: &RemuxBatch) -> Vec<InitTrack> {
        let codecs = [
            (TrackType::Audio, &batch.audio.config.codec),
            (TrackType::Video, &batch.video.config.codec),
        ];
        codecs
            .into_iter()
            .filter_map(|(kind, codec)| {
                codec.as_ref().map(|codec| InitTrack {
                    kind,
                    container: "video/mp2t".to_string(),
                    codec: Some(codec.clone()),
                    level_codec: Some(codec.clone()),
                    init_segment: None,
                })
            })
            .collect()
    }
}

impl Remuxer for PassthroughRemuxer {
    fn passthrough(&self) -> bool {
        true
    }

    fn remux(&mut self, batch: RemuxBatch) -> Result<Vec<RemuxOutput>> {
        let mut out = Vec::new();
        let Some(raw) = batch.raw.clone() else {
            return Ok(out);
        };

        let tracks = Self::init_tracks(&batch);
        if !self.init_sent && !tracks.is_empty() {
            out.push(RemuxOutput::InitSegment(tracks));
            self.init_sent = true;
        }
        let kind = if batch.video.config.codec.is_some() {
            TrackType::Video
        } else {
            TrackType::Audio
        };
        let start = batch.time_offset;
        out.push(RemuxOutput::Data(ParsingData {
            kind,
            start_pts: start,
            end_pts: start,
            start_dts: start,
            end_dts: start,
            buffers: vec![raw],
            nb: 1,
            dropped: 0,
            delta_pts: None,
            flush: batch.flush,
        }));
        Ok(out)
    }

    fn reset(&mut self, discontinuity: bool) {
        if discontinuity {
            self.init_sent = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::av::{AudioSample, NalUnit, VideoSample};
    use pretty_assertions::assert_eq;

    fn batch() -> RemuxBatch {
        let mut batch = RemuxBatch {
            init_dts: 90_000,
            ..Default::default()
        };
        batch.video.config.codec = Some("avc1.42c01e".into());
        batch.audio.config.codec = Some("mp4a.40.2".into());
        batch.audio.config.sample_rate = Some(48_000);
        for (i, key) in [true, false, false].into_iter().enumerate() {
            let mut sample = VideoSample::new(90_000 + i as i64 * 3000, 90_000 + i as i64 * 3000);
            sample.key = key;
            sample.push_unit(NalUnit::new(Bytes::from_static(&[0x65, 0x88])));
            batch.video.push(sample);
        }
        batch.audio.push(AudioSample { pts: 90_000, unit: Bytes::from_static(&[1, 2, 3]) });
        batch
    }

    #[test]
    fn test_first_call_emits_init_segment() {
        let mut remuxer = ElementaryRemuxer::new();
        let out = remuxer.remux(batch()).unwrap();
        assert!(matches!(&out[0], RemuxOutput::InitSegment(t) if t.len() == 2));
        let out = remuxer.remux(batch()).unwrap();
        assert_eq!(out.len(), 2);
        remuxer.reset(true);
        let out = remuxer.remux(batch()).unwrap();
        assert_eq!(out.len(), 3);
    }

    #[test]
    fn test_video_timing_is_relative_to_origin() {
        let mut remuxer = ElementaryRemuxer::new();
        let out = remuxer.remux(batch()).unwrap();
        let video = out
            .iter()
            .find_map(|o| match o {
                RemuxOutput::Data(d) if d.kind == TrackType::Video => Some(d.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(video.start_dts, 0.0);
        assert_eq!(video.end_dts, 0.1);
        assert_eq!(video.nb, 3);
        assert_eq!(video.dropped, 0);
        assert_eq!(video.delta_pts, Some(0.0));
    }

    #[test]
    fn test_factory_honours_kind() {
        let factory = ElementaryRemuxer::factory();
        assert!(!factory(RemuxerKind::Mp4).passthrough());
        assert!(factory(RemuxerKind::Passthrough).passthrough());
    }

    #[test]
    fn test_passthrough_forwards_raw_bytes() {
        let raw = Bytes::from_static(&[0x47, 0x40, 0x00, 0x10]);
        let mut remuxer = PassthroughRemuxer::new();
        let mut input = batch();
        input.time_offset = 6.0;
        input.raw = Some(raw.clone());

        let out = remuxer.remux(input.clone()).unwrap();
        let RemuxOutput::InitSegment(tracks) = &out[0] else {
            panic!("expected init segment first, got {:?}", out[0]);
        };
        assert_eq!(tracks.len(), 2);
        assert!(tracks.iter().all(|t| t.container == "video/mp2t" && t.init_segment.is_none()));
        let RemuxOutput::Data(data) = &out[1] else {
            panic!("expected data, got {:?}", out[1]);
        };
        assert_eq!(data.kind, TrackType::Video);
        assert_eq!(data.buffers, vec![raw]);
        assert_eq!(data.start_pts, 6.0);

        assert_eq!(remuxer.remux(input).unwrap().len(), 1);
        assert!(remuxer.remux(batch()).unwrap().is_empty());
    }
}
