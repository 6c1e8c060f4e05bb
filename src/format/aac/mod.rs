//! Bare ADTS audio segments, optionally prefixed by ID3 tags.

use bytes::{Bytes, BytesMut};
use log::{debug, info};

use crate::av::{AudioTrack, Id3Sample, Id3Track, TextTrack, VideoTrack, PES_TIMESCALE};
use crate::codec::aac::{find_sync, parse_adts_header, scan_frames, AACConfig, AAC_FRAME_SAMPLES};
use crate::error::{ErrorDetails, PlaybackError};
use crate::format::{
    normalize_pts, ContainerDemuxer, DemuxEvent, DemuxSink, ParsedTiming, PushMeta, Timeline,
};
use crate::remux::RemuxBatch;

pub mod id3;

pub struct AACDemuxer {
    audio: AudioTrack,
    id3: Id3Track,
    /// Bytes not yet consumed: an incomplete ID3 tag or ADTS frame.
    pending: Option<Bytes>,
    /// Still looking at the head of the segment.
    in_header: bool,
    next_pts: Option<f64>,
    frag_start_pts: Option<i64>,
    frag_last_pts: Option<i64>,
    last_cc: Option<i64>,
    last_level: Option<usize>,
    last_sn: Option<u64>,
    contiguous: bool,
    timeline: Timeline,
}

impl Default for AACDemuxer {
    fn default() -> Self {
        Self::new()
    }
}

impl AACDemuxer {
    pub fn new() -> Self {
        let mut audio = AudioTrack::default();
        audio.id = Some(0);
        audio.config.container = "audio/adts";
        Self {
            audio,
            id3: Id3Track::default(),
            pending: None,
            in_header: true,
            next_pts: None,
            frag_start_pts: None,
            frag_last_pts: None,
            last_cc: None,
            last_level: None,
            last_sn: None,
            contiguous: false,
            timeline: Timeline::default(),
        }
    }

    /// True for an optional ID3 prefix followed by an ADTS sync word.
    pub fn probe(data: &[u8]) -> bool {
        let mut offset = 0;
        while let Some(len) = id3::tag_len(data, offset) {
            offset += len;
        }
        if id3::is_header(data, offset) {
            return false;
        }
        data.len() > offset + 1 && find_sync(data, offset) == Some(offset)
    }

    pub fn timeline(&self) -> Timeline {
        self.timeline
    }

    fn reset(&mut self) {
        let config = std::mem::take(&mut self.audio.config);
        self.audio = AudioTrack::default();
        self.audio.id = Some(0);
        self.audio.config.container = config.container;
        self.id3 = Id3Track::default();
        self.pending = None;
        self.next_pts = None;
    }

    fn frame_duration(&self) -> Option<f64> {
        self.audio
            .config
            .sample_rate
            .map(|rate| AAC_FRAME_SAMPLES as f64 * PES_TIMESCALE as f64 / rate as f64)
    }

    /// Consumes leading ID3 tags. `None` means the head is still incomplete.
    fn parse_head(&mut self, data: &Bytes, meta: &PushMeta) -> Option<usize> {
        let mut offset = 0;
        let mut timestamp = None;
        while id3::is_header(data, offset) {
            let tag = id3::parse_tag(data, offset)?;
            offset += tag.data.len();
            timestamp = timestamp.or(tag.timestamp);
            self.id3.push(Id3Sample { pts: 0, dts: 0, data: tag.data });
        }
        let base = timestamp.unwrap_or((meta.time_offset * PES_TIMESCALE as f64) as i64);
        for sample in &mut self.id3.samples {
            sample.pts = base;
            sample.dts = base;
        }
        debug!("AAC segment base pts {} (from ID3: {})", base, timestamp.is_some());
        self.next_pts = Some(base as f64);
        Some(offset)
    }

    fn configure(&mut self, data: &[u8], meta: &PushMeta, sink: &mut dyn DemuxSink) -> bool {
        let config = parse_adts_header(data)
            .ok()
            .and_then(|header| AACConfig::from_header(&header, meta.audio_codec.as_deref()));
        let Some(config) = config else {
            sink.emit(DemuxEvent::Error(
                PlaybackError::new(ErrorDetails::FragParsingError, true)
                    .with_reason("invalid ADTS sampling index"),
            ));
            return false;
        };
        info!(
            "parsed codec:{},rate:{},nb channel:{}",
            config.codec_string(),
            config.sample_rate,
            config.channel_configuration
        );
        let track = &mut self.audio.config;
        track.codec = Some(config.codec_string());
        track.sample_rate = Some(config.sample_rate);
        track.channel_count = config.channel_configuration;
        track.config = config.config;
        self.audio.duration = meta.duration;
        true
    }

    fn emit_batch(&mut self, meta: &PushMeta, flush: bool, sink: &mut dyn DemuxSink) {
        if self.audio.samples.is_empty() && self.id3.samples.is_empty() {
            return;
        }
        let origin = self
            .audio
            .samples
            .first()
            .map(|s| s.pts)
            .or_else(|| self.id3.samples.first().map(|s| s.pts))
            .unwrap_or(0);
        let init_dts = *self
            .timeline
            .init_dts
            .get_or_insert(origin - (PES_TIMESCALE as f64 * meta.time_offset) as i64);
        if let (Some(last), Some(frame)) = (self.audio.samples.last(), self.frame_duration()) {
            self.timeline.next_audio_pts = Some(normalize_pts(
                last.pts + frame.round() as i64 - init_dts,
                self.timeline.next_audio_pts,
            ));
        }
        let batch = RemuxBatch {
            audio: self.audio.take(),
            video: VideoTrack::default(),
            id3: self.id3.take(),
            text: TextTrack::default(),
            time_offset: meta.time_offset,
            contiguous: self.contiguous,
            accurate: meta.accurate,
            flush,
            init_dts,
            raw: None,
        };
        self.audio.sequence_number += 1;
        self.id3.sequence_number += 1;
        sink.emit(DemuxEvent::Remux(batch));
    }

    fn timing(&self, meta: &PushMeta) -> ParsedTiming {
        let (Some(first), Some(last), Some(init_dts), Some(frame)) = (
            self.frag_start_pts,
            self.frag_last_pts,
            self.timeline.init_dts,
            self.frame_duration(),
        ) else {
            return ParsedTiming::default();
        };
        let scale = PES_TIMESCALE as f64;
        let reference = Some((meta.time_offset * scale) as i64);
        ParsedTiming {
            start_pts: Some(normalize_pts(first - init_dts, reference).max(0) as f64 / scale),
            end_pts: Some(
                (normalize_pts(last - init_dts, reference).max(0) as f64 + frame) / scale,
            ),
            pts_dts_shift: 0.0,
            last_gop_pts: None,
        }
    }
}

impl ContainerDemuxer for AACDemuxer {
    fn push(&mut self, data: Bytes, meta: &PushMeta, sink: &mut dyn DemuxSink) {
        if self.last_cc.is_some_and(|cc| cc != meta.cc) {
            self.emit_batch(meta, true, sink);
            self.reset();
            sink.emit(DemuxEvent::ResetRemuxer { discontinuity: false });
            self.timeline = Timeline::default();
            sink.emit(DemuxEvent::ResetRemuxer { discontinuity: true });
        } else if self.last_level.is_some_and(|level| level != meta.level) {
            self.emit_batch(meta, true, sink);
            self.reset();
            sink.emit(DemuxEvent::ResetRemuxer { discontinuity: false });
        }
        self.last_cc = Some(meta.cc);
        self.last_level = Some(meta.level);

        if meta.first {
            self.contiguous = self.last_sn.map(|sn| sn + 1) == Some(meta.sn);
            self.pending = None;
            self.in_header = true;
            self.frag_start_pts = None;
            self.frag_last_pts = None;
            self.audio.clear_samples();
            self.id3.clear_samples();
        }

        let data = match self.pending.take() {
            Some(pending) => {
                let mut joined = BytesMut::with_capacity(pending.len() + data.len());
                joined.extend_from_slice(&pending);
                joined.extend_from_slice(&data);
                joined.freeze()
            }
            None => data,
        };

        let mut offset = 0;
        if self.in_header {
            match self.parse_head(&data, meta) {
                Some(end) => {
                    offset = end;
                    self.in_header = false;
                }
                None if meta.final_chunk => {
                    sink.emit(DemuxEvent::Error(
                        PlaybackError::new(ErrorDetails::FragParsingError, true)
                            .with_reason("truncated ID3 tag in AAC segment"),
                    ));
                    return;
                }
                None => {
                    self.pending = Some(data);
                    return;
                }
            }
        }

        if offset < data.len() {
            match find_sync(&data, offset) {
                Some(sync) => {
                    if sync != offset {
                        sink.emit(DemuxEvent::Error(
                            PlaybackError::new(ErrorDetails::FragParsingError, false)
                                .with_reason(format!("AAC did not start with ADTS header,offset:{}", sync)),
                        ));
                    }
                    offset = sync;
                }
                None if self.frag_start_pts.is_none() && meta.final_chunk => {
                    sink.emit(DemuxEvent::Error(
                        PlaybackError::new(ErrorDetails::FragParsingError, true)
                            .with_reason("no ADTS header found in AAC segment"),
                    ));
                    return;
                }
                None => offset = data.len(),
            }
        }

        if offset < data.len() {
            if self.audio.config.sample_rate.is_none() && !self.configure(&data[offset..], meta, sink) {
                return;
            }
            if let (Some(frame), Some(base)) = (self.frame_duration(), self.next_pts) {
                let scan = scan_frames(&data, offset, base.round() as i64, frame);
                let count = scan.samples.len();
                if let Some(sample) = scan.samples.first() {
                    self.frag_start_pts.get_or_insert(sample.pts);
                }
                for sample in scan.samples {
                    self.audio.push(sample);
                }
                if scan.last_pts.is_some() {
                    self.frag_last_pts = scan.last_pts;
                }
                self.next_pts = Some(base + count as f64 * frame);
                offset = scan.consumed;
            }
        }
        if offset < data.len() && !meta.final_chunk {
            self.pending = Some(data.slice(offset..));
        }

        if meta.final_chunk {
            let flush = meta.last_sn == Some(meta.sn);
            self.emit_batch(meta, flush, sink);
            sink.emit(DemuxEvent::Parsed(self.timing(meta)));
            self.last_sn = Some(meta.sn);
        } else {
            self.emit_batch(meta, false, sink);
        }
    }

    fn destroy(&mut self, sink: &mut dyn DemuxSink) {
        self.reset();
        self.timeline = Timeline::default();
        sink.emit(DemuxEvent::ResetRemuxer { discontinuity: false });
    }
}
