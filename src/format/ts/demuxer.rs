use bytes::{Bytes, BytesMut};
use log::{debug, info, warn};

use super::parser::TSPacketParser;
use super::pes::PesAssembler;
use super::types::*;
use crate::av::{
    AudioTrack, CaptionSample, Id3Sample, Id3Track, NalUnit, TextTrack, VideoSample, VideoTrack,
    PES_TIMESCALE,
};
use crate::codec::aac::{find_sync, parse_adts_header, scan_frames, AACConfig, AAC_FRAME_SAMPLES};
use crate::codec::h264::{is_intra_slice, parse_sei, parse_sps, split_nal_units};
use crate::config::Config;
use crate::error::{ErrorDetails, PlaybackError};
use crate::format::{
    normalize_pts, ContainerDemuxer, DemuxEvent, DemuxSink, ParsedTiming, PushMeta, Timeline,
};
use crate::remux::RemuxBatch;

/// MPEG Transport Stream demuxer.
///
/// Routes packets to the PAT, the PMT, or one of the H.264, ADTS and ID3
/// streams the PMT names, reassembles PES packets and cuts the accumulated
/// samples into GOP-aligned batches for the remuxer.
pub struct TSDemuxer {
    parser: TSPacketParser,
    recovery_point_keyframes: bool,
    /// Stop at the first batch once codec ids are known.
    codecs_only: bool,

    pmt_pid: Option<u16>,
    pmt_parsed: bool,
    video: VideoTrack,
    audio: AudioTrack,
    id3: Id3Track,
    text: TextTrack,
    video_pes: PesAssembler,
    audio_pes: PesAssembler,
    id3_pes: PesAssembler,
    aac_overflow: Option<Bytes>,
    last_aac_pts: Option<i64>,

    last_cc: Option<i64>,
    last_level: Option<usize>,
    last_sn: Option<u64>,
    audio_codec: Option<String>,
    time_offset: f64,
    duration: f64,
    accurate: bool,
    contiguous: bool,
    last_contiguous: Option<bool>,

    key_frames: u32,
    skip_count: u32,
    remux_video_count: usize,
    remux_audio_count: usize,
    frag_start_pts: Option<i64>,
    frag_start_dts: Option<i64>,
    frag_start_video_pos: usize,
    frag_start_audio_pos: usize,
    /// Decode time the current fragment is expected to start at.
    next_video_ref: Option<i64>,
    next_start_pts: Option<f64>,
    timeline: Timeline,
}

impl TSDemuxer {
    pub fn new(config: &Config, codecs_only: bool) -> Self {
        let mut demuxer = Self {
            parser: TSPacketParser::new(),
            recovery_point_keyframes: config.recovery_point_keyframes,
            codecs_only,
            pmt_pid: None,
            pmt_parsed: false,
            video: VideoTrack::default(),
            audio: AudioTrack::default(),
            id3: Id3Track::default(),
            text: TextTrack::default(),
            video_pes: PesAssembler::default(),
            audio_pes: PesAssembler::default(),
            id3_pes: PesAssembler::default(),
            aac_overflow: None,
            last_aac_pts: None,
            last_cc: None,
            last_level: None,
            last_sn: None,
            audio_codec: None,
            time_offset: 0.0,
            duration: 0.0,
            accurate: false,
            contiguous: false,
            last_contiguous: None,
            key_frames: 0,
            skip_count: 0,
            remux_video_count: 0,
            remux_audio_count: 0,
            frag_start_pts: None,
            frag_start_dts: None,
            frag_start_video_pos: 0,
            frag_start_audio_pos: 0,
            next_video_ref: None,
            next_start_pts: None,
            timeline: Timeline::default(),
        };
        demuxer.audio.config.container = "video/mp2t";
        demuxer
    }

    /// True when `data` starts with three packets at the 188-byte stride.
    pub fn probe(data: &[u8]) -> bool {
        data.len() >= 3 * TS_PACKET_SIZE
            && data[0] == SYNC_BYTE
            && data[TS_PACKET_SIZE] == SYNC_BYTE
            && data[2 * TS_PACKET_SIZE] == SYNC_BYTE
    }

    pub fn timeline(&self) -> Timeline {
        self.timeline
    }

    fn clear_pes(&mut self) {
        self.video_pes.clear();
        self.audio_pes.clear();
        self.id3_pes.clear();
    }

    /// Drops queued samples, keeping stream ids and codec configuration.
    fn clear_samples(&mut self) {
        self.video.clear_samples();
        self.video.config.nb_nalu = 0;
        self.audio.clear_samples();
        self.id3.clear_samples();
        self.text.clear_samples();
    }

    fn switch_level(&mut self, sink: &mut dyn DemuxSink) {
        self.reset_tracks(false, sink);
    }

    fn insert_discontinuity(&mut self, sink: &mut dyn DemuxSink) {
        self.reset_tracks(true, sink);
    }

    /// Flushes what is pending and starts over with fresh tracks, emitting a
    /// single remuxer reset. A discontinuity also drops the timestamp origin.
    fn reset_tracks(&mut self, discontinuity: bool, sink: &mut dyn DemuxSink) {
        self.remux(None, false, true, sink);
        self.pmt_parsed = false;
        self.pmt_pid = None;
        self.clear_pes();

        let sequence = (
            self.video.sequence_number,
            self.audio.sequence_number,
            self.id3.sequence_number,
            self.text.sequence_number,
        );
        self.video = VideoTrack::default();
        self.audio = AudioTrack::default();
        self.audio.config.container = "video/mp2t";
        self.id3 = Id3Track::default();
        self.text = TextTrack::default();
        self.video.sequence_number = sequence.0;
        self.audio.sequence_number = sequence.1;
        self.id3.sequence_number = sequence.2;
        self.text.sequence_number = sequence.3;

        self.aac_overflow = None;
        self.last_aac_pts = None;
        if discontinuity {
            self.timeline.init_dts = None;
        }
        sink.emit(DemuxEvent::ResetRemuxer { discontinuity });
    }

    fn parsing_error(sink: &mut dyn DemuxSink, fatal: bool, reason: String) {
        sink.emit(DemuxEvent::Error(
            PlaybackError::new(ErrorDetails::FragParsingError, fatal).with_reason(reason),
        ));
    }

    fn parse_pat(&mut self, packet: &[u8], offset: usize) {
        self.check_crc(packet, offset);
        match self.parser.parse_pat(&packet[offset..]) {
            Ok(pat) => {
                self.pmt_pid = pat.first_program_pid();
                debug!("PMT pid: {:?}", self.pmt_pid);
            }
            Err(e) => warn!("bad PAT: {}", e),
        }
    }

    fn parse_pmt(&mut self, packet: &[u8], offset: usize) {
        self.check_crc(packet, offset);
        let pmt = match self.parser.parse_pmt(&packet[offset..]) {
            Ok(pmt) => pmt,
            Err(e) => {
                warn!("bad PMT: {}", e);
                return;
            }
        };
        for info in &pmt.elementary_stream_infos {
            let pid = info.elementary_pid;
            match info.stream_type {
                STREAM_TYPE_H264 => {
                    if self.video.id.is_none() {
                        self.video.id = Some(pid);
                    }
                }
                STREAM_TYPE_AAC => {
                    if self.audio.id.is_none() {
                        self.audio.id = Some(pid);
                    }
                }
                STREAM_TYPE_METADATA => {
                    if self.id3.id.is_none() {
                        self.id3.id = Some(pid);
                    }
                }
                other => debug!("unknown stream type: {:#04x}", other),
            }
        }
    }

    fn check_crc(&self, packet: &[u8], offset: usize) {
        if let Some(section) = self.parser.section(packet, offset) {
            if !self.parser.verify_section_crc(section) {
                warn!("PSI section with table id {} failed its CRC", section[0]);
            }
        }
    }

    /// Appends bytes preceding the first start code of a PES to the last
    /// NAL unit of the previous sample.
    fn append_to_last_unit(&mut self, extra: Bytes) {
        let Some(sample) = self.video.samples.last_mut() else {
            return;
        };
        let Some(unit) = sample.units.last_mut() else {
            return;
        };
        let mut joined = BytesMut::with_capacity(unit.data.len() + extra.len());
        joined.extend_from_slice(&unit.data);
        joined.extend_from_slice(&extra);
        unit.data = joined.freeze();
        sample.length += extra.len();
        self.video.len += extra.len();
    }

    fn parse_avc_pes(&mut self, pes: Pes) {
        let scan = split_nal_units(&pes.data);
        if let Some(leading) = scan.leading {
            self.append_to_last_unit(leading);
        }
        let (Some(pts), Some(dts)) = (pes.pts, pes.dts) else {
            for unit in scan.units {
                self.append_to_last_unit(unit.data);
            }
            return;
        };

        let mut key = false;
        let mut units: Vec<NalUnit> = Vec::new();
        for unit in scan.units {
            let push = match unit.nal_type {
                1 => {
                    if is_intra_slice(&unit.data) {
                        key = true;
                    }
                    true
                }
                5 => {
                    key = true;
                    true
                }
                6 => {
                    let sei = parse_sei(&unit.data);
                    if sei.recovery_point && self.recovery_point_keyframes {
                        key = true;
                    }
                    for bytes in sei.captions {
                        self.text.insert_sorted(CaptionSample { pts, bytes });
                    }
                    true
                }
                7 => {
                    if self.video.config.sps.is_none() {
                        self.capture_sps(&unit.data);
                    }
                    true
                }
                8 => {
                    if self.video.config.pps.is_none() {
                        self.video.config.pps = Some(unit.data.clone());
                    }
                    true
                }
                9 => false,
                other => {
                    debug!("skipping NAL unit type {}", other);
                    false
                }
            };
            if push {
                units.push(unit);
            }
        }

        if units.is_empty() {
            return;
        }
        if key || (self.video.config.sps.is_some() && (!self.video.samples.is_empty() || self.contiguous)) {
            let mut sample = VideoSample::new(pts, dts);
            sample.key = key;
            self.video.config.nb_nalu += units.len();
            for unit in units {
                sample.push_unit(unit);
            }
            if key {
                self.key_frames += 1;
            }
            self.video.push(sample);
        } else {
            self.skip_count += 1;
        }
    }

    fn capture_sps(&mut self, data: &Bytes) {
        let config = &mut self.video.config;
        if data.len() >= 4 {
            config.codec = Some(format!("avc1.{:02x}{:02x}{:02x}", data[1], data[2], data[3]));
        }
        match parse_sps(data) {
            Ok(info) => {
                config.width = info.width;
                config.height = info.height;
            }
            Err(e) => warn!("could not parse SPS: {}", e),
        }
        config.sps = Some(data.clone());
        self.video.duration = self.duration;
    }

    fn frame_duration(&self) -> Option<f64> {
        self.audio
            .config
            .sample_rate
            .map(|rate| AAC_FRAME_SAMPLES as f64 * PES_TIMESCALE as f64 / rate as f64)
    }

    fn parse_aac_pes(&mut self, pes: Pes, sink: &mut dyn DemuxSink) {
        let overflowed = self.aac_overflow.is_some();
        let data = match self.aac_overflow.take() {
            Some(overflow) => {
                let mut joined = BytesMut::with_capacity(overflow.len() + pes.data.len());
                joined.extend_from_slice(&overflow);
                joined.extend_from_slice(&pes.data);
                joined.freeze()
            }
            None => pes.data,
        };

        let offset = match find_sync(&data, 0) {
            Some(0) => 0,
            Some(offset) => {
                Self::parsing_error(
                    sink,
                    false,
                    format!("AAC PES did not start with ADTS header,offset:{}", offset),
                );
                offset
            }
            None => {
                Self::parsing_error(sink, true, "no ADTS header found in AAC PES".into());
                return;
            }
        };

        if self.audio.config.sample_rate.is_none() {
            let config = parse_adts_header(&data[offset..])
                .ok()
                .and_then(|header| AACConfig::from_header(&header, self.audio_codec.as_deref()));
            let Some(config) = config else {
                Self::parsing_error(sink, true, "invalid ADTS sampling index".into());
                return;
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
            self.audio.duration = self.duration;
        }
        let Some(frame_duration) = self.frame_duration() else {
            return;
        };

        let Some(mut pts) = pes.pts.or_else(|| {
            self.last_aac_pts
                .map(|last| last + frame_duration.round() as i64)
        }) else {
            debug!("dropping AAC PES without timestamp");
            return;
        };

        // a frame split across PES packets keeps the previous cadence
        if overflowed {
            if let Some(last) = self.last_aac_pts {
                let expected = last as f64 + frame_duration;
                if (expected - pts as f64).abs() > 1.0 {
                    debug!(
                        "AAC: align PTS for overlapping frames by {}",
                        ((expected - pts as f64) / 90.0).round()
                    );
                    pts = expected.round() as i64;
                }
            }
        }

        let scan = scan_frames(&data, offset, pts, frame_duration);
        for sample in scan.samples {
            self.audio.push(sample);
        }
        self.aac_overflow = (scan.consumed < data.len()).then(|| data.slice(scan.consumed..));
        self.last_aac_pts = scan.last_pts;
    }

    fn parse_id3_pes(&mut self, pes: Pes) {
        match pes.pts {
            Some(pts) => self.id3.push(Id3Sample {
                pts,
                dts: pes.dts.unwrap_or(pts),
                data: pes.data,
            }),
            None => debug!("dropping ID3 PES without timestamp"),
        }
    }

    fn flush_video_pes(&mut self) {
        if !self.video_pes.is_empty() {
            if let Some(pes) = self.video_pes.take() {
                self.parse_avc_pes(pes);
            }
        }
    }

    fn flush_audio_pes(&mut self, sink: &mut dyn DemuxSink) {
        if !self.audio_pes.is_empty() {
            if let Some(pes) = self.audio_pes.take() {
                self.parse_aac_pes(pes, sink);
            }
        }
    }

    fn flush_id3_pes(&mut self) {
        if !self.id3_pes.is_empty() {
            if let Some(pes) = self.id3_pes.take() {
                self.parse_id3_pes(pes);
            }
        }
    }

    fn codecs_known(&self) -> bool {
        (self.video.id.is_none() || self.video.config.codec.is_some())
            && (self.audio.id.is_none() || self.audio.config.codec.is_some())
    }

    /// True when the packet loop stopped early on the codec fast path.
    fn parse_packets(&mut self, data: &Bytes, sink: &mut dyn DemuxSink) -> bool {
        let len = data.len() - data.len() % TS_PACKET_SIZE;
        let mut start = 0;
        let mut unknown_pids = false;
        let mut reparsed = false;

        while start < len {
            let packet = &data[start..start + TS_PACKET_SIZE];
            let header = match self.parser.parse_header(packet) {
                Ok(header) => header,
                Err(_) => {
                    Self::parsing_error(sink, false, "TS packet did not start with 0x47".into());
                    start += TS_PACKET_SIZE;
                    continue;
                }
            };
            let Some(mut offset) = self.parser.payload_offset(packet, &header) else {
                start += TS_PACKET_SIZE;
                continue;
            };
            let pid = header.pid;
            let stt = header.payload_unit_start;
            let end = start + TS_PACKET_SIZE;

            if self.pmt_parsed {
                if Some(pid) == self.video.id {
                    if stt {
                        if !self.video_pes.is_empty() {
                            self.flush_video_pes();
                            if self.codecs_only && self.codecs_known() {
                                self.remux(Some(data.clone()), false, false, sink);
                                return true;
                            }
                        }
                        self.video_pes.clear();
                    }
                    self.video_pes.push(data.slice(start + offset..end));
                } else if Some(pid) == self.audio.id {
                    if stt {
                        if !self.audio_pes.is_empty() {
                            self.flush_audio_pes(sink);
                            if self.codecs_only && self.codecs_known() {
                                self.remux(Some(data.clone()), false, false, sink);
                                return true;
                            }
                        }
                        self.audio_pes.clear();
                    }
                    self.audio_pes.push(data.slice(start + offset..end));
                } else if Some(pid) == self.id3.id {
                    if stt {
                        self.flush_id3_pes();
                        self.id3_pes.clear();
                    }
                    self.id3_pes.push(data.slice(start + offset..end));
                }
            } else {
                if stt {
                    offset += packet[offset] as usize + 1;
                }
                if offset < TS_PACKET_SIZE {
                    if pid == PID_PAT {
                        self.parse_pat(packet, offset);
                    } else if Some(pid) == self.pmt_pid {
                        self.parse_pmt(packet, offset);
                        self.pmt_parsed = true;
                        if unknown_pids && !reparsed {
                            debug!("reparsing from segment start after late PMT");
                            reparsed = true;
                            start = 0;
                            continue;
                        }
                    } else if pid != 0x1FFF {
                        unknown_pids = true;
                    }
                }
            }
            start += TS_PACKET_SIZE;
        }
        false
    }

    /// Timing of the current fragment, computed before the GOP cut.
    fn fragment_timing(&self) -> ParsedTiming {
        let scale = PES_TIMESCALE as f64;
        let contiguous = self.last_contiguous == Some(true) || self.contiguous;
        let samples = &self.video.samples;

        if let (Some(first), Some(last)) = (samples.first(), samples.last()) {
            let reference = self.next_video_ref;
            let init_dts = self
                .timeline
                .init_dts
                .unwrap_or(first.dts - (scale * self.time_offset) as i64);
            let start_dts = normalize_pts(self.frag_start_dts.unwrap_or(first.dts) - init_dts, reference)
                .max(0);
            let mut start_pts = normalize_pts(self.frag_start_pts.unwrap_or(first.pts) - init_dts, reference)
                .max(0) as f64
                / scale;
            let mut end_pts = normalize_pts(last.pts - init_dts, reference).max(0) as f64 / scale;
            if let Some(reference) = reference {
                if (start_dts - reference).abs() > 90 {
                    start_pts -= (start_dts - reference) as f64 / scale;
                }
            }

            let emitted = samples.len() + self.remux_video_count;
            if let Some(frag_start_dts) = self.frag_start_dts {
                if emitted > self.frag_start_video_pos + 1 {
                    let frames = (emitted - self.frag_start_video_pos - 1) as f64;
                    end_pts += (last.dts - frag_start_dts) as f64 / frames / scale;
                }
            }

            if self.audio.id.is_some() {
                let next_aac_pts = match (contiguous, self.timeline.next_audio_pts) {
                    (true, Some(next)) => next as f64 / scale,
                    _ => self.time_offset,
                };
                start_pts = start_pts.max(next_aac_pts);
                if let Some(rate) = self.audio.config.sample_rate {
                    let frames = (self.audio.samples.len() + self.remux_audio_count) as f64;
                    let expected = AAC_FRAME_SAMPLES as f64 / rate as f64;
                    end_pts = end_pts.min(next_aac_pts + expected * frames);
                }
            }

            let shift_sample = samples.get(self.frag_start_video_pos).unwrap_or(first);
            return ParsedTiming {
                start_pts: Some(start_pts),
                end_pts: Some(end_pts),
                pts_dts_shift: (shift_sample.pts - shift_sample.dts).max(0) as f64 / scale,
                last_gop_pts: None,
            };
        }

        let audio = &self.audio.samples;
        if let (Some(first), Some(last), Some(frame)) =
            (audio.first(), audio.last(), self.frame_duration())
        {
            let init_dts = self
                .timeline
                .init_dts
                .unwrap_or(first.pts - (scale * self.time_offset) as i64);
            let reference = if contiguous {
                self.timeline.next_audio_pts
            } else {
                Some((self.time_offset * scale) as i64)
            };
            let start = audio.get(self.frag_start_audio_pos).unwrap_or(first);
            let start_pts = normalize_pts(start.pts - init_dts, reference).max(0) as f64 / scale;
            let end_pts =
                (normalize_pts(last.pts - init_dts, reference).max(0) as f64 + frame) / scale;
            return ParsedTiming {
                start_pts: Some(start_pts),
                end_pts: Some(end_pts),
                pts_dts_shift: 0.0,
                last_gop_pts: None,
            };
        }

        ParsedTiming::default()
    }

    /// Hands the accumulated samples to the remuxer.
    ///
    /// Without `flush`, the run from the last keyframe on is held back for the
    /// next call. Raw passthrough data is handed over as is.
    fn remux(&mut self, raw: Option<Bytes>, final_chunk: bool, flush: bool, sink: &mut dyn DemuxSink) {
        let mut timing = final_chunk.then(|| self.fragment_timing());
        let mut saved_video = Vec::new();
        let mut saved_audio = Vec::new();
        let mut saved_id3 = Vec::new();
        let mut saved_text = Vec::new();
        let mut maxk = 0;

        let passthrough = raw.is_some();
        if !flush && !passthrough {
            let samples = &self.video.samples;
            maxk = (1..samples.len()).rev().find(|&k| samples[k].key).unwrap_or(0);
            if maxk > 0 {
                saved_video = self.video.samples.split_off(maxk);
                self.video.recalc();
                self.video.config.nb_nalu = self.video.samples.iter().map(|s| s.units.len()).sum();
                let end_dts = self.video.samples[maxk - 1].dts;
                saved_audio = self.audio.split_after(end_dts);
                saved_id3 = self.id3.split_after(end_dts);
                saved_text = self.text.split_after(end_dts);
            }
        }

        let pending = self.video.samples.len() + self.audio.samples.len();
        if ((flush || passthrough || (final_chunk && self.remux_video_count == 0)) && pending > 0)
            || maxk > 0
        {
            self.remux_video_count += self.video.samples.len();
            self.remux_audio_count += self.audio.samples.len();

            let time_offset = match (flush, self.next_start_pts) {
                (true, Some(next)) => next,
                _ => self.time_offset,
            };
            let origin = self
                .video
                .samples
                .first()
                .map(|s| s.dts)
                .or_else(|| self.audio.samples.first().map(|s| s.pts))
                .unwrap_or(0);
            let init_dts = *self
                .timeline
                .init_dts
                .get_or_insert(origin - (PES_TIMESCALE as f64 * time_offset) as i64);

            let batch = RemuxBatch {
                audio: self.audio.take(),
                video: self.video.take(),
                id3: self.id3.take(),
                text: self.text.take(),
                time_offset,
                contiguous: self.last_contiguous.unwrap_or(self.contiguous),
                accurate: self.accurate,
                flush,
                init_dts,
                raw,
            };
            self.advance_timeline(&batch);
            self.video.sequence_number += 1;
            self.audio.sequence_number += 1;
            self.id3.sequence_number += 1;
            self.text.sequence_number += 1;
            self.video.config.nb_nalu = 0;
            self.last_contiguous = None;
            sink.emit(DemuxEvent::Remux(batch));

            self.video.restore(saved_video);
            self.video.config.nb_nalu = self.video.samples.iter().map(|s| s.units.len()).sum();
            self.audio.restore(saved_audio);
            self.id3.restore(saved_id3);
            self.text.restore(saved_text);
        }

        if let Some(timing) = timing.as_mut() {
            if let (Some(retained), Some(init_dts)) = (self.video.samples.first(), self.timeline.init_dts) {
                let pts = normalize_pts(retained.pts - init_dts, self.next_video_ref).max(0);
                timing.last_gop_pts = Some(pts as f64 / PES_TIMESCALE as f64);
            }
        }
        if let Some(timing) = timing {
            sink.emit(DemuxEvent::Parsed(timing));
        }
    }

    fn advance_timeline(&mut self, batch: &RemuxBatch) {
        let scale = PES_TIMESCALE as f64;
        let init_dts = batch.init_dts;
        let mut end: Option<f64> = None;

        let video = &batch.video.samples;
        if let (Some(first), Some(last)) = (video.first(), video.last()) {
            let step = if video.len() > 1 {
                (last.dts - first.dts) / (video.len() as i64 - 1)
            } else {
                0
            };
            let next = normalize_pts(last.dts + step - init_dts, self.timeline.next_video_dts);
            self.timeline.next_video_dts = Some(next);
            let last_pts = normalize_pts(last.pts + step - init_dts, Some(next));
            end = Some(last_pts as f64 / scale);
        }

        let audio = &batch.audio.samples;
        if let (Some(last), Some(frame)) = (audio.last(), self.frame_duration()) {
            let next = normalize_pts(
                last.pts + frame.round() as i64 - init_dts,
                self.timeline.next_audio_pts,
            );
            self.timeline.next_audio_pts = Some(next);
            let audio_end = next as f64 / scale;
            end = Some(end.map_or(audio_end, |v| v.max(audio_end)));
        }

        if end.is_some() {
            self.next_start_pts = end;
        }
    }
}

impl ContainerDemuxer for TSDemuxer {
    fn push(&mut self, data: Bytes, meta: &PushMeta, sink: &mut dyn DemuxSink) {
        self.audio_codec = meta.audio_codec.clone();
        self.time_offset = meta.time_offset;
        self.duration = meta.duration;
        self.accurate = meta.accurate;
        self.contiguous = false;

        let switched = self.last_level.is_some_and(|level| level != meta.level);
        if self.last_cc.is_some_and(|cc| cc != meta.cc) {
            info!("discontinuity detected at sn {} (cc {})", meta.sn, meta.cc);
            // the track reset covers a level switch at the same boundary
            self.insert_discontinuity(sink);
        } else if switched {
            info!("level switch detected, now on level {} at sn {}", meta.level, meta.sn);
            self.switch_level(sink);
        }
        self.last_cc = Some(meta.cc);
        self.last_level = Some(meta.level);

        let follows = self.last_sn.map(|sn| sn + 1) == Some(meta.sn);
        if follows || !meta.first {
            self.contiguous = true;
        } else {
            self.aac_overflow = None;
            self.clear_pes();
            self.clear_samples();
        }

        if meta.first {
            self.last_contiguous = Some(follows);
            self.key_frames = 0;
            self.skip_count = 0;
            self.remux_video_count = 0;
            self.remux_audio_count = 0;
            self.frag_start_pts = None;
            self.frag_start_dts = None;
            self.frag_start_video_pos = self.video.samples.len();
            self.frag_start_audio_pos = self.audio.samples.len();
            self.next_video_ref = if self.contiguous {
                self.timeline.next_video_dts
            } else {
                Some((self.time_offset * PES_TIMESCALE as f64) as i64)
            };
        }

        if self.parse_packets(&data, sink) {
            return;
        }

        if meta.final_chunk {
            self.flush_video_pes();
            self.flush_audio_pes(sink);
            self.flush_id3_pes();
            if self.key_frames == 0 && self.video.id.is_some() {
                Self::parsing_error(sink, false, format!("No keyframes in segment {}", meta.sn));
            }
            self.last_sn = Some(meta.sn);
        }

        if self.frag_start_pts.is_none() && self.video.samples.len() > self.frag_start_video_pos {
            self.frag_start_pts = Some(self.video.samples[self.frag_start_video_pos].pts);
        }
        if self.frag_start_dts.is_none() {
            self.frag_start_dts = self.video.samples.first().map(|s| s.dts);
        }

        let flush = meta.final_chunk && meta.last_sn == Some(meta.sn);
        self.remux(None, meta.final_chunk, flush, sink);
        if self.skip_count > 0 {
            sink.emit(DemuxEvent::SkipCount(self.skip_count));
        }
    }

    fn destroy(&mut self, sink: &mut dyn DemuxSink) {
        self.switch_level(sink);
        self.timeline = Timeline::default();
        self.duration = 0.0;
    }
}
