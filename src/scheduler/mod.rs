//! # Fragment scheduler
//!
//! The state machine that decides which fragment to load next. It keeps the
//! media buffer filled up to a target length, follows live playlists as they
//! slide, recovers from stalls and load errors, and feeds loaded bytes to a
//! [`FragmentProcessor`].
//!
//! The scheduler never blocks. Every asynchronous step (playlist, key and
//! fragment loads, decryption, demuxing) is requested by publishing an
//! [`Event`] and completes when the matching event comes back through
//! [`EventHandler::handle`]. A periodic [`FragmentScheduler::tick`] drives
//! the rest; see [`drive`].

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use log::{debug, error, info, warn};

use crate::av::TrackType;
use crate::clock::Clock;
use crate::config::Config;
use crate::error::{ErrorDetails, PlaybackError};
use crate::events::{
    Event, EventBus, EventHandler, EventKind, LoadStats, MediaHandle, TimeRange,
};
use crate::format::{ParsedTiming, PushMeta};
use crate::playlist::{Fragment, FragmentRef, Level, LevelDetails};
use crate::remux::{InitTrack, ParsingData};
use crate::timeline::{merge_details, probe_details, update_frag_pts};
use crate::transmux::FragmentProcessor;

mod buffer;
pub mod driver;
mod search;
mod select;
mod state;
mod watchdog;

pub use self::buffer::{buffer_info, is_buffered, BufferInfo, BufferRange};
pub use self::driver::drive;
pub use self::state::State;

use self::buffer::{following_range, range_at};

const SUBSCRIPTIONS: &[EventKind] = &[
    EventKind::MediaAttached,
    EventKind::MediaDetaching,
    EventKind::MediaSeeking,
    EventKind::MediaSeeked,
    EventKind::MediaEnded,
    EventKind::ManifestParsed,
    EventKind::LevelLoaded,
    EventKind::KeyLoaded,
    EventKind::FragChunkLoaded,
    EventKind::FragLoaded,
    EventKind::FragLoadEmergencyAborted,
    EventKind::FragParsingInitSegment,
    EventKind::FragParsingData,
    EventKind::FragParsed,
    EventKind::FragAppended,
    EventKind::BufferAppended,
    EventKind::BufferFlushed,
    EventKind::DemuxerQueueEmpty,
    EventKind::Error,
];

/// Upper bound of the load retry delay, milliseconds.
const MAX_RETRY_DELAY_MS: f64 = 64000.0;

/// Self-raised errors remembered until their bus echo comes back.
const RAISED_LIMIT: usize = 16;

/// Drives fragment loading for one playback session.
pub struct FragmentScheduler {
    bus: EventBus,
    config: Config,
    clock: Arc<dyn Clock>,
    processor: Box<dyn FragmentProcessor>,
    state: State,
    levels: Vec<Level>,
    /// Level of the fragment being loaded.
    level: Option<usize>,
    /// Level the next fragment is taken from, set by the ABR logic.
    next_load_level: Option<usize>,
    level_last_loaded: Option<usize>,
    media: Option<MediaHandle>,
    /// Snapshot of the fragment in flight. Timing refinements are written
    /// both here and to the level table.
    frag_current: Option<Fragment>,
    /// Last fragment fully appended.
    frag_previous: Option<Fragment>,
    /// Fragment still draining through the demuxer after a stop.
    frag_parsing: Option<Fragment>,
    /// Monotonic load counter, `None` before the first load.
    frag_load_idx: Option<u64>,
    /// Consecutive load failures.
    frag_load_error: u32,
    frag_requested_ms: f64,
    /// Chunks pushed for the fragment in flight.
    frag_chunks: usize,
    frag_time_offset: f64,
    frag_last_kbps: Option<f64>,
    stats: LoadStats,
    retry_date: Option<f64>,
    start_position: f64,
    next_load_position: f64,
    /// Furthest play position seen while not seeking.
    last_current_time: f64,
    start_frag_requested: bool,
    loaded_metadata: bool,
    /// Clock time the playhead was first seen frozen.
    stalled: Option<f64>,
    stall_reported: bool,
    nudge_retry: u32,
    immediate_switch: bool,
    previously_paused: bool,
    buffer_ranges: Vec<BufferRange>,
    /// `BufferAppending` published for the fragment in flight and not yet
    /// acknowledged.
    pending_appends: usize,
    audio_codec_switch: bool,
    audio_codec_swap: bool,
    last_audio_codec: Option<String>,
    no_media_count: u32,
    /// Errors handled in [`FragmentScheduler::raise`] whose echo is still on
    /// the bus, oldest first.
    raised: VecDeque<PlaybackError>,
}

impl FragmentScheduler {
    pub fn new(
        bus: EventBus,
        config: Config,
        clock: Arc<dyn Clock>,
        processor: Box<dyn FragmentProcessor>,
    ) -> Self {
        Self {
            bus,
            config,
            clock,
            processor,
            state: State::Stopped,
            levels: Vec::new(),
            level: None,
            next_load_level: None,
            level_last_loaded: None,
            media: None,
            frag_current: None,
            frag_previous: None,
            frag_parsing: None,
            frag_load_idx: None,
            frag_load_error: 0,
            frag_requested_ms: 0.0,
            frag_chunks: 0,
            frag_time_offset: 0.0,
            frag_last_kbps: None,
            stats: LoadStats::default(),
            retry_date: None,
            start_position: 0.0,
            next_load_position: 0.0,
            last_current_time: 0.0,
            start_frag_requested: false,
            loaded_metadata: false,
            stalled: None,
            stall_reported: false,
            nudge_retry: 0,
            immediate_switch: false,
            previously_paused: false,
            buffer_ranges: Vec::new(),
            pending_appends: 0,
            audio_codec_switch: false,
            audio_codec_swap: false,
            last_audio_codec: None,
            no_media_count: 0,
            raised: VecDeque::new(),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn levels(&self) -> &[Level] {
        &self.levels
    }

    pub fn next_load_level(&self) -> Option<usize> {
        self.next_load_level
    }

    pub fn set_next_load_level(&mut self, level: usize) {
        self.next_load_level = Some(level);
    }

    /// Flips the audio codec advertised to the demuxer between AAC and
    /// HE-AAC.
    pub fn swap_audio_codec(&mut self) {
        self.audio_codec_swap = !self.audio_codec_swap;
    }

    pub fn buffer_ranges(&self) -> &[BufferRange] {
        &self.buffer_ranges
    }

    /// Level of the media at the play position.
    pub fn current_level(&self) -> Option<usize> {
        let media = self.media.as_ref()?;
        range_at(&self.buffer_ranges, media.current_time()).map(|r| r.frag.level)
    }

    /// Fragment buffered right after the one playing.
    pub fn next_buffered_fragment(&self) -> Option<FragmentRef> {
        let media = self.media.as_ref()?;
        let current = range_at(&self.buffer_ranges, media.current_time())?;
        following_range(&self.buffer_ranges, current).map(|r| r.frag)
    }

    pub fn next_level(&self) -> Option<usize> {
        self.next_buffered_fragment().map(|f| f.level)
    }

    fn set_state(&mut self, next: State) {
        if self.state == next {
            return;
        }
        let previous = self.state;
        self.state = next;
        debug!("scheduler state transition from {} to {}", previous, next);
        self.bus.publish(Event::StreamStateTransition { previous, next });
    }

    fn now(&self) -> f64 {
        self.clock.now_ms()
    }

    fn buffered(&self) -> Vec<TimeRange> {
        self.media.as_ref().map(|m| m.buffered()).unwrap_or_default()
    }

    fn details(&self, level: usize) -> Option<&LevelDetails> {
        self.levels.get(level).and_then(|l| l.details.as_ref())
    }

    fn level_fragment_mut(&mut self, level: usize, sn: u64) -> Option<&mut Fragment> {
        self.levels
            .get_mut(level)
            .and_then(|l| l.details.as_mut())
            .and_then(|d| d.fragment_mut(sn))
    }

    /// Applies `update` to the fragment in flight and to its entry in the
    /// level table.
    fn update_current(&mut self, update: impl Fn(&mut Fragment)) {
        let Some(frag) = self.frag_current.as_mut() else {
            return;
        };
        update(frag);
        let (level, sn) = (frag.level, frag.sn);
        if let Some(frag) = self.level_fragment_mut(level, sn) {
            update(frag);
        }
    }

    fn matches_current(&self, frag: &FragmentRef) -> bool {
        self.frag_current.as_ref().is_some_and(|current| {
            current.level == frag.level
                && current.sn == frag.sn
                && (frag.load_idx.is_none() || frag.load_idx == current.load_idx)
        })
    }

    fn configured_start(&self) -> f64 {
        if self.config.start_position >= 0.0 {
            self.config.start_position
        } else {
            0.0
        }
    }

    fn bump_load_idx(&mut self) {
        let bump = 2 * self.config.frag_loading_loop_threshold as u64;
        if let Some(idx) = self.frag_load_idx.as_mut() {
            *idx += bump;
        }
    }

    /// Cancels the fragment in flight. Safe to call repeatedly.
    fn abort_current(&mut self) {
        if let Some(frag) = self.frag_current.take() {
            if !frag.loaded {
                debug!("aborting load of sn {} level {}", frag.sn, frag.level);
                self.bus.publish(Event::FragLoadAborted {
                    frag: frag.reference(),
                });
            }
        }
    }

    /// Publishes an error the scheduler found itself and reacts to it.
    ///
    /// The echo coming back through the bus is skipped.
    fn raise(&mut self, err: PlaybackError) {
        if self.raised.len() == RAISED_LIMIT {
            self.raised.pop_front();
        }
        self.raised.push_back(err.clone());
        self.bus.publish(err.clone());
        self.on_error(err);
    }

    /// True once for the bus echo of an error passed to `raise`.
    fn is_echo(&mut self, err: &PlaybackError) -> bool {
        match self.raised.iter().position(|raised| raised == err) {
            Some(at) => {
                self.raised.remove(at);
                true
            }
            None => false,
        }
    }

    pub fn start_load(&mut self, position: f64) {
        if self.levels.is_empty() {
            warn!("cannot start loading as manifest not parsed yet");
            self.set_state(State::Stopped);
            return;
        }
        let resume = self.media.is_some() && self.last_current_time > 0.0;
        let last_current_time = self.last_current_time;
        self.stop_load();
        self.level = None;
        self.frag_load_error = 0;
        if resume {
            info!("resuming load at {:.3}", last_current_time);
            self.last_current_time = last_current_time;
            self.set_state(State::Idle);
        } else {
            self.last_current_time = if self.start_position > 0.0 {
                self.start_position
            } else {
                position
            };
            info!(
                "configure start position at {:.3} (was {:.3}, asked {:.3})",
                self.last_current_time, self.start_position, position
            );
            self.set_state(State::Starting);
        }
        self.start_position = self.last_current_time;
        self.next_load_position = self.last_current_time;
        self.tick();
    }

    pub fn stop_load(&mut self) {
        let parsing = self.frag_current.clone();
        self.abort_current();
        self.frag_previous = None;
        if self.state == State::Parsing {
            self.frag_parsing = parsing;
            self.processor.wait_queue();
        }
        self.set_state(State::Stopped);
    }

    /// Recovers after events were lost on the bus.
    ///
    /// A completion the scheduler waits for may be among the lost events, so
    /// the request in flight is dropped and made again. The fragment in
    /// flight, loaded or not, is aborted and the demuxer reset.
    pub fn resync(&mut self) {
        warn!("resynchronizing scheduler in {}", self.state);
        self.raised.clear();
        match self.state {
            State::FragLoading | State::KeyLoading | State::Parsing | State::Parsed => {
                self.abort_current();
                self.frag_parsing = None;
                self.pending_appends = 0;
                self.processor.reset();
                self.bump_load_idx();
                self.set_state(State::Idle);
            }
            State::WaitingLevel => {
                if let Some(level) = self.level {
                    self.wait_level(level);
                }
            }
            _ => {}
        }
        self.tick();
    }

    pub fn attach_media(&mut self, media: MediaHandle) {
        info!("media attached");
        self.media = Some(media);
        self.processor.reset();
        self.frag_parsing = None;
        if !self.levels.is_empty() && self.config.auto_start_load {
            self.start_load(self.configured_start());
        }
    }

    pub fn detach_media(&mut self) {
        let ended = self.media.as_ref().is_some_and(|m| m.ended());
        if ended || self.state == State::Ended {
            info!("media detaching after end of stream, reset start position");
            self.start_position = 0.0;
            self.last_current_time = 0.0;
        }
        for details in self.levels.iter_mut().filter_map(|l| l.details.as_mut()) {
            for frag in &mut details.fragments {
                frag.load_counter = 0;
            }
        }
        self.media = None;
        self.loaded_metadata = false;
        self.stop_load();
        self.frag_parsing = None;
    }

    /// Runs one scheduling step, plus one more if the state moved.
    pub fn tick(&mut self) {
        let before = self.state;
        self.step();
        if self.state != before {
            self.step();
        }
        self.check_buffer();
        self.check_fragment_changed();
    }

    fn step(&mut self) {
        match self.state {
            State::Starting => {
                let level = self.config.start_level.unwrap_or(0);
                self.level = Some(level);
                self.next_load_level = Some(level);
                self.loaded_metadata = false;
                self.wait_level(level);
            }
            State::Idle => {
                if self.media.is_none() {
                    if self.no_media_count % 20 == 0 {
                        debug!("idle without media attached");
                    }
                    self.no_media_count += 1;
                } else {
                    self.no_media_count = 0;
                }
                self.tick_idle();
            }
            State::WaitingLevel => {
                let ready = self.level.is_some_and(|level| {
                    self.details(level).is_some_and(|d| {
                        !d.live || self.level_last_loaded == Some(level)
                    })
                });
                if ready {
                    self.set_state(State::Idle);
                }
            }
            State::FragLoading => self.check_frag_loading(),
            State::FragLoadingWaitingRetry => {
                let seeking = self.media.as_ref().is_some_and(|m| m.seeking());
                let due = self.retry_date.map_or(true, |date| self.now() >= date);
                if due || seeking {
                    info!("retry date reached, back to IDLE");
                    self.set_state(State::Idle);
                }
            }
            State::Error
            | State::Paused
            | State::Stopped
            | State::Parsing
            | State::Parsed
            | State::Ended
            | State::KeyLoading => {}
        }
    }

    fn wait_level(&mut self, level: usize) {
        self.set_state(State::WaitingLevel);
        self.bus.publish(Event::LevelLoading { level });
    }

    fn check_frag_loading(&mut self) {
        let Some(frag) = self.frag_current.as_ref() else {
            return;
        };
        let (level, sn, reference) = (frag.level, frag.sn, frag.reference());
        let slid = self
            .details(level)
            .is_some_and(|d| d.live && sn < d.start_sn);
        if slid {
            info!("live playlist slid past sn {} while loading, reload", sn);
            self.abort_current();
            self.set_state(State::Idle);
            return;
        }
        if self.now() - self.frag_requested_ms > self.config.frag_loading_timeout_ms {
            warn!("loading sn {} level {} timed out", sn, level);
            self.bus.publish(Event::FragLoadAborted { frag: reference });
            self.raise(PlaybackError::new(ErrorDetails::FragLoadTimeout, false).with_frag(reference));
        }
    }

    fn check_fragment_changed(&mut self) {
        if let Some(media) = self.media.as_ref() {
            if !media.seeking() {
                let current = media.current_time();
                // playback only moves forward once seeked
                if current > self.last_current_time {
                    self.last_current_time = current;
                }
            }
        }
    }

    /// Pauses playback and flushes the whole buffer so the next fragment
    /// comes from the new level.
    pub fn immediate_level_switch(&mut self) {
        info!("immediate level switch");
        if let Some(media) = self.media.clone() {
            if !self.immediate_switch {
                self.immediate_switch = true;
                self.previously_paused = media.paused();
                media.pause();
            }
        }
        if self.state == State::Parsing {
            self.frag_parsing = self.frag_current.clone();
            self.processor.wait_queue();
        }
        self.abort_current();
        self.bump_load_idx();
        self.set_state(State::Paused);
        self.bus.publish(Event::BufferFlushing {
            start_offset: 0.0,
            end_offset: f64::INFINITY,
        });
    }

    fn immediate_level_switch_end(&mut self) {
        let Some(media) = self.media.clone() else {
            return;
        };
        let buffered = media.buffered();
        if buffered.is_empty() {
            return;
        }
        self.immediate_switch = false;
        let current = media.current_time();
        if is_buffered(&buffered, current) {
            // nudge the decoder
            media.set_current_time(current - 0.0001);
        }
        if !self.previously_paused {
            media.play();
        }
    }

    /// Switches level without interrupting playback: flushes what lies
    /// behind the current GOP and, when the next fetch would outrun the
    /// buffer, what lies beyond the next buffered fragment.
    pub fn next_level_switch(&mut self) {
        let Some(media) = self.media.clone() else {
            return;
        };
        if media.ready_state() == 0 {
            return;
        }
        self.bump_load_idx();
        let current = media.current_time();
        if let Some(range) = range_at(&self.buffer_ranges, current) {
            if range.start > 1.0 {
                let end_offset = range.start - 1.0;
                self.set_state(State::Paused);
                self.bus.publish(Event::BufferFlushing {
                    start_offset: 0.0,
                    end_offset,
                });
            }
        }

        let mut fetch_delay = 0.0;
        if !media.paused() {
            let bitrate = self
                .next_load_level
                .and_then(|l| self.levels.get(l))
                .map(|l| l.bitrate as f64);
            if let (Some(kbps), Some(frag), Some(bitrate)) =
                (self.frag_last_kbps, self.frag_current.as_ref(), bitrate)
            {
                if kbps > 0.0 {
                    fetch_delay = frag.duration * bitrate / (1000.0 * kbps) + 1.0;
                }
            }
        }

        let flush_from = range_at(&self.buffer_ranges, current + fetch_delay)
            .and_then(|r| following_range(&self.buffer_ranges, r))
            .map(|r| r.start);
        if let Some(start_offset) = flush_from {
            self.abort_current();
            self.set_state(State::Paused);
            self.bus.publish(Event::BufferFlushing {
                start_offset,
                end_offset: f64::INFINITY,
            });
        }
    }

    fn live_sync_position(&self, sliding: f64, details: &LevelDetails) -> f64 {
        let target_latency = self
            .config
            .live_sync_duration
            .unwrap_or(self.config.live_sync_duration_count * details.target_duration);
        sliding + (details.total_duration - target_latency).max(0.0)
    }

    fn on_media_seeking(&mut self) {
        let Some(media) = self.media.clone() else {
            return;
        };
        let current = media.current_time();
        info!("media seeking to {:.3}", current);
        match self.state {
            State::FragLoading => {
                if buffer_info(&media.buffered(), current, 0.0).len == 0.0 {
                    info!("seeking outside of buffer while loading, cancel fragment load");
                    self.abort_current();
                    self.frag_previous = None;
                    self.set_state(State::Idle);
                }
            }
            State::Ended => self.set_state(State::Idle),
            State::Parsing if self.frag_current.as_ref().is_some_and(|f| !f.loaded) => {
                info!("seeking before final chunk, back to IDLE");
                self.set_state(State::Idle);
            }
            _ => {}
        }
        self.last_current_time = current;
        self.bump_load_idx();
        if !self.loaded_metadata {
            self.next_load_position = current;
            self.start_position = current;
        }
        self.stalled = None;
        self.tick();
    }

    fn on_media_ended(&mut self) {
        info!("media ended");
        self.start_position = 0.0;
        self.last_current_time = 0.0;
    }

    fn on_manifest_parsed(&mut self, levels: Vec<Level>) {
        let has_codec = |codec: &str| {
            levels
                .iter()
                .any(|l| l.audio_codec.as_deref().is_some_and(|c| c.contains(codec)))
        };
        self.audio_codec_switch = has_codec("mp4a.40.2") && has_codec("mp4a.40.5");
        if self.audio_codec_switch {
            info!("both AAC and HE-AAC found in levels, declaring level codec as HE-AAC");
        }
        self.bus.publish(Event::BufferReset);
        self.buffer_ranges.clear();
        self.stalled = None;
        self.levels = levels;
        self.level_last_loaded = None;
        self.start_frag_requested = false;
        self.processor.reset();
        self.frag_parsing = None;
        if self.config.auto_start_load {
            self.start_load(self.configured_start());
        }
    }

    fn on_level_loaded(&mut self, level: usize, mut details: LevelDetails) {
        let Some(current) = self.levels.get(level) else {
            warn!("ignoring details of unknown level {}", level);
            return;
        };
        info!(
            "level {} loaded [{},{}], duration {:.3}",
            level, details.start_sn, details.end_sn, details.total_duration
        );
        details.loaded_at_ms = Some(self.now());
        let last_details = self
            .level_last_loaded
            .and_then(|l| self.details(l))
            .cloned();

        let mut sliding = 0.0;
        if details.live {
            let mut previous = current.details.clone();
            if let Some(last) = last_details {
                if probe_details(&last, &details).is_some() {
                    previous = Some(last);
                }
            }
            match previous {
                Some(previous) => {
                    merge_details(&previous, &mut details);
                    sliding = details.start();
                    if details.pts_known {
                        info!("live playlist sliding {:.3}", sliding);
                    } else {
                        info!("live playlist, outdated PTS, unknown sliding");
                    }
                }
                None => {
                    details.pts_known = false;
                    info!("live playlist, first load, unknown sliding");
                }
            }
        } else {
            details.pts_known = false;
            if let Some(last) = last_details {
                merge_details(&last, &mut details);
            }
        }

        if !self.start_frag_requested {
            if details.live {
                self.start_position = if self.config.start_position >= 0.0 {
                    self.config.start_position
                } else {
                    self.live_sync_position(sliding, &details)
                };
                info!("configure start position to {:.3}", self.start_position);
            }
            self.next_load_position = self.start_position;
        }
        self.level_last_loaded = Some(level);
        self.levels[level].details = Some(details);

        if self.state == State::WaitingLevel {
            self.set_state(State::Idle);
        }
        self.tick();
    }

    fn on_key_loaded(&mut self, frag: FragmentRef, key: [u8; 16]) {
        let uri = self
            .details(frag.level)
            .and_then(|d| d.fragment(frag.sn))
            .and_then(|f| f.decrypt.as_ref())
            .and_then(|d| d.uri.clone());
        if let Some(details) = self.levels.get_mut(frag.level).and_then(|l| l.details.as_mut()) {
            for decrypt in details.fragments.iter_mut().filter_map(|f| f.decrypt.as_mut()) {
                if decrypt.key.is_none() && decrypt.uri == uri {
                    decrypt.key = Some(key);
                }
            }
        }
        if self.state == State::KeyLoading {
            self.set_state(State::Idle);
            self.tick();
        }
    }

    fn audio_codec_hint(&self, level: &Level) -> Option<String> {
        let mut codec = self
            .config
            .default_audio_codec
            .clone()
            .or_else(|| level.audio_codec.clone());
        if self.audio_codec_swap {
            debug!("swapping playlist audio codec");
            codec = codec.or_else(|| self.last_audio_codec.clone()).map(|c| {
                if c.contains("mp4a.40.5") {
                    "mp4a.40.2".to_string()
                } else {
                    "mp4a.40.5".to_string()
                }
            });
        }
        codec
    }

    fn push_current(&mut self, payload: Bytes, final_chunk: bool) {
        let Some(frag) = self.frag_current.as_ref() else {
            return;
        };
        let Some(level) = self.levels.get(frag.level) else {
            return;
        };
        let Some(details) = level.details.as_ref() else {
            return;
        };
        let meta = PushMeta {
            audio_codec: self.audio_codec_hint(level),
            video_codec: level.video_codec.clone(),
            time_offset: self.frag_time_offset,
            cc: frag.cc,
            level: frag.level,
            sn: frag.sn,
            duration: details.total_duration,
            accurate: details.pts_known || !details.live,
            first: self.frag_chunks == 0,
            final_chunk,
            last_sn: Some(details.end_sn),
            load_idx: frag.load_idx,
        };
        debug!(
            "demuxing sn {} of [{},{}], level {}, cc {}",
            frag.sn, details.start_sn, details.end_sn, frag.level, frag.cc
        );
        let decrypt = frag.decrypt.clone();
        self.frag_chunks += 1;
        self.processor.push(payload, decrypt, meta);
    }

    fn on_frag_chunk_loaded(&mut self, frag: FragmentRef, payload: Bytes, stats: LoadStats) {
        if !matches!(self.state, State::FragLoading | State::Parsing) || !self.matches_current(&frag) {
            debug!("ignoring chunk of sn {} level {}", frag.sn, frag.level);
            return;
        }
        debug!(
            "loaded chunk of {} bytes of sn {} level {}",
            payload.len(),
            frag.sn,
            frag.level
        );
        self.set_state(State::Parsing);
        self.merge_stats(stats);
        self.push_current(payload, false);
    }

    fn on_frag_loaded(&mut self, frag: FragmentRef, stats: LoadStats) {
        if !matches!(self.state, State::FragLoading | State::Parsing) || !self.matches_current(&frag) {
            debug!("ignoring completion of sn {} level {}", frag.sn, frag.level);
            return;
        }
        info!("loaded sn {} of level {}", frag.sn, frag.level);
        self.set_state(State::Parsing);
        self.merge_stats(stats);
        self.push_current(Bytes::new(), true);
        self.update_current(|f| f.loaded = true);
    }

    fn merge_stats(&mut self, stats: LoadStats) {
        let trequest = self.stats.trequest;
        self.stats = stats;
        if self.stats.trequest == 0.0 {
            self.stats.trequest = trequest;
        }
        if self.stats.tfirst == 0.0 {
            self.stats.tfirst = self.now();
        }
    }

    fn on_parsing_init_segment(&mut self, frag: FragmentRef, mut tracks: Vec<InitTrack>) {
        if self.state != State::Parsing || !self.matches_current(&frag) {
            warn!("not in PARSING state but {}, ignoring init segment", self.state);
            return;
        }
        let swap = self.audio_codec_swap;
        let force_he_aac = self.audio_codec_switch;
        let Some(level) = self.levels.get_mut(frag.level) else {
            return;
        };
        for track in &mut tracks {
            match track.kind {
                TrackType::Audio => {
                    if level.audio_codec.is_none() {
                        level.audio_codec = track.codec.clone();
                    }
                    let mut codec = level.audio_codec.clone();
                    if swap {
                        codec = codec.map(|c| {
                            if c.contains("mp4a.40.5") {
                                "mp4a.40.2".to_string()
                            } else {
                                "mp4a.40.5".to_string()
                            }
                        });
                    }
                    if force_he_aac {
                        codec = Some("mp4a.40.5".to_string());
                    }
                    track.level_codec = codec;
                    self.last_audio_codec = track.codec.clone();
                }
                TrackType::Video => {
                    if level.video_codec.is_none() {
                        level.video_codec = track.codec.clone();
                    }
                    track.level_codec = level.video_codec.clone();
                }
                TrackType::Id3 | TrackType::Text => {}
            }
            debug!(
                "track {}, container {}, codecs [level/parsed] = [{:?}/{:?}]",
                track.kind.as_str(),
                track.container,
                track.level_codec,
                track.codec
            );
        }

        self.bus.publish(Event::BufferCodecs {
            tracks: tracks.clone(),
        });
        for track in tracks {
            if let Some(data) = track.init_segment {
                self.pending_appends += 1;
                self.bus.publish(Event::BufferAppending {
                    kind: track.kind,
                    data,
                });
            }
        }
        self.tick();
    }

    fn on_parsing_data(&mut self, frag: FragmentRef, data: ParsingData) {
        let draining = self
            .frag_parsing
            .as_ref()
            .is_some_and(|f| f.level == frag.level && f.sn == frag.sn);
        let current = self.state == State::Parsing && self.matches_current(&frag);
        if !current && !draining {
            warn!("not in PARSING state but {}, ignoring parsing data", self.state);
            return;
        }
        debug!(
            "parsed {}, PTS [{:.3},{:.3}], DTS [{:.3},{:.3}], nb {}, dropped {}",
            data.kind.as_str(),
            data.start_pts,
            data.end_pts,
            data.start_dts,
            data.end_dts,
            data.nb,
            data.dropped
        );

        if current && data.kind == TrackType::Video {
            let (dropped, delta) = (data.dropped, data.delta_pts.filter(|d| *d != 0.0));
            self.update_current(move |f| {
                f.dropped = dropped;
                if let Some(delta) = delta {
                    f.delta_pts = Some(f.delta_pts.map_or(delta, |known| known.max(delta)));
                }
            });
        }

        self.buffer_ranges.push(BufferRange {
            kind: data.kind,
            start: data.start_pts,
            end: data.end_pts,
            frag,
        });
        for buffer in data.buffers {
            self.pending_appends += 1;
            self.bus.publish(Event::BufferAppending {
                kind: data.kind,
                data: buffer,
            });
        }
        self.tick();
    }

    fn on_frag_parsed(&mut self, frag: FragmentRef, timing: ParsedTiming) {
        if self.state != State::Parsing || !self.matches_current(&frag) {
            debug!("ignoring parsed sn {} level {}", frag.sn, frag.level);
            return;
        }
        self.set_state(State::Parsed);
        debug!(
            "parsed sn {}, PTS [{:?},{:?}], PTSDTSshift {:.3}, lastGopPTS {:?}",
            frag.sn, timing.start_pts, timing.end_pts, timing.pts_dts_shift, timing.last_gop_pts
        );

        match (timing.start_pts, timing.end_pts) {
            (Some(start_pts), Some(end_pts)) => self.apply_parsed_timing(frag, start_pts, end_pts, &timing),
            _ => {
                // force a reload of the previous fragment on the next pick
                let delta = self.config.max_seek_hole + 1.0;
                self.update_current(move |f| {
                    f.dropped = 1;
                    f.delta_pts = Some(delta);
                });
            }
        }

        if self.pending_appends == 0 {
            self.on_frag_appended();
        }
    }

    fn apply_parsed_timing(&mut self, frag: FragmentRef, start_pts: f64, end_pts: f64, timing: &ParsedTiming) {
        let Some(details) = self.levels.get_mut(frag.level).and_then(|l| l.details.as_mut()) else {
            return;
        };
        let drift = update_frag_pts(
            details,
            frag.sn,
            start_pts,
            end_pts,
            timing.pts_dts_shift,
            timing.last_gop_pts,
        );
        let snapshot = details.clone();
        if let (Some(current), Some(parsed)) = (self.frag_current.as_mut(), snapshot.fragment(frag.sn)) {
            current.start = parsed.start;
            current.duration = parsed.duration;
            current.start_pts = parsed.start_pts;
            current.end_pts = parsed.end_pts;
            current.pts_dts_shift = parsed.pts_dts_shift;
            current.last_gop = parsed.last_gop;
        }
        self.bus.publish(Event::LevelPtsUpdated {
            level: frag.level,
            details: snapshot.clone(),
            drift,
        });
        if !snapshot.live {
            for (i, level) in self.levels.iter_mut().enumerate() {
                if i == frag.level {
                    continue;
                }
                if let Some(other) = level.details.as_mut() {
                    merge_details(&snapshot, other);
                }
            }
        }
    }

    fn on_frag_appended(&mut self) {
        if self.state != State::Parsed {
            warn!("not in PARSED state but {}", self.state);
            return;
        }
        if let Some(frag) = self.frag_current.clone() {
            let now = self.now();
            self.stats.tload = self.stats.tload.max(self.stats.tfirst);
            let elapsed = now - self.stats.tfirst;
            if self.stats.loaded > 0 && elapsed > 0.0 {
                self.frag_last_kbps = Some((8.0 * self.stats.loaded as f64 / elapsed).round());
            }
            debug!("sn {} level {} buffered", frag.sn, frag.level);
            self.bus.publish(Event::FragBuffered {
                frag: frag.reference(),
                stats: self.stats,
            });
            self.frag_previous = Some(frag);
            self.frag_load_error = 0;
            self.set_state(State::Idle);
        }
        self.tick();
    }

    fn on_buffer_appended(&mut self) {
        self.pending_appends = self.pending_appends.saturating_sub(1);
        if self.pending_appends == 0 && self.state == State::Parsed {
            self.on_frag_appended();
        }
    }

    fn on_buffer_flushed(&mut self) {
        let buffered = self.buffered();
        self.buffer_ranges
            .retain(|r| is_buffered(&buffered, (r.start + r.end) / 2.0));
        if self.immediate_switch {
            self.immediate_level_switch_end();
        }
        if self.state != State::Error {
            self.set_state(State::Idle);
        }
        self.frag_previous = None;
    }

    fn on_error(&mut self, err: PlaybackError) {
        match err.details {
            ErrorDetails::FragLoadError | ErrorDetails::FragLoadTimeout => {
                if err.fatal {
                    self.set_state(State::Error);
                    return;
                }
                let stale = !matches!(self.state, State::FragLoading | State::Parsing)
                    || err.frag.is_some_and(|f| !self.matches_current(&f));
                if stale {
                    debug!("ignoring {:?} outside of a load", err.details);
                    return;
                }
                let attempt = self.frag_load_error + 1;
                if attempt <= self.config.frag_loading_max_retry {
                    self.frag_load_error = attempt;
                    self.update_current(|f| f.load_counter = 0);
                    let delay = (2f64.powi(attempt as i32 - 1) * self.config.frag_loading_retry_delay_ms)
                        .min(MAX_RETRY_DELAY_MS);
                    warn!("fragment loading failed, retry in {} ms", delay);
                    self.retry_date = Some(self.now() + delay);
                    self.set_state(State::FragLoadingWaitingRetry);
                } else {
                    error!("{:?} reached max retry, raising it as fatal", err.details);
                    self.bus.publish(PlaybackError { fatal: true, ..err });
                    self.set_state(State::Error);
                }
            }
            ErrorDetails::FragLoopLoadingError
            | ErrorDetails::LevelLoadError
            | ErrorDetails::LevelLoadTimeout
            | ErrorDetails::KeyLoadError
            | ErrorDetails::KeyLoadTimeout => {
                if self.state != State::Error {
                    let next = if err.fatal { State::Error } else { State::Idle };
                    warn!("{:?} while loading, switch to {}", err.details, next);
                    self.set_state(next);
                }
            }
            ErrorDetails::BufferFullError => {
                self.config.max_max_buffer_length /= 2.0;
                warn!(
                    "reduce max buffer length to {:.3}s and switch level to flush old buffer",
                    self.config.max_max_buffer_length
                );
                self.next_level_switch();
            }
            _ => {
                if err.fatal {
                    error!("fatal error: {}", err);
                    self.set_state(State::Error);
                }
            }
        }
    }
}

impl EventHandler for FragmentScheduler {
    fn subscriptions(&self) -> &'static [EventKind] {
        SUBSCRIPTIONS
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::MediaAttached { media } => self.attach_media(media),
            Event::MediaDetaching => self.detach_media(),
            Event::MediaSeeking => self.on_media_seeking(),
            Event::MediaSeeked => self.tick(),
            Event::MediaEnded => self.on_media_ended(),
            Event::ManifestParsed { levels } => self.on_manifest_parsed(levels),
            Event::LevelLoaded { level, details } => self.on_level_loaded(level, details),
            Event::KeyLoaded { frag, key } => self.on_key_loaded(frag, key),
            Event::FragChunkLoaded {
                frag,
                payload,
                stats,
            } => self.on_frag_chunk_loaded(frag, payload, stats),
            Event::FragLoaded { frag, stats } => self.on_frag_loaded(frag, stats),
            Event::FragLoadEmergencyAborted => {
                self.set_state(State::Idle);
                self.tick();
            }
            Event::FragParsingInitSegment { frag, tracks } => self.on_parsing_init_segment(frag, tracks),
            Event::FragParsingData { frag, data } => self.on_parsing_data(frag, data),
            Event::FragParsed { frag, timing } => self.on_frag_parsed(frag, timing),
            Event::FragAppended { frag } => {
                if self.matches_current(&frag) {
                    self.pending_appends = 0;
                    self.on_frag_appended();
                }
            }
            Event::BufferAppended => self.on_buffer_appended(),
            Event::BufferFlushed => self.on_buffer_flushed(),
            Event::DemuxerQueueEmpty => self.frag_parsing = None,
            Event::Error(err) => {
                if !self.is_echo(&err) {
                    self.on_error(err);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests;
