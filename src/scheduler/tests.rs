use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tokio::sync::broadcast;
use url::Url;

use super::*;
use crate::clock::ManualClock;
use crate::events::{route, MediaElement, SimulatedMedia, HAVE_ENOUGH_DATA};
use crate::playlist::DecryptMetadata;

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Push {
        len: usize,
        keyed: bool,
        meta: PushMeta,
    },
    WaitQueue,
    Reset,
}

struct Recorder(Arc<Mutex<Vec<Call>>>);

impl FragmentProcessor for Recorder {
    fn push(&mut self, payload: Bytes, decrypt: Option<DecryptMetadata>, meta: PushMeta) {
        self.0.lock().push(Call::Push {
            len: payload.len(),
            keyed: decrypt.is_some_and(|d| d.key.is_some()),
            meta,
        });
    }

    fn wait_queue(&mut self) {
        self.0.lock().push(Call::WaitQueue);
    }

    fn reset(&mut self) {
        self.0.lock().push(Call::Reset);
    }
}

struct Harness {
    scheduler: FragmentScheduler,
    rx: broadcast::Receiver<Event>,
    clock: Arc<ManualClock>,
    media: Arc<SimulatedMedia>,
    calls: Arc<Mutex<Vec<Call>>>,
}

impl Harness {
    fn new(config: Config) -> Self {
        let bus = EventBus::new(4096);
        let rx = bus.subscribe();
        let clock = ManualClock::new(0.0);
        let calls = Arc::new(Mutex::new(Vec::new()));
        let scheduler = FragmentScheduler::new(
            bus,
            config,
            clock.clone(),
            Box::new(Recorder(calls.clone())),
        );
        let media = SimulatedMedia::new();
        media.set_ready_state(HAVE_ENOUGH_DATA);
        Self {
            scheduler,
            rx,
            clock,
            media,
            calls,
        }
    }

    fn feed(&mut self, event: Event) {
        route(&mut self.scheduler, event);
    }

    /// Everything published since the last call.
    fn events(&mut self) -> Vec<Event> {
        let mut out = Vec::new();
        while let Ok(event) = self.rx.try_recv() {
            out.push(event);
        }
        out
    }

    fn attach(&mut self) {
        let media = MediaHandle::new(self.media.clone());
        self.feed(Event::MediaAttached { media });
    }

    fn start(&mut self, levels: Vec<Level>, details: LevelDetails) {
        self.attach();
        self.feed(Event::ManifestParsed { levels });
        self.feed(Event::LevelLoaded { level: 0, details });
    }

    fn current(&self) -> FragmentRef {
        self.scheduler
            .frag_current
            .as_ref()
            .map(Fragment::reference)
            .expect("no fragment in flight")
    }

    fn stats(&self) -> LoadStats {
        let now = self.clock.now_ms();
        LoadStats {
            trequest: now,
            tfirst: now,
            tload: now,
            loaded: 1000,
            total: Some(1000),
        }
    }

    fn load_chunk(&mut self) -> FragmentRef {
        let frag = self.current();
        let stats = self.stats();
        self.feed(Event::FragChunkLoaded {
            frag,
            payload: Bytes::from_static(&[0x47; 188]),
            stats,
        });
        frag
    }

    /// Plays loader, demuxer and sink for the fragment in flight.
    fn complete(&mut self) -> u64 {
        let frag = self
            .scheduler
            .frag_current
            .clone()
            .expect("no fragment in flight");
        let reference = self.load_chunk();
        let stats = self.stats();
        self.feed(Event::FragLoaded {
            frag: reference,
            stats,
        });
        self.feed(Event::FragParsingData {
            frag: reference,
            data: video_data(frag.start, frag.end()),
        });
        self.media.add_buffered(frag.start, frag.end());
        self.feed(Event::FragParsed {
            frag: reference,
            timing: ParsedTiming {
                start_pts: Some(frag.start),
                end_pts: Some(frag.end()),
                ..Default::default()
            },
        });
        self.feed(Event::BufferAppended);
        frag.sn
    }

    fn pushes(&self) -> Vec<(usize, bool, PushMeta)> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::Push { len, keyed, meta } => Some((*len, *keyed, meta.clone())),
                _ => None,
            })
            .collect()
    }
}

fn level(bitrate: u32) -> Level {
    Level::new(bitrate).with_codecs(Some("mp4a.40.2"), Some("avc1.42c01e"))
}

fn vod(count: usize, duration: f64) -> LevelDetails {
    LevelDetails::from_durations(0, 0, &vec![duration; count], false)
}

fn video_data(start: f64, end: f64) -> ParsingData {
    ParsingData {
        kind: TrackType::Video,
        start_pts: start,
        end_pts: end,
        start_dts: start,
        end_dts: end,
        buffers: vec![Bytes::from_static(b"moof")],
        nb: 1,
        dropped: 0,
        delta_pts: None,
        flush: false,
    }
}

fn loading(events: &[Event]) -> Vec<(usize, u64)> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::FragLoading { frag } => Some((frag.level, frag.sn)),
            _ => None,
        })
        .collect()
}

fn errors(events: &[Event]) -> Vec<(ErrorDetails, bool)> {
    events
        .iter()
        .filter_map(|e| match e {
            Event::Error(err) => Some((err.details, err.fatal)),
            _ => None,
        })
        .collect()
}

fn count(events: &[Event], kind: EventKind) -> usize {
    events.iter().filter(|e| e.kind() == kind).count()
}

#[test]
fn test_buffer_target_limits_prefetch() {
    let mut h = Harness::new(Config::default());
    h.start(vec![level(20_000_000)], vod(10, 6.0));

    let mut loaded = Vec::new();
    while h.scheduler.state() == State::FragLoading {
        loaded.push(h.complete());
    }
    assert_eq!(loaded, vec![0, 1, 2, 3, 4]);
    assert_eq!(h.scheduler.state(), State::Idle);

    h.scheduler.tick();
    assert_eq!(h.scheduler.state(), State::Idle);

    h.media.set_current_time(7.0);
    h.scheduler.tick();
    assert_eq!(h.scheduler.state(), State::FragLoading);
    assert_eq!(h.current().sn, 5);
}

#[test]
fn test_start_requests_level_then_first_fragment() {
    let mut h = Harness::new(Config::default());
    h.attach();
    h.feed(Event::ManifestParsed {
        levels: vec![level(0)],
    });
    assert_eq!(h.scheduler.state(), State::WaitingLevel);
    let events = h.events();
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::LevelLoading { level: 0 })));
    assert_eq!(count(&events, EventKind::BufferReset), 1);

    h.feed(Event::LevelLoaded {
        level: 0,
        details: vod(4, 6.0),
    });
    assert_eq!(loading(&h.events()), vec![(0, 0)]);
    assert_eq!(h.current().load_idx, Some(0));
    assert_eq!(*h.calls.lock(), vec![Call::Reset, Call::Reset]);
}

#[test]
fn test_repeated_reload_is_a_loop_error() {
    let mut h = Harness::new(Config::default());
    h.start(vec![level(0)], vod(1, 6.0));
    for _ in 0..3 {
        h.feed(Event::FragLoadEmergencyAborted);
    }
    let events = h.events();
    assert_eq!(loading(&events), vec![(0, 0), (0, 0), (0, 0)]);
    assert_eq!(errors(&events), vec![(ErrorDetails::FragLoopLoadingError, false)]);
    assert_eq!(h.scheduler.state(), State::Idle);
}

#[test]
fn test_low_buffer_stall_jumps_hole_once() {
    let mut h = Harness::new(Config::default());
    h.attach();
    h.media
        .set_buffered(vec![TimeRange::new(0.0, 5.0), TimeRange::new(5.5, 20.0)]);
    h.scheduler.tick();
    h.media.set_current_time(5.0);
    h.scheduler.tick();
    h.scheduler.tick();

    h.clock.advance(600.0);
    h.scheduler.tick();
    assert!((h.media.current_time() - 5.6).abs() < 1e-9);

    for _ in 0..5 {
        h.clock.advance(600.0);
        h.scheduler.tick();
    }
    let events = h.events();
    assert_eq!(
        errors(&events),
        vec![
            (ErrorDetails::BufferStalledError, false),
            (ErrorDetails::BufferSeekOverHole, false),
        ]
    );
    assert!((h.media.current_time() - 5.6).abs() < 1e-9);
}

#[test]
fn test_high_buffer_stall_nudges_then_gives_up() {
    let mut h = Harness::new(Config::default());
    h.attach();
    h.media.set_buffered(vec![TimeRange::new(0.0, 20.0)]);
    h.scheduler.tick();
    h.media.set_current_time(4.0);
    h.scheduler.tick();
    h.scheduler.tick();

    for _ in 0..3 {
        h.clock.advance(3100.0);
        h.scheduler.tick();
        h.scheduler.tick();
    }
    assert_eq!(
        errors(&h.events()),
        vec![
            (ErrorDetails::BufferStalledError, false),
            (ErrorDetails::BufferNudgeOnStall, false),
            (ErrorDetails::BufferNudgeOnStall, false),
            (ErrorDetails::BufferStalledError, true),
        ]
    );
    assert_eq!(h.scheduler.state(), State::Error);
    assert!((h.media.current_time() - 4.3).abs() < 1e-9);
}

#[test]
fn test_paused_playback_is_not_a_stall() {
    let mut h = Harness::new(Config::default());
    h.attach();
    h.media.set_buffered(vec![TimeRange::new(0.0, 20.0)]);
    h.media.set_paused(true);
    for _ in 0..5 {
        h.scheduler.tick();
        h.clock.advance(5000.0);
    }
    assert!(errors(&h.events()).is_empty());
}

#[test]
fn test_vod_ends_after_last_fragment() {
    let mut h = Harness::new(Config::default());
    h.start(vec![level(0)], vod(3, 6.0));
    let mut loaded = Vec::new();
    while h.scheduler.state() == State::FragLoading {
        loaded.push(h.complete());
    }
    assert_eq!(loaded, vec![0, 1, 2]);
    assert_eq!(h.scheduler.state(), State::Ended);
    assert_eq!(count(&h.events(), EventKind::BufferEos), 1);

    h.media.set_current_time(1.0);
    h.media.set_seeking(true);
    h.feed(Event::MediaSeeking);
    assert_eq!(h.scheduler.state(), State::Idle);
}

#[test]
fn test_key_is_loaded_before_fragment() {
    let mut h = Harness::new(Config::default());
    let uri = Url::parse("https://keys.example/1").unwrap();
    let mut details = vod(2, 6.0);
    for frag in &mut details.fragments {
        frag.decrypt = Some(DecryptMetadata::aes128(uri.clone(), None));
    }
    h.start(vec![level(0)], details);
    assert_eq!(h.scheduler.state(), State::KeyLoading);
    let events = h.events();
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::KeyLoading { frag } if frag.sn == 0)));
    assert!(loading(&events).is_empty());

    h.feed(Event::KeyLoaded {
        frag: FragmentRef {
            level: 0,
            sn: 0,
            load_idx: None,
        },
        key: [9u8; 16],
    });
    assert_eq!(h.scheduler.state(), State::FragLoading);
    let keyed = h.scheduler.levels()[0]
        .details
        .as_ref()
        .unwrap()
        .fragments
        .iter()
        .all(|f| f.decrypt.as_ref().and_then(|d| d.key) == Some([9u8; 16]));
    assert!(keyed);

    h.load_chunk();
    let pushes = h.pushes();
    assert_eq!(pushes.len(), 1);
    assert!(pushes[0].1);
}

#[test]
fn test_load_errors_back_off_then_turn_fatal() {
    let mut h = Harness::new(Config::default());
    h.start(vec![level(0)], vod(4, 6.0));

    let mut delays = Vec::new();
    for _ in 0..6 {
        let frag = h.current();
        h.feed(PlaybackError::new(ErrorDetails::FragLoadError, false).with_frag(frag).into());
        assert_eq!(h.scheduler.state(), State::FragLoadingWaitingRetry);
        let due = h.scheduler.retry_date.unwrap();
        delays.push(due - h.clock.now_ms());

        h.clock.set(due - 1.0);
        h.scheduler.tick();
        assert_eq!(h.scheduler.state(), State::FragLoadingWaitingRetry);
        h.clock.set(due);
        h.scheduler.tick();
        assert_eq!(h.scheduler.state(), State::FragLoading);
    }
    assert_eq!(delays, vec![1000.0, 2000.0, 4000.0, 8000.0, 16000.0, 32000.0]);

    h.events();
    let frag = h.current();
    h.feed(PlaybackError::new(ErrorDetails::FragLoadError, false).with_frag(frag).into());
    assert_eq!(h.scheduler.state(), State::Error);
    assert_eq!(errors(&h.events()), vec![(ErrorDetails::FragLoadError, true)]);

    h.clock.advance(100_000.0);
    h.scheduler.tick();
    assert!(loading(&h.events()).is_empty());
}

#[test]
fn test_stuck_load_times_out() {
    let mut h = Harness::new(Config::default());
    h.start(vec![level(0)], vod(4, 6.0));
    h.events();

    h.clock.advance(20_001.0);
    h.scheduler.tick();
    let events = h.events();
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::FragLoadAborted { frag } if frag.sn == 0)));
    assert_eq!(errors(&events), vec![(ErrorDetails::FragLoadTimeout, false)]);
    assert_eq!(h.scheduler.state(), State::FragLoadingWaitingRetry);
}

#[test]
fn test_stale_chunks_are_ignored() {
    let mut h = Harness::new(Config::default());
    h.start(vec![level(0)], vod(4, 6.0));
    let current = h.current();

    let stats = h.stats();
    for frag in [
        FragmentRef {
            load_idx: current.load_idx.map(|i| i + 100),
            ..current
        },
        FragmentRef { sn: 3, ..current },
    ] {
        h.feed(Event::FragChunkLoaded {
            frag,
            payload: Bytes::from_static(b"late"),
            stats,
        });
    }
    assert_eq!(h.scheduler.state(), State::FragLoading);
    assert!(h.pushes().is_empty());
}

#[test]
fn test_push_carries_fragment_context() {
    let mut h = Harness::new(Config::default());
    h.start(vec![level(0)], vod(4, 6.0));
    h.complete();
    h.load_chunk();

    let pushes = h.pushes();
    let (len, keyed, meta) = &pushes[0];
    assert_eq!((*len, *keyed), (188, false));
    assert_eq!(
        *meta,
        PushMeta {
            audio_codec: Some("mp4a.40.2".into()),
            video_codec: Some("avc1.42c01e".into()),
            time_offset: 0.0,
            cc: 0,
            level: 0,
            sn: 0,
            duration: 24.0,
            accurate: true,
            first: true,
            final_chunk: false,
            last_sn: Some(3),
            load_idx: Some(0),
        }
    );
    assert_eq!(pushes[1].0, 0);
    assert!(pushes[1].2.final_chunk && !pushes[1].2.first);

    let next = &pushes[2].2;
    assert_eq!((next.sn, next.time_offset, next.load_idx), (1, 6.0, Some(1)));
    assert!(next.first);
}

#[test]
fn test_seek_outside_buffer_restarts_load() {
    let mut h = Harness::new(Config::default());
    h.start(vec![level(0)], vod(10, 6.0));
    h.events();

    h.media.set_current_time(40.0);
    h.media.set_seeking(true);
    h.feed(Event::MediaSeeking);

    let events = h.events();
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::FragLoadAborted { frag } if frag.sn == 0)));
    assert_eq!(loading(&events), vec![(0, 6)]);
}

#[test]
fn test_immediate_switch_flushes_and_resumes() {
    let mut h = Harness::new(Config::default());
    h.start(vec![level(0), level(0)], vod(10, 6.0));
    h.complete();
    h.media.set_current_time(3.0);
    h.scheduler.tick();
    h.events();

    h.scheduler.immediate_level_switch();
    assert_eq!(h.scheduler.state(), State::Paused);
    assert!(h.media.paused());
    let events = h.events();
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::FragLoadAborted { frag } if frag.sn == 1)));
    assert!(events.iter().any(|e| matches!(
        e,
        Event::BufferFlushing { start_offset, end_offset }
            if *start_offset == 0.0 && end_offset.is_infinite()
    )));

    h.feed(Event::BufferFlushed);
    assert_eq!(h.scheduler.state(), State::Idle);
    assert!(!h.media.paused());
    assert!((h.media.current_time() - 2.9999).abs() < 1e-9);
}

#[test]
fn test_buffer_full_halves_target_and_flushes_ahead() {
    let mut h = Harness::new(Config::default());
    h.start(vec![level(0)], vod(10, 6.0));
    h.complete();
    h.complete();
    h.media.set_current_time(3.0);
    h.scheduler.tick();
    h.events();

    h.feed(PlaybackError::new(ErrorDetails::BufferFullError, false).into());
    assert_eq!(h.scheduler.config().max_max_buffer_length, 300.0);
    assert_eq!(h.scheduler.state(), State::Paused);
    assert!(h.events().iter().any(|e| matches!(
        e,
        Event::BufferFlushing { start_offset, .. } if *start_offset == 6.0
    )));
}

#[test]
fn test_live_first_load_starts_near_edge() {
    let mut h = Harness::new(Config::default());
    h.start(
        vec![level(0)],
        LevelDetails::from_durations(0, 100, &[6.0; 10], true),
    );
    assert_eq!(h.current().sn, 107);
}

#[test]
fn test_live_level_switch_probes_next_sn() {
    let mut h = Harness::new(Config::default());
    h.start(
        vec![level(0), level(0)],
        LevelDetails::from_durations(0, 100, &[6.0; 10], true),
    );
    h.scheduler.set_next_load_level(1);
    h.feed(Event::LevelLoaded {
        level: 1,
        details: LevelDetails::from_durations(1, 100, &[6.0; 10], true),
    });
    assert_eq!(h.complete(), 107);
    assert_eq!(
        h.current(),
        FragmentRef {
            level: 1,
            sn: 108,
            load_idx: Some(1)
        }
    );
}

#[test]
fn test_mixed_aac_levels_advertise_he_aac() {
    let mut h = Harness::new(Config::default());
    let levels = vec![
        Level::new(0).with_codecs(Some("mp4a.40.2"), None),
        Level::new(0).with_codecs(Some("mp4a.40.5"), None),
    ];
    h.start(levels, vod(4, 6.0));
    let frag = h.load_chunk();
    h.events();

    h.feed(Event::FragParsingInitSegment {
        frag,
        tracks: vec![InitTrack {
            kind: TrackType::Audio,
            container: "audio/mp4".into(),
            codec: Some("mp4a.40.2".into()),
            level_codec: None,
            init_segment: Some(Bytes::from_static(b"moov")),
        }],
    });
    let events = h.events();
    let advertised = events.iter().find_map(|e| match e {
        Event::BufferCodecs { tracks } => tracks[0].level_codec.clone(),
        _ => None,
    });
    assert_eq!(advertised.as_deref(), Some("mp4a.40.5"));
    assert!(events
        .iter()
        .any(|e| matches!(e, Event::BufferAppending { kind: TrackType::Audio, .. })));
}

#[test]
fn test_stop_while_parsing_drains_demuxer() {
    let mut h = Harness::new(Config::default());
    h.start(vec![level(0)], vod(4, 6.0));
    let frag = h.load_chunk();
    assert_eq!(h.scheduler.state(), State::Parsing);
    h.events();

    h.scheduler.stop_load();
    assert_eq!(h.scheduler.state(), State::Stopped);
    assert_eq!(h.calls.lock().last(), Some(&Call::WaitQueue));

    h.feed(Event::FragParsingData {
        frag,
        data: video_data(0.0, 6.0),
    });
    h.feed(Event::DemuxerQueueEmpty);
    h.feed(Event::FragParsingData {
        frag,
        data: video_data(0.0, 6.0),
    });
    let events = h.events();
    assert_eq!(count(&events, EventKind::FragLoadAborted), 1);
    assert_eq!(count(&events, EventKind::BufferAppending), 1);
}

#[test]
fn test_resync_while_parsing_reloads_fragment() {
    let mut h = Harness::new(Config::default());
    h.start(vec![level(0)], vod(4, 6.0));
    let frag = h.load_chunk();
    assert_eq!(h.scheduler.state(), State::Parsing);
    h.events();
    h.calls.lock().clear();

    h.scheduler.resync();
    let events = h.events();
    assert_eq!(loading(&events), vec![(0, 0)]);
    assert!(errors(&events).is_empty());
    assert_eq!(h.scheduler.state(), State::FragLoading);
    assert_ne!(h.current().load_idx, frag.load_idx);
    assert_eq!(*h.calls.lock(), vec![Call::Reset]);

    // output of the dropped load no longer reaches the buffer
    h.feed(Event::FragParsingData {
        frag,
        data: video_data(0.0, 6.0),
    });
    assert_eq!(count(&h.events(), EventKind::BufferAppending), 0);
}

#[test]
fn test_resync_while_waiting_level_asks_again() {
    let mut h = Harness::new(Config::default());
    h.attach();
    h.feed(Event::ManifestParsed {
        levels: vec![level(0)],
    });
    h.events();

    h.scheduler.resync();
    assert_eq!(h.scheduler.state(), State::WaitingLevel);
    assert!(h
        .events()
        .iter()
        .any(|e| matches!(e, Event::LevelLoading { level: 0 })));
}

#[test]
fn test_own_errors_are_handled_once() {
    let mut h = Harness::new(Config::default());
    h.start(vec![level(0)], vod(1, 6.0));
    for _ in 0..3 {
        h.feed(Event::FragLoadEmergencyAborted);
    }
    let echoes: Vec<Event> = h
        .events()
        .into_iter()
        .filter(|e| e.kind() == EventKind::Error)
        .collect();
    assert_eq!(echoes.len(), 1);

    h.scheduler.stop_load();
    for echo in echoes {
        h.feed(echo);
    }
    assert_eq!(h.scheduler.state(), State::Stopped);

    // the same failure reported by someone else still counts
    h.feed(Event::Error(PlaybackError::new(
        ErrorDetails::FragLoopLoadingError,
        false,
    )));
    assert_eq!(h.scheduler.state(), State::Idle);
}

#[test]
fn test_detach_after_end_resets_start() {
    let mut h = Harness::new(Config::default());
    h.start(vec![level(0)], vod(2, 6.0));
    while h.scheduler.state() == State::FragLoading {
        h.complete();
    }
    assert_eq!(h.scheduler.state(), State::Ended);

    h.feed(Event::MediaDetaching);
    assert_eq!(h.scheduler.state(), State::Stopped);
    assert_eq!(h.scheduler.start_position, 0.0);
    let counters: Vec<u32> = h.scheduler.levels()[0]
        .details
        .as_ref()
        .unwrap()
        .fragments
        .iter()
        .map(|f| f.load_counter)
        .collect();
    assert_eq!(counters, vec![0, 0]);
}

#[tokio::test]
async fn test_drive_runs_until_bus_closes() {
    let bus = EventBus::new(256);
    let config = Config {
        tick_interval_ms: 10,
        ..Config::default()
    };
    let calls = Arc::new(Mutex::new(Vec::new()));
    let scheduler = FragmentScheduler::new(
        bus.clone(),
        config,
        ManualClock::new(0.0),
        Box::new(Recorder(calls)),
    );
    let events = bus.subscribe();
    let media = SimulatedMedia::new();
    let task = tokio::spawn(drive(scheduler, events));

    bus.publish(Event::MediaAttached {
        media: MediaHandle::new(media),
    });
    bus.publish(Event::ManifestParsed {
        levels: vec![level(0)],
    });
    bus.publish(Event::LevelLoaded {
        level: 0,
        details: vod(4, 6.0),
    });
    bus.close();

    let scheduler = task.await.unwrap();
    assert_eq!(scheduler.state(), State::FragLoading);
    assert_eq!(scheduler.frag_current.as_ref().map(|f| f.sn), Some(0));
}

#[tokio::test]
async fn test_drive_recovers_from_dropped_events() {
    let bus = EventBus::new(16);
    let calls = Arc::new(Mutex::new(Vec::new()));
    let scheduler = FragmentScheduler::new(
        bus.clone(),
        Config::default(),
        ManualClock::new(0.0),
        Box::new(Recorder(calls.clone())),
    );
    let task = tokio::spawn(drive(scheduler, bus.subscribe()));
    let settle = || async {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    };

    bus.publish(Event::MediaAttached {
        media: MediaHandle::new(SimulatedMedia::new()),
    });
    bus.publish(Event::ManifestParsed {
        levels: vec![level(0)],
    });
    bus.publish(Event::LevelLoaded {
        level: 0,
        details: vod(4, 6.0),
    });
    settle().await;

    let first = FragmentRef {
        level: 0,
        sn: 0,
        load_idx: Some(0),
    };
    bus.publish(Event::FragChunkLoaded {
        frag: first,
        payload: Bytes::from_static(&[0x47; 188]),
        stats: LoadStats::default(),
    });
    settle().await;
    assert!(calls.lock().iter().any(|c| matches!(c, Call::Push { .. })));

    // overflow the receiver so the completion events are lost
    bus.publish(Event::FragLoaded {
        frag: first,
        stats: LoadStats::default(),
    });
    for _ in 0..40 {
        bus.publish(Event::FragLoadAborted { frag: first });
    }
    settle().await;
    bus.close();

    let scheduler = task.await.unwrap();
    assert_eq!(scheduler.state(), State::FragLoading);
    let current = scheduler.frag_current.as_ref().map(Fragment::reference);
    assert!(current.is_some_and(|f| f.sn == 0 && f.load_idx != first.load_idx));
    let calls = calls.lock();
    let pushed = calls.iter().position(|c| matches!(c, Call::Push { .. }));
    assert!(pushed.is_some_and(|at| calls[at..].contains(&Call::Reset)));
}
