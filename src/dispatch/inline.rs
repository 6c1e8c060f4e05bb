use bytes::Bytes;
use log::{debug, error, warn};

use super::TypeSupported;
use crate::av::TrackType;
use crate::config::Config;
use crate::error::{ErrorDetails, PlaybackError};
use crate::events::{Event, EventBus};
use crate::format::{AACDemuxer, ContainerDemuxer, DemuxEvent, DemuxSink, PushMeta, TSDemuxer};
use crate::playlist::FragmentRef;
use crate::remux::{Remuxer, RemuxerFactory, RemuxerKind, RemuxOutput};

/// Runs the demuxer and its remuxer on the calling thread and publishes what
/// they produce.
pub struct DemuxerInline {
    bus: EventBus,
    config: Config,
    type_supported: TypeSupported,
    factory: RemuxerFactory,
    demuxer: Option<Box<dyn ContainerDemuxer>>,
    remuxer: Option<Box<dyn Remuxer>>,
    time_offset: f64,
}

/// Forwards demuxer output through the remuxer onto the bus.
struct Relay<'a> {
    bus: &'a EventBus,
    remuxer: &'a mut dyn Remuxer,
    frag: FragmentRef,
    time_offset: &'a mut f64,
}

impl DemuxSink for Relay<'_> {
    fn emit(&mut self, event: DemuxEvent) {
        let frag = self.frag;
        match event {
            DemuxEvent::Remux(batch) => match self.remuxer.remux(batch) {
                Ok(outputs) => {
                    for output in outputs {
                        match output {
                            RemuxOutput::InitSegment(tracks) => {
                                self.bus.publish(Event::FragParsingInitSegment { frag, tracks })
                            }
                            RemuxOutput::Data(data) => {
                                // sync on video chunks
                                if data.kind == TrackType::Video && !data.flush {
                                    *self.time_offset += data.end_dts - data.start_dts;
                                }
                                self.bus.publish(Event::FragParsingData { frag, data });
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!("remuxing sn {} level {} failed: {}", frag.sn, frag.level, e);
                    self.bus.publish(
                        PlaybackError::new(ErrorDetails::FragParsingError, false)
                            .with_frag(frag)
                            .with_reason(e.to_string()),
                    );
                }
            },
            DemuxEvent::ResetRemuxer { discontinuity } => self.remuxer.reset(discontinuity),
            DemuxEvent::Parsed(timing) => self.bus.publish(Event::FragParsed { frag, timing }),
            DemuxEvent::Error(err) => self.bus.publish(err.with_frag(frag)),
            DemuxEvent::SkipCount(skip) => self.bus.publish(Event::FragSkipCount { frag, skip }),
        }
    }
}

impl DemuxerInline {
    pub fn new(
        bus: EventBus,
        config: Config,
        type_supported: TypeSupported,
        factory: RemuxerFactory,
    ) -> Self {
        Self {
            bus,
            config,
            type_supported,
            factory,
            demuxer: None,
            remuxer: None,
            time_offset: 0.0,
        }
    }

    /// Seconds the next chunk is expected to start at.
    pub fn time_offset(&self) -> f64 {
        self.time_offset
    }

    fn probe(&mut self, data: &[u8], frag: FragmentRef) -> bool {
        let (demuxer, kind): (Box<dyn ContainerDemuxer>, RemuxerKind) = if TSDemuxer::probe(data) {
            if self.type_supported.mp2t {
                debug!("demuxing MPEG-TS with passthrough remuxing");
                (Box::new(TSDemuxer::new(&self.config, true)), RemuxerKind::Passthrough)
            } else {
                debug!("demuxing MPEG-TS");
                (Box::new(TSDemuxer::new(&self.config, false)), RemuxerKind::Mp4)
            }
        } else if AACDemuxer::probe(data) {
            debug!("demuxing bare AAC");
            (Box::new(AACDemuxer::new()), RemuxerKind::Mp4)
        } else {
            error!("no demux matching with content found for sn {}", frag.sn);
            self.bus.publish(
                PlaybackError::new(ErrorDetails::FragParsingError, true)
                    .with_frag(frag)
                    .with_reason("no demux matching with content found"),
            );
            return false;
        };
        self.demuxer = Some(demuxer);
        self.remuxer = Some((self.factory)(kind));
        true
    }

    pub fn push(&mut self, data: Bytes, mut meta: PushMeta) {
        let frag = meta.frag_ref();
        if self.demuxer.is_none() && !self.probe(&data, frag) {
            return;
        }
        if meta.first {
            self.time_offset = meta.time_offset;
        }
        meta.time_offset = self.time_offset;

        let (Some(demuxer), Some(remuxer)) = (self.demuxer.as_mut(), self.remuxer.as_mut()) else {
            return;
        };
        let mut relay = Relay {
            bus: &self.bus,
            remuxer: remuxer.as_mut(),
            frag,
            time_offset: &mut self.time_offset,
        };
        demuxer.push(data, &meta, &mut relay);
    }

    /// Flushes whatever the demuxer still holds and forgets the container.
    pub fn destroy(&mut self) {
        if let (Some(mut demuxer), Some(mut remuxer)) = (self.demuxer.take(), self.remuxer.take()) {
            let mut time_offset = self.time_offset;
            let mut relay = Relay {
                bus: &self.bus,
                remuxer: remuxer.as_mut(),
                frag: FragmentRef {
                    level: 0,
                    sn: 0,
                    load_idx: None,
                },
                time_offset: &mut time_offset,
            };
            demuxer.destroy(&mut relay);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use crate::format::ts::tests::keyed_stream;
    use crate::remux::ElementaryRemuxer;
    use pretty_assertions::assert_eq;
    use tokio::sync::broadcast::Receiver;

    fn drain(rx: &mut Receiver<Event>) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn meta(sn: u64, first: bool, final_chunk: bool) -> PushMeta {
        PushMeta {
            sn,
            first,
            final_chunk,
            last_sn: Some(10),
            time_offset: 4.0,
            load_idx: Some(1),
            ..Default::default()
        }
    }

    #[test]
    fn test_publishes_parsing_events() {
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let mut inline = DemuxerInline::new(
            bus,
            Config::default(),
            TypeSupported::default(),
            ElementaryRemuxer::factory(),
        );
        inline.push(keyed_stream(&[true, false, true, false], 0).bytes(), meta(3, true, true));

        let kinds: Vec<EventKind> = drain(&mut rx).iter().map(Event::kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::FragParsingInitSegment,
                EventKind::FragParsingData,
                EventKind::FragParsed
            ]
        );
        // two frames of 3000 ticks went out
        assert!((inline.time_offset() - (4.0 + 6000.0 / 90_000.0)).abs() < 1e-9);
    }

    #[test]
    fn test_events_carry_the_fragment() {
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let mut inline = DemuxerInline::new(
            bus,
            Config::default(),
            TypeSupported::default(),
            ElementaryRemuxer::factory(),
        );
        inline.push(keyed_stream(&[true], 0).bytes(), meta(7, true, true));
        for event in drain(&mut rx) {
            if let Event::FragParsed { frag, .. } = event {
                assert_eq!(frag, FragmentRef { level: 0, sn: 7, load_idx: Some(1) });
                return;
            }
        }
        panic!("no FragParsed");
    }

    #[test]
    fn test_unknown_content_is_fatal() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let mut inline = DemuxerInline::new(
            bus,
            Config::default(),
            TypeSupported::default(),
            ElementaryRemuxer::factory(),
        );
        inline.push(Bytes::from_static(b"#EXTM3U\n#EXT-X-VERSION:3\n"), meta(0, true, true));
        let events = drain(&mut rx);
        assert!(matches!(
            events.as_slice(),
            [Event::Error(err)] if err.fatal && err.reason.as_deref() == Some("no demux matching with content found")
        ));
    }

    #[test]
    fn test_passthrough_publishes_transport_stream() {
        let bus = EventBus::new(64);
        let mut rx = bus.subscribe();
        let mut inline = DemuxerInline::new(
            bus,
            Config::default(),
            TypeSupported { mp4: true, mp2t: true },
            ElementaryRemuxer::factory(),
        );
        let stream = keyed_stream(&[true, false, true, false], 0).bytes();
        inline.push(stream.clone(), meta(3, true, true));

        let events = drain(&mut rx);
        let tracks = events.iter().find_map(|e| match e {
            Event::FragParsingInitSegment { tracks, .. } => Some(tracks.clone()),
            _ => None,
        });
        assert!(tracks.is_some_and(|t| t.iter().all(|t| t.init_segment.is_none())));
        let buffers: Vec<Bytes> = events
            .iter()
            .filter_map(|e| match e {
                Event::FragParsingData { data, .. } => Some(data.buffers.clone()),
                _ => None,
            })
            .flatten()
            .collect();
        assert_eq!(buffers, vec![stream]);
    }
}
