//! # Event bus
//!
//! Every component talks to the others through [`Event`]s published on a
//! shared [`EventBus`]. Components declare the [`EventKind`]s they care
//! about through [`EventHandler::subscriptions`], and [`route`] delivers an
//! event only to handlers that asked for it.
//!
//! ```
//! use vdkstream::events::{Event, EventBus};
//!
//! let bus = EventBus::new(64);
//! let mut rx = bus.subscribe();
//! bus.publish(Event::MediaSeeked);
//! assert!(matches!(rx.try_recv(), Ok(Event::MediaSeeked)));
//! ```

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::av::TrackType;
use crate::error::PlaybackError;
use crate::format::ParsedTiming;
use crate::playlist::{Fragment, FragmentRef, Level, LevelDetails};
use crate::remux::{InitTrack, ParsingData};
use crate::scheduler::State;

mod media;

pub use media::*;

/// Load timings reported by the fragment loader, milliseconds on the
/// scheduler's clock.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoadStats {
    pub trequest: f64,
    pub tfirst: f64,
    pub tload: f64,
    /// Bytes received.
    pub loaded: u64,
    pub total: Option<u64>,
}

#[derive(Debug, Clone)]
pub enum Event {
    ManifestParsed {
        levels: Vec<Level>,
    },
    LevelLoading {
        level: usize,
    },
    LevelLoaded {
        level: usize,
        details: LevelDetails,
    },
    KeyLoading {
        frag: Fragment,
    },
    KeyLoaded {
        frag: FragmentRef,
        key: [u8; 16],
    },
    FragLoading {
        frag: Fragment,
    },
    FragChunkLoaded {
        frag: FragmentRef,
        payload: Bytes,
        stats: LoadStats,
    },
    FragLoaded {
        frag: FragmentRef,
        stats: LoadStats,
    },
    FragLoadAborted {
        frag: FragmentRef,
    },
    FragLoadEmergencyAborted,
    FragParsingInitSegment {
        frag: FragmentRef,
        tracks: Vec<InitTrack>,
    },
    FragParsingData {
        frag: FragmentRef,
        data: ParsingData,
    },
    FragParsed {
        frag: FragmentRef,
        timing: ParsedTiming,
    },
    FragSkipCount {
        frag: FragmentRef,
        skip: u32,
    },
    FragAppended {
        frag: FragmentRef,
    },
    FragBuffered {
        frag: FragmentRef,
        stats: LoadStats,
    },
    DemuxerQueueEmpty,
    BufferCodecs {
        tracks: Vec<InitTrack>,
    },
    BufferAppending {
        kind: TrackType,
        data: Bytes,
    },
    BufferAppended,
    BufferFlushing {
        start_offset: f64,
        end_offset: f64,
    },
    BufferFlushed,
    BufferEos,
    BufferReset,
    StreamStateTransition {
        previous: State,
        next: State,
    },
    LevelPtsUpdated {
        level: usize,
        details: LevelDetails,
        drift: f64,
    },
    MediaAttached {
        media: MediaHandle,
    },
    MediaDetaching,
    MediaSeeking,
    MediaSeeked,
    MediaEnded,
    Error(PlaybackError),
}

/// Fieldless discriminant of [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ManifestParsed,
    LevelLoading,
    LevelLoaded,
    KeyLoading,
    KeyLoaded,
    FragLoading,
    FragChunkLoaded,
    FragLoaded,
    FragLoadAborted,
    FragLoadEmergencyAborted,
    FragParsingInitSegment,
    FragParsingData,
    FragParsed,
    FragSkipCount,
    FragAppended,
    FragBuffered,
    DemuxerQueueEmpty,
    BufferCodecs,
    BufferAppending,
    BufferAppended,
    BufferFlushing,
    BufferFlushed,
    BufferEos,
    BufferReset,
    StreamStateTransition,
    LevelPtsUpdated,
    MediaAttached,
    MediaDetaching,
    MediaSeeking,
    MediaSeeked,
    MediaEnded,
    Error,
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::ManifestParsed { .. } => EventKind::ManifestParsed,
            Event::LevelLoading { .. } => EventKind::LevelLoading,
            Event::LevelLoaded { .. } => EventKind::LevelLoaded,
            Event::KeyLoading { .. } => EventKind::KeyLoading,
            Event::KeyLoaded { .. } => EventKind::KeyLoaded,
            Event::FragLoading { .. } => EventKind::FragLoading,
            Event::FragChunkLoaded { .. } => EventKind::FragChunkLoaded,
            Event::FragLoaded { .. } => EventKind::FragLoaded,
            Event::FragLoadAborted { .. } => EventKind::FragLoadAborted,
            Event::FragLoadEmergencyAborted => EventKind::FragLoadEmergencyAborted,
            Event::FragParsingInitSegment { .. } => EventKind::FragParsingInitSegment,
            Event::FragParsingData { .. } => EventKind::FragParsingData,
            Event::FragParsed { .. } => EventKind::FragParsed,
            Event::FragSkipCount { .. } => EventKind::FragSkipCount,
            Event::FragAppended { .. } => EventKind::FragAppended,
            Event::FragBuffered { .. } => EventKind::FragBuffered,
            Event::DemuxerQueueEmpty => EventKind::DemuxerQueueEmpty,
            Event::BufferCodecs { .. } => EventKind::BufferCodecs,
            Event::BufferAppending { .. } => EventKind::BufferAppending,
            Event::BufferAppended => EventKind::BufferAppended,
            Event::BufferFlushing { .. } => EventKind::BufferFlushing,
            Event::BufferFlushed => EventKind::BufferFlushed,
            Event::BufferEos => EventKind::BufferEos,
            Event::BufferReset => EventKind::BufferReset,
            Event::StreamStateTransition { .. } => EventKind::StreamStateTransition,
            Event::LevelPtsUpdated { .. } => EventKind::LevelPtsUpdated,
            Event::MediaAttached { .. } => EventKind::MediaAttached,
            Event::MediaDetaching => EventKind::MediaDetaching,
            Event::MediaSeeking => EventKind::MediaSeeking,
            Event::MediaSeeked => EventKind::MediaSeeked,
            Event::MediaEnded => EventKind::MediaEnded,
            Event::Error(_) => EventKind::Error,
        }
    }
}

impl From<PlaybackError> for Event {
    fn from(err: PlaybackError) -> Self {
        Event::Error(err)
    }
}

/// Broadcast channel shared by every component of one playback session.
///
/// Cloning the bus shares the channel. Publishing never blocks and works from
/// plain threads as well as async tasks. Once [`EventBus::close`] is called,
/// receivers drain what is left and then see the channel closed.
#[derive(Clone, Debug)]
pub struct EventBus {
    tx: Arc<RwLock<Option<broadcast::Sender<Event>>>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx: Arc::new(RwLock::new(Some(tx))),
        }
    }

    /// Sends `event` to every current subscriber. Dropped when nobody listens.
    pub fn publish<E: Into<Event>>(&self, event: E) {
        if let Some(tx) = self.tx.read().as_ref() {
            let _ = tx.send(event.into());
        }
    }

    /// A receiver subscribed after [`EventBus::close`] is closed already.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        match self.tx.read().as_ref() {
            Some(tx) => tx.subscribe(),
            None => broadcast::channel(1).1,
        }
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.read().as_ref().map_or(0, |tx| tx.receiver_count())
    }

    /// Drops the sender for every clone of this bus.
    pub fn close(&self) {
        self.tx.write().take();
    }

    pub fn is_closed(&self) -> bool {
        self.tx.read().is_none()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

pub trait EventHandler {
    fn subscriptions(&self) -> &'static [EventKind];
    fn handle(&mut self, event: Event);
}

/// Delivers `event` to `handler` if it subscribed to its kind. Returns
/// whether it was delivered.
pub fn route<H: EventHandler + ?Sized>(handler: &mut H, event: Event) -> bool {
    if handler.subscriptions().contains(&event.kind()) {
        handler.handle(event);
        true
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorDetails;
    use pretty_assertions::assert_eq;

    struct Recorder(Vec<EventKind>);

    impl EventHandler for Recorder {
        fn subscriptions(&self) -> &'static [EventKind] {
            &[EventKind::MediaSeeking, EventKind::Error]
        }

        fn handle(&mut self, event: Event) {
            self.0.push(event.kind());
        }
    }

    #[test]
    fn test_route_filters_by_subscription() {
        let mut recorder = Recorder(Vec::new());
        assert!(route(&mut recorder, Event::MediaSeeking));
        assert!(!route(&mut recorder, Event::MediaSeeked));
        assert!(route(
            &mut recorder,
            PlaybackError::new(ErrorDetails::BufferFullError, false).into()
        ));
        assert_eq!(recorder.0, vec![EventKind::MediaSeeking, EventKind::Error]);
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        bus.publish(Event::BufferEos);
        assert_eq!(bus.receiver_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_each_receive() {
        let bus = EventBus::new(16);
        let mut first = bus.subscribe();
        let mut second = bus.clone().subscribe();
        bus.publish(Event::DemuxerQueueEmpty);
        assert!(matches!(first.recv().await, Ok(Event::DemuxerQueueEmpty)));
        assert!(matches!(second.recv().await, Ok(Event::DemuxerQueueEmpty)));
    }

    #[tokio::test]
    async fn test_close_ends_every_receiver() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let clone = bus.clone();
        clone.publish(Event::BufferEos);
        bus.close();
        clone.publish(Event::BufferReset);
        assert!(clone.is_closed());
        assert!(matches!(rx.recv().await, Ok(Event::BufferEos)));
        assert!(matches!(rx.recv().await, Err(broadcast::error::RecvError::Closed)));
        assert!(matches!(
            bus.subscribe().recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }
}
