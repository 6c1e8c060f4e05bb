//! # Demux dispatch
//!
//! The first chunk of a stream picks the container demuxer by probing its
//! bytes. Demuxing then happens on a dedicated thread ([`DemuxWorker`]) or,
//! when the thread is disabled or cannot start, inline on the caller's
//! thread ([`DemuxerInline`]). Both publish the same events on the bus.

use bytes::Bytes;
use log::{error, info};

use crate::config::Config;
use crate::events::{Event, EventBus};
use crate::format::PushMeta;
use crate::remux::RemuxerFactory;
use crate::Result;

mod inline;
mod worker;

pub use self::inline::DemuxerInline;
pub use self::worker::{DemuxWorker, WorkerCommand};

/// Containers the media sink accepts as is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TypeSupported {
    pub mp4: bool,
    /// MPEG-TS passthrough, only honoured with `enable_mp2t_passthrough`.
    pub mp2t: bool,
}

impl TypeSupported {
    pub fn new(mp4: bool, mp2t: bool, config: &Config) -> Self {
        Self {
            mp4,
            mp2t: mp2t && config.enable_mp2t_passthrough,
        }
    }
}

pub enum DemuxDispatcher {
    Inline {
        demuxer: DemuxerInline,
        bus: EventBus,
    },
    Worker(DemuxWorker),
}

impl DemuxDispatcher {
    pub fn new(
        bus: EventBus,
        config: &Config,
        type_supported: TypeSupported,
        factory: RemuxerFactory,
    ) -> Self {
        if config.enable_worker {
            match DemuxWorker::spawn(bus.clone(), config, type_supported, factory.clone()) {
                Ok(worker) => {
                    info!("demuxing in worker thread");
                    return DemuxDispatcher::Worker(worker);
                }
                Err(e) => error!("error while initializing demux worker, fallback on inline: {}", e),
            }
        }
        DemuxDispatcher::Inline {
            demuxer: DemuxerInline::new(bus.clone(), config.clone(), type_supported, factory),
            bus,
        }
    }

    pub fn uses_worker(&self) -> bool {
        matches!(self, DemuxDispatcher::Worker(_))
    }

    pub fn push(&mut self, data: Bytes, meta: PushMeta) -> Result<()> {
        match self {
            DemuxDispatcher::Inline { demuxer, .. } => {
                demuxer.push(data, meta);
                Ok(())
            }
            DemuxDispatcher::Worker(worker) => worker.push(data, meta),
        }
    }

    /// Publishes [`Event::DemuxerQueueEmpty`] once every push so far has been
    /// demuxed.
    pub fn request_queue_empty(&self) -> Result<()> {
        match self {
            DemuxDispatcher::Inline { bus, .. } => {
                bus.publish(Event::DemuxerQueueEmpty);
                Ok(())
            }
            DemuxDispatcher::Worker(worker) => worker.send(WorkerCommand::Empty),
        }
    }
}

impl Drop for DemuxDispatcher {
    fn drop(&mut self) {
        if let DemuxDispatcher::Inline { demuxer, .. } = self {
            demuxer.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remux::ElementaryRemuxer;

    #[test]
    fn test_worker_can_be_disabled() {
        let config = Config {
            enable_worker: false,
            ..Config::default()
        };
        let dispatcher = DemuxDispatcher::new(
            EventBus::new(4),
            &config,
            TypeSupported::new(true, true, &config),
            ElementaryRemuxer::factory(),
        );
        assert!(!dispatcher.uses_worker());
    }

    #[test]
    fn test_passthrough_needs_config() {
        let config = Config::default();
        assert!(!TypeSupported::new(true, true, &config).mp2t);
        let config = Config {
            enable_mp2t_passthrough: true,
            ..config
        };
        assert!(TypeSupported::new(true, true, &config).mp2t);
    }

    #[test]
    fn test_inline_queue_empty_is_immediate() {
        let config = Config {
            enable_worker: false,
            ..Config::default()
        };
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        let dispatcher = DemuxDispatcher::new(
            bus,
            &config,
            TypeSupported::default(),
            ElementaryRemuxer::factory(),
        );
        dispatcher.request_queue_empty().unwrap();
        assert!(matches!(rx.try_recv(), Ok(Event::DemuxerQueueEmpty)));
    }
}
