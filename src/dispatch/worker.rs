use std::thread::JoinHandle;

use bytes::Bytes;
use log::{debug, info, warn};
use tokio::sync::mpsc;

use super::{DemuxerInline, TypeSupported};
use crate::config::Config;
use crate::events::{Event, EventBus};
use crate::format::PushMeta;
use crate::remux::RemuxerFactory;
use crate::{Result, VdkError};

/// Message to the demux thread. Payloads are moved, never copied.
#[derive(Debug)]
pub enum WorkerCommand {
    /// `config` is [`Config::to_config_string`] output.
    Init {
        type_supported: TypeSupported,
        config: String,
    },
    Demux {
        data: Bytes,
        meta: PushMeta,
    },
    /// Answered with [`Event::DemuxerQueueEmpty`] once every earlier command
    /// has been handled.
    Empty,
    Shutdown,
}

/// Demuxer running on its own OS thread.
///
/// Results are published on the bus by the thread itself.
pub struct DemuxWorker {
    tx: mpsc::UnboundedSender<WorkerCommand>,
    handle: Option<JoinHandle<()>>,
}

impl DemuxWorker {
    pub fn spawn(
        bus: EventBus,
        config: &Config,
        type_supported: TypeSupported,
        factory: RemuxerFactory,
    ) -> Result<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = std::thread::Builder::new()
            .name("vdkstream-demux".to_string())
            .spawn(move || run_worker(rx, bus, factory))
            .map_err(|e| {
                VdkError::Io(std::io::Error::other(format!(
                    "failed to spawn demux thread: {}",
                    e
                )))
            })?;

        let worker = Self {
            tx,
            handle: Some(handle),
        };
        worker.send(WorkerCommand::Init {
            type_supported,
            config: config.to_config_string(),
        })?;
        Ok(worker)
    }

    pub fn send(&self, command: WorkerCommand) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| VdkError::ChannelClosed("demux worker has stopped".into()))
    }

    pub fn push(&self, data: Bytes, meta: PushMeta) -> Result<()> {
        self.send(WorkerCommand::Demux { data, meta })
    }
}

impl Drop for DemuxWorker {
    fn drop(&mut self) {
        let _ = self.tx.send(WorkerCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("demux thread panicked");
            }
        }
    }
}

fn run_worker(mut rx: mpsc::UnboundedReceiver<WorkerCommand>, bus: EventBus, factory: RemuxerFactory) {
    let mut demuxer: Option<DemuxerInline> = None;
    while let Some(command) = rx.blocking_recv() {
        match command {
            WorkerCommand::Init {
                type_supported,
                config,
            } => {
                info!("demux thread started, passthrough: {}", type_supported.mp2t);
                demuxer = Some(DemuxerInline::new(
                    bus.clone(),
                    Config::from_config_str(&config),
                    type_supported,
                    factory.clone(),
                ));
            }
            WorkerCommand::Demux { data, meta } => match demuxer.as_mut() {
                Some(demuxer) => demuxer.push(data, meta),
                None => warn!("dropping sn {} received before init", meta.sn),
            },
            WorkerCommand::Empty => bus.publish(Event::DemuxerQueueEmpty),
            WorkerCommand::Shutdown => break,
        }
    }
    if let Some(mut demuxer) = demuxer {
        demuxer.destroy();
    }
    debug!("demux thread exiting");
}
