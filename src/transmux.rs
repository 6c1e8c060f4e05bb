//! Ordering glue between decryption and demuxing.
//!
//! Chunks go through one tokio task that owns the [`DecryptPipeline`] and
//! the [`DemuxDispatcher`], so plaintext reaches the demuxer in push order
//! even though decryption is asynchronous.

use std::sync::Arc;

use bytes::Bytes;
use log::{debug, error};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::Config;
use crate::crypto::{Decrypter, DecryptPipeline, FallbackDecrypter};
use crate::dispatch::{DemuxDispatcher, TypeSupported};
use crate::error::{ErrorDetails, PlaybackError};
use crate::events::EventBus;
use crate::format::PushMeta;
use crate::playlist::DecryptMetadata;
use crate::remux::RemuxerFactory;

/// Where the scheduler sends loaded fragment bytes.
pub trait FragmentProcessor: Send {
    fn push(&mut self, payload: Bytes, decrypt: Option<DecryptMetadata>, meta: PushMeta);

    /// Asks for `DemuxerQueueEmpty` once every earlier push has been demuxed.
    fn wait_queue(&mut self);

    /// Forgets any partially aligned segment.
    fn reset(&mut self);
}

#[derive(Debug)]
enum TransmuxCommand {
    Push {
        payload: Bytes,
        decrypt: Option<DecryptMetadata>,
        meta: PushMeta,
    },
    WaitQueue,
    Reset,
}

pub struct TransmuxPipeline {
    tx: mpsc::UnboundedSender<TransmuxCommand>,
    task: JoinHandle<()>,
    uses_worker: bool,
}

impl TransmuxPipeline {
    /// Starts the pipeline task on the current tokio runtime.
    ///
    /// Without a platform decrypter, segments are decrypted in software.
    pub fn spawn(
        bus: EventBus,
        config: &Config,
        type_supported: TypeSupported,
        factory: RemuxerFactory,
        platform: Option<Arc<dyn Decrypter>>,
    ) -> Self {
        let decrypter = Arc::new(FallbackDecrypter::new(platform, config.enable_software_aes));
        let pipeline = DecryptPipeline::new(decrypter);
        let dispatcher = DemuxDispatcher::new(bus.clone(), config, type_supported, factory);
        let uses_worker = dispatcher.uses_worker();
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(rx, pipeline, dispatcher, bus));
        Self {
            tx,
            task,
            uses_worker,
        }
    }

    pub fn uses_worker(&self) -> bool {
        self.uses_worker
    }

    fn send(&self, command: TransmuxCommand) {
        if self.tx.send(command).is_err() {
            error!("transmux task has stopped");
        }
    }
}

impl FragmentProcessor for TransmuxPipeline {
    fn push(&mut self, payload: Bytes, decrypt: Option<DecryptMetadata>, meta: PushMeta) {
        self.send(TransmuxCommand::Push {
            payload,
            decrypt,
            meta,
        });
    }

    fn wait_queue(&mut self) {
        self.send(TransmuxCommand::WaitQueue);
    }

    fn reset(&mut self) {
        self.send(TransmuxCommand::Reset);
    }
}

impl Drop for TransmuxPipeline {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    mut rx: mpsc::UnboundedReceiver<TransmuxCommand>,
    mut pipeline: DecryptPipeline,
    mut dispatcher: DemuxDispatcher,
    bus: EventBus,
) {
    while let Some(command) = rx.recv().await {
        match command {
            TransmuxCommand::Push {
                payload,
                decrypt,
                mut meta,
            } => {
                let frag = meta.frag_ref();
                match pipeline.push(payload, decrypt.as_ref(), &meta).await {
                    Ok(Some(chunk)) => {
                        meta.first = chunk.first;
                        meta.final_chunk = chunk.final_chunk;
                        if let Err(e) = dispatcher.push(chunk.data, meta) {
                            error!("could not hand sn {} to the demuxer: {}", frag.sn, e);
                        }
                    }
                    Ok(None) => debug!("carrying bytes of sn {} to the next chunk", frag.sn),
                    Err(e) => {
                        error!("decrypting error on sn {} level {}: {}", frag.sn, frag.level, e);
                        pipeline.reset();
                        bus.publish(
                            PlaybackError::new(ErrorDetails::FragDecryptError, true)
                                .with_frag(frag)
                                .with_reason(e.to_string()),
                        );
                    }
                }
            }
            TransmuxCommand::WaitQueue => {
                if let Err(e) = dispatcher.request_queue_empty() {
                    error!("could not drain the demuxer: {}", e);
                }
            }
            TransmuxCommand::Reset => pipeline.reset(),
        }
    }
}
