#![doc(html_root_url = "https://docs.rs/vdkstream/0.1.0")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(rustdoc::missing_crate_level_docs)]

//! # vdkstream - adaptive streaming client core
//!
//! `vdkstream` holds the parts of an HLS-style adaptive-bitrate player that
//! sit between the network and the media sink: it decides which fragment to
//! fetch next, decrypts AES-128 segments, demuxes MPEG-TS and raw AAC into
//! elementary samples and keeps fragment timing consistent across playlist
//! reloads.
//!
//! Loading, remuxing and the media sink itself stay with the host. Every
//! component exchanges [`events::Event`]s on a shared [`events::EventBus`].
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use vdkstream::clock::SystemClock;
//! use vdkstream::config::Config;
//! use vdkstream::dispatch::TypeSupported;
//! use vdkstream::events::EventBus;
//! use vdkstream::remux::ElementaryRemuxer;
//! use vdkstream::scheduler::{drive, FragmentScheduler};
//! use vdkstream::transmux::TransmuxPipeline;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::load();
//!     let bus = EventBus::default();
//!     let transmux = TransmuxPipeline::spawn(
//!         bus.clone(),
//!         &config,
//!         TypeSupported::default(),
//!         ElementaryRemuxer::factory(),
//!         None,
//!     );
//!     let scheduler = FragmentScheduler::new(
//!         bus.clone(),
//!         config,
//!         Arc::new(SystemClock::new()),
//!         Box::new(transmux),
//!     );
//!     // Publish MediaAttached, ManifestParsed and the loader's events on `bus`.
//!     let _scheduler = drive(scheduler, bus.subscribe()).await;
//! }
//! ```
//!
//! ## Module Overview
//!
//! - `scheduler`: the fragment scheduler state machine, buffer watchdog and
//!   its async driver
//! - `format`: MPEG-TS and ADTS/ID3 demuxers
//! - `crypto`: AES-128-CBC decrypters and the streaming decrypt pipeline
//! - `dispatch`: runs a demuxer inline or on a worker thread
//! - `timeline`: carries parsed timing across playlist snapshots
//! - `transmux`: orders decryption ahead of demuxing for one session

/// Elementary sample and track types
pub mod av;

/// Scheduler time sources
pub mod clock;

/// H.264 and AAC bitstream helpers used by the demuxers
pub mod codec;

/// Configuration module
pub mod config;

/// Segment decryption
pub mod crypto;

/// Inline and worker-thread demux dispatch
pub mod dispatch;

/// Error types and utilities
pub mod error;

/// Event bus and media element abstraction
pub mod events;

/// Container demuxers (MPEG-TS, ADTS)
pub mod format;

/// Levels, playlist snapshots and fragments
pub mod playlist;

/// Remuxer boundary
pub mod remux;

/// Fragment scheduling
pub mod scheduler;

/// Fragment timing reconciliation
pub mod timeline;

/// Decrypt-then-demux ordering
pub mod transmux;

/// Common utilities and helper functions
pub mod utils;

pub use error::{Result, VdkError};
