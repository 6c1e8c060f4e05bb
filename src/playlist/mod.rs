//! # Playlist model
//!
//! Levels (variants), their loaded details, and the fragments they list.
//! Timing fields on [`Fragment`] start out as the playlist's nominal values
//! and are refined in place once parsed presentation timestamps are known.

mod fragment;
mod level;

pub use fragment::*;
pub use level::*;
