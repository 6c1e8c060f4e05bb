//! Elementary sample and track types shared by the demuxers and the remuxer
//! boundary.

mod sample;
mod track;

pub use sample::*;
pub use track::*;

/// 90 kHz clock used by MPEG-TS timestamps.
pub const PES_TIMESCALE: i64 = 90_000;

/// Kind of elementary stream a track or buffer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TrackType {
    Audio,
    Video,
    Id3,
    Text,
}

impl TrackType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackType::Audio => "audio",
            TrackType::Video => "video",
            TrackType::Id3 => "id3",
            TrackType::Text => "text",
        }
    }
}
