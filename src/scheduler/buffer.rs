//! Buffered-range arithmetic.

use crate::av::TrackType;
use crate::events::TimeRange;
use crate::playlist::FragmentRef;

/// Contiguous buffer around a position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferInfo {
    /// Seconds buffered ahead of the position.
    pub len: f64,
    pub start: f64,
    pub end: f64,
    /// Start of the first range beyond the hole tolerance, if any.
    pub next_start: Option<f64>,
}

/// Measures the buffer ahead of `pos`. Ranges separated by less than
/// `max_hole` seconds count as one.
pub fn buffer_info(buffered: &[TimeRange], pos: f64, max_hole: f64) -> BufferInfo {
    let mut sorted = buffered.to_vec();
    sorted.sort_by(|a, b| a.start.total_cmp(&b.start).then(b.end.total_cmp(&a.end)));

    let mut merged: Vec<TimeRange> = Vec::with_capacity(sorted.len());
    for range in sorted {
        match merged.last_mut() {
            Some(last) if range.start - last.end < max_hole => {
                if range.end > last.end {
                    last.end = range.end;
                }
            }
            _ => merged.push(range),
        }
    }

    let mut info = BufferInfo {
        len: 0.0,
        start: pos,
        end: pos,
        next_start: None,
    };
    for range in merged {
        if pos + max_hole >= range.start && pos < range.end {
            info.start = range.start;
            info.end = range.end;
            info.len = range.end - pos;
        } else if pos + max_hole < range.start {
            info.next_start = Some(range.start);
            break;
        }
    }
    info
}

pub fn is_buffered(buffered: &[TimeRange], pos: f64) -> bool {
    buffered.iter().any(|r| pos >= r.start && pos <= r.end)
}

/// One interval appended to the sink, and the fragment it came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BufferRange {
    pub kind: TrackType,
    pub start: f64,
    pub end: f64,
    pub frag: FragmentRef,
}

/// Most recently recorded range covering `pos`.
pub fn range_at(ranges: &[BufferRange], pos: f64) -> Option<&BufferRange> {
    ranges.iter().rev().find(|r| pos >= r.start && pos <= r.end)
}

/// Range the playback reaches after `range`, allowing a 500 ms gap.
pub fn following_range<'a>(ranges: &'a [BufferRange], range: &BufferRange) -> Option<&'a BufferRange> {
    range_at(ranges, range.end + 0.5)
}
