use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

/// One buffered interval of the media element, seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }
}

/// `HAVE_NOTHING`: no metadata yet.
pub const HAVE_NOTHING: u8 = 0;
/// `HAVE_METADATA`: duration and dimensions are known.
pub const HAVE_METADATA: u8 = 1;
/// `HAVE_ENOUGH_DATA`.
pub const HAVE_ENOUGH_DATA: u8 = 4;

/// The playback element the buffered media ends up in.
///
/// Implementations use interior mutability: the scheduler only ever holds a
/// shared handle.
pub trait MediaElement: Send + Sync {
    fn current_time(&self) -> f64;
    fn set_current_time(&self, time: f64);
    /// Buffered ranges in ascending order.
    fn buffered(&self) -> Vec<TimeRange>;
    fn paused(&self) -> bool;
    fn seeking(&self) -> bool;
    fn ended(&self) -> bool;
    fn ready_state(&self) -> u8;
    /// Seconds, `f64::NAN` until known.
    fn duration(&self) -> f64;
    fn play(&self);
    fn pause(&self);
}

/// Shared handle to the attached media element.
#[derive(Clone)]
pub struct MediaHandle(pub Arc<dyn MediaElement>);

impl MediaHandle {
    pub fn new(media: Arc<dyn MediaElement>) -> Self {
        Self(media)
    }
}

impl std::ops::Deref for MediaHandle {
    type Target = dyn MediaElement;

    fn deref(&self) -> &Self::Target {
        self.0.as_ref()
    }
}

impl fmt::Debug for MediaHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaHandle")
            .field("current_time", &self.0.current_time())
            .field("paused", &self.0.paused())
            .finish()
    }
}

#[derive(Debug, Default)]
struct SimulatedState {
    current_time: f64,
    buffered: Vec<TimeRange>,
    paused: bool,
    seeking: bool,
    ended: bool,
    ready_state: u8,
    duration: Option<f64>,
}

/// In-memory media element driven by the host, for simulations and tests.
#[derive(Debug, Default)]
pub struct SimulatedMedia {
    state: Mutex<SimulatedState>,
}

impl SimulatedMedia {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_buffered(&self, ranges: Vec<TimeRange>) {
        self.state.lock().buffered = ranges;
    }

    /// Extends the buffer: merges `[start, end)` into the existing ranges.
    pub fn add_buffered(&self, start: f64, end: f64) {
        let mut state = self.state.lock();
        let mut ranges = std::mem::take(&mut state.buffered);
        ranges.push(TimeRange::new(start, end));
        ranges.sort_by(|a, b| a.start.total_cmp(&b.start));
        let mut merged: Vec<TimeRange> = Vec::with_capacity(ranges.len());
        for range in ranges {
            match merged.last_mut() {
                Some(last) if range.start <= last.end => last.end = last.end.max(range.end),
                _ => merged.push(range),
            }
        }
        state.buffered = merged;
    }

    pub fn set_paused(&self, paused: bool) {
        self.state.lock().paused = paused;
    }

    pub fn set_seeking(&self, seeking: bool) {
        self.state.lock().seeking = seeking;
    }

    pub fn set_ended(&self, ended: bool) {
        self.state.lock().ended = ended;
    }

    pub fn set_ready_state(&self, ready_state: u8) {
        self.state.lock().ready_state = ready_state;
    }

    pub fn set_duration(&self, duration: f64) {
        self.state.lock().duration = Some(duration);
    }
}

impl MediaElement for SimulatedMedia {
    fn current_time(&self) -> f64 {
        self.state.lock().current_time
    }

    fn set_current_time(&self, time: f64) {
        self.state.lock().current_time = time;
    }

    fn buffered(&self) -> Vec<TimeRange> {
        self.state.lock().buffered.clone()
    }

    fn paused(&self) -> bool {
        self.state.lock().paused
    }

    fn seeking(&self) -> bool {
        self.state.lock().seeking
    }

    fn ended(&self) -> bool {
        self.state.lock().ended
    }

    fn ready_state(&self) -> u8 {
        self.state.lock().ready_state
    }

    fn duration(&self) -> f64 {
        self.state.lock().duration.unwrap_or(f64::NAN)
    }

    fn play(&self) {
        self.state.lock().paused = false;
    }

    fn pause(&self) {
        self.state.lock().paused = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_add_buffered_merges_overlaps() {
        let media = SimulatedMedia::new();
        media.add_buffered(6.0, 12.0);
        media.add_buffered(0.0, 6.0);
        media.add_buffered(20.0, 26.0);
        assert_eq!(
            media.buffered(),
            vec![TimeRange::new(0.0, 12.0), TimeRange::new(20.0, 26.0)]
        );
        assert!(media.duration().is_nan());
    }
}
