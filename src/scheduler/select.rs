//! Picks the next fragment while idle.

use std::cmp::Ordering;

use log::{debug, info, trace, warn};

use super::buffer::{buffer_info, is_buffered, BufferInfo};
use super::search::search;
use super::{FragmentScheduler, State};
use crate::error::{ErrorDetails, PlaybackError};
use crate::events::{Event, LoadStats};
use crate::playlist::{Fragment, LevelDetails};

/// Tolerance when matching fragments on program date time, milliseconds.
const PROGRAM_TIME_TOLERANCE_MS: f64 = 250.0;

enum LivePoint {
    /// Ahead of the live edge, nothing to load.
    Stop,
    Pick(usize),
    /// Fall through to the buffer-end search.
    Search,
}

enum Pick {
    Load(usize),
    /// Load `load` again after fragment `previous` came out with a hole.
    Reload { load: usize, previous: u64 },
    EndOfStream,
    Nothing,
}

impl FragmentScheduler {
    pub(super) fn tick_idle(&mut self) {
        let media = self.media.clone();
        if self.level_last_loaded.is_some()
            && media.is_none()
            && (self.start_frag_requested || !self.config.start_frag_prefetch)
        {
            return;
        }
        let pos = match &media {
            Some(media) if self.loaded_metadata => media.current_time(),
            _ => self.next_load_position,
        };
        let Some(level) = self.next_load_level.or(self.level) else {
            return;
        };
        let Some(bitrate) = self.levels.get(level).map(|l| l.bitrate) else {
            warn!("next load level {} is out of range", level);
            return;
        };

        let max_buf_len = if bitrate > 0 {
            (8.0 * self.config.max_buffer_size / bitrate as f64)
                .max(self.config.max_buffer_length)
                .min(self.config.max_max_buffer_length)
        } else {
            self.config.max_buffer_length
        };
        let info = buffer_info(&self.buffered(), pos, self.config.max_buffer_hole);
        if info.len >= max_buf_len {
            return;
        }
        trace!(
            "buffer length of {:.3} is below max of {:.3}, checking for more payload",
            info.len,
            max_buf_len
        );

        self.level = Some(level);
        self.next_load_level = Some(level);
        let waiting = match self.details(level) {
            None => true,
            Some(details) => details.live && self.level_last_loaded != Some(level),
        };
        if waiting {
            self.wait_level(level);
            return;
        }
        self.fetch_payload_or_eos(level, pos, info);
    }

    fn fetch_payload_or_eos(&mut self, level: usize, pos: f64, info: BufferInfo) {
        let Some(details) = self.details(level) else {
            return;
        };
        if details.is_empty() {
            return;
        }
        let mut buffer_end = info.end;
        let pick = if details.live {
            let (point, live_end) = self.live_point(details, buffer_end);
            buffer_end = live_end;
            match point {
                LivePoint::Stop => return,
                LivePoint::Pick(idx) => Pick::Load(idx),
                LivePoint::Search => self.find_fragment(details, buffer_end),
            }
        } else if buffer_end < details.start() {
            Pick::Load(0)
        } else {
            self.find_fragment(details, buffer_end)
        };

        match pick {
            Pick::Load(idx) => self.load_fragment_or_key(level, idx, pos, buffer_end),
            Pick::Reload { load, previous } => {
                if let Some(frag) = self.level_fragment_mut(level, previous) {
                    frag.load_counter = frag.load_counter.saturating_sub(1);
                }
                if let Some(frag) = self.frag_previous.as_mut() {
                    frag.load_counter = frag.load_counter.saturating_sub(1);
                }
                self.load_fragment_or_key(level, load, pos, buffer_end);
            }
            Pick::EndOfStream => {
                info!("end of playlist reached, finalize the media stream");
                self.bus.publish(Event::BufferEos);
                // going to ENDED while a seek waits for data would stall it for good
                if !self.media.as_ref().is_some_and(|m| m.seeking()) {
                    self.set_state(State::Ended);
                }
            }
            Pick::Nothing => {}
        }
    }

    /// Checks the buffer end against the live window. Returns the decision
    /// and the buffer end to search from.
    fn live_point(&self, details: &LevelDetails, buffer_end: f64) -> (LivePoint, f64) {
        let max_latency = self
            .config
            .live_max_latency_duration
            .unwrap_or(self.config.live_max_latency_duration_count * details.target_duration);
        let (start, end) = (details.start(), details.end());
        let mut buffer_end = buffer_end;

        if buffer_end < (start - self.config.max_frag_lookup_tolerance).max(end - max_latency) {
            let live_sync = self.live_sync_position(start, details);
            info!(
                "buffer end {:.3} is too far from the live edge, reset current time to {:.3}",
                buffer_end, live_sync
            );
            buffer_end = live_sync;
            if let Some(media) = self.media.as_ref() {
                if media.ready_state() > 0 && media.duration() > live_sync {
                    media.set_current_time(live_sync);
                }
            }
        }

        // the playlist can slide back; never reload what lies past its end
        let media_ready = self.media.as_ref().is_some_and(|m| m.ready_state() > 0);
        if details.pts_known && buffer_end > end && media_ready {
            return (LivePoint::Stop, buffer_end);
        }

        if self.start_frag_requested && !details.pts_known {
            let previous = self.frag_previous.as_ref();
            let by_program_time = previous
                .and_then(|p| p.program_time_ms().map(|t| t + p.duration * 1000.0))
                .and_then(|t| find_by_program_time(&details.fragments, t));
            let by_sn = previous.and_then(|p| details.index_of(p.sn + 1));
            let idx = match by_program_time.or(by_sn) {
                Some(idx) => {
                    info!("live playlist, switching playlist, load frag with next sn {}", details.fragments[idx].sn);
                    idx
                }
                None => {
                    let len = details.fragments.len();
                    let middle = ((len + 1) / 2).min(len - 1);
                    info!(
                        "live playlist, switching playlist, unknown, load middle frag {}",
                        details.fragments[middle].sn
                    );
                    middle
                }
            };
            return (LivePoint::Pick(idx), buffer_end);
        }
        (LivePoint::Search, buffer_end)
    }

    fn find_fragment(&self, details: &LevelDetails, buffer_end: f64) -> Pick {
        let fragments = &details.fragments;
        let Some(last) = fragments.last() else {
            return Pick::Nothing;
        };
        let end = details.end();
        let seeking = self.media.as_ref().is_some_and(|m| m.seeking());

        let found = if buffer_end < end - last.pts_dts_shift - 0.05 {
            let tolerance = if buffer_end > end - self.config.max_frag_lookup_tolerance || seeking {
                0.0
            } else {
                self.config.max_frag_lookup_tolerance
            };
            search(fragments, |candidate| {
                locate(candidate, buffer_end, tolerance, details.start_sn)
            })
        } else {
            Some(fragments.len() - 1)
        };
        let Some(idx) = found else {
            return Pick::Nothing;
        };
        let frag = &fragments[idx];
        debug!("find sn matching with pos {:.3}: {}", buffer_end, frag.sn);

        let Some(previous) = self.frag_previous.as_ref().filter(|p| p.sn == frag.sn) else {
            return Pick::Load(idx);
        };
        if frag.sn < details.end_sn {
            let delta = previous.delta_pts.unwrap_or(0.0);
            let hole = !self
                .media
                .as_ref()
                .is_some_and(|m| is_buffered(&m.buffered(), buffer_end));
            if self.loaded_metadata
                && delta > self.config.max_seek_hole
                && previous.dropped > 0
                && hole
                && idx > 0
            {
                warn!(
                    "sn {} just loaded with a large audio/video gap, maybe it does not start with a keyframe, load the previous one",
                    frag.sn
                );
                Pick::Reload {
                    load: idx - 1,
                    previous: previous.sn,
                }
            } else {
                debug!("sn {} just loaded, load next one", frag.sn);
                Pick::Load(idx + 1)
            }
        } else if !details.live {
            Pick::EndOfStream
        } else {
            Pick::Nothing
        }
    }

    fn load_fragment_or_key(&mut self, level: usize, idx: usize, pos: f64, buffer_end: f64) {
        let Some(details) = self.details(level) else {
            return;
        };
        let (start_sn, end_sn) = (details.start_sn, details.end_sn);
        let Some(frag) = details.fragments.get(idx) else {
            return;
        };
        if frag.needs_key() {
            info!("loading key for {} of [{},{}], level {}", frag.sn, start_sn, end_sn, level);
            let frag = frag.clone();
            self.set_state(State::KeyLoading);
            self.bus.publish(Event::KeyLoading { frag });
            return;
        }
        info!(
            "loading {} of [{},{}], level {}, current time {:.3}, buffer end {:.3}",
            frag.sn, start_sn, end_sn, level, pos, buffer_end
        );
        let sn = frag.sn;

        let load_idx = self.frag_load_idx.map_or(0, |idx| idx + 1);
        self.frag_load_idx = Some(load_idx);
        let threshold = self.config.frag_loading_loop_threshold;
        let Some(frag) = self.level_fragment_mut(level, sn) else {
            return;
        };
        if frag.load_counter > 0 {
            frag.load_counter += 1;
            let recent = frag
                .load_idx
                .is_some_and(|previous| previous.abs_diff(load_idx) < u64::from(threshold));
            if frag.load_counter > threshold && recent {
                let reference = frag.reference();
                warn!("sn {} reloaded {} times in a row", sn, frag.load_counter);
                self.raise(PlaybackError::new(ErrorDetails::FragLoopLoadingError, false).with_frag(reference));
                return;
            }
        } else {
            frag.load_counter = 1;
        }
        frag.load_idx = Some(load_idx);
        frag.loaded = false;
        let frag = frag.clone();

        self.start_frag_requested = true;
        self.next_load_position = frag.end();
        self.frag_time_offset = frag.start;
        self.frag_chunks = 0;
        self.pending_appends = 0;
        self.frag_requested_ms = self.now();
        self.stats = LoadStats {
            trequest: self.frag_requested_ms,
            ..LoadStats::default()
        };
        self.frag_current = Some(frag.clone());
        self.set_state(State::FragLoading);
        self.bus.publish(Event::FragLoading { frag });
    }
}

/// Where `buffer_end` lies relative to `candidate`.
fn locate(candidate: &Fragment, buffer_end: f64, tolerance: f64, start_sn: u64) -> Ordering {
    let near = |t: f64| t - tolerance < buffer_end && t + tolerance > buffer_end;
    if candidate.last_gop.is_some_and(near) {
        return Ordering::Greater;
    }
    if candidate.first_gop.is_some_and(near) {
        return Ordering::Equal;
    }
    if candidate.end() - candidate.pts_dts_shift - tolerance <= buffer_end {
        return Ordering::Greater;
    }
    if candidate.start - candidate.pts_dts_shift - tolerance > buffer_end && candidate.start != 0.0 {
        return if candidate.sn > start_sn {
            Ordering::Less
        } else {
            Ordering::Equal
        };
    }
    Ordering::Equal
}

/// Fragment whose program date time matches `program_time_ms`.
fn find_by_program_time(fragments: &[Fragment], program_time_ms: f64) -> Option<usize> {
    fragments.iter().position(|f| {
        f.program_time_ms()
            .is_some_and(|t| (t - program_time_ms).abs() <= PROGRAM_TIME_TOLERANCE_MS)
    })
}
