//! # Timeline reconciliation
//!
//! Live playlists slide: every reload drops fragments at the head and adds
//! new ones at the tail. These helpers carry the timing learned from parsed
//! fragments of the previous snapshot over to the new one, and spread a
//! single fragment's parsed timestamps across a whole snapshot.

use log::{debug, warn};

use crate::playlist::{Fragment, LevelDetails};

/// Grace allowed when matching snapshots on program date time, milliseconds.
const PROGRAM_TIME_GRACE_MS: f64 = 100.0;

/// Overlapping window between two snapshots.
///
/// Indices `start..=end` address the new snapshot; the matching old fragment
/// sits at `delta + i`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Overlap {
    pub start: i64,
    pub end: i64,
    pub delta: i64,
}

impl Overlap {
    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }
}

/// Program-time span of a snapshot anchored on its first dated fragment.
fn program_times(details: &LevelDetails) -> Option<(f64, f64)> {
    let anchor = details
        .fragments
        .iter()
        .position(|f| f.program_date_time.is_some())?;
    let pdt = details.fragments[anchor].program_time_ms()?;
    let (mut start, mut end) = (pdt, pdt);
    let last = details.fragments.len().saturating_sub(1);
    for (j, frag) in details.fragments[..last].iter().enumerate() {
        if j < anchor {
            start -= frag.duration * 1000.0;
        } else {
            end += frag.duration * 1000.0;
        }
    }
    Some((start, end))
}

/// Finds the window of fragments shared by `old` and `new`.
///
/// Sequence numbers are tried first. When they do not overlap, both
/// snapshots are laid on the program-date-time clock instead.
pub fn probe_details(old: &LevelDetails, new: &LevelDetails) -> Option<Overlap> {
    let new_start = new.start_sn as i64;
    let start = (old.start_sn as i64).max(new_start) - new_start;
    let end = (old.end_sn as i64).min(new.end_sn as i64) - new_start;
    let delta = new_start - old.start_sn as i64;
    if end >= start && !old.is_empty() && !new.is_empty() {
        return Some(Overlap { start, end, delta });
    }

    let (old_start, old_end) = program_times(old)?;
    let (new_times_start, _) = program_times(new)?;
    if !(old_start <= new_times_start && old_end >= new_times_start) {
        return None;
    }

    let mut delta = 0i64;
    let mut end = new.fragments.len().min(old.fragments.len()) as i64 - 1;
    let mut ts = old_start;
    while new_times_start - ts > PROGRAM_TIME_GRACE_MS {
        let frag = old.fragments.get(delta as usize)?;
        ts += frag.duration * 1000.0;
        delta += 1;
        end -= 1;
    }
    let overlap = Overlap { start: 0, end, delta };
    debug!("program time overlap {:?}", overlap);
    (!overlap.is_empty()).then_some(overlap)
}

/// Carries timing from `old` into `new` for the fragments they share.
///
/// Leaves `new.pts_known` false when nothing overlaps.
pub fn merge_details(old: &LevelDetails, new: &mut LevelDetails) {
    let Some(Overlap { start, end, delta }) = probe_details(old, new) else {
        new.pts_known = false;
        return;
    };

    let mut cc_offset = 0i64;
    let mut pts_frag: Option<usize> = None;
    for i in start..=end {
        let (Some(old_frag), Some(new_frag)) = (
            old.fragments.get((delta + i) as usize),
            new.fragments.get_mut(i as usize),
        ) else {
            continue;
        };
        cc_offset = old_frag.cc - new_frag.cc;
        if let Some(start_pts) = old_frag.start_pts {
            new_frag.start = start_pts;
            new_frag.start_pts = Some(start_pts);
            new_frag.end_pts = old_frag.end_pts;
            new_frag.duration = old_frag.duration;
            new_frag.pts_dts_shift = old_frag.pts_dts_shift;
            new_frag.last_gop = old_frag.last_gop;
            pts_frag = Some(i as usize);
        }
        if old_frag.first_gop.is_some() {
            new_frag.first_gop = old_frag.first_gop;
        }
    }

    if cc_offset != 0 {
        debug!("discontinuity sliding from playlist, offset {}", cc_offset);
        for frag in &mut new.fragments {
            frag.cc += cc_offset;
        }
    }

    match pts_frag {
        Some(idx) => {
            let frag = &new.fragments[idx];
            let (sn, start_pts, end_pts) = (frag.sn, frag.start_pts, frag.end_pts);
            let (shift, last_gop) = (frag.pts_dts_shift, frag.last_gop);
            if let (Some(start_pts), Some(end_pts)) = (start_pts, end_pts) {
                update_frag_pts(new, sn, start_pts, end_pts, shift, last_gop);
            }
        }
        None => {
            if delta >= 0 && (delta as usize) < old.fragments.len() {
                let sliding = old.fragments[delta as usize].start;
                for frag in &mut new.fragments {
                    frag.start += sliding;
                }
            }
        }
    }

    new.pts_known = old.pts_known;
}

/// Records parsed timestamps on fragment `sn` and re-times its neighbours.
///
/// Returns how far the parsed start moved from the playlist start, in
/// seconds; 0 when `sn` is not in `details`.
pub fn update_frag_pts(
    details: &mut LevelDetails,
    sn: u64,
    start_pts: f64,
    end_pts: f64,
    pts_dts_shift: f64,
    last_gop: Option<f64>,
) -> f64 {
    let Some(idx) = details.index_of(sn) else {
        return 0.0;
    };
    let fragments = &mut details.fragments;
    let frag = &mut fragments[idx];
    let (mut start_pts, mut end_pts) = (start_pts, end_pts);
    if let Some(known) = frag.start_pts {
        start_pts = start_pts.min(known);
        end_pts = end_pts.max(frag.end_pts.unwrap_or(end_pts));
    }

    let drift = start_pts - frag.start;
    frag.start = start_pts;
    frag.start_pts = Some(start_pts);
    frag.end_pts = Some(end_pts);
    frag.duration = end_pts - start_pts;
    frag.pts_dts_shift = pts_dts_shift;
    if last_gop.is_some() {
        frag.last_gop = last_gop;
    }

    for i in (1..=idx).rev() {
        update_pts(fragments, i, i - 1);
    }
    for i in idx..fragments.len().saturating_sub(1) {
        update_pts(fragments, i, i + 1);
    }
    details.pts_known = true;
    drift
}

/// Re-times fragment `to` from its neighbour `from`.
pub fn update_pts(fragments: &mut [Fragment], from: usize, to: usize) {
    let from_start = fragments[from].start;
    let from_duration = fragments[from].duration;
    let from_shift = fragments[from].pts_dts_shift;
    let from_last_gop = fragments[from].last_gop;

    match fragments[to].start_pts {
        Some(to_pts) => {
            let (target, duration) = if to > from {
                (from, to_pts - from_start)
            } else {
                (to, from_start - to_pts)
            };
            let frag = &mut fragments[target];
            if duration < 0.0 {
                warn!(
                    "negative duration computed for frag {}, level {}: playlist and fragment durations drifted",
                    frag.sn, frag.level
                );
            }
            frag.duration = duration.max(0.0);
        }
        None => {
            let frag = &mut fragments[to];
            frag.start = if to > from {
                from_start + from_duration
            } else {
                from_start - frag.duration
            };
        }
    }

    if to > from {
        let frag = &mut fragments[to];
        if frag.pts_dts_shift == 0.0 {
            frag.pts_dts_shift = from_shift;
        }
        if from_last_gop.is_some() {
            frag.first_gop = from_last_gop;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    fn snapshot(start_sn: u64, count: usize) -> LevelDetails {
        LevelDetails::from_durations(0, start_sn, &vec![6.0; count], true)
    }

    #[test]
    fn test_probe_by_sequence_number() {
        let old = snapshot(10, 5);
        let new = snapshot(12, 5);
        let overlap = probe_details(&old, &new).unwrap();
        assert_eq!(overlap, Overlap { start: 0, end: 2, delta: 2 });
        assert!(probe_details(&old, &snapshot(20, 3)).is_none());
    }

    #[test]
    fn test_merge_without_pts_slides_by_old_start() {
        let mut old = snapshot(10, 5);
        for frag in &mut old.fragments {
            frag.start += 100.0;
        }
        let mut new = snapshot(12, 5);
        merge_details(&old, &mut new);
        // old sn 12 started at 112
        let starts: Vec<f64> = new.fragments.iter().map(|f| f.start).collect();
        assert_eq!(starts, vec![112.0, 118.0, 124.0, 130.0, 136.0]);
        assert!(!new.pts_known);
    }

    #[test]
    fn test_merge_copies_parsed_timing_and_propagates() {
        let mut old = snapshot(10, 4);
        update_frag_pts(&mut old, 11, 6.25, 12.5, 0.125, Some(11.5));
        let mut new = snapshot(11, 4);
        merge_details(&old, &mut new);

        let first = &new.fragments[0];
        assert_eq!(first.start_pts, Some(6.25));
        assert_eq!(first.end_pts, Some(12.5));
        assert_eq!(first.last_gop, Some(11.5));
        assert_eq!(new.fragments[1].start, 12.5);
        assert_eq!(new.fragments[1].first_gop, Some(11.5));
        assert_eq!(new.fragments[1].pts_dts_shift, 0.125);
        assert!(new.pts_known);
    }

    #[test]
    fn test_cc_offset_applies_to_whole_snapshot() {
        let mut old = snapshot(10, 3);
        for frag in &mut old.fragments {
            frag.cc = 4;
        }
        let mut new = snapshot(11, 4);
        merge_details(&old, &mut new);
        assert!(new.fragments.iter().all(|f| f.cc == 4));
    }

    #[test]
    fn test_probe_by_program_date_time() {
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let mut old = snapshot(100, 4);
        old.fragments[0].program_date_time = Some(base);
        // server reset its sequence numbers; sn 0 aligns with old sn 102
        let mut new = snapshot(0, 4);
        new.fragments[0].program_date_time = Some(base + chrono::Duration::seconds(12));
        let overlap = probe_details(&old, &new).unwrap();
        assert_eq!(overlap, Overlap { start: 0, end: 1, delta: 2 });
    }

    #[test]
    fn test_update_frag_pts_moves_neighbours() {
        let mut details = LevelDetails::from_durations(0, 0, &[6.0, 6.0, 6.0], false);
        let drift = update_frag_pts(&mut details, 1, 6.5, 12.5, 0.0, None);
        assert_eq!(drift, 0.5);
        assert_eq!(details.fragments[0].start, 0.5);
        assert_eq!(details.fragments[0].duration, 6.0);
        assert_eq!(details.fragments[2].start, 12.5);
        assert_eq!(update_frag_pts(&mut details, 9, 0.0, 1.0, 0.0, None), 0.0);
    }

    #[test]
    fn test_negative_duration_is_clamped() {
        let mut details = LevelDetails::from_durations(0, 0, &[6.0, 6.0], false);
        update_frag_pts(&mut details, 1, 3.0, 9.0, 0.0, None);
        update_frag_pts(&mut details, 0, 4.0, 10.0, 0.0, None);
        assert_eq!(details.fragments[0].duration, 0.0);
    }
}
