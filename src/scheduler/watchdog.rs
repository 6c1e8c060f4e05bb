//! Buffer-health watchdog.
//!
//! Runs on every tick whatever the state. Once metadata is loaded it moves
//! the play position to the start position. After that it watches for a
//! playhead that stops moving while playback is expected. A stall with an
//! empty buffer jumps over a nearby hole. A stall with a healthy buffer
//! nudges the position a few times, then gives up with a fatal error.

use log::{error, info, warn};

use super::buffer::{buffer_info, is_buffered};
use super::{FragmentScheduler, State};
use crate::error::{ErrorDetails, PlaybackError};
use crate::events::{MediaHandle, TimeRange};

/// Buffered seconds below which a stall counts as a low-buffer stall.
const JUMP_THRESHOLD: f64 = 0.5;

impl FragmentScheduler {
    pub(super) fn check_buffer(&mut self) {
        if self.state == State::Error {
            return;
        }
        let Some(media) = self.media.clone() else {
            return;
        };
        if media.ready_state() == 0 {
            return;
        }
        let current = media.current_time();
        let buffered = media.buffered();

        if !self.loaded_metadata && !buffered.is_empty() && !media.seeking() {
            self.loaded_metadata = true;
            let mut start = self.start_position;
            let start_buffered = is_buffered(&buffered, start);
            if current != start || !start_buffered {
                if !start_buffered {
                    start = buffered[0].start;
                    info!("target start position not buffered, seek to buffered start {:.3}", start);
                }
                info!("adjust current time from {:.3} to {:.3}", current, start);
                media.set_current_time(start);
            }
            return;
        }
        self.check_stall(&media, current, &buffered);
    }

    fn check_stall(&mut self, media: &MediaHandle, current: f64, buffered: &[TimeRange]) {
        if current > self.last_current_time {
            if self.stall_reported {
                warn!("playback not stuck anymore @{:.3}", current);
                self.stall_reported = false;
            }
            self.stalled = None;
            self.nudge_retry = 0;
            return;
        }
        let expected_playing = !(media.paused() || media.ended() || buffered.is_empty());
        if !expected_playing {
            return;
        }

        let now = self.now();
        let Some(since) = self.stalled else {
            self.stalled = Some(now);
            return;
        };
        let stalled_for = now - since;
        let info = buffer_info(buffered, current, 0.0);

        if info.len <= JUMP_THRESHOLD
            && stalled_for > self.config.low_buffer_watchdog_period * 1000.0
        {
            self.report_stall(current, info.len, "low");
            let Some(next_start) = info.next_start else {
                return;
            };
            let delta = next_start - current;
            if delta > 0.0 && delta < self.config.max_seek_hole {
                self.nudge_retry += 1;
                let target = next_start + f64::from(self.nudge_retry) * self.config.nudge_offset;
                info!(
                    "adjust current time from {:.3} to next buffered @ {:.3} + nudge {:.3}",
                    current,
                    next_start,
                    target - next_start
                );
                media.set_current_time(target);
                // a move we made is not the playhead recovering
                self.last_current_time = target;
                self.stalled = None;
                self.raise(
                    PlaybackError::new(ErrorDetails::BufferSeekOverHole, false)
                        .with_reason(format!("hole of {:.3}s", target - current)),
                );
            }
        } else if info.len > JUMP_THRESHOLD
            && stalled_for > self.config.high_buffer_watchdog_period * 1000.0
        {
            self.report_stall(current, info.len, "high");
            self.stalled = None;
            self.nudge_retry += 1;
            if self.nudge_retry < self.config.nudge_max_retry {
                let target = current + f64::from(self.nudge_retry) * self.config.nudge_offset;
                info!("adjust current time from {:.3} to {:.3}", current, target);
                media.set_current_time(target);
                self.last_current_time = target;
                self.raise(PlaybackError::new(ErrorDetails::BufferNudgeOnStall, false));
            } else {
                error!(
                    "still stuck in high buffer @{:.3} after {} nudges, raise fatal error",
                    current, self.config.nudge_max_retry
                );
                self.raise(PlaybackError::new(ErrorDetails::BufferStalledError, true));
            }
        }
    }

    fn report_stall(&mut self, current: f64, buffered: f64, which: &str) {
        if self.stall_reported {
            return;
        }
        self.stall_reported = true;
        warn!("playback stalling in {} buffer @{:.3}", which, current);
        self.raise(
            PlaybackError::new(ErrorDetails::BufferStalledError, false)
                .with_reason(format!("{:.3}s buffered", buffered)),
        );
    }
}
