use super::Fragment;

/// One playback variant of the stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Level {
    /// Bits per second advertised by the manifest, 0 when unknown.
    pub bitrate: u32,
    pub audio_codec: Option<String>,
    pub video_codec: Option<String>,
    pub name: Option<String>,
    pub details: Option<LevelDetails>,
}

impl Level {
    pub fn new(bitrate: u32) -> Self {
        Self {
            bitrate,
            ..Default::default()
        }
    }

    pub fn with_codecs(mut self, audio: Option<&str>, video: Option<&str>) -> Self {
        self.audio_codec = audio.map(str::to_string);
        self.video_codec = video.map(str::to_string);
        self
    }

    pub fn with_details(mut self, details: LevelDetails) -> Self {
        self.details = Some(details);
        self
    }
}

/// One loaded snapshot of a level's media playlist.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LevelDetails {
    pub fragments: Vec<Fragment>,
    pub start_sn: u64,
    pub end_sn: u64,
    pub live: bool,
    pub total_duration: f64,
    pub target_duration: f64,
    /// Set once any fragment of this snapshot carries parsed timestamps.
    pub pts_known: bool,
    /// Wall-clock time the snapshot was received, milliseconds.
    pub loaded_at_ms: Option<f64>,
}

impl LevelDetails {
    /// Builds a snapshot from fragment durations, numbering them from
    /// `start_sn` and laying them back to back from 0.
    pub fn from_durations(level: usize, start_sn: u64, durations: &[f64], live: bool) -> Self {
        let mut start = 0.0;
        let fragments: Vec<Fragment> = durations
            .iter()
            .enumerate()
            .map(|(i, &duration)| {
                let frag = Fragment::new(level, start_sn + i as u64, start, duration);
                start += duration;
                frag
            })
            .collect();
        let target_duration = durations.iter().cloned().fold(0.0, f64::max).ceil();
        Self::from_fragments(fragments, live, target_duration)
    }

    /// Builds a snapshot from already-numbered fragments. Sequence numbers
    /// must be contiguous.
    pub fn from_fragments(fragments: Vec<Fragment>, live: bool, target_duration: f64) -> Self {
        let start_sn = fragments.first().map(|f| f.sn).unwrap_or(0);
        let end_sn = fragments
            .last()
            .map(|f| f.sn)
            .unwrap_or(start_sn.saturating_sub(1));
        let total_duration = fragments.iter().map(|f| f.duration).sum();
        Self {
            fragments,
            start_sn,
            end_sn,
            live,
            total_duration,
            target_duration,
            pts_known: false,
            loaded_at_ms: None,
        }
    }

    /// Fragment holding sequence number `sn`, if this snapshot lists it.
    pub fn fragment(&self, sn: u64) -> Option<&Fragment> {
        self.index_of(sn).map(|i| &self.fragments[i])
    }

    pub fn fragment_mut(&mut self, sn: u64) -> Option<&mut Fragment> {
        self.index_of(sn).map(move |i| &mut self.fragments[i])
    }

    pub fn index_of(&self, sn: u64) -> Option<usize> {
        if sn < self.start_sn {
            return None;
        }
        let idx = (sn - self.start_sn) as usize;
        (idx < self.fragments.len()).then_some(idx)
    }

    /// End of the last fragment on the presentation timeline.
    pub fn end(&self) -> f64 {
        self.fragments.last().map(|f| f.end()).unwrap_or(0.0)
    }

    pub fn start(&self) -> f64 {
        self.fragments.first().map(|f| f.start).unwrap_or(0.0)
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}
