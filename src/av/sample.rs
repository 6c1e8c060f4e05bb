use bytes::Bytes;

/// Timing shared by all sample kinds, in 90 kHz ticks.
pub trait TimedSample {
    fn pts(&self) -> i64;
    fn dts(&self) -> i64 {
        self.pts()
    }
    fn byte_len(&self) -> usize;
}

/// One H.264 NAL unit without its start code.
#[derive(Debug, Clone, PartialEq)]
pub struct NalUnit {
    pub nal_type: u8,
    pub data: Bytes,
}

impl NalUnit {
    pub fn new(data: Bytes) -> Self {
        let nal_type = data.first().map(|b| b & 0x1F).unwrap_or(0);
        Self { nal_type, data }
    }
}

/// One access unit: every NAL unit sharing a PES timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoSample {
    pub pts: i64,
    pub dts: i64,
    pub key: bool,
    pub units: Vec<NalUnit>,
    /// Sum of the unit payload sizes.
    pub length: usize,
}

impl VideoSample {
    pub fn new(pts: i64, dts: i64) -> Self {
        Self {
            pts,
            dts,
            key: false,
            units: Vec::new(),
            length: 0,
        }
    }

    pub fn push_unit(&mut self, unit: NalUnit) {
        self.length += unit.data.len();
        self.units.push(unit);
    }
}

impl TimedSample for VideoSample {
    fn pts(&self) -> i64 {
        self.pts
    }
    fn dts(&self) -> i64 {
        self.dts
    }
    fn byte_len(&self) -> usize {
        self.length
    }
}

/// One raw AAC frame, ADTS header stripped.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSample {
    pub pts: i64,
    pub unit: Bytes,
}

impl TimedSample for AudioSample {
    fn pts(&self) -> i64 {
        self.pts
    }
    fn byte_len(&self) -> usize {
        self.unit.len()
    }
}

/// One timed-metadata (ID3) PES payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Id3Sample {
    pub pts: i64,
    pub dts: i64,
    pub data: Bytes,
}

impl TimedSample for Id3Sample {
    fn pts(&self) -> i64 {
        self.pts
    }
    fn dts(&self) -> i64 {
        self.dts
    }
    fn byte_len(&self) -> usize {
        self.data.len()
    }
}

/// CEA-608 byte triplets (`cc_valid/cc_type`, data1, data2) lifted from one
/// SEI message.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptionSample {
    pub pts: i64,
    pub bytes: Vec<u8>,
}

impl TimedSample for CaptionSample {
    fn pts(&self) -> i64 {
        self.pts
    }
    fn byte_len(&self) -> usize {
        self.bytes.len()
    }
}
