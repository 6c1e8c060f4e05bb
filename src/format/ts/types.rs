use bytes::Bytes;

pub const TS_PACKET_SIZE: usize = 188;
pub const TS_HEADER_SIZE: usize = 4;
pub const SYNC_BYTE: u8 = 0x47;

// PIDs
pub const PID_PAT: u16 = 0x0000;

// Table IDs
pub const TABLE_ID_PAT: u8 = 0x00;
pub const TABLE_ID_PMT: u8 = 0x02;

// Elementary Stream Types
pub const STREAM_TYPE_AAC: u8 = 0x0f;
pub const STREAM_TYPE_METADATA: u8 = 0x15;
pub const STREAM_TYPE_H264: u8 = 0x1b;

/// PES timestamps are 33 bits wide.
pub const TIMESTAMP_WRAP: i64 = 1 << 33;

/// A PTS further than this ahead of its DTS is treated as corrupt (60 s).
pub const MAX_PTS_DTS_DELTA: i64 = 60 * 90_000;

#[derive(Debug, Clone)]
pub struct PATEntry {
    pub program_number: u16,
    pub network_pid: u16,
    pub program_map_pid: u16,
}

#[derive(Debug, Clone, Default)]
pub struct PAT {
    pub entries: Vec<PATEntry>,
}

impl PAT {
    /// PMT pid of the first real program; program 0 names the network PID.
    pub fn first_program_pid(&self) -> Option<u16> {
        self.entries
            .iter()
            .find(|entry| entry.program_number != 0)
            .map(|entry| entry.program_map_pid)
    }
}

#[derive(Debug, Clone)]
pub struct Descriptor {
    pub tag: u8,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct ElementaryStreamInfo {
    pub stream_type: u8,
    pub elementary_pid: u16,
    pub descriptors: Vec<Descriptor>,
}

#[derive(Debug, Clone, Default)]
pub struct PMT {
    pub pcr_pid: u16,
    pub program_descriptors: Vec<Descriptor>,
    pub elementary_stream_infos: Vec<ElementaryStreamInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TSHeader {
    pub sync_byte: u8, // Always 0x47
    pub transport_error: bool,
    pub payload_unit_start: bool,
    pub transport_priority: bool,
    pub pid: u16,
    pub scrambling_control: u8,
    pub adaptation_field_exists: bool,
    pub contains_payload: bool,
    pub continuity_counter: u8,
}

/// One reassembled PES packet.
#[derive(Debug, Clone, PartialEq)]
pub struct Pes {
    pub data: Bytes,
    /// 90 kHz, `None` when the header carried no timestamps.
    pub pts: Option<i64>,
    pub dts: Option<i64>,
    /// PES_packet_length from the header, 0 for unbounded video packets.
    pub len: usize,
}
