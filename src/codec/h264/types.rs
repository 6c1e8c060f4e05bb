/// Values decoded from a sequence parameter set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SPSInfo {
    pub profile_idc: u8,
    pub constraint_flags: u8,
    pub level_idc: u8,
    pub chroma_format_idc: u32,
    /// Display width after frame cropping.
    pub width: u32,
    /// Display height after frame cropping.
    pub height: u32,
}

impl SPSInfo {
    /// RFC 6381 codec id, `avc1.PPCCLL`.
    pub fn codec_string(&self) -> String {
        format!(
            "avc1.{:02x}{:02x}{:02x}",
            self.profile_idc, self.constraint_flags, self.level_idc
        )
    }
}

/// What an SEI NAL unit told us.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeiMessages {
    /// A recovery point message was present.
    pub recovery_point: bool,
    /// CEA-608 payloads: the two header bytes followed by `cc_count` triplets.
    pub captions: Vec<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NALUnitType {
    Unspecified = 0,
    CodedSliceNonIDR = 1,
    CodedSliceDataPartitionA = 2,
    CodedSliceDataPartitionB = 3,
    CodedSliceDataPartitionC = 4,
    CodedSliceIDR = 5,
    SEI = 6,
    SPS = 7,
    PPS = 8,
    AccessUnitDelimiter = 9,
    EndOfSequence = 10,
    EndOfStream = 11,
    FillerData = 12,
}

impl From<u8> for NALUnitType {
    fn from(value: u8) -> Self {
        match value & 0x1F {
            1 => NALUnitType::CodedSliceNonIDR,
            2 => NALUnitType::CodedSliceDataPartitionA,
            3 => NALUnitType::CodedSliceDataPartitionB,
            4 => NALUnitType::CodedSliceDataPartitionC,
            5 => NALUnitType::CodedSliceIDR,
            6 => NALUnitType::SEI,
            7 => NALUnitType::SPS,
            8 => NALUnitType::PPS,
            9 => NALUnitType::AccessUnitDelimiter,
            10 => NALUnitType::EndOfSequence,
            11 => NALUnitType::EndOfStream,
            12 => NALUnitType::FillerData,
            _ => NALUnitType::Unspecified,
        }
    }
}

/// `slice_type` values, modulo 5.
pub const SLICE_TYPE_I: u32 = 2;
pub const SLICE_TYPE_SI: u32 = 4;

pub const SEI_USER_DATA_REGISTERED: u32 = 4;
pub const SEI_RECOVERY_POINT: u32 = 6;
/// ITU-T T.35 country code for the United States.
pub const T35_COUNTRY_US: u8 = 181;
pub const T35_PROVIDER_ATSC: u16 = 49;
/// "GA94"
pub const ATSC_USER_IDENTIFIER: u32 = 0x4741_3934;
pub const ATSC_CC_DATA: u8 = 3;
