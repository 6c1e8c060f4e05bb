#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileType {
    Main = 0,
    LC = 1,
    SSR = 2,
    LTP = 3,
}

impl From<u8> for ProfileType {
    fn from(value: u8) -> Self {
        match value & 0x03 {
            0 => ProfileType::Main,
            1 => ProfileType::LC,
            2 => ProfileType::SSR,
            _ => ProfileType::LTP,
        }
    }
}

impl ProfileType {
    /// MPEG-4 audio object type: ADTS profile plus one.
    pub fn object_type(self) -> u8 {
        self as u8 + 1
    }
}

pub const ADTS_SAMPLE_RATES: [u32; 13] = [
    96000, 88200, 64000, 48000, 44100, 32000, 24000, 22050, 16000, 12000, 11025, 8000, 7350,
];

/// Samples per AAC frame.
pub const AAC_FRAME_SAMPLES: u32 = 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct ADTSHeader {
    pub sync_word: u32,           // 12 bits
    pub id: u8,                   // 1 bit, 0=MPEG-4, 1=MPEG-2
    pub layer: u8,                // 2 bits
    pub protection_absent: bool,  // 1 bit
    pub profile: ProfileType,     // 2 bits
    pub sample_rate_index: u8,    // 4 bits
    pub channel_configuration: u8, // 3 bits
    pub frame_length: u16,        // 13 bits, header included
    pub number_of_raw_blocks: u8, // 2 bits
}

impl ADTSHeader {
    pub fn sample_rate(&self) -> Option<u32> {
        ADTS_SAMPLE_RATES.get(self.sample_rate_index as usize).copied()
    }

    /// 7 bytes, or 9 when a CRC follows the header.
    pub fn header_len(&self) -> usize {
        if self.protection_absent {
            7
        } else {
            9
        }
    }
}

/// Decoder configuration derived from the first ADTS header of a stream.
#[derive(Debug, Clone, PartialEq)]
pub struct AACConfig {
    pub object_type: u8,
    pub sample_rate_index: u8,
    pub sample_rate: u32,
    pub channel_configuration: u8,
    /// AudioSpecificConfig bytes.
    pub config: Vec<u8>,
}

impl AACConfig {
    /// Builds the AudioSpecificConfig for `header`.
    ///
    /// When the manifest advertises HE-AAC (`mp4a.40.5` or `mp4a.40.29`) the
    /// config signals SBR explicitly with object type 5 and an extension
    /// sampling index.
    pub fn from_header(header: &ADTSHeader, codec_hint: Option<&str>) -> Option<Self> {
        let sample_rate = header.sample_rate()?;
        let index = header.sample_rate_index;
        let channels = header.channel_configuration;
        let he_aac = codec_hint
            .is_some_and(|hint| hint.contains("mp4a.40.5") || hint.contains("mp4a.40.29"));

        let object_type = if he_aac { 5 } else { header.profile.object_type() };
        let mut config = vec![
            (object_type << 3) | ((index & 0x0E) >> 1),
            ((index & 0x01) << 7) | (channels << 3),
        ];
        if object_type == 5 {
            let extension_index = if index >= 6 { index - 3 } else { index };
            config[1] |= (extension_index & 0x0E) >> 1;
            config.push(((extension_index & 0x01) << 7) | (2 << 2));
            config.push(0);
        }

        Some(Self {
            object_type,
            sample_rate_index: index,
            sample_rate,
            channel_configuration: channels,
            config,
        })
    }

    pub fn codec_string(&self) -> String {
        format!("mp4a.40.{}", self.object_type)
    }

    /// Duration of one frame in 90 kHz ticks.
    pub fn frame_duration(&self) -> f64 {
        AAC_FRAME_SAMPLES as f64 * 90_000.0 / self.sample_rate as f64
    }
}
