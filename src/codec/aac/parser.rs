use bytes::Bytes;

use super::types::{ADTSHeader, ProfileType};
use crate::av::AudioSample;
use crate::utils::BitReader;
use crate::{Result, VdkError};

/// True when an ADTS sync word (0xFFF) starts at `offset`.
pub fn is_adts_sync(data: &[u8], offset: usize) -> bool {
    offset + 1 < data.len() && data[offset] == 0xFF && (data[offset + 1] & 0xF0) == 0xF0
}

/// Offset of the first ADTS sync word at or after `from`.
pub fn find_sync(data: &[u8], from: usize) -> Option<usize> {
    (from..data.len().saturating_sub(1)).find(|&i| is_adts_sync(data, i))
}

pub fn parse_adts_header(data: &[u8]) -> Result<ADTSHeader> {
    if data.len() < 7 {
        return Err(VdkError::Parser("ADTS header too short".into()));
    }

    let mut reader = BitReader::new(data);

    let sync_word = reader.read_bits(12)?;
    if sync_word != 0xFFF {
        return Err(VdkError::Parser("Invalid ADTS sync word".into()));
    }

    let id = reader.read_bits(1)? as u8;
    let layer = reader.read_bits(2)? as u8;
    let protection_absent = reader.read_bit()?;
    let profile = ProfileType::from(reader.read_bits(2)? as u8);
    let sample_rate_index = reader.read_bits(4)? as u8;
    reader.skip_bits(1)?; // private bit
    let channel_configuration = reader.read_bits(3)? as u8;
    reader.skip_bits(4)?; // original/copy, home, copyright id bit and start
    let frame_length = reader.read_bits(13)? as u16;
    reader.skip_bits(11)?; // buffer fullness
    let number_of_raw_blocks = reader.read_bits(2)? as u8;

    Ok(ADTSHeader {
        sync_word,
        id,
        layer,
        protection_absent,
        profile,
        sample_rate_index,
        channel_configuration,
        frame_length,
        number_of_raw_blocks,
    })
}

/// Frames lifted out of one buffer of ADTS data.
#[derive(Debug, Default)]
pub struct FrameScan {
    pub samples: Vec<AudioSample>,
    /// Offset of the first byte not consumed by a complete frame.
    pub consumed: usize,
    /// Timestamp of the last frame pushed.
    pub last_pts: Option<i64>,
}

/// Cuts complete ADTS frames out of `data` starting at `start`.
///
/// Frame `n` is stamped `base_pts + n * frame_duration` (90 kHz). Scanning
/// stops at the first frame that does not fit; the caller carries the bytes
/// from `consumed` onwards into the next buffer.
pub fn scan_frames(data: &Bytes, start: usize, base_pts: i64, frame_duration: f64) -> FrameScan {
    let len = data.len();
    let mut scan = FrameScan {
        consumed: start,
        ..Default::default()
    };
    let mut offset = start;
    let mut index = 0u32;

    while offset + 5 < len {
        let header_len = if data[offset + 1] & 0x01 != 0 { 7 } else { 9 };
        let frame_len = (((data[offset + 3] & 0x03) as usize) << 11)
            | ((data[offset + 4] as usize) << 3)
            | ((data[offset + 5] & 0xE0) as usize >> 5);
        let payload_len = frame_len.saturating_sub(header_len);
        if payload_len == 0 || offset + header_len + payload_len > len {
            break;
        }

        let pts = base_pts + (index as f64 * frame_duration).round() as i64;
        scan.samples.push(AudioSample {
            pts,
            unit: data.slice(offset + header_len..offset + header_len + payload_len),
        });
        scan.last_pts = Some(pts);
        index += 1;
        offset += header_len + payload_len;

        while offset < len.saturating_sub(1) && !is_adts_sync(data, offset) {
            offset += 1;
        }
    }

    scan.consumed = offset.min(len);
    scan
}
