use bytes::{BufMut, Bytes, BytesMut};

use super::types::*;
use crate::av::NalUnit;
use crate::utils::BitReader;
use crate::Result;

/// NAL units found in one Annex B buffer.
#[derive(Debug, Default)]
pub struct NalScan {
    /// Bytes preceding the first start code. They continue the last unit of
    /// the previous buffer. Holds the whole input when no start code exists.
    pub leading: Option<Bytes>,
    pub units: Vec<NalUnit>,
}

/// Splits an Annex B buffer on 3- and 4-byte start codes.
///
/// Units are zero-copy slices of `data`.
pub fn split_nal_units(data: &Bytes) -> NalScan {
    let len = data.len();
    let mut scan = NalScan::default();
    let mut state = 0u8;
    let mut i = 0usize;
    let mut unit_start: Option<usize> = None;

    while i < len {
        let value = data[i];
        i += 1;
        match state {
            0 => {
                if value == 0 {
                    state = 1;
                }
            }
            1 => state = if value == 0 { 2 } else { 0 },
            _ => {
                if value == 0 {
                    state = 3;
                } else if value == 1 && i < len {
                    let code_start = i - state as usize - 1;
                    match unit_start {
                        Some(start) => scan.units.push(NalUnit::new(data.slice(start..code_start))),
                        None if code_start > 0 => scan.leading = Some(data.slice(..code_start)),
                        None => {}
                    }
                    unit_start = Some(i);
                    state = 0;
                } else {
                    state = 0;
                }
            }
        }
    }

    match unit_start {
        Some(start) => scan.units.push(NalUnit::new(data.slice(start..len))),
        None if len > 0 => scan.leading = Some(data.clone()),
        None => {}
    }
    scan
}

/// Strips emulation prevention bytes (the 0x03 in `00 00 03`).
pub fn remove_emulation_prevention(data: &[u8]) -> Vec<u8> {
    let mut out = BytesMut::with_capacity(data.len());
    let mut zeros = 0usize;

    for &byte in data {
        if zeros >= 2 && byte == 0x03 {
            zeros = 0;
            continue;
        }
        zeros = if byte == 0 { zeros + 1 } else { 0 };
        out.put_u8(byte);
    }

    out.to_vec()
}

/// Parses an SPS NAL unit, header byte included.
pub fn parse_sps(nal: &[u8]) -> Result<SPSInfo> {
    let rbsp = remove_emulation_prevention(nal);
    let mut reader = BitReader::new(rbsp.get(1..).unwrap_or_default());

    let profile_idc = reader.read_u8()?;
    let constraint_flags = reader.read_u8()?;
    let level_idc = reader.read_u8()?;
    reader.skip_golomb()?; // seq_parameter_set_id

    let mut chroma_format_idc = 1;
    let mut separate_colour_plane = false;
    if matches!(
        profile_idc,
        100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134 | 135
    ) {
        chroma_format_idc = reader.read_golomb()?;
        if chroma_format_idc == 3 {
            separate_colour_plane = reader.read_bit()?;
        }
        reader.skip_golomb()?; // bit_depth_luma_minus8
        reader.skip_golomb()?; // bit_depth_chroma_minus8
        reader.skip_bits(1)?; // qpprime_y_zero_transform_bypass_flag

        if reader.read_bit()? {
            let count = if chroma_format_idc != 3 { 8 } else { 12 };
            for i in 0..count {
                if reader.read_bit()? {
                    skip_scaling_list(&mut reader, if i < 6 { 16 } else { 64 })?;
                }
            }
        }
    }

    reader.skip_golomb()?; // log2_max_frame_num_minus4
    let pic_order_cnt_type = reader.read_golomb()?;
    if pic_order_cnt_type == 0 {
        reader.skip_golomb()?; // log2_max_pic_order_cnt_lsb_minus4
    } else if pic_order_cnt_type == 1 {
        reader.skip_bits(1)?; // delta_pic_order_always_zero_flag
        reader.read_signed_golomb()?; // offset_for_non_ref_pic
        reader.read_signed_golomb()?; // offset_for_top_to_bottom_field
        let cycle = reader.read_golomb()?;
        for _ in 0..cycle {
            reader.read_signed_golomb()?;
        }
    }

    reader.skip_golomb()?; // max_num_ref_frames
    reader.skip_bits(1)?; // gaps_in_frame_num_value_allowed_flag

    let pic_width_in_mbs = reader.read_golomb()? + 1;
    let pic_height_in_map_units = reader.read_golomb()? + 1;
    let frame_mbs_only = reader.read_bit()? as u32;
    if frame_mbs_only == 0 {
        reader.skip_bits(1)?; // mb_adaptive_frame_field_flag
    }
    reader.skip_bits(1)?; // direct_8x8_inference_flag

    let (mut crop_left, mut crop_right, mut crop_top, mut crop_bottom) = (0, 0, 0, 0);
    if reader.read_bit()? {
        crop_left = reader.read_golomb()?;
        crop_right = reader.read_golomb()?;
        crop_top = reader.read_golomb()?;
        crop_bottom = reader.read_golomb()?;
    }

    let (crop_unit_x, crop_unit_y) = if separate_colour_plane || chroma_format_idc == 0 {
        (1, 2 - frame_mbs_only)
    } else {
        let sub_width = if chroma_format_idc == 3 { 1 } else { 2 };
        let sub_height = if chroma_format_idc == 1 { 2 } else { 1 };
        (sub_width, sub_height * (2 - frame_mbs_only))
    };

    let width = (pic_width_in_mbs * 16).saturating_sub(crop_unit_x * (crop_left + crop_right));
    let height = ((2 - frame_mbs_only) * pic_height_in_map_units * 16)
        .saturating_sub(crop_unit_y * (crop_top + crop_bottom));

    Ok(SPSInfo {
        profile_idc,
        constraint_flags,
        level_idc,
        chroma_format_idc,
        width,
        height,
    })
}

fn skip_scaling_list(reader: &mut BitReader, size: usize) -> Result<()> {
    let mut last_scale = 8;
    let mut next_scale = 8;

    for _ in 0..size {
        if next_scale != 0 {
            let delta_scale = reader.read_signed_golomb()?;
            next_scale = (last_scale + delta_scale + 256) % 256;
        }
        last_scale = if next_scale == 0 { last_scale } else { next_scale };
    }

    Ok(())
}

/// True when a coded slice NAL unit carries an I or SI slice.
pub fn is_intra_slice(nal: &[u8]) -> bool {
    // first_mb_in_slice and slice_type sit in the first few bytes
    let head = &nal[..nal.len().min(16)];
    let rbsp = remove_emulation_prevention(head);
    let mut reader = BitReader::new(rbsp.get(1..).unwrap_or_default());
    let parsed = reader
        .skip_golomb()
        .and_then(|_| reader.read_golomb());
    matches!(parsed.map(|t| t % 5), Ok(SLICE_TYPE_I) | Ok(SLICE_TYPE_SI))
}

/// Walks every payload of an SEI NAL unit, header byte included.
pub fn parse_sei(nal: &[u8]) -> SeiMessages {
    let rbsp = remove_emulation_prevention(nal);
    let mut messages = SeiMessages::default();
    let mut pos = 1usize;

    while rbsp.len().saturating_sub(pos) > 1 {
        let Some((payload_type, next)) = read_sei_number(&rbsp, pos) else {
            break;
        };
        let Some((payload_size, next)) = read_sei_number(&rbsp, next) else {
            break;
        };
        let end = (next + payload_size as usize).min(rbsp.len());
        let payload = &rbsp[next..end];
        pos = end;

        match payload_type {
            SEI_USER_DATA_REGISTERED => {
                if let Some(cc) = parse_cea608_user_data(payload) {
                    messages.captions.push(cc);
                }
            }
            SEI_RECOVERY_POINT => messages.recovery_point = true,
            _ => {}
        }
    }

    messages
}

/// Reads an SEI payload type or size: a run of 0xFF bytes plus a final byte.
fn read_sei_number(data: &[u8], mut pos: usize) -> Option<(u32, usize)> {
    let mut value = 0u32;
    loop {
        let byte = *data.get(pos)?;
        pos += 1;
        value += byte as u32;
        if byte != 0xFF {
            return Some((value, pos));
        }
    }
}

/// Extracts ATSC A/53 caption data from a registered user data payload.
fn parse_cea608_user_data(payload: &[u8]) -> Option<Vec<u8>> {
    let mut reader = BitReader::new(payload);
    if reader.read_u8().ok()? != T35_COUNTRY_US {
        return None;
    }
    if reader.read_bits(16).ok()? as u16 != T35_PROVIDER_ATSC {
        return None;
    }
    if reader.read_bits(32).ok()? != ATSC_USER_IDENTIFIER {
        return None;
    }
    if reader.read_u8().ok()? != ATSC_CC_DATA {
        return None;
    }

    let first = reader.read_u8().ok()?;
    let second = reader.read_u8().ok()?;
    let count = (first & 0x1F) as usize;
    let mut bytes = Vec::with_capacity(2 + count * 3);
    bytes.push(first);
    bytes.push(second);
    for _ in 0..count * 3 {
        bytes.push(reader.read_u8().ok()?);
    }
    Some(bytes)
}
