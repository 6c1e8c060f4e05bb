use super::types::*;
use crate::error::{Result, VdkError};
use crate::utils::Crc32Mpeg2;

/// Stateless decoding of TS packet headers and PSI sections.
#[derive(Debug, Default, Clone, Copy)]
pub struct TSPacketParser;

impl TSPacketParser {
    pub fn new() -> Self {
        Self
    }

    pub fn parse_header(&self, data: &[u8]) -> Result<TSHeader> {
        if data.len() < TS_HEADER_SIZE {
            return Err(VdkError::InvalidData("TS packet too short".into()));
        }

        if data[0] != SYNC_BYTE {
            return Err(VdkError::InvalidData("Invalid sync byte".into()));
        }

        Ok(TSHeader {
            sync_byte: data[0],
            transport_error: (data[1] & 0x80) != 0,
            payload_unit_start: (data[1] & 0x40) != 0,
            transport_priority: (data[1] & 0x20) != 0,
            pid: (((data[1] & 0x1F) as u16) << 8) | data[2] as u16,
            scrambling_control: (data[3] >> 6) & 0x03,
            adaptation_field_exists: (data[3] & 0x20) != 0,
            contains_payload: (data[3] & 0x10) != 0,
            continuity_counter: data[3] & 0x0F,
        })
    }

    /// Offset of the payload within one 188-byte packet, `None` when the
    /// adaptation field fills the whole packet.
    pub fn payload_offset(&self, packet: &[u8], header: &TSHeader) -> Option<usize> {
        if !header.adaptation_field_exists {
            return Some(TS_HEADER_SIZE);
        }
        let offset = TS_HEADER_SIZE + 1 + *packet.get(TS_HEADER_SIZE)? as usize;
        (offset < packet.len()).then_some(offset)
    }

    /// The PSI section starting at `offset` (table id byte), trailer
    /// included, when it fits inside `packet`.
    pub fn section<'a>(&self, packet: &'a [u8], offset: usize) -> Option<&'a [u8]> {
        if offset + 3 > packet.len() {
            return None;
        }
        let section_length =
            (((packet[offset + 1] & 0x0F) as usize) << 8) | packet[offset + 2] as usize;
        packet.get(offset..offset + 3 + section_length)
    }

    /// True when the section's trailing CRC matches its content.
    pub fn verify_section_crc(&self, section: &[u8]) -> bool {
        Crc32Mpeg2::verify_section(section)
    }

    /// Parses a PAT section. `data` starts at the table id; the section may
    /// be truncated by the packet end.
    pub fn parse_pat(&self, data: &[u8]) -> Result<PAT> {
        if data.len() < 8 {
            return Err(VdkError::InvalidData("PAT too short".into()));
        }
        if data[0] != TABLE_ID_PAT {
            return Err(VdkError::InvalidData(format!("unexpected PAT table id {}", data[0])));
        }
        let mut pat = PAT::default();
        let mut pos = 8;
        let end = table_end(data);

        while pos + 4 <= end {
            let program_number = ((data[pos] as u16) << 8) | data[pos + 1] as u16;
            let pid = (((data[pos + 2] & 0x1F) as u16) << 8) | data[pos + 3] as u16;
            pat.entries.push(PATEntry {
                program_number,
                network_pid: if program_number == 0 { pid } else { 0 },
                program_map_pid: if program_number != 0 { pid } else { 0 },
            });
            pos += 4;
        }

        Ok(pat)
    }

    /// Parses a PMT section starting at its table id.
    pub fn parse_pmt(&self, data: &[u8]) -> Result<PMT> {
        if data.len() < 12 {
            return Err(VdkError::InvalidData("PMT too short".into()));
        }
        if data[0] != TABLE_ID_PMT {
            return Err(VdkError::InvalidData(format!("unexpected PMT table id {}", data[0])));
        }
        let mut pmt = PMT::default();
        let end = table_end(data);

        pmt.pcr_pid = ((data[8] as u16 & 0x1F) << 8) | data[9] as u16;
        let program_info_length = ((data[10] as usize & 0x0F) << 8) | data[11] as usize;
        let mut pos = 12;

        if program_info_length > 0 {
            if pos + program_info_length > end {
                return Err(VdkError::InvalidData("Program info data too short".into()));
            }
            pmt.program_descriptors =
                self.parse_descriptors(&data[pos..pos + program_info_length])?;
            pos += program_info_length;
        }

        while pos + 5 <= end {
            let stream_type = data[pos];
            let elementary_pid = ((data[pos + 1] as u16 & 0x1F) << 8) | data[pos + 2] as u16;
            let es_info_length = ((data[pos + 3] as usize & 0x0F) << 8) | data[pos + 4] as usize;
            pos += 5;

            if pos + es_info_length > end {
                return Err(VdkError::InvalidData("ES info data too short".into()));
            }

            let descriptors = self.parse_descriptors(&data[pos..pos + es_info_length])?;
            pos += es_info_length;

            pmt.elementary_stream_infos.push(ElementaryStreamInfo {
                stream_type,
                elementary_pid,
                descriptors,
            });
        }

        Ok(pmt)
    }

    fn parse_descriptors(&self, data: &[u8]) -> Result<Vec<Descriptor>> {
        let mut descriptors = Vec::new();
        let mut pos = 0;

        while pos + 2 <= data.len() {
            let tag = data[pos];
            let length = data[pos + 1] as usize;
            pos += 2;

            if pos + length > data.len() {
                return Err(VdkError::InvalidData("Descriptor data too short".into()));
            }

            descriptors.push(Descriptor {
                tag,
                data: data[pos..pos + length].to_vec(),
            });
            pos += length;
        }

        Ok(descriptors)
    }
}

/// End of the table body, before the CRC, clamped to the available bytes.
fn table_end(data: &[u8]) -> usize {
    let section_length = (((data[1] & 0x0F) as usize) << 8) | data[2] as usize;
    (3 + section_length).saturating_sub(4).min(data.len())
}
