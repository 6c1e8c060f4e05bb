use bytes::{Bytes, BytesMut};
use log::warn;

use super::types::{Pes, MAX_PTS_DTS_DELTA, TIMESTAMP_WRAP};

/// Payload slices of one elementary stream, collected until the next
/// payload-unit-start packet.
#[derive(Debug, Default)]
pub struct PesAssembler {
    chunks: Vec<Bytes>,
    size: usize,
}

impl PesAssembler {
    pub fn push(&mut self, chunk: Bytes) {
        self.size += chunk.len();
        self.chunks.push(chunk);
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.size = 0;
    }

    /// Parses the collected payload as one PES packet and clears the
    /// assembler. Returns `None` when the data does not start with a PES
    /// start code.
    pub fn take(&mut self) -> Option<Pes> {
        let chunks = std::mem::take(&mut self.chunks);
        let size = std::mem::replace(&mut self.size, 0);
        parse_pes(chunks, size)
    }
}

/// Decodes a 5-byte PTS/DTS field.
///
/// Values above 2^32 - 1 are taken as negative and moved down by 2^33.
pub fn read_timestamp(field: &[u8]) -> i64 {
    let ts = (((field[0] & 0x0E) as i64) << 29)
        | ((field[1] as i64) << 22)
        | (((field[2] & 0xFE) as i64) << 14)
        | ((field[3] as i64) << 7)
        | (((field[4] & 0xFE) as i64) >> 1);
    if ts > u32::MAX as i64 {
        ts - TIMESTAMP_WRAP
    } else {
        ts
    }
}

fn parse_pes(chunks: Vec<Bytes>, size: usize) -> Option<Pes> {
    let head = chunks.first()?;
    if head.len() < 9 || head[0] != 0 || head[1] != 0 || head[2] != 1 {
        return None;
    }

    let len = ((head[4] as usize) << 8) | head[5] as usize;
    let flags = head[7];
    let header_len = head[8] as usize;
    let mut pts = None;
    let mut dts = None;

    if flags & 0xC0 != 0 && head.len() >= 14 {
        let presentation = read_timestamp(&head[9..14]);
        let decode = if flags & 0x40 != 0 && head.len() >= 19 {
            read_timestamp(&head[14..19])
        } else {
            presentation
        };
        if presentation - decode > MAX_PTS_DTS_DELTA {
            warn!(
                "PTS {} is more than 60s ahead of DTS {}, using DTS",
                presentation, decode
            );
            pts = Some(decode);
        } else {
            pts = Some(presentation);
        }
        dts = Some(decode);
    }

    let mut skip = 9 + header_len;
    let data = if chunks.len() == 1 {
        head.slice(skip.min(head.len())..)
    } else {
        let mut out = BytesMut::with_capacity(size.saturating_sub(skip));
        for chunk in &chunks {
            if skip >= chunk.len() {
                skip -= chunk.len();
                continue;
            }
            out.extend_from_slice(&chunk[skip..]);
            skip = 0;
        }
        out.freeze()
    };

    Some(Pes { data, pts, dts, len })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn encode_timestamp(marker: u8, ts: u64) -> [u8; 5] {
        [
            marker | ((ts >> 29) & 0x0E) as u8 | 0x01,
            (ts >> 22) as u8,
            (((ts >> 14) & 0xFE) | 0x01) as u8,
            (ts >> 7) as u8,
            (((ts << 1) & 0xFE) | 0x01) as u8,
        ]
    }

    fn pes_header(pts: u64, dts: Option<u64>) -> Vec<u8> {
        let mut out = vec![0x00, 0x00, 0x01, 0xE0, 0x00, 0x00, 0x80];
        match dts {
            Some(dts) => {
                out.extend_from_slice(&[0xC0, 10]);
                out.extend_from_slice(&encode_timestamp(0x30, pts));
                out.extend_from_slice(&encode_timestamp(0x10, dts));
            }
            None => {
                out.extend_from_slice(&[0x80, 5]);
                out.extend_from_slice(&encode_timestamp(0x20, pts));
            }
        }
        out
    }

    #[test]
    fn test_timestamps_and_payload_across_chunks() {
        let mut header = pes_header(183_000, Some(180_000));
        header.extend_from_slice(&[1, 2, 3]);
        let mut assembler = PesAssembler::default();
        assembler.push(Bytes::from(header[..20].to_vec()));
        assembler.push(Bytes::from(header[20..].to_vec()));
        assembler.push(Bytes::from_static(&[4, 5]));

        let pes = assembler.take().unwrap();
        assert_eq!(pes.pts, Some(183_000));
        assert_eq!(pes.dts, Some(180_000));
        assert_eq!(&pes.data[..], &[1, 2, 3, 4, 5]);
        assert!(assembler.is_empty());
    }

    #[test]
    fn test_dts_defaults_to_pts() {
        let pes = parse_pes(vec![Bytes::from(pes_header(9000, None))], 14).unwrap();
        assert_eq!(pes.pts, Some(9000));
        assert_eq!(pes.dts, Some(9000));
        assert!(pes.data.is_empty());
    }

    #[test]
    fn test_high_timestamps_wrap_negative() {
        let ts = (1u64 << 33) - 90_000;
        assert_eq!(read_timestamp(&encode_timestamp(0x20, ts)), -90_000);
    }

    #[test]
    fn test_corrupt_pts_is_clamped_to_dts() {
        let header = pes_header(90_000 * 100, Some(90_000));
        let pes = parse_pes(vec![Bytes::from(header)], 19).unwrap();
        assert_eq!(pes.pts, Some(90_000));
    }

    #[test]
    fn test_missing_start_code() {
        assert!(parse_pes(vec![Bytes::from_static(&[0, 0, 2, 0xE0, 0, 0, 0x80, 0, 0])], 9).is_none());
    }
}
