use bytes::Bytes;

const HEADER_LEN: usize = 10;
const TIMESTAMP_OWNER: &[u8] = b"com.apple.streaming.transportStreamTimestamp";

/// One ID3v2 tag found at the head of a bare audio segment.
#[derive(Debug, Clone, PartialEq)]
pub struct Id3Tag {
    /// The whole tag, header and footer included.
    pub data: Bytes,
    /// Transport stream timestamp from the Apple `PRIV` frame, 90 kHz.
    pub timestamp: Option<i64>,
}

/// True when an ID3v2 header starts at `offset`.
pub fn is_header(data: &[u8], offset: usize) -> bool {
    data.len() >= offset + HEADER_LEN
        && &data[offset..offset + 3] == b"ID3"
        && data[offset + 3] < 0xFF
        && data[offset + 4] < 0xFF
        && data[offset + 6..offset + HEADER_LEN].iter().all(|b| b & 0x80 == 0)
}

fn syncsafe(bytes: &[u8]) -> usize {
    bytes.iter().fold(0, |acc, &b| (acc << 7) | (b & 0x7F) as usize)
}

/// Total length of the tag at `offset`, or `None` when it is not complete.
pub fn tag_len(data: &[u8], offset: usize) -> Option<usize> {
    if !is_header(data, offset) {
        return None;
    }
    let mut len = HEADER_LEN + syncsafe(&data[offset + 6..offset + HEADER_LEN]);
    if data[offset + 5] & 0x10 != 0 {
        len += HEADER_LEN;
    }
    (offset + len <= data.len()).then_some(len)
}

/// Parses the tag at `offset`.
pub fn parse_tag(data: &Bytes, offset: usize) -> Option<Id3Tag> {
    let len = tag_len(data, offset)?;
    let tag = data.slice(offset..offset + len);
    let size = syncsafe(&tag[6..HEADER_LEN]);
    let frames = &tag[HEADER_LEN..HEADER_LEN + size];
    Some(Id3Tag {
        timestamp: find_timestamp(frames),
        data: tag,
    })
}

fn find_timestamp(mut frames: &[u8]) -> Option<i64> {
    while frames.len() >= HEADER_LEN {
        let id = &frames[..4];
        if id[0] == 0 {
            // padding
            return None;
        }
        let size = syncsafe(&frames[4..8]);
        let body = frames.get(HEADER_LEN..HEADER_LEN + size)?;
        if id == b"PRIV" {
            if let Some(nul) = body.iter().position(|&b| b == 0) {
                let (owner, rest) = (&body[..nul], &body[nul + 1..]);
                if owner == TIMESTAMP_OWNER && rest.len() >= 8 {
                    let high = (rest[3] & 0x01) as i64;
                    let low = u32::from_be_bytes([rest[4], rest[5], rest[6], rest[7]]) as i64;
                    return Some((high << 32) | low);
                }
            }
        }
        frames = &frames[HEADER_LEN + size..];
    }
    None
}

#[cfg(test)]
pub(crate) fn timestamp_tag(ticks: i64) -> Vec<u8> {
    let mut body = TIMESTAMP_OWNER.to_vec();
    body.push(0);
    body.extend_from_slice(&[0, 0, 0, (ticks >> 32) as u8 & 0x01]);
    body.extend_from_slice(&(ticks as u32).to_be_bytes());

    let mut frame = b"PRIV".to_vec();
    frame.extend_from_slice(&[0, 0, 0, body.len() as u8, 0, 0]);
    frame.extend_from_slice(&body);

    let mut tag = b"ID3\x04\x00\x00".to_vec();
    tag.extend_from_slice(&[0, 0, 0, frame.len() as u8]);
    tag.extend_from_slice(&frame);
    tag
}
