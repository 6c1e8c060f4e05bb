//! Stream fixtures shared by the integration tests.

use aes::Aes128;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockEncryptMut, KeyIvInit};
use vdkstream::format::ts::{PID_PAT, STREAM_TYPE_H264, TS_PACKET_SIZE};
use vdkstream::utils::Crc32Mpeg2;

pub const KEY: [u8; 16] = *b"0123456789abcdef";
pub const IV: [u8; 16] = [7u8; 16];

const PMT_PID: u16 = 0x1000;
const VIDEO_PID: u16 = 0x100;

/// 90 kHz ticks between two access units.
pub const FRAME_TICKS: i64 = 45_000;

/// Writes an H.264-only transport stream, one PES per access unit.
#[derive(Default)]
pub struct Segment {
    out: Vec<u8>,
    video_cc: u8,
}

impl Segment {
    /// Segment whose access units start at `first_pts`, a key frame wherever
    /// `keys` is true.
    pub fn h264(first_pts: i64, keys: &[bool]) -> Vec<u8> {
        let mut segment = Self::default();
        segment.tables();
        for (i, &key) in keys.iter().enumerate() {
            segment.access_unit(first_pts + i as i64 * FRAME_TICKS, key);
        }
        segment.out
    }

    fn section(&mut self, pid: u16, mut body: Vec<u8>) {
        let crc = Crc32Mpeg2::calculate(&body);
        body.extend_from_slice(&crc.to_be_bytes());
        let mut packet = vec![0x47, 0x40 | (pid >> 8) as u8, pid as u8, 0x10, 0x00];
        packet.extend_from_slice(&body);
        packet.resize(TS_PACKET_SIZE, 0xFF);
        self.out.extend_from_slice(&packet);
    }

    fn tables(&mut self) {
        self.section(
            PID_PAT,
            vec![
                0x00, 0xB0, 0x0D, 0x00, 0x01, 0xC1, 0x00, 0x00, 0x00, 0x01,
                0xE0 | (PMT_PID >> 8) as u8, PMT_PID as u8,
            ],
        );
        self.section(
            PMT_PID,
            vec![
                0x02, 0xB0, 0x12, 0x00, 0x01, 0xC1, 0x00, 0x00,
                0xE0 | (VIDEO_PID >> 8) as u8, VIDEO_PID as u8, 0xF0, 0x00,
                STREAM_TYPE_H264, 0xE0 | (VIDEO_PID >> 8) as u8, VIDEO_PID as u8, 0xF0, 0x00,
            ],
        );
    }

    fn access_unit(&mut self, pts: i64, key: bool) {
        let mut au = vec![0x00, 0x00, 0x00, 0x01, 0x09, 0xF0];
        if key {
            au.extend_from_slice(&[0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0xC0, 0x1E, 0xF4, 0x21, 0x32]);
            au.extend_from_slice(&[0x00, 0x00, 0x00, 0x01, 0x68, 0xCE, 0x38, 0x80]);
            au.extend_from_slice(&[0x00, 0x00, 0x00, 0x01, 0x65, 0x88, 0x84, 0x21, 0xA0]);
        } else {
            au.extend_from_slice(&[0x00, 0x00, 0x00, 0x01, 0x41, 0x9A, 0x21, 0xA0]);
        }

        let ts = pts as u64;
        let mut pes = vec![0x00, 0x00, 0x01, 0xE0, 0x00, 0x00, 0x80, 0x80, 0x05];
        pes.extend_from_slice(&[
            0x21 | ((ts >> 29) & 0x0E) as u8,
            (ts >> 22) as u8,
            (((ts >> 14) & 0xFE) | 0x01) as u8,
            (ts >> 7) as u8,
            (((ts << 1) & 0xFE) | 0x01) as u8,
        ]);
        pes.extend_from_slice(&au);

        for (i, chunk) in pes.chunks(184).enumerate() {
            let cc = self.video_cc;
            self.video_cc = (cc + 1) & 0x0F;
            let unit_start = if i == 0 { 0x40 } else { 0x00 };
            let mut packet = vec![0x47, unit_start | (VIDEO_PID >> 8) as u8, VIDEO_PID as u8];
            if chunk.len() == 184 {
                packet.push(0x10 | cc);
            } else {
                // adaptation field stuffing up to a full packet
                let stuffing = 183 - chunk.len();
                packet.push(0x30 | cc);
                packet.push(stuffing as u8);
                if stuffing > 0 {
                    packet.push(0x00);
                    packet.resize(5 + stuffing, 0xFF);
                }
            }
            packet.extend_from_slice(chunk);
            self.out.extend_from_slice(&packet);
        }
    }
}

/// AES-128-CBC with PKCS#7 padding, the way segments are served.
pub fn encrypt(plain: &[u8], key: [u8; 16], iv: [u8; 16]) -> Vec<u8> {
    let mut buf = plain.to_vec();
    buf.resize(plain.len() + 16, 0);
    let len = cbc::Encryptor::<Aes128>::new((&key).into(), (&iv).into())
        .encrypt_padded_mut::<Pkcs7>(&mut buf, plain.len())
        .map(|out| out.len())
        .unwrap();
    buf.truncate(len);
    buf
}
