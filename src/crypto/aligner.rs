use bytes::{Bytes, BytesMut};

/// Four transport stream packets, and a multiple of the AES block size.
pub const ALIGN_STRIDE: usize = 752;

/// A buffer cut on a stride boundary, ready for decryption or demuxing.
#[derive(Debug, Clone, PartialEq)]
pub struct AlignedChunk {
    pub data: Bytes,
    /// First bytes handed over for the segment.
    pub first: bool,
    pub final_chunk: bool,
}

/// Regroups network chunks of any size into stride-aligned buffers.
///
/// Bytes past the last full stride are carried into the next push. A
/// non-final push that would hand over every byte keeps one stride back, so
/// the final push always has something to flush.
#[derive(Debug, Default)]
pub struct BlockAligner {
    trail: Bytes,
    /// The trail still holds the head of the segment.
    trail_first: bool,
}

impl BlockAligner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.trail = Bytes::new();
        self.trail_first = false;
    }

    /// Bytes currently carried over.
    pub fn pending(&self) -> usize {
        self.trail.len()
    }

    pub fn push(&mut self, data: Bytes, first: bool, final_chunk: bool) -> Option<AlignedChunk> {
        if first {
            self.reset();
            self.trail_first = true;
        }

        let combined = if self.trail.is_empty() {
            data
        } else {
            let mut joined = BytesMut::with_capacity(self.trail.len() + data.len());
            joined.extend_from_slice(&self.trail);
            joined.extend_from_slice(&data);
            joined.freeze()
        };

        let mut len = combined.len();
        if !final_chunk {
            len -= len % ALIGN_STRIDE;
            if len == combined.len() {
                len = len.saturating_sub(ALIGN_STRIDE);
            }
        }

        if len == 0 && !final_chunk {
            self.trail = combined;
            return None;
        }

        let first = std::mem::take(&mut self.trail_first);
        self.trail = combined.slice(len..);
        Some(AlignedChunk {
            data: combined.slice(..len),
            first,
            final_chunk,
        })
    }
}
