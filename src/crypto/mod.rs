//! # Segment decryption
//!
//! Network chunks of an AES-128 segment arrive in arbitrary sizes. The
//! [`DecryptPipeline`] regroups them on a 752-byte stride with a
//! [`BlockAligner`], chains the CBC IV from buffer to buffer and hands each
//! aligned buffer to a [`Decrypter`]. Clear segments go through the same
//! alignment so the demuxer always sees whole transport packets.

pub mod aes;
pub mod aligner;
mod pipeline;

pub use self::aes::{Decrypter, FallbackDecrypter, SoftwareDecrypter};
pub use self::aligner::{AlignedChunk, BlockAligner, ALIGN_STRIDE};
pub use self::pipeline::DecryptPipeline;
