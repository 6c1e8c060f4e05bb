//! # MPEG Transport Stream demuxing
//!
//! - [`parser`]: TS packet headers and PSI (PAT/PMT) sections
//! - [`pes`]: PES reassembly and 33-bit timestamp decoding
//! - [`demuxer`]: the segment demuxer that turns packets into H.264, AAC,
//!   ID3 and caption samples and cuts them on GOP boundaries
//!
//! ## Example
//!
//! ```rust
//! use vdkstream::format::ts::{TSDemuxer, TS_PACKET_SIZE};
//!
//! let mut packets = vec![0xFFu8; 3 * TS_PACKET_SIZE];
//! for i in 0..3 {
//!     packets[i * TS_PACKET_SIZE] = 0x47;
//! }
//! assert!(TSDemuxer::probe(&packets));
//! assert!(!TSDemuxer::probe(&packets[1..]));
//! ```

/// Segment demuxer
pub mod demuxer;

/// Low-level TS packet and PSI parsing
pub mod parser;

/// PES reassembly
pub mod pes;

/// Core TS types and constants
pub mod types;


pub use demuxer::TSDemuxer;
pub use parser::TSPacketParser;
pub use pes::PesAssembler;
pub use types::*;
