//! # H.264/AVC parsing
//!
//! Annex B start-code splitting, emulation-prevention removal, and the
//! header fields the demuxer needs:
//!
//! - SPS dimensions and the `avc1.PPCCLL` codec id
//! - slice type, so I/SI slices count as keyframes
//! - SEI recovery points and CEA-608 caption payloads
//!
//! ## Example
//!
//! ```rust
//! use bytes::Bytes;
//! use vdkstream::codec::h264::split_nal_units;
//!
//! let data = Bytes::from_static(&[0, 0, 0, 1, 0x09, 0xF0, 0, 0, 1, 0x65, 0x88]);
//! let scan = split_nal_units(&data);
//! assert_eq!(scan.units.len(), 2);
//! assert_eq!(scan.units[1].nal_type, 5);
//! ```

/// Bitstream parsers for NAL units, SPS, slice headers and SEI
pub mod parser;
/// Parsed H.264 structures and constants
pub mod types;

#[doc(inline)]
pub use parser::*;
#[doc(inline)]
pub use types::*;
