//! # AAC / ADTS parsing
//!
//! ADTS header decoding, frame scanning over PES payloads, and derivation of
//! the AudioSpecificConfig handed to the remuxer.

/// ADTS header and frame parsing
pub mod parser;
/// ADTS header fields and decoder configuration
pub mod types;

#[doc(inline)]
pub use parser::*;
#[doc(inline)]
pub use types::*;
