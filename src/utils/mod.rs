//! # Utility Functions and Types
//!
//! Bit-level reading for codec headers and the MPEG-2 CRC used by
//! transport-stream tables.
//!
//! ```rust
//! use vdkstream::utils::{BitReader, Crc32Mpeg2};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let data = vec![0b10110011u8];
//! let mut reader = BitReader::new(&data);
//! assert_eq!(reader.read_bits(3)?, 0b101);
//!
//! let crc = Crc32Mpeg2::calculate(b"Hello, world!");
//! println!("CRC32: {:08x}", crc);
//! # Ok(())
//! # }
//! ```

/// Bit manipulation and bitstream reading utilities
pub mod bits;

/// CRC calculation implementations
pub mod crc;

pub use bits::BitReader;
pub use crc::Crc32Mpeg2;
