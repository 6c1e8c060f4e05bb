use crate::error::{Result, VdkError};

/// A big-endian bit reader over an RBSP payload.
///
/// Covers what SPS, slice-header and ADTS parsing need:
/// - single bits and fixed-width fields up to 32 bits
/// - unsigned and signed exponential Golomb codes (ue(v)/se(v))
/// - byte-granular reads and skips once aligned
///
/// Example:
/// ```
/// use vdkstream::utils::BitReader;
///
/// let data = [0b10110011];
/// let mut reader = BitReader::new(&data);
///
/// assert_eq!(reader.read_bit().unwrap(), true);   // 1
/// assert_eq!(reader.read_bits(3).unwrap(), 0b011); // 011
/// ```
pub struct BitReader<'a> {
    data: &'a [u8],
    byte_offset: usize,
    bit_offset: u8,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        BitReader {
            data,
            byte_offset: 0,
            bit_offset: 0,
        }
    }

    /// Reads a single bit, `true` for 1.
    pub fn read_bit(&mut self) -> Result<bool> {
        let byte = *self
            .data
            .get(self.byte_offset)
            .ok_or_else(|| VdkError::Codec("Reached end of data".into()))?;

        let bit = (byte >> (7 - self.bit_offset)) & 1;
        self.bit_offset += 1;
        if self.bit_offset == 8 {
            self.bit_offset = 0;
            self.byte_offset += 1;
        }

        Ok(bit == 1)
    }

    /// Reads `n` bits (at most 32) as a big-endian number.
    pub fn read_bits(&mut self, n: u32) -> Result<u32> {
        if n > 32 {
            return Err(VdkError::Codec("Too many bits requested".into()));
        }
        if n as usize > self.available_bits() {
            return Err(VdkError::Codec("Reached end of data".into()));
        }

        let mut value = 0u64;
        let mut left = n;
        while left > 0 {
            if self.bit_offset == 0 && left >= 8 {
                value = (value << 8) | self.data[self.byte_offset] as u64;
                self.byte_offset += 1;
                left -= 8;
            } else {
                value = (value << 1) | self.read_bit()? as u64;
                left -= 1;
            }
        }

        Ok(value as u32)
    }

    /// Reads one whole byte. The reader does not need to be aligned.
    pub fn read_u8(&mut self) -> Result<u8> {
        self.read_bits(8).map(|v| v as u8)
    }

    /// Reads an unsigned exponential Golomb code (ue(v)).
    ///
    /// M leading zeros, a marker 1, then M INFO bits; the value is
    /// `2^M + INFO - 1`. "00110" decodes to 5.
    pub fn read_golomb(&mut self) -> Result<u32> {
        let mut leading_zeros = 0;
        while !self.read_bit()? {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return Err(VdkError::Codec("Invalid Golomb code".into()));
            }
        }

        if leading_zeros == 0 {
            return Ok(0);
        }

        let info = self.read_bits(leading_zeros)?;
        Ok(((1u64 << leading_zeros) + info as u64 - 1) as u32)
    }

    /// Reads a signed exponential Golomb code (se(v)).
    ///
    /// Odd codes map to positive values, even codes to negative ones:
    /// 1 -> 1, 2 -> -1, 3 -> 2, 4 -> -2.
    pub fn read_signed_golomb(&mut self) -> Result<i32> {
        let k = self.read_golomb()?;
        let magnitude = ((k as i64 + 1) >> 1) as i32;
        if k & 1 == 1 {
            Ok(magnitude)
        } else {
            Ok(-magnitude)
        }
    }

    pub fn skip_bits(&mut self, n: u32) -> Result<()> {
        if n as usize > self.available_bits() {
            return Err(VdkError::Codec("Skip past end of data".into()));
        }
        let total = self.bit_offset as usize + n as usize;
        self.byte_offset += total / 8;
        self.bit_offset = (total % 8) as u8;
        Ok(())
    }

    pub fn skip_bytes(&mut self, n: usize) -> Result<()> {
        self.skip_bits((n * 8) as u32)
    }

    pub fn skip_golomb(&mut self) -> Result<()> {
        self.read_golomb().map(|_| ())
    }

    /// Moves to the next byte boundary, dropping the rest of the current byte.
    pub fn align_byte(&mut self) -> Result<()> {
        if self.bit_offset != 0 {
            self.bit_offset = 0;
            self.byte_offset += 1;
        }
        Ok(())
    }

    pub fn is_byte_aligned(&self) -> bool {
        self.bit_offset == 0
    }

    pub fn available_bits(&self) -> usize {
        if self.byte_offset >= self.data.len() {
            return 0;
        }
        (self.data.len() - self.byte_offset) * 8 - self.bit_offset as usize
    }

    /// Whole bytes left after the current position.
    pub fn available_bytes(&self) -> usize {
        self.available_bits() / 8
    }

    /// Current position in whole bytes, rounded down.
    pub fn byte_position(&self) -> usize {
        self.byte_offset
    }
}


#[cfg(test)]
mod tests {
    use super::test_utils::*;
    use super::*;
    use pretty_assertions::assert_eq;
    use quickcheck_macros::quickcheck;

    #[test]
    fn test_read_bits_across_bytes() {
        let data = [0b10110011, 0b01011010];
        let mut reader = BitReader::new(&data);
        assert_eq!(reader.read_bits(3).unwrap(), 0b101);
        assert_eq!(reader.read_bits(8).unwrap(), 0b10011010);
        assert_eq!(reader.read_bits(0).unwrap(), 0);

        let data = [0b10110011, 0b11001100, 0b10101010];
        let mut reader = BitReader::new(&data);
        assert_eq!(reader.read_bits(20).unwrap(), 0b10110011110011001010);
        assert!(reader.read_bits(5).is_err());
        assert!(BitReader::new(&data).read_bits(33).is_err());
    }

    #[test]
    fn test_read_golomb() {
        let test_cases = [
            ([0b10000000], 0, "1"),
            ([0b01000000], 1, "010"),
            ([0b01100000], 2, "011"),
            ([0b00100000], 3, "00100"),
            ([0b00110000], 5, "00110"),
            ([0b00010010], 8, "0001001"),
        ];

        for (input, expected, pattern) in test_cases.iter() {
            let mut reader = BitReader::new(input);
            assert_eq!(reader.read_golomb().unwrap(), *expected, "pattern {}", pattern);
        }

        let mut reader = BitReader::new(&[0x00]);
        assert!(reader.read_golomb().is_err());
    }

    #[test]
    fn test_signed_golomb() {
        let mut writer = BitWriter::default();
        for k in [0, 1, 2, 3, 4] {
            writer.put_golomb(k);
        }
        let mut reader = BitReader::new(&writer.bytes);
        let decoded: Vec<i32> = (0..5).map(|_| reader.read_signed_golomb().unwrap()).collect();
        assert_eq!(decoded, vec![0, 1, -1, 2, -2]);
    }

    #[test]
    fn test_skip_and_align() {
        let data = [0xFF, 0x00, 0xAB, 0xCD];
        let mut reader = BitReader::new(&data);
        reader.read_bits(3).unwrap();
        assert!(!reader.is_byte_aligned());
        reader.align_byte().unwrap();
        assert_eq!(reader.byte_position(), 1);
        reader.skip_bytes(1).unwrap();
        assert_eq!(reader.read_u8().unwrap(), 0xAB);
        assert_eq!(reader.available_bytes(), 1);
        assert!(reader.skip_bits(9).is_err());
        reader.skip_bits(8).unwrap();
        assert_eq!(reader.available_bits(), 0);
        assert!(reader.read_bit().is_err());
    }

    #[quickcheck]
    fn prop_read_bits_matches_manual(data: Vec<u8>, n: u8) -> bool {
        let n = (n % 33) as usize;
        let mut reader = BitReader::new(&data);
        match reader.read_bits(n as u32) {
            Ok(result) => {
                let mut expected = 0u64;
                for i in 0..n {
                    let bit = (data[i / 8] >> (7 - (i % 8))) & 1;
                    expected = (expected << 1) | bit as u64;
                }
                result as u64 == expected
            }
            Err(_) => n > data.len() * 8,
        }
    }

    #[quickcheck]
    fn prop_golomb_round_trip(values: Vec<u16>) -> bool {
        let values: Vec<u32> = values.into_iter().map(u32::from).collect();
        let encoded = encode_multiple_golomb(&values);
        let mut reader = BitReader::new(&encoded);
        values.iter().all(|&expected| reader.read_golomb().ok() == Some(expected))
    }
}
