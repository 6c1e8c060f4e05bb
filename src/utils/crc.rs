//! MPEG-2 CRC-32 (ITU-T H.222.0 / ISO/IEC 13818-1) used by PSI sections.
//!
//! Polynomial 0x04C11DB7, initial value 0xFFFFFFFF, no reflection, no final XOR.

const CRC32_MPEG2: u32 = 0x04C11DB7;

const fn build_table() -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u32) << 24;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000_0000 != 0 {
                (crc << 1) ^ CRC32_MPEG2
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

static TABLE: [u32; 256] = build_table();

/// MPEG-2 CRC32 calculator for Program Specific Information tables.
pub struct Crc32Mpeg2;

impl Crc32Mpeg2 {
    /// Calculates the CRC32 of `data`.
    ///
    /// # Examples
    ///
    /// ```
    /// use vdkstream::utils::Crc32Mpeg2;
    ///
    /// assert_eq!(Crc32Mpeg2::calculate(&[0x01, 0x01]), 0xD66FB816);
    /// ```
    pub fn calculate(data: &[u8]) -> u32 {
        data.iter().fold(0xFFFF_FFFF, |crc, &byte| {
            let index = ((crc >> 24) ^ byte as u32) & 0xFF;
            (crc << 8) ^ TABLE[index as usize]
        })
    }

    /// Checks a complete PSI section whose last four bytes are its CRC.
    ///
    /// Running the CRC over the section including its trailer yields zero
    /// when the trailer is correct.
    pub fn verify_section(section: &[u8]) -> bool {
        section.len() >= 4 && Self::calculate(section) == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        assert_eq!(Crc32Mpeg2::calculate(&[0x01, 0x01]), 0xD66FB816);
    }

    #[test]
    fn test_verify_pat_section() {
        let mut pat = vec![
            0x00, 0xB0, 0x0D, // table id, section length 13
            0x00, 0x01, 0xC1, 0x00, 0x00, // ts id, version, section numbers
            0x00, 0x01, 0xF0, 0x00, // program 1 -> PMT pid 0x1000
        ];
        let crc = Crc32Mpeg2::calculate(&pat);
        pat.extend_from_slice(&crc.to_be_bytes());
        assert!(Crc32Mpeg2::verify_section(&pat));

        pat[9] ^= 0x01;
        assert!(!Crc32Mpeg2::verify_section(&pat));
        assert!(!Crc32Mpeg2::verify_section(&[0x00, 0x01]));
    }
}
