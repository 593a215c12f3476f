use crc::{CRC_16_XMODEM, Crc, Digest};

static CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_XMODEM);

/// Incremental `CRC16` of a firmware image.
///
/// The checksum is `CRC-16/XMODEM`, the one the bootloader verifies before
/// installing an image, so it can be fed chunk by chunk as the image
/// arrives.
pub struct Crc16 {
    digest: Digest<'static, u16>,
    len: usize,
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

impl Crc16 {
    /// Creates an empty [`Crc16`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            digest: CRC16.digest(),
            len: 0,
        }
    }

    /// Feeds a chunk of data.
    pub fn update(&mut self, chunk: &[u8]) {
        self.digest.update(chunk);
        self.len += chunk.len();
    }

    /// Number of bytes fed so far.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether no byte has been fed.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the checksum of every byte fed so far.
    #[must_use]
    pub fn finalize(self) -> u16 {
        self.digest.finalize()
    }
}

/// Computes the `CRC16` of a whole buffer.
#[must_use]
pub fn crc16(data: &[u8]) -> u16 {
    CRC16.checksum(data)
}

#[cfg(test)]
mod tests {
    use super::{Crc16, crc16};

    // Bitwise update used by ymodem bootloaders, which appends two zero
    // bytes before reading the result.
    fn ymodem_crc16(data: &[u8]) -> u16 {
        fn update(mut crc: u32, byte: u8) -> u32 {
            let mut input = u32::from(byte) | 0x100;
            loop {
                crc <<= 1;
                input <<= 1;
                if input & 0x100 != 0 {
                    crc += 1;
                }
                if crc & 0x10000 != 0 {
                    crc ^= 0x1021;
                }
                if input & 0x10000 != 0 {
                    break;
                }
            }
            crc & 0xFFFF
        }

        let crc = data
            .iter()
            .chain(&[0, 0])
            .fold(0, |crc, byte| update(crc, *byte));
        crc as u16
    }

    #[test]
    fn check_value() {
        assert_eq!(crc16(b"123456789"), 0x31C3);
        assert_eq!(crc16(b""), 0);
    }

    #[test]
    fn incremental() {
        let image: [u8; 300] = core::array::from_fn(|i| (i * 7 % 251) as u8);

        let mut crc = Crc16::new();
        assert!(crc.is_empty());
        for chunk in image.chunks(64) {
            crc.update(chunk);
        }
        assert_eq!(crc.len(), image.len());
        assert_eq!(crc.finalize(), crc16(&image));
    }

    #[test]
    fn matches_bootloader() {
        let image: [u8; 97] = core::array::from_fn(|i| (i * 13 % 256) as u8);
        assert_eq!(crc16(&image), ymodem_crc16(&image));
        assert_eq!(crc16(b"123456789"), ymodem_crc16(b"123456789"));
    }
}
