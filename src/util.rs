use crc::{Crc, CRC_32_ISO_HDLC};

/// The "zlib"/IEEE 802.3 CRC-32, as named by the protocol's checksum field.
pub(crate) const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Computes the packet checksum: CRC-32 over the full datagram with the
/// 3-byte checksum field (bytes 9..12 of the 12-byte header) zeroed, then
/// truncated to the low 24 bits.
pub(crate) fn packet_checksum(raw: &[u8]) -> u32 {
    debug_assert!(raw.len() >= 12);
    let mut digest = CRC32.digest();
    digest.update(&raw[0..9]);
    digest.update(&[0u8, 0u8, 0u8]);
    digest.update(&raw[12..]);
    digest.finalize() & 0x00FF_FFFF
}

/// CRC-32 over an arbitrary byte range, used only for resume negotiation.
pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_is_24_bits() {
        let raw = vec![0u8; 20];
        assert_eq!(packet_checksum(&raw) & !0x00FF_FFFF, 0);
    }

    #[test]
    fn crc32_known_vector() {
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }
}
