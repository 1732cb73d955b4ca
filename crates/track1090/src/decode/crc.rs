/**
 * The Mode S CRC is a cyclic redundancy check on 24 bits, generator
 * polynomial 0x1FFF409. The parity field occupies the last 24 bits of every
 * frame; running the division over the complete frame therefore yields 0
 * for an intact ADS-B message (the parity is the remainder itself) and the
 * interrogator/aircraft address for the overlaid AP/PI fields.
 */
use once_cell::sync::Lazy;

const GENERATOR: u32 = 0xFFF409;

static CRC_TABLE: Lazy<[u32; 256]> = Lazy::new(|| {
    let mut table = [0u32; 256];
    for (i, entry) in table.iter_mut().enumerate() {
        let mut crc = (i as u32) << 16;
        for _ in 0..8 {
            crc <<= 1;
            if crc & 0x100_0000 != 0 {
                crc ^= GENERATOR;
            }
        }
        *entry = crc & 0xFF_FFFF;
    }
    table
});

/// Remainder of the first `bits` bits of `data` divided by the generator.
///
/// `bits` must be a multiple of 8 (Mode S frames are 56 or 112 bits).
pub fn modes_checksum(data: &[u8], bits: usize) -> u32 {
    let mut crc: u32 = 0;
    for &byte in &data[..bits / 8] {
        let idx = ((crc >> 16) as u8) ^ byte;
        crc = ((crc << 8) & 0xFF_FFFF) ^ CRC_TABLE[idx as usize];
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;
    use hexlit::hex;

    #[test]
    fn test_df17_checksum_zero() {
        // intact extended squitter: remainder over all 112 bits is 0
        let bytes = hex!("8D406B902015A678D4D220AA4BDA");
        assert_eq!(modes_checksum(&bytes, 112), 0);
    }

    #[test]
    fn test_df17_corrupted() {
        let mut bytes = hex!("8D406B902015A678D4D220AA4BDA");
        bytes[7] ^= 0x40;
        assert_ne!(modes_checksum(&bytes, 112), 0);
    }

    #[test]
    fn test_known_corrupted_frame() {
        let bytes = hex!("8d4ca251204994b1c36e60a5343d");
        assert_ne!(modes_checksum(&bytes, 112), 0);
    }

    #[test]
    fn test_ap_overlay_yields_address() {
        // a short reply carries parity XOR address in its last 24 bits;
        // the full-frame remainder must then equal the address
        let mut bytes = hex!("20001718000000");
        let parity = modes_checksum(&bytes, 56);
        let address = 0x40058B_u32;
        let ap = parity ^ address;
        bytes[4] = (ap >> 16) as u8;
        bytes[5] = (ap >> 8) as u8;
        bytes[6] = ap as u8;
        assert_eq!(modes_checksum(&bytes, 56), address);
    }
}
