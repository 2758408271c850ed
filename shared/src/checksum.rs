//! CRC-32 used to authenticate every datagram payload.
//!
//! This is the common reflected CRC-32 (polynomial `0xEDB88320`, seed
//! `0xFFFFFFFF`, final complement). On the wire the 32-bit value is stored
//! least-significant byte first, directly after the `BE` magic.

/// Reversed polynomial of the standard CRC-32.
pub const POLYNOMIAL_REVERSED: u32 = 0xEDB8_8320;

/// Initial register value.
pub const SEED: u32 = 0xFFFF_FFFF;

const TABLE: [u32; 256] = build_table(POLYNOMIAL_REVERSED);

const fn build_table(polynomial: u32) -> [u32; 256] {
    let mut table = [0u32; 256];
    let mut i = 0;
    while i < 256 {
        let mut entry = i as u32;
        let mut bit = 0;
        while bit < 8 {
            if entry & 1 == 1 {
                entry = (entry >> 1) ^ polynomial;
            } else {
                entry >>= 1;
            }
            bit += 1;
        }
        table[i] = entry;
        i += 1;
    }
    table
}

/// Computes the CRC-32 of `bytes`.
///
/// An empty input is valid and yields `0`.
pub fn crc32(bytes: &[u8]) -> u32 {
    let crc = bytes.iter().fold(SEED, |crc, &byte| {
        (crc >> 8) ^ TABLE[((crc ^ byte as u32) & 0xFF) as usize]
    });
    !crc
}

/// Returns the four checksum bytes in the order they appear on the wire.
pub fn checksum_bytes(payload: &[u8]) -> [u8; 4] {
    crc32(payload).to_le_bytes()
}
