//! The wire magic header shared by the handshake and the record framer.
//!
//! Stored as full 32-bit little-endian values with only the low 16 bits
//! set, matching the original protocol's on-wire layout.

pub(crate) const MAGIC1: u32 = 0x0000_1173;
pub(crate) const MAGIC2: u32 = 0x0000_0235;
pub(crate) const HEADER_LEN: usize = 8;

pub(crate) fn write(buf: &mut Vec<u8>) {
    buf.extend_from_slice(&MAGIC1.to_le_bytes());
    buf.extend_from_slice(&MAGIC2.to_le_bytes());
}

pub(crate) fn check(buf: &[u8]) -> bool {
    if buf.len() < HEADER_LEN {
        return false;
    }
    let m1 = u32::from_le_bytes(buf[0..4].try_into().unwrap());
    let m2 = u32::from_le_bytes(buf[4..8].try_into().unwrap());
    m1 == MAGIC1 && m2 == MAGIC2
}
