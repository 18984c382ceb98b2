//! PKCS #1 v2.2 §7.1.1 OAEP encode/decode, empty label, SHA-256.

use super::mgf1::mgf1;
use crate::error::{Error, Result};
use crate::rng::SecureRng;
use sha2::{Digest, Sha256};

pub const H_LEN: usize = 32;

/// Maximum plaintext bytes a single OAEP block can carry for the given
/// octet count.
pub fn max_message_len(octet_count: usize) -> usize {
    octet_count - 2 * H_LEN - 2
}

/// Encodes `message` into an `octet_count`-byte encoded message block (EM).
pub fn encode(message: &[u8], octet_count: usize, rng: &mut SecureRng) -> Result<Vec<u8>> {
    let m_len = message.len();
    let max_len = max_message_len(octet_count);
    if m_len > max_len {
        return Err(Error::BadMessage(format!(
            "OAEP message of {m_len} bytes exceeds the {max_len}-byte per-block maximum"
        )));
    }

    let ps_len = octet_count - m_len - 2 * H_LEN - 2;
    let mut db = Vec::with_capacity(octet_count - H_LEN - 1);
    db.extend_from_slice(&Sha256::digest(b""));
    db.extend(std::iter::repeat(0u8).take(ps_len));
    db.push(0x01);
    db.extend_from_slice(message);

    let mut seed = [0u8; H_LEN];
    rng.fill_bytes(&mut seed);

    let db_mask = mgf1(&seed, octet_count - H_LEN - 1);
    for (b, m) in db.iter_mut().zip(db_mask.iter()) {
        *b ^= m;
    }

    let seed_mask = mgf1(&db, H_LEN);
    let mut masked_seed = seed;
    for (s, m) in masked_seed.iter_mut().zip(seed_mask.iter()) {
        *s ^= m;
    }

    let mut em = Vec::with_capacity(octet_count);
    em.push(0x00);
    em.extend_from_slice(&masked_seed);
    em.extend_from_slice(&db);
    Ok(em)
}

/// Decodes an `octet_count`-byte encoded message block back to plaintext.
pub fn decode(em: &[u8], octet_count: usize) -> Result<Vec<u8>> {
    if em.len() != octet_count {
        return Err(Error::BadMessage(format!(
            "OAEP block has {} bytes, expected {octet_count}",
            em.len()
        )));
    }
    if em[0] != 0x00 {
        return Err(Error::BadMessage("OAEP leading byte is not zero".into()));
    }

    let masked_seed = &em[1..1 + H_LEN];
    let masked_db = &em[1 + H_LEN..];

    let seed_mask = mgf1(masked_db, H_LEN);
    let mut seed = [0u8; H_LEN];
    for i in 0..H_LEN {
        seed[i] = masked_seed[i] ^ seed_mask[i];
    }

    let db_mask = mgf1(&seed, octet_count - H_LEN - 1);
    let mut db = masked_db.to_vec();
    for (b, m) in db.iter_mut().zip(db_mask.iter()) {
        *b ^= m;
    }

    let expected_hash = Sha256::digest(b"");
    if db[..H_LEN] != expected_hash[..] {
        return Err(Error::BadMessage("OAEP label hash mismatch".into()));
    }

    let rest = &db[H_LEN..];
    let sep_pos = rest
        .iter()
        .position(|&b| b == 0x01)
        .ok_or_else(|| Error::BadMessage("OAEP 0x01 separator not found".into()))?;
    if rest[..sep_pos].iter().any(|&b| b != 0) {
        return Err(Error::BadMessage("OAEP padding string is not all zero".into()));
    }

    Ok(rest[sep_pos + 1..].to_vec())
}
