//! MGF1 mask generation, per PKCS #1 v2.2.

use sha2::{Digest, Sha256};

/// `MGF1(seed, length) = truncate(SHA-256(seed ‖ 0_be32) ‖ SHA-256(seed ‖ 1_be32) ‖ ..., length)`
///
/// Seed bytes come first, the big-endian counter second — this crate follows
/// that order exactly rather than the counter-first order some reference
/// implementations use.
pub fn mgf1(seed: &[u8], length: usize) -> Vec<u8> {
    let mut output = Vec::with_capacity(length + Sha256::output_size());
    let mut counter: u32 = 0;
    while output.len() < length {
        let mut hasher = Sha256::new();
        hasher.update(seed);
        hasher.update(counter.to_be_bytes());
        output.extend_from_slice(&hasher.finalize());
        counter += 1;
    }
    output.truncate(length);
    output
}
