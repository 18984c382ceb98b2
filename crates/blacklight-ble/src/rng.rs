//! C1: random sources.
//!
//! Two surfaces, matching the protocol's two distinct trust requirements:
//! [`FastRng`] produces 16-byte IV candidates and need not be
//! cryptographically strong (uniqueness is enforced by the IV ledger, not by
//! the generator), while [`SecureRng`] backs RSA key generation, OAEP seeds,
//! and the stage-3 handshake confirmation bytes.

use rand::rngs::OsRng;
use rand::RngCore;
use std::time::{SystemTime, UNIX_EPOCH};

const MULT: [u32; 4] = [214013, 17405, 214013, 69069];
const ADD: [u32; 4] = [2531011, 10395331, 13737667, 1];

/// A four-lane linear congruential generator producing 16 bytes per call.
///
/// Each lane evolves independently as `state[i] = state[i] * MULT[i] +
/// ADD[i]` (wrapping u32 arithmetic). This is a scalar reimplementation of
/// the classic MSVC-`rand()`-replacement shape: no SIMD, no global seed-once
/// guard — one value per socket, per the corrected design.
pub struct FastRng {
    state: [u32; 4],
}

impl FastRng {
    /// Seeds from the given 32-bit value, matching the lane layout
    /// `[seed+1, seed, seed+1, seed]`.
    pub fn seed(seed: u32) -> Self {
        Self {
            state: [
                seed.wrapping_add(1),
                seed,
                seed.wrapping_add(1),
                seed,
            ],
        }
    }

    /// Seeds from the current wall-clock time.
    pub fn seed_from_time() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos() ^ (d.as_secs() as u32))
            .unwrap_or(0);
        Self::seed(nanos)
    }

    pub fn next_block(&mut self) -> [u8; 16] {
        let mut out = [0u8; 16];
        for i in 0..4 {
            self.state[i] = self.state[i].wrapping_mul(MULT[i]).wrapping_add(ADD[i]);
            out[i * 4..i * 4 + 4].copy_from_slice(&self.state[i].to_le_bytes());
        }
        out
    }
}

/// Thin wrapper over the OS entropy source, used wherever the protocol needs
/// cryptographically strong randomness.
pub struct SecureRng {
    inner: OsRng,
}

impl SecureRng {
    pub fn new() -> Self {
        Self { inner: OsRng }
    }

    pub fn fill_bytes(&mut self, dest: &mut [u8]) {
        self.inner.fill_bytes(dest);
    }

    pub(crate) fn inner_mut(&mut self) -> &mut OsRng {
        &mut self.inner
    }
}

impl Default for SecureRng {
    fn default() -> Self {
        Self::new()
    }
}
