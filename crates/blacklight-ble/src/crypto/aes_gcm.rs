//! C3: AES-256-GCM with a 16-byte IV and a per-socket reuse ledger.

use aes_gcm::aead::generic_array::typenum::{U12, U16};
use aes_gcm::aead::{generic_array::GenericArray, Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::AesGcm;

use super::iv_ledger::{IvLedger, IV_SIZE};
use crate::error::{Error, Result};
use crate::rng::{FastRng, SecureRng};

pub const KEY_SIZE: usize = 32;
pub const TAG_SIZE: usize = 12;

/// AES-256-GCM, keyed on a 16-byte IV and a 12-byte tag (matching the
/// original CryptoPP configuration rather than this crate's 12-byte/16-byte
/// defaults).
type Cipher = AesGcm<Aes256, U16, U12>;

pub fn generate_key(rng: &mut SecureRng) -> [u8; KEY_SIZE] {
    let mut key = [0u8; KEY_SIZE];
    rng.fill_bytes(&mut key);
    key
}

/// One socket's AES-GCM engine: the session key plus the IV ledger that
/// guards both directions of traffic against nonce reuse.
pub struct AesGcmEngine {
    key: [u8; KEY_SIZE],
    ledger: IvLedger,
}

impl AesGcmEngine {
    pub fn new(key: [u8; KEY_SIZE]) -> Self {
        Self {
            key,
            ledger: IvLedger::new(),
        }
    }

    /// Draws IV candidates from `rng` until one is absent from the ledger.
    /// Does not reserve it — [`Self::encrypt`] is the single point of
    /// ledger reservation, so the caller must pass the result straight into
    /// `encrypt`.
    pub fn generate_iv(&mut self, rng: &mut FastRng) -> [u8; IV_SIZE] {
        loop {
            let candidate = rng.next_block();
            if !self.ledger.contains(&candidate) {
                return candidate;
            }
        }
    }

    /// Encrypts `plaintext` under `iv`, producing `[IV ‖ CIPHERTEXT ‖ TAG]`.
    /// `iv` must already have been reserved via [`Self::generate_iv`] (or be
    /// otherwise absent from the ledger); reuse is rejected.
    pub fn encrypt(&mut self, iv: [u8; IV_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
        if !self.ledger.insert(iv) {
            return Err(Error::IvReuse);
        }

        let cipher = Cipher::new(GenericArray::from_slice(&self.key));
        let nonce = GenericArray::from_slice(&iv);
        let ct = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| Error::Handshake("AES-GCM encryption failed".into()))?;

        let mut out = Vec::with_capacity(IV_SIZE + ct.len());
        out.extend_from_slice(&iv);
        out.extend_from_slice(&ct);
        Ok(out)
    }

    /// Parses `[IV ‖ CIPHERTEXT ‖ TAG]`, records the peer's IV in the
    /// ledger, and authenticates/decrypts.
    pub fn decrypt(&mut self, bytes: &[u8]) -> Result<Vec<u8>> {
        if bytes.len() < IV_SIZE + TAG_SIZE {
            return Err(Error::BadMessage(format!(
                "record of {} bytes is too short to contain an IV and tag",
                bytes.len()
            )));
        }

        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&bytes[..IV_SIZE]);
        let ct = &bytes[IV_SIZE..];

        self.ledger.insert(iv);

        let cipher = Cipher::new(GenericArray::from_slice(&self.key));
        let nonce = GenericArray::from_slice(&iv);
        cipher.decrypt(nonce, ct).map_err(|_| Error::Decrypt)
    }

    pub fn ledger_len(&self) -> usize {
        self.ledger.len()
    }
}
