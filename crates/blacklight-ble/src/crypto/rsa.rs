//! C2: RSA-4096 key material and block-wise OAEP encrypt/decrypt.
//!
//! Key generation is delegated to the `rsa` crate (candidate-prime search,
//! fixed public exponent starting at 65537); the OAEP padding and per-block
//! chunking on top of it are hand-rolled against [`crate::crypto::oaep`] and
//! [`crate::crypto::mgf1`] so the exact mask-generation byte order this
//! protocol requires is under our control.

use crate::error::{Error, Result};
use crate::rng::SecureRng;
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};

use super::oaep;

pub const BIT_COUNT: usize = 4096;
pub const OCTET_COUNT: usize = BIT_COUNT / 8;
pub const EXP_SIZE: usize = OCTET_COUNT;
pub const MOD_SIZE: usize = OCTET_COUNT;

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct PublicKey {
    pub e: BigUint,
    pub n: BigUint,
}

#[derive(Clone)]
pub struct PrivateKey {
    pub d: BigUint,
    pub n: BigUint,
}

#[derive(Clone)]
pub struct KeyPair {
    pub public: PublicKey,
    pub private: PrivateKey,
}

/// Generates a fresh `BIT_COUNT`-bit RSA keypair.
pub fn generate_keypair(rng: &mut SecureRng) -> Result<KeyPair> {
    let private = RsaPrivateKey::new(rng.inner_mut(), BIT_COUNT)
        .map_err(|e| Error::Handshake(format!("RSA key generation failed: {e}")))?;
    let public = RsaPublicKey::from(&private);

    Ok(KeyPair {
        public: PublicKey {
            e: public.e().clone(),
            n: public.n().clone(),
        },
        private: PrivateKey {
            d: private.d().clone(),
            n: private.n().clone(),
        },
    })
}

/// Serializes a `BigUint` big-endian, left-zero-padded to `len` bytes.
fn to_be_bytes_padded(value: &BigUint, len: usize) -> Vec<u8> {
    let raw = value.to_bytes_be();
    let mut out = vec![0u8; len];
    let offset = len - raw.len();
    out[offset..].copy_from_slice(&raw);
    out
}

pub fn public_key_to_wire(key: &PublicKey) -> Vec<u8> {
    let mut out = Vec::with_capacity(EXP_SIZE + MOD_SIZE);
    out.extend(to_be_bytes_padded(&key.e, EXP_SIZE));
    out.extend(to_be_bytes_padded(&key.n, MOD_SIZE));
    out
}

pub fn public_key_from_wire(bytes: &[u8]) -> Result<PublicKey> {
    if bytes.len() != EXP_SIZE + MOD_SIZE {
        return Err(Error::BadMessage(format!(
            "RSA public key wire payload has {} bytes, expected {}",
            bytes.len(),
            EXP_SIZE + MOD_SIZE
        )));
    }
    let e = BigUint::from_bytes_be(&bytes[..EXP_SIZE]);
    let n = BigUint::from_bytes_be(&bytes[EXP_SIZE..]);
    Ok(PublicKey { e, n })
}

fn encrypt_block(em: &[u8], key: &PublicKey) -> Vec<u8> {
    let m = BigUint::from_bytes_be(em);
    let c = m.modpow(&key.e, &key.n);
    to_be_bytes_padded(&c, OCTET_COUNT)
}

fn decrypt_block(ct: &[u8], key: &PrivateKey) -> Vec<u8> {
    let c = BigUint::from_bytes_be(ct);
    let m = c.modpow(&key.d, &key.n);
    to_be_bytes_padded(&m, OCTET_COUNT)
}

/// Encrypts `message`, splitting it into `ceil(|message| / m_len)` OAEP
/// blocks (minimum one block, even for an empty message).
pub fn encrypt(message: &[u8], key: &PublicKey, rng: &mut SecureRng) -> Result<Vec<u8>> {
    let m_len = oaep::max_message_len(OCTET_COUNT);
    let mut out = Vec::with_capacity(OCTET_COUNT);

    if message.is_empty() {
        let em = oaep::encode(message, OCTET_COUNT, rng)?;
        out.extend(encrypt_block(&em, key));
        return Ok(out);
    }

    for chunk in message.chunks(m_len) {
        let em = oaep::encode(chunk, OCTET_COUNT, rng)?;
        out.extend(encrypt_block(&em, key));
    }
    Ok(out)
}

/// Decrypts a concatenation of OAEP blocks produced by [`encrypt`].
pub fn decrypt(ciphertext: &[u8], key: &PrivateKey) -> Result<Vec<u8>> {
    if ciphertext.is_empty() || ciphertext.len() % OCTET_COUNT != 0 {
        return Err(Error::BadMessage(format!(
            "RSA ciphertext length {} is not a positive multiple of the {}-byte block size",
            ciphertext.len(),
            OCTET_COUNT
        )));
    }

    let mut out = Vec::new();
    for block in ciphertext.chunks(OCTET_COUNT) {
        let em = decrypt_block(block, key);
        out.extend(oaep::decode(&em, OCTET_COUNT)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_keypair() -> KeyPair {
        let mut rng = SecureRng::new();
        generate_keypair(&mut rng).expect("keygen")
    }

    #[test]
    #[ignore = "full 4096-bit keygen is slow; run explicitly with --ignored"]
    fn encrypt_decrypt_round_trip_single_block() {
        let kp = test_keypair();
        let mut rng = SecureRng::new();
        let plaintext = b"BLLBLLBLLenc-session-key-material";
        let ct = encrypt(plaintext, &kp.public, &mut rng).unwrap();
        assert_eq!(ct.len(), OCTET_COUNT);
        let pt = decrypt(&ct, &kp.private).unwrap();
        assert_eq!(pt, plaintext);
    }

    #[test]
    #[ignore = "full 4096-bit keygen is slow; run explicitly with --ignored"]
    fn encrypt_decrypt_round_trip_multi_block() {
        let kp = test_keypair();
        let mut rng = SecureRng::new();
        let plaintext = vec![0xABu8; oaep::max_message_len(OCTET_COUNT) * 2 + 17];
        let ct = encrypt(&plaintext, &kp.public, &mut rng).unwrap();
        assert_eq!(ct.len() % OCTET_COUNT, 0);
        let pt = decrypt(&ct, &kp.private).unwrap();
        assert_eq!(pt, plaintext);
    }

    #[test]
    fn public_key_wire_round_trip() {
        let e = BigUint::from(65537u32);
        let n = BigUint::from(0xDEADBEEFu64);
        let key = PublicKey { e, n };
        let wire = public_key_to_wire(&key);
        assert_eq!(wire.len(), EXP_SIZE + MOD_SIZE);
        let parsed = public_key_from_wire(&wire).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn rejects_ciphertext_not_a_block_multiple() {
        let dummy = PrivateKey {
            d: BigUint::from(1u32),
            n: BigUint::from(1u32),
        };
        assert!(decrypt(&[0u8; 10], &dummy).is_err());
    }
}
