//! C4: the shared keypair/pinned-key container.

use std::sync::Mutex;

use crate::crypto::rsa::{self, KeyPair, PrivateKey, PublicKey};
use crate::error::Result;
use crate::rng::SecureRng;

/// Holds the local RSA keypair (generated lazily on first use if not
/// pre-supplied) and an optional pinned peer public key. Meant to be shared
/// — typically behind an `Arc` — across every socket that negotiates under
/// the same identity; the internal mutex is what makes lazy key generation
/// safe when several sockets race to become the first handshake.
pub struct Context {
    keypair: Mutex<Option<KeyPair>>,
    pinned_key: Mutex<Option<PublicKey>>,
}

impl Context {
    pub fn new() -> Self {
        Self {
            keypair: Mutex::new(None),
            pinned_key: Mutex::new(None),
        }
    }

    /// Pre-supplies a keypair, skipping lazy generation.
    pub fn use_key_pair(&self, private: PrivateKey, public: PublicKey) {
        *self.keypair.lock().unwrap() = Some(KeyPair { public, private });
    }

    /// Pins the peer public key a client-role socket must match during
    /// handshake stage 2.
    pub fn pin_key(&self, public: PublicKey) {
        *self.pinned_key.lock().unwrap() = Some(public);
    }

    pub fn pinned_key(&self) -> Option<PublicKey> {
        self.pinned_key.lock().unwrap().clone()
    }

    pub fn public_key(&self) -> Option<PublicKey> {
        self.keypair.lock().unwrap().as_ref().map(|kp| kp.public.clone())
    }

    pub fn private_key(&self) -> Option<PrivateKey> {
        self.keypair.lock().unwrap().as_ref().map(|kp| kp.private.clone())
    }

    /// Returns the existing keypair, or generates and stores one under the
    /// lock if none is present yet. Concurrent callers serialize on the
    /// same generation rather than each producing (and racing to install)
    /// their own key.
    pub fn ensure_keypair(&self, rng: &mut SecureRng) -> Result<KeyPair> {
        let mut guard = self.keypair.lock().unwrap();
        if let Some(kp) = guard.as_ref() {
            return Ok(kp.clone());
        }
        let kp = rsa::generate_keypair(rng)?;
        *guard = Some(kp.clone());
        Ok(kp)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
