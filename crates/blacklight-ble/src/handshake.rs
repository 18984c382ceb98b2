//! C7: the three-stage handshake, modeled as an explicit state machine.
//!
//! The original source drives this as a web of member-function
//! continuations (`AsyncCS1 → AsyncCS1W → AsyncCS2 → …`), each manually
//! allocating and freeing a heap buffer passed between stages. Per the
//! corrected design this is instead a `step(state, incoming) -> (next_state,
//! action)` transition function: [`HandshakeMachine::step`] owns all of the
//! stage's working state and returns the next [`Action`] the caller must
//! perform (a read of N bytes, a write of some bytes, or completion).
//!
//! The same machine drives both the blocking and the async/executor-based
//! handshake in [`crate::socket`] — there is exactly one place the stage
//! logic lives.

use tracing::{debug, warn};

use crate::context::Context;
use crate::crypto::aes_gcm::{self, AesGcmEngine};
use crate::crypto::rsa;
use crate::error::{Error, Result};
use crate::magic;
use crate::rng::{FastRng, SecureRng};

const S1_REQUEST_LEN: usize = 4 + 4 + 3;
const S1_REPLY_LEN: usize = 4 + 4 + rsa::EXP_SIZE + rsa::MOD_SIZE;
const S2_PLAINTEXT_LEN: usize = 4 + 4 + aes_gcm::KEY_SIZE;
const S3_PLAINTEXT_LEN: usize = 4 + 4 + 16;
const S3_RECORD_LEN: usize = 16 + S3_PLAINTEXT_LEN + aes_gcm::TAG_SIZE; // 52

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Role {
    Client,
    Server,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Stage {
    // client
    ClientAwaitingPubKeyReply,
    ClientAfterSentSessionKey,
    ClientAwaitingServerConfirm,
    ClientAfterSentConfirm,
    // server
    ServerAwaitingHello,
    ServerAfterSentPubKey,
    ServerAwaitingSessionKey,
    ServerAfterSentConfirm,
    ServerAwaitingClientConfirm,
}

/// What the driver must do next.
pub enum Action {
    Read(usize),
    Write(Vec<u8>),
}

/// The result of advancing the state machine by one transition.
pub enum Step {
    Continue(Action),
    Complete(AesGcmEngine),
}

fn write_magic(buf: &mut Vec<u8>) {
    magic::write(buf);
}

fn check_magic(buf: &[u8]) -> Result<()> {
    if magic::check(buf) {
        Ok(())
    } else {
        Err(Error::BadMessage("magic header mismatch".into()))
    }
}

pub struct HandshakeMachine {
    role: Role,
    stage: Stage,
    aes_key: Option<[u8; aes_gcm::KEY_SIZE]>,
    engine: Option<AesGcmEngine>,
}

impl HandshakeMachine {
    pub fn new(role: Role) -> Self {
        let stage = match role {
            Role::Client => Stage::ClientAwaitingPubKeyReply,
            Role::Server => Stage::ServerAwaitingHello,
        };
        Self {
            role,
            stage,
            aes_key: None,
            engine: None,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// The first action the driver must perform before any `step` call.
    pub fn start(&self) -> Action {
        match self.role {
            Role::Client => {
                let mut buf = Vec::with_capacity(S1_REQUEST_LEN);
                write_magic(&mut buf);
                buf.extend_from_slice(b"enc");
                Action::Write(buf)
            }
            Role::Server => Action::Read(S1_REQUEST_LEN),
        }
    }

    /// Advances the machine. `incoming` is `Some(bytes)` after a completed
    /// `Read`, or `None` after a completed `Write`.
    pub fn step(
        &mut self,
        ctx: &Context,
        secure: &mut SecureRng,
        fast: &mut FastRng,
        incoming: Option<&[u8]>,
    ) -> Result<Step> {
        match (self.stage, incoming) {
            // --- client ---
            (Stage::ClientAwaitingPubKeyReply, Some(bytes)) => {
                if bytes.len() != S1_REPLY_LEN {
                    return Err(Error::Handshake(format!(
                        "stage-1 reply had {} bytes, expected {S1_REPLY_LEN}",
                        bytes.len()
                    )));
                }
                check_magic(bytes)?;
                let public = rsa::public_key_from_wire(&bytes[8..])?;

                if let Some(pinned) = ctx.pinned_key() {
                    if pinned != public {
                        warn!("client handshake: peer public key does not match pinned key");
                        return Err(Error::Handshake("peer public key does not match the pinned key".into()));
                    }
                }

                let key = aes_gcm::generate_key(secure);
                self.aes_key = Some(key);
                self.engine = Some(AesGcmEngine::new(key));

                let mut plaintext = Vec::with_capacity(S2_PLAINTEXT_LEN);
                write_magic(&mut plaintext);
                plaintext.extend_from_slice(&key);

                let ciphertext = rsa::encrypt(&plaintext, &public, secure)?;
                debug!(stage = "S2", len = ciphertext.len(), "client sending session key");
                self.stage = Stage::ClientAfterSentSessionKey;
                Ok(Step::Continue(Action::Write(ciphertext)))
            }
            (Stage::ClientAfterSentSessionKey, None) => {
                self.stage = Stage::ClientAwaitingServerConfirm;
                Ok(Step::Continue(Action::Read(S3_RECORD_LEN)))
            }
            (Stage::ClientAwaitingServerConfirm, Some(bytes)) => {
                if bytes.len() != S3_RECORD_LEN {
                    return Err(Error::Handshake(format!(
                        "stage-3 record had {} bytes, expected {S3_RECORD_LEN}",
                        bytes.len()
                    )));
                }
                let engine = self.engine.as_mut().expect("engine set before stage 3");
                let plaintext = engine.decrypt(bytes).map_err(|_| {
                    Error::Handshake("stage-3 server confirmation failed to decrypt".into())
                })?;
                check_magic(&plaintext).map_err(|_| {
                    Error::Handshake("stage-3 server confirmation had a bad magic header".into())
                })?;

                let mut reply = Vec::with_capacity(S3_PLAINTEXT_LEN);
                write_magic(&mut reply);
                let mut rand16 = [0u8; 16];
                secure.fill_bytes(&mut rand16);
                reply.extend_from_slice(&rand16);

                let iv = engine.generate_iv(fast);
                let record = engine.encrypt(iv, &reply)?;
                debug!(stage = "S3", "client sending confirmation");
                self.stage = Stage::ClientAfterSentConfirm;
                Ok(Step::Continue(Action::Write(record)))
            }
            (Stage::ClientAfterSentConfirm, None) => {
                let engine = self.engine.take().expect("engine set before completion");
                debug!("client handshake complete");
                Ok(Step::Complete(engine))
            }

            // --- server ---
            (Stage::ServerAwaitingHello, Some(bytes)) => {
                if bytes.len() != S1_REQUEST_LEN {
                    return Err(Error::Handshake(format!(
                        "stage-1 request had {} bytes, expected {S1_REQUEST_LEN}",
                        bytes.len()
                    )));
                }
                check_magic(bytes)?;
                if &bytes[8..11] != b"enc" {
                    return Err(Error::BadMessage("stage-1 request missing the \"enc\" tag".into()));
                }

                let keypair = ctx.ensure_keypair(secure)?;
                let mut reply = Vec::with_capacity(S1_REPLY_LEN);
                write_magic(&mut reply);
                reply.extend(rsa::public_key_to_wire(&keypair.public));
                debug!(stage = "S1", "server replying with public key");
                self.stage = Stage::ServerAfterSentPubKey;
                Ok(Step::Continue(Action::Write(reply)))
            }
            (Stage::ServerAfterSentPubKey, None) => {
                self.stage = Stage::ServerAwaitingSessionKey;
                Ok(Step::Continue(Action::Read(rsa::OCTET_COUNT)))
            }
            (Stage::ServerAwaitingSessionKey, Some(bytes)) => {
                let private = ctx
                    .private_key()
                    .ok_or_else(|| Error::Handshake("server has no private key material".into()))?;
                let plaintext = rsa::decrypt(bytes, &private)
                    .map_err(|_| Error::Handshake("stage-2 session key failed to decrypt".into()))?;
                if plaintext.len() != S2_PLAINTEXT_LEN {
                    return Err(Error::Handshake(format!(
                        "stage-2 plaintext had {} bytes, expected {S2_PLAINTEXT_LEN}",
                        plaintext.len()
                    )));
                }
                check_magic(&plaintext)
                    .map_err(|_| Error::Handshake("stage-2 payload had a bad magic header".into()))?;

                let mut key = [0u8; aes_gcm::KEY_SIZE];
                key.copy_from_slice(&plaintext[8..]);
                self.aes_key = Some(key);
                let mut engine = AesGcmEngine::new(key);

                let mut confirm = Vec::with_capacity(S3_PLAINTEXT_LEN);
                write_magic(&mut confirm);
                let mut rand16 = [0u8; 16];
                secure.fill_bytes(&mut rand16);
                confirm.extend_from_slice(&rand16);

                let iv = engine.generate_iv(fast);
                let record = engine.encrypt(iv, &confirm)?;
                self.engine = Some(engine);
                debug!(stage = "S3", "server sending confirmation");
                self.stage = Stage::ServerAfterSentConfirm;
                Ok(Step::Continue(Action::Write(record)))
            }
            (Stage::ServerAfterSentConfirm, None) => {
                self.stage = Stage::ServerAwaitingClientConfirm;
                Ok(Step::Continue(Action::Read(S3_RECORD_LEN)))
            }
            (Stage::ServerAwaitingClientConfirm, Some(bytes)) => {
                if bytes.len() != S3_RECORD_LEN {
                    return Err(Error::Handshake(format!(
                        "stage-3 client confirmation had {} bytes, expected {S3_RECORD_LEN}",
                        bytes.len()
                    )));
                }
                let engine = self.engine.as_mut().expect("engine set before stage 3");
                let plaintext = engine.decrypt(bytes).map_err(|_| {
                    Error::Handshake("stage-3 client confirmation failed to decrypt".into())
                })?;
                check_magic(&plaintext).map_err(|_| {
                    Error::Handshake("stage-3 client confirmation had a bad magic header".into())
                })?;
                let engine = self.engine.take().expect("engine set before completion");
                debug!("server handshake complete");
                Ok(Step::Complete(engine))
            }

            (stage, incoming) => Err(Error::Handshake(format!(
                "handshake step called in stage {stage:?} with incoming={}",
                incoming.is_some()
            ))),
        }
    }
}
