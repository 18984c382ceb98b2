//! Blacklight Encryption (BLE): an RSA-4096-OAEP-then-AES-256-GCM secure
//! transport over TCP.
//!
//! A socket completes a three-stage handshake — hello, RSA-wrapped session
//! key exchange, AES-GCM confirmation — and then exchanges length-prefixed,
//! authenticated records. See [`socket::BleSocket`] for the public facade.

pub mod context;
pub mod crypto;
pub mod error;
pub mod executor;
pub mod framing;
pub mod handshake;
mod magic;
pub mod rng;
pub mod socket;
pub mod transport;

pub use context::Context;
pub use error::{Error, Result};
pub use executor::Executor;
pub use handshake::Role;
pub use socket::{BleSocket, HandshakeState};
pub use transport::{ByteTransport, TcpTransport};
