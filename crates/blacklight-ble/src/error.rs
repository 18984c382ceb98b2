use thiserror::Error;

/// The closed set of failures the BLE transport can surface to a caller.
///
/// `WouldBlock` has no variant here on purpose: it is handled internally by
/// the async state machines (re-enqueuing on the executor) and never crosses
/// the public API.
#[derive(Debug, Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("socket is not connected")]
    NotConnected,

    #[error("socket is already connected")]
    AlreadyConnected,

    #[error("bad message: {0}")]
    BadMessage(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("record authentication failed")]
    Decrypt,

    #[error("IV reuse detected on socket ledger")]
    IvReuse,
}

pub type Result<T> = std::result::Result<T, Error>;
