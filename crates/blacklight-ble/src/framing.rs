//! C8: magic-header + length-prefixed AEAD record framing, with a
//! cross-call plaintext overflow buffer.

use std::collections::VecDeque;

use crate::crypto::aes_gcm::AesGcmEngine;
use crate::error::{Error, Result};
use crate::magic::{self, HEADER_LEN};
use crate::rng::FastRng;
use crate::transport::{read_exact, write_all, ByteTransport};

pub struct RecordFramer {
    overflow: VecDeque<u8>,
}

impl RecordFramer {
    pub fn new() -> Self {
        Self {
            overflow: VecDeque::new(),
        }
    }

    pub fn overflow_len(&self) -> usize {
        self.overflow.len()
    }

    /// Encrypts `plaintext`, frames it, and writes it to the transport.
    /// Returns `plaintext.len()` (the wire length is never surfaced to the
    /// caller).
    pub fn write_some(
        &self,
        engine: &mut AesGcmEngine,
        fast: &mut FastRng,
        transport: &mut dyn ByteTransport,
        plaintext: &[u8],
    ) -> Result<usize> {
        let iv = engine.generate_iv(fast);
        let payload = engine.encrypt(iv, plaintext)?;

        let mut wire = Vec::with_capacity(HEADER_LEN + 8 + payload.len());
        magic::write(&mut wire);
        wire.extend_from_slice(&(payload.len() as u64).to_le_bytes());
        wire.extend_from_slice(&payload);

        write_all(transport, &wire)?;
        Ok(plaintext.len())
    }

    /// Drains the overflow buffer first; pulls and decrypts exactly one
    /// record from the wire only if more bytes are still needed. Never
    /// reads more than one record per call.
    pub fn read_some(
        &mut self,
        engine: &mut AesGcmEngine,
        transport: &mut dyn ByteTransport,
        buf: &mut [u8],
    ) -> Result<usize> {
        let mut delivered = 0;

        if !self.overflow.is_empty() {
            let take = self.overflow.len().min(buf.len());
            for slot in buf.iter_mut().take(take) {
                *slot = self.overflow.pop_front().expect("checked non-empty above");
            }
            delivered += take;
            if delivered == buf.len() {
                return Ok(delivered);
            }
        }

        let mut header = [0u8; HEADER_LEN + 8];
        read_exact(transport, &mut header)?;
        if !magic::check(&header[..HEADER_LEN]) {
            return Err(Error::BadMessage("record header magic mismatch".into()));
        }
        let length = u64::from_le_bytes(header[HEADER_LEN..].try_into().unwrap()) as usize;

        let mut payload = vec![0u8; length];
        read_exact(transport, &mut payload)?;

        let plaintext = engine.decrypt(&payload)?;

        let remaining = buf.len() - delivered;
        let take = remaining.min(plaintext.len());
        buf[delivered..delivered + take].copy_from_slice(&plaintext[..take]);
        delivered += take;

        if take < plaintext.len() {
            self.overflow.extend(plaintext[take..].iter().copied());
        }

        Ok(delivered)
    }
}

impl Default for RecordFramer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::aes_gcm;
    use crate::rng::SecureRng;
    use crate::transport::IoOutcome;
    use std::io;
    use std::net::SocketAddr;

    /// An in-memory transport splicing a write side and a read side, so
    /// framer round-trips can be tested without real sockets.
    struct LoopbackTransport {
        inbound: VecDeque<u8>,
        outbound: VecDeque<u8>,
    }

    impl LoopbackTransport {
        fn new() -> Self {
            Self {
                inbound: VecDeque::new(),
                outbound: VecDeque::new(),
            }
        }

        fn deliver(&mut self, bytes: &[u8]) {
            self.inbound.extend(bytes.iter().copied());
        }

        fn sent(&mut self) -> Vec<u8> {
            self.outbound.drain(..).collect()
        }
    }

    impl ByteTransport for LoopbackTransport {
        fn connect(&mut self, _addr: SocketAddr) -> Result<()> {
            Ok(())
        }

        fn read_some(&mut self, buf: &mut [u8]) -> io::Result<IoOutcome> {
            if self.inbound.is_empty() {
                return Ok(IoOutcome::WouldBlock);
            }
            let n = self.inbound.len().min(buf.len());
            for slot in buf.iter_mut().take(n) {
                *slot = self.inbound.pop_front().unwrap();
            }
            Ok(IoOutcome::Progress(n))
        }

        fn write_some(&mut self, buf: &[u8]) -> io::Result<IoOutcome> {
            self.outbound.extend(buf.iter().copied());
            Ok(IoOutcome::Progress(buf.len()))
        }

        fn shutdown(&mut self) {}

        fn is_connected(&self) -> bool {
            true
        }
    }

    fn engine_pair() -> (AesGcmEngine, AesGcmEngine, FastRng) {
        let mut rng = SecureRng::new();
        let key = aes_gcm::generate_key(&mut rng);
        (
            AesGcmEngine::new(key),
            AesGcmEngine::new(key),
            FastRng::seed_from_time(),
        )
    }

    #[test]
    fn write_then_read_round_trips_exactly() {
        let (mut enc_engine, mut dec_engine, mut fast) = engine_pair();
        let mut wire = LoopbackTransport::new();
        let framer_w = RecordFramer::new();
        let mut framer_r = RecordFramer::new();

        let written = framer_w
            .write_some(&mut enc_engine, &mut fast, &mut wire, b"hello")
            .unwrap();
        assert_eq!(written, 5);

        let bytes = wire.sent();
        wire.deliver(&bytes);

        let mut buf = [0u8; 5];
        let read = framer_r.read_some(&mut dec_engine, &mut wire, &mut buf).unwrap();
        assert_eq!(read, 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn fragmented_reads_drain_the_overflow_buffer_first() {
        let (mut enc_engine, mut dec_engine, mut fast) = engine_pair();
        let mut wire = LoopbackTransport::new();
        let framer_w = RecordFramer::new();
        let mut framer_r = RecordFramer::new();

        let plaintext = vec![0xABu8; 4096];
        framer_w
            .write_some(&mut enc_engine, &mut fast, &mut wire, &plaintext)
            .unwrap();
        let bytes = wire.sent();
        wire.deliver(&bytes);

        let mut collected = Vec::new();
        for _ in 0..4 {
            let mut chunk = [0u8; 1024];
            let n = framer_r.read_some(&mut dec_engine, &mut wire, &mut chunk).unwrap();
            collected.extend_from_slice(&chunk[..n]);
        }

        assert_eq!(collected, plaintext);
        assert_eq!(framer_r.overflow_len(), 0);
    }

    #[test]
    fn corrupted_magic_header_is_rejected() {
        let (mut enc_engine, mut dec_engine, mut fast) = engine_pair();
        let mut wire = LoopbackTransport::new();
        let framer_w = RecordFramer::new();
        let mut framer_r = RecordFramer::new();

        framer_w
            .write_some(&mut enc_engine, &mut fast, &mut wire, b"payload")
            .unwrap();
        let mut bytes = wire.sent();
        bytes[0] ^= 0xFF;
        wire.deliver(&bytes);

        let mut buf = [0u8; 7];
        assert!(matches!(
            framer_r.read_some(&mut dec_engine, &mut wire, &mut buf),
            Err(Error::BadMessage(_))
        ));
    }

    #[test]
    fn flipped_ciphertext_bit_is_rejected_as_decrypt_error() {
        let (mut enc_engine, mut dec_engine, mut fast) = engine_pair();
        let mut wire = LoopbackTransport::new();
        let framer_w = RecordFramer::new();
        let mut framer_r = RecordFramer::new();

        framer_w
            .write_some(&mut enc_engine, &mut fast, &mut wire, b"tamper-me")
            .unwrap();
        let mut bytes = wire.sent();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        wire.deliver(&bytes);

        let mut buf = [0u8; 9];
        assert!(matches!(
            framer_r.read_some(&mut dec_engine, &mut wire, &mut buf),
            Err(Error::Decrypt)
        ));
    }
}
