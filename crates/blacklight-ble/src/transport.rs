//! C6: the byte-stream transport capability.
//!
//! Re-architected as a trait rather than a base class the way `spec.md` §9
//! asks: `BleSocket` composes a concrete [`TcpTransport`] value instead of
//! inheriting from it, so the handshake and record layers operate against
//! the trait object, never a concrete socket type.

use std::io;
use std::net::{SocketAddr, TcpStream};

use crate::error::{Error, Result};

/// Outcome of a single non-blocking I/O attempt.
pub enum IoOutcome {
    Progress(usize),
    WouldBlock,
    Eof,
}

/// A capability interface for connect/read/write/stop, implemented by a
/// concrete, mandatorily non-blocking transport.
pub trait ByteTransport: Send {
    fn connect(&mut self, addr: SocketAddr) -> Result<()>;
    fn read_some(&mut self, buf: &mut [u8]) -> io::Result<IoOutcome>;
    fn write_some(&mut self, buf: &[u8]) -> io::Result<IoOutcome>;
    fn shutdown(&mut self);
    fn is_connected(&self) -> bool;
}

/// Blocking read-exact built on top of a non-blocking transport: loops on
/// `WouldBlock` until the buffer is full.
pub fn read_exact(transport: &mut dyn ByteTransport, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match transport.read_some(&mut buf[filled..]) {
            Ok(IoOutcome::Progress(n)) => filled += n,
            Ok(IoOutcome::Eof) => {
                return Err(Error::Transport("peer closed the connection while reading".into()))
            }
            Ok(IoOutcome::WouldBlock) => std::thread::yield_now(),
            Err(e) => return Err(Error::Transport(e.to_string())),
        }
    }
    Ok(())
}

/// Blocking write-all, accumulating `bytes_written` exactly once per
/// successful underlying write (the `spec.md` §9 correction to the
/// original's double-counting bug).
pub fn write_all(transport: &mut dyn ByteTransport, buf: &[u8]) -> Result<()> {
    let mut written = 0;
    while written < buf.len() {
        match transport.write_some(&buf[written..]) {
            Ok(IoOutcome::Progress(n)) => written += n,
            Ok(IoOutcome::Eof) => {
                return Err(Error::Transport("peer closed the connection while writing".into()))
            }
            Ok(IoOutcome::WouldBlock) => std::thread::yield_now(),
            Err(e) => return Err(Error::Transport(e.to_string())),
        }
    }
    Ok(())
}

/// A plain, mandatorily non-blocking TCP transport.
pub struct TcpTransport {
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self { stream: None }
    }

    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        stream
            .set_nonblocking(true)
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(Self { stream: Some(stream) })
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl ByteTransport for TcpTransport {
    fn connect(&mut self, addr: SocketAddr) -> Result<()> {
        if self.stream.is_some() {
            return Err(Error::AlreadyConnected);
        }
        let stream = TcpStream::connect(addr).map_err(|e| Error::Transport(e.to_string()))?;
        stream
            .set_nonblocking(true)
            .map_err(|e| Error::Transport(e.to_string()))?;
        self.stream = Some(stream);
        Ok(())
    }

    fn read_some(&mut self, buf: &mut [u8]) -> io::Result<IoOutcome> {
        use std::io::Read;
        let Some(stream) = self.stream.as_mut() else {
            return Ok(IoOutcome::Eof);
        };
        match stream.read(buf) {
            Ok(0) => Ok(IoOutcome::Eof),
            Ok(n) => Ok(IoOutcome::Progress(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(IoOutcome::WouldBlock),
            Err(e) => Err(e),
        }
    }

    fn write_some(&mut self, buf: &[u8]) -> io::Result<IoOutcome> {
        use std::io::Write;
        let Some(stream) = self.stream.as_mut() else {
            return Ok(IoOutcome::Eof);
        };
        match stream.write(buf) {
            Ok(0) => Ok(IoOutcome::Eof),
            Ok(n) => Ok(IoOutcome::Progress(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(IoOutcome::WouldBlock),
            Err(e) => Err(e),
        }
    }

    fn shutdown(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}
