//! C9: the public socket facade, gating I/O on handshake state.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use tracing::{debug, error, info};

use crate::context::Context;
use crate::crypto::aes_gcm::AesGcmEngine;
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::framing::RecordFramer;
use crate::handshake::{Action, HandshakeMachine, Role, Step};
use crate::rng::{FastRng, SecureRng};
use crate::transport::{read_exact, write_all, ByteTransport, IoOutcome, TcpTransport};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum HandshakeState {
    Idle,
    InProgress,
    Complete,
    Failed,
}

/// A BLE-secured TCP socket. Every I/O operation is exposed in three
/// shapes: blocking-with-failure-return, blocking-with-out-parameter, and
/// async-with-completion-callback.
pub struct BleSocket {
    role: Role,
    transport: Box<dyn ByteTransport>,
    context: Arc<Context>,
    state: HandshakeState,
    engine: Option<AesGcmEngine>,
    framer: RecordFramer,
    fast_rng: FastRng,
    secure_rng: SecureRng,
}

impl BleSocket {
    fn with_role(role: Role, context: Arc<Context>, transport: Box<dyn ByteTransport>) -> Self {
        Self {
            role,
            transport,
            context,
            state: HandshakeState::Idle,
            engine: None,
            framer: RecordFramer::new(),
            fast_rng: FastRng::seed_from_time(),
            secure_rng: SecureRng::new(),
        }
    }

    pub fn client(context: Arc<Context>) -> Self {
        Self::with_role(Role::Client, context, Box::new(TcpTransport::new()))
    }

    /// A client-role socket over an already-connected transport (e.g. one
    /// side of an in-process loopback pair used for testing).
    pub fn client_from_transport(context: Arc<Context>, transport: Box<dyn ByteTransport>) -> Self {
        Self::with_role(Role::Client, context, transport)
    }

    pub fn server_from_transport(context: Arc<Context>, transport: Box<dyn ByteTransport>) -> Self {
        Self::with_role(Role::Server, context, transport)
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
            && matches!(self.state, HandshakeState::Complete | HandshakeState::InProgress)
    }

    // --- connect ---

    pub fn connect(&mut self, addr: SocketAddr) -> Result<()> {
        if self.state != HandshakeState::Idle {
            return Err(Error::AlreadyConnected);
        }
        self.transport.connect(addr)
    }

    pub fn connect_ec(&mut self, addr: SocketAddr, ec: &mut Option<Error>) {
        if let Err(e) = self.connect(addr) {
            *ec = Some(e);
        }
    }

    // --- blocking handshake ---

    pub fn handshake(&mut self) -> Result<()> {
        if self.state != HandshakeState::Idle {
            return Err(Error::AlreadyConnected);
        }
        if !self.transport.is_connected() {
            return Err(Error::NotConnected);
        }

        self.state = HandshakeState::InProgress;
        match self.run_handshake_blocking() {
            Ok(engine) => {
                self.engine = Some(engine);
                self.framer = RecordFramer::new();
                self.state = HandshakeState::Complete;
                info!(role = ?self.role, "BLE handshake complete");
                Ok(())
            }
            Err(e) => {
                self.state = HandshakeState::Failed;
                error!(role = ?self.role, error = %e, "BLE handshake failed");
                Err(Error::Handshake(e.to_string()))
            }
        }
    }

    pub fn handshake_ec(&mut self, ec: &mut Option<Error>) {
        if let Err(e) = self.handshake() {
            *ec = Some(e);
        }
    }

    fn run_handshake_blocking(&mut self) -> Result<AesGcmEngine> {
        let mut machine = HandshakeMachine::new(self.role);
        let mut action = machine.start();
        loop {
            action = match action {
                Action::Read(n) => {
                    let mut buf = vec![0u8; n];
                    read_exact(self.transport.as_mut(), &mut buf)?;
                    match machine.step(&self.context, &mut self.secure_rng, &mut self.fast_rng, Some(&buf))? {
                        Step::Continue(next) => next,
                        Step::Complete(engine) => return Ok(engine),
                    }
                }
                Action::Write(bytes) => {
                    write_all(self.transport.as_mut(), &bytes)?;
                    match machine.step(&self.context, &mut self.secure_rng, &mut self.fast_rng, None)? {
                        Step::Continue(next) => next,
                        Step::Complete(engine) => return Ok(engine),
                    }
                }
            };
        }
    }

    // --- async handshake ---

    /// Runs the handshake on `executor`'s job queue. The same
    /// [`HandshakeMachine::step`] drives this path as the blocking one;
    /// only the I/O pump differs, re-enqueuing itself whenever the
    /// non-blocking transport would block.
    pub fn async_handshake(
        socket: Arc<Mutex<Self>>,
        executor: Arc<Executor>,
        callback: impl FnOnce(Result<()>) + Send + 'static,
    ) {
        let role;
        {
            let mut guard = socket.lock().unwrap();
            if guard.state != HandshakeState::Idle {
                drop(guard);
                callback(Err(Error::AlreadyConnected));
                return;
            }
            if !guard.transport.is_connected() {
                drop(guard);
                callback(Err(Error::NotConnected));
                return;
            }
            guard.state = HandshakeState::InProgress;
            role = guard.role;
        }

        executor.notify_expect_work();
        let machine = HandshakeMachine::new(role);
        let action = machine.start();
        Self::dispatch_action(socket, executor, machine, action, Box::new(callback));
    }

    fn dispatch_action(
        socket: Arc<Mutex<Self>>,
        executor: Arc<Executor>,
        machine: HandshakeMachine,
        action: Action,
        callback: Box<dyn FnOnce(Result<()>) + Send>,
    ) {
        match action {
            Action::Read(n) => {
                Self::pump_read(socket, executor, machine, vec![0u8; n], 0, callback)
            }
            Action::Write(bytes) => Self::pump_write(socket, executor, machine, bytes, 0, callback),
        }
    }

    fn pump_read(
        socket: Arc<Mutex<Self>>,
        executor: Arc<Executor>,
        mut machine: HandshakeMachine,
        mut buf: Vec<u8>,
        filled: usize,
        callback: Box<dyn FnOnce(Result<()>) + Send>,
    ) {
        let outcome = socket.lock().unwrap().transport.read_some(&mut buf[filled..]);
        match outcome {
            Ok(IoOutcome::Progress(n)) if filled + n == buf.len() => {
                Self::advance(socket, executor, machine, Some(buf), callback)
            }
            Ok(IoOutcome::Progress(n)) => {
                let filled = filled + n;
                let socket2 = Arc::clone(&socket);
                let executor2 = Arc::clone(&executor);
                executor.queue_job(move || {
                    Self::pump_read(socket2, executor2, machine, buf, filled, callback)
                });
            }
            Ok(IoOutcome::WouldBlock) => {
                let socket2 = Arc::clone(&socket);
                let executor2 = Arc::clone(&executor);
                executor.queue_job(move || {
                    Self::pump_read(socket2, executor2, machine, buf, filled, callback)
                });
            }
            Ok(IoOutcome::Eof) => Self::fail(
                socket,
                executor,
                &mut machine,
                callback,
                Error::Handshake("transport closed mid-handshake".into()),
            ),
            Err(e) => Self::fail(
                socket,
                executor,
                &mut machine,
                callback,
                Error::Handshake(e.to_string()),
            ),
        }
    }

    fn pump_write(
        socket: Arc<Mutex<Self>>,
        executor: Arc<Executor>,
        mut machine: HandshakeMachine,
        bytes: Vec<u8>,
        sent: usize,
        callback: Box<dyn FnOnce(Result<()>) + Send>,
    ) {
        let outcome = socket.lock().unwrap().transport.write_some(&bytes[sent..]);
        match outcome {
            Ok(IoOutcome::Progress(n)) if sent + n == bytes.len() => {
                Self::advance(socket, executor, machine, None, callback)
            }
            Ok(IoOutcome::Progress(n)) => {
                let sent = sent + n;
                let socket2 = Arc::clone(&socket);
                let executor2 = Arc::clone(&executor);
                executor.queue_job(move || {
                    Self::pump_write(socket2, executor2, machine, bytes, sent, callback)
                });
            }
            Ok(IoOutcome::WouldBlock) => {
                let socket2 = Arc::clone(&socket);
                let executor2 = Arc::clone(&executor);
                executor.queue_job(move || {
                    Self::pump_write(socket2, executor2, machine, bytes, sent, callback)
                });
            }
            Ok(IoOutcome::Eof) => Self::fail(
                socket,
                executor,
                &mut machine,
                callback,
                Error::Handshake("transport closed mid-handshake".into()),
            ),
            Err(e) => Self::fail(
                socket,
                executor,
                &mut machine,
                callback,
                Error::Handshake(e.to_string()),
            ),
        }
    }

    /// `completed` is `Some(bytes)` after a finished read, `None` after a
    /// finished write; advances the state machine and dispatches whatever
    /// action comes next.
    fn advance(
        socket: Arc<Mutex<Self>>,
        executor: Arc<Executor>,
        mut machine: HandshakeMachine,
        completed: Option<Vec<u8>>,
        callback: Box<dyn FnOnce(Result<()>) + Send>,
    ) {
        let step_result = {
            let mut guard = socket.lock().unwrap();
            machine.step(
                &guard.context.clone(),
                &mut guard.secure_rng,
                &mut guard.fast_rng,
                completed.as_deref(),
            )
        };
        match step_result {
            Ok(Step::Continue(next)) => Self::dispatch_action(socket, executor, machine, next, callback),
            Ok(Step::Complete(engine)) => {
                let mut guard = socket.lock().unwrap();
                guard.engine = Some(engine);
                guard.framer = RecordFramer::new();
                guard.state = HandshakeState::Complete;
                drop(guard);
                executor.notify_finished_work();
                debug!("async BLE handshake complete");
                callback(Ok(()));
            }
            Err(e) => Self::fail(socket, executor, &mut machine, callback, e),
        }
    }

    fn fail(
        socket: Arc<Mutex<Self>>,
        executor: Arc<Executor>,
        _machine: &mut HandshakeMachine,
        callback: Box<dyn FnOnce(Result<()>) + Send>,
        err: Error,
    ) {
        socket.lock().unwrap().state = HandshakeState::Failed;
        executor.notify_finished_work();
        error!(error = %err, "async BLE handshake failed");
        callback(Err(Error::Handshake(err.to_string())));
    }

    // --- read / write ---

    pub fn read_some(&mut self, buf: &mut [u8]) -> Result<usize> {
        match self.state {
            HandshakeState::Idle | HandshakeState::Failed => Err(Error::NotConnected),
            HandshakeState::InProgress => match self.transport.read_some(buf) {
                Ok(IoOutcome::Progress(n)) => Ok(n),
                Ok(IoOutcome::WouldBlock) => Ok(0),
                Ok(IoOutcome::Eof) => Err(Error::Transport("peer closed the connection".into())),
                Err(e) => Err(Error::Transport(e.to_string())),
            },
            HandshakeState::Complete => {
                let engine = self.engine.as_mut().expect("engine present once handshake is complete");
                self.framer.read_some(engine, self.transport.as_mut(), buf)
            }
        }
    }

    pub fn read_some_ec(&mut self, buf: &mut [u8], ec: &mut Option<Error>) -> usize {
        match self.read_some(buf) {
            Ok(n) => n,
            Err(e) => {
                *ec = Some(e);
                0
            }
        }
    }

    /// Fills `buf` completely, looping `read_some` as needed.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.read_some(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    pub fn read_ec(&mut self, buf: &mut [u8], ec: &mut Option<Error>) -> usize {
        match self.read(buf) {
            Ok(n) => n,
            Err(e) => {
                *ec = Some(e);
                0
            }
        }
    }

    pub fn write_some(&mut self, buf: &[u8]) -> Result<usize> {
        match self.state {
            HandshakeState::Idle | HandshakeState::Failed => Err(Error::NotConnected),
            HandshakeState::InProgress => match self.transport.write_some(buf) {
                Ok(IoOutcome::Progress(n)) => Ok(n),
                Ok(IoOutcome::WouldBlock) => Ok(0),
                Ok(IoOutcome::Eof) => Err(Error::Transport("peer closed the connection".into())),
                Err(e) => Err(Error::Transport(e.to_string())),
            },
            HandshakeState::Complete => {
                let engine = self.engine.as_mut().expect("engine present once handshake is complete");
                self.framer
                    .write_some(engine, &mut self.fast_rng, self.transport.as_mut(), buf)
            }
        }
    }

    pub fn write_some_ec(&mut self, buf: &[u8], ec: &mut Option<Error>) -> usize {
        match self.write_some(buf) {
            Ok(n) => n,
            Err(e) => {
                *ec = Some(e);
                0
            }
        }
    }

    /// Sends `buf` in full, looping `write_some` as needed. While
    /// `COMPLETE`, a single `write_some` call always frames the whole
    /// buffer as one record, but while `IN_PROGRESS` (raw passthrough)
    /// `write_some` forwards straight to the non-blocking transport and can
    /// return a partial count, so this loops to give `write` the same
    /// fill-the-whole-buffer contract as `read`.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let mut sent = 0;
        while sent < buf.len() {
            let n = self.write_some(&buf[sent..])?;
            if n == 0 {
                break;
            }
            sent += n;
        }
        Ok(sent)
    }

    pub fn write_ec(&mut self, buf: &[u8], ec: &mut Option<Error>) -> usize {
        self.write_some_ec(buf, ec)
    }

    // --- stop ---

    pub fn stop(&mut self) {
        self.transport.shutdown();
        self.state = HandshakeState::Idle;
        self.engine = None;
        self.framer = RecordFramer::new();
    }
}
