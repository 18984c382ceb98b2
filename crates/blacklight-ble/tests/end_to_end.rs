//! End-to-end coverage over real loopback TCP sockets: handshake symmetry,
//! record round-trips, key pinning, executor-driven async handshake, and the
//! facade's state gating.

use std::net::{TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use std::thread;

use blacklight_ble::context::Context;
use blacklight_ble::error::Error;
use blacklight_ble::executor::Executor;
use blacklight_ble::socket::{BleSocket, HandshakeState};
use blacklight_ble::transport::TcpTransport;

fn loopback_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
    let addr = listener.local_addr().unwrap();
    let client = thread::spawn(move || TcpStream::connect(addr).expect("client connect"));
    let (server, _) = listener.accept().expect("accept");
    (server, client.join().unwrap())
}

fn handshaken_pair() -> (BleSocket, BleSocket) {
    let (server_stream, client_stream) = loopback_pair();

    let server_ctx = Arc::new(Context::new());
    let client_ctx = Arc::new(Context::new());

    let mut server = BleSocket::server_from_transport(
        server_ctx,
        Box::new(TcpTransport::from_stream(server_stream).unwrap()),
    );
    let server_thread = thread::spawn(move || {
        server.handshake().expect("server handshake");
        server
    });

    let mut client = BleSocket::client_from_transport(
        client_ctx,
        Box::new(TcpTransport::from_stream(client_stream).unwrap()),
    );
    client.handshake().expect("client handshake");

    let server = server_thread.join().unwrap();
    (client, server)
}

#[test]
fn handshake_completes_symmetrically_on_both_sides() {
    let (client, server) = handshaken_pair();
    assert_eq!(client.state(), HandshakeState::Complete);
    assert_eq!(server.state(), HandshakeState::Complete);
    assert!(client.is_connected());
    assert!(server.is_connected());
}

#[test]
fn a_single_record_round_trips_exactly() {
    let (mut client, mut server) = handshaken_pair();

    client.write(b"the quick brown fox").unwrap();
    let mut buf = [0u8; 19];
    let n = server.read(&mut buf).unwrap();
    assert_eq!(n, 19);
    assert_eq!(&buf, b"the quick brown fox");
}

#[test]
fn a_large_write_survives_being_read_back_in_small_chunks() {
    let (mut client, mut server) = handshaken_pair();

    let payload = vec![0x5Au8; 32 * 1024];
    client.write(&payload).unwrap();

    let mut collected = Vec::new();
    while collected.len() < payload.len() {
        let mut chunk = [0u8; 777];
        let n = server.read(&mut chunk).unwrap();
        if n == 0 {
            break;
        }
        collected.extend_from_slice(&chunk[..n]);
    }

    assert_eq!(collected, payload);
}

#[test]
fn every_record_uses_a_fresh_iv_across_many_writes() {
    let (mut client, mut server) = handshaken_pair();

    for i in 0..50u32 {
        let msg = format!("message {i}");
        client.write(msg.as_bytes()).unwrap();
        let mut buf = vec![0u8; msg.len()];
        server.read(&mut buf).unwrap();
        assert_eq!(buf, msg.as_bytes());
    }
}

#[test]
fn traffic_flows_in_both_directions_after_handshake() {
    let (mut client, mut server) = handshaken_pair();

    client.write(b"ping").unwrap();
    let mut buf = [0u8; 4];
    server.read(&mut buf).unwrap();
    assert_eq!(&buf, b"ping");

    server.write(b"pong").unwrap();
    let mut buf = [0u8; 4];
    client.read(&mut buf).unwrap();
    assert_eq!(&buf, b"pong");
}

#[test]
fn pinning_the_actual_peer_key_lets_the_handshake_proceed() {
    let (server_stream, client_stream) = loopback_pair();

    let server_ctx = Arc::new(Context::new());
    let mut rng = blacklight_ble::rng::SecureRng::new();
    let keypair = blacklight_ble::crypto::rsa::generate_keypair(&mut rng).unwrap();
    server_ctx.use_key_pair(keypair.private.clone(), keypair.public.clone());

    let client_ctx = Arc::new(Context::new());
    client_ctx.pin_key(keypair.public.clone());

    let mut server = BleSocket::server_from_transport(
        server_ctx,
        Box::new(TcpTransport::from_stream(server_stream).unwrap()),
    );
    let server_thread = thread::spawn(move || server.handshake().map(|_| server.state()));

    let mut client = BleSocket::client_from_transport(
        client_ctx,
        Box::new(TcpTransport::from_stream(client_stream).unwrap()),
    );
    client.handshake().expect("client handshake against pinned key");

    assert!(server_thread.join().unwrap().is_ok());
    assert_eq!(client.state(), HandshakeState::Complete);
}

#[test]
fn pinning_a_different_key_than_the_peer_presents_fails_the_handshake() {
    let (server_stream, client_stream) = loopback_pair();

    let server_ctx = Arc::new(Context::new());
    let client_ctx = Arc::new(Context::new());

    let mut rng = blacklight_ble::rng::SecureRng::new();
    let wrong_keypair = blacklight_ble::crypto::rsa::generate_keypair(&mut rng).unwrap();
    client_ctx.pin_key(wrong_keypair.public);

    let mut server = BleSocket::server_from_transport(
        server_ctx,
        Box::new(TcpTransport::from_stream(server_stream).unwrap()),
    );
    let server_thread = thread::spawn(move || {
        // The server's own handshake will fail too once the client drops the
        // connection without completing stage 2.
        let _ = server.handshake();
    });

    let mut client = BleSocket::client_from_transport(
        client_ctx,
        Box::new(TcpTransport::from_stream(client_stream).unwrap()),
    );
    let result = client.handshake();
    assert!(matches!(result, Err(Error::Handshake(_))));
    assert_eq!(client.state(), HandshakeState::Failed);

    // Drop the client's stream so the server's blocked read unblocks with an
    // error instead of waiting forever for a stage-2 message that will never
    // come.
    drop(client);
    let _ = server_thread.join();
}

#[test]
fn reading_or_writing_before_a_handshake_is_not_connected() {
    let mut client = BleSocket::client(Arc::new(Context::new()));
    assert!(matches!(client.write_some(b"too early"), Err(Error::NotConnected)));
    let mut buf = [0u8; 4];
    assert!(matches!(client.read_some(&mut buf), Err(Error::NotConnected)));
}

#[test]
fn handshake_cannot_be_run_twice() {
    let (mut client, _server) = handshaken_pair();
    assert!(matches!(client.handshake(), Err(Error::AlreadyConnected)));
}

#[test]
fn stop_resets_the_socket_to_idle_and_blocks_further_io() {
    let (mut client, _server) = handshaken_pair();
    client.stop();
    assert_eq!(client.state(), HandshakeState::Idle);
    assert!(!client.is_connected());
    assert!(matches!(client.write_some(b"x"), Err(Error::NotConnected)));
}

#[test]
fn async_handshake_completes_via_the_executor() {
    let (server_stream, client_stream) = loopback_pair();

    let server_executor = Arc::new(Executor::new());
    let client_executor = Arc::new(Executor::new());

    let server_socket = Arc::new(Mutex::new(BleSocket::server_from_transport(
        Arc::new(Context::new()),
        Box::new(TcpTransport::from_stream(server_stream).unwrap()),
    )));
    let client_socket = Arc::new(Mutex::new(BleSocket::client_from_transport(
        Arc::new(Context::new()),
        Box::new(TcpTransport::from_stream(client_stream).unwrap()),
    )));

    let (server_done_tx, server_done_rx) = std::sync::mpsc::channel();
    let (client_done_tx, client_done_rx) = std::sync::mpsc::channel();

    BleSocket::async_handshake(Arc::clone(&server_socket), Arc::clone(&server_executor), move |r| {
        server_done_tx.send(r).unwrap();
    });
    BleSocket::async_handshake(Arc::clone(&client_socket), Arc::clone(&client_executor), move |r| {
        client_done_tx.send(r).unwrap();
    });

    let server_runner = {
        let executor = Arc::clone(&server_executor);
        thread::spawn(move || executor.run())
    };
    let client_runner = {
        let executor = Arc::clone(&client_executor);
        thread::spawn(move || executor.run())
    };

    server_done_rx.recv().unwrap().expect("server async handshake");
    client_done_rx.recv().unwrap().expect("client async handshake");

    server_runner.join().unwrap();
    client_runner.join().unwrap();

    assert_eq!(server_socket.lock().unwrap().state(), HandshakeState::Complete);
    assert_eq!(client_socket.lock().unwrap().state(), HandshakeState::Complete);
}
