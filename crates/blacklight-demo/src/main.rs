//! A small command-line demo driving [`blacklight_ble::BleSocket`]: `serve`
//! accepts connections and echoes decrypted records back, `connect` dials a
//! server, completes the handshake, and sends one message.

mod config;

use std::io::Write as _;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use blacklight_ble::context::Context;
use blacklight_ble::socket::BleSocket;
use blacklight_ble::transport::TcpTransport;

use config::DemoConfig;

#[derive(Parser)]
#[command(name = "blacklight-demo")]
#[command(about = "Exercise a BLE-secured TCP connection", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an echo server: accept connections, handshake, echo back
    /// whatever is decrypted.
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// Connect to a server, handshake, and send one message.
    Connect {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long, default_value = "hello from blacklight-demo")]
        message: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let config = DemoConfig::load().unwrap_or_default();

    match cli.command {
        Commands::Serve { port } => serve(port.unwrap_or(config.server.port)),
        Commands::Connect { host, port, message } => connect(
            host.unwrap_or(config.server.ip),
            port.unwrap_or(config.server.port),
            &message,
        ),
    }
}

fn serve(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).with_context(|| format!("binding {addr}"))?;
    info!("blacklight-demo listening on {addr}");

    let ctx = Arc::new(Context::new());

    for incoming in listener.incoming() {
        let stream = match incoming {
            Ok(stream) => stream,
            Err(e) => {
                error!("failed to accept connection: {e}");
                continue;
            }
        };
        let peer = stream.peer_addr().ok();
        let ctx = Arc::clone(&ctx);
        std::thread::spawn(move || {
            if let Err(e) = handle_client(stream, ctx) {
                error!(?peer, error = %e, "client session ended with an error");
            }
        });
    }

    Ok(())
}

fn handle_client(stream: TcpStream, ctx: Arc<Context>) -> Result<()> {
    let transport = TcpTransport::from_stream(stream)?;
    let mut socket = BleSocket::server_from_transport(ctx, Box::new(transport));

    socket.handshake()?;
    info!("handshake complete, echoing records");

    let mut buf = [0u8; 4096];
    loop {
        let n = match socket.read_some(&mut buf) {
            Ok(0) => continue,
            Ok(n) => n,
            Err(e) => {
                info!("session closed: {e}");
                break;
            }
        };
        socket.write(&buf[..n])?;
    }

    Ok(())
}

fn connect(host: String, port: u16, message: &str) -> Result<()> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .with_context(|| format!("parsing address {host}:{port}"))?;

    let ctx = Arc::new(Context::new());
    let mut socket = BleSocket::client(ctx);
    socket.connect(addr)?;
    socket.handshake()?;
    info!("handshake complete");

    socket.write(message.as_bytes())?;

    let mut reply = vec![0u8; message.len()];
    socket.read(&mut reply)?;

    std::io::stdout().write_all(&reply)?;
    println!();

    socket.stop();
    Ok(())
}
