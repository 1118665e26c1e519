//! triplog monitor: polls a vehicle through an ELM327-compatible adapter
//! over TCP and logs the decoded measurement stream.
//!
//! Architecture:
//! - The engine owns request rotation and pacing; this binary owns the
//!   socket: a reconnect loop attaches the stream to the [`TcpTransport`]
//!   and pipes inbound bytes into `handle_notification`
//! - A consumer thread drains the measurement queue (the trip-tracking
//!   collaborator's seat)
//!
//! Works against a WiFi OBD-II dongle or `triplog-mock-elm327` for bench
//! testing.

mod config;

use anyhow::{Context, Result};
use clap::Parser;
use config::MonitorConfig;
use log::{debug, error, info, warn};
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use triplog_obd_lib::{EngineConfig, ObdEngine, Pid, Transport, TransportError};

const RECONNECT_DELAY: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(name = "triplog-monitor")]
#[command(about = "Log OBD-II measurements from an ELM327-compatible adapter")]
struct Args {
    /// Adapter address to connect to (overrides the config file)
    #[arg(short, long)]
    address: Option<String>,

    /// Path to a JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Parameter names to monitor (overrides the config file)
    #[arg(short, long)]
    pids: Vec<String>,

    /// Most parameters per poll request
    #[arg(long)]
    chunk_size: Option<usize>,
}

/// TCP implementation of the engine's transport seam. The stream slot is
/// swapped by the reconnect loop; writes while detached are reported as
/// `NotConnected` and dropped by the engine.
struct TcpTransport {
    stream: Mutex<Option<TcpStream>>,
}

impl TcpTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            stream: Mutex::new(None),
        })
    }

    fn attach(&self, stream: TcpStream) {
        *self.stream.lock().unwrap() = Some(stream);
    }

    fn detach(&self) {
        *self.stream.lock().unwrap() = None;
    }
}

impl Transport for TcpTransport {
    fn write(&self, line: &str) -> Result<(), TransportError> {
        let guard = self.stream.lock().unwrap();
        let Some(stream) = guard.as_ref() else {
            return Err(TransportError::NotConnected);
        };
        let mut stream = stream;
        stream
            .write_all(line.as_bytes())
            .map_err(|e| TransportError::Io(e.to_string()))
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = MonitorConfig::load(args.config.as_deref())?;
    if let Some(address) = args.address {
        config.address = address;
    }
    if !args.pids.is_empty() {
        config.pids = args.pids.clone();
    }
    if let Some(chunk_size) = args.chunk_size {
        config.chunk_size = chunk_size;
    }
    let pids: Vec<Pid> = config.resolve_pids()?;
    info!(
        "monitoring {} parameters via {}",
        pids.len(),
        config.address
    );

    let transport = TcpTransport::new();
    let engine = ObdEngine::with_config(
        Arc::clone(&transport) as Arc<dyn Transport>,
        &pids,
        EngineConfig {
            chunk_size: config.chunk_size,
            ..EngineConfig::default()
        },
    );

    // The trip-tracking collaborator's seat: consume measurements in
    // emission order.
    let measurements = engine.measurements();
    thread::Builder::new()
        .name("measurements".into())
        .spawn(move || loop {
            match measurements.dequeue() {
                Some(measured) => info!("{measured}"),
                None => {
                    if measurements.is_closed() {
                        break;
                    }
                }
            }
        })
        .context("spawning measurement consumer")?;

    // Reconnect loop: the engine survives link drops, the socket does not.
    loop {
        match TcpStream::connect(&config.address) {
            Ok(stream) => {
                info!("connected to adapter at {}", config.address);
                let reader = stream.try_clone().context("cloning adapter stream")?;
                transport.attach(stream);
                engine.on_connected();

                if let Err(e) = pump_notifications(reader, &engine) {
                    warn!("adapter link lost: {e}");
                }

                transport.detach();
                engine.on_disconnected();
            }
            Err(e) => {
                error!("connect to {} failed: {e}", config.address);
            }
        }
        thread::sleep(RECONNECT_DELAY);
    }
}

/// Read the adapter stream, accumulating until the `>` prompt marks a
/// complete response, and feed each response to the engine.
fn pump_notifications(mut stream: TcpStream, engine: &ObdEngine) -> std::io::Result<()> {
    let mut chunk = [0u8; 256];
    let mut pending: Vec<u8> = Vec::with_capacity(256);

    loop {
        match stream.read(&mut chunk) {
            Ok(0) => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "adapter closed the connection",
                ));
            }
            Ok(read) => {
                pending.extend_from_slice(&chunk[..read]);
                if pending.contains(&b'>') {
                    debug!("notification: {:?}", String::from_utf8_lossy(&pending));
                    engine.handle_notification(&pending);
                    pending.clear();
                }
            }
            Err(e) => return Err(e),
        }
    }
}
