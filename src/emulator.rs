//! Sensor Node Emulator
//!
//! Speaks the node side of the wire protocol: reads one command line, answers
//! with one `TEMP:..|HUM:..|HR:..|SPO2:..` line and closes. Responses are
//! either a fixed sample or randomly generated around physiological ranges.
//! A muted emulator accepts connections but never answers, which makes the
//! prober hit its exchange timeout.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rand::Rng;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::telemetry::wire::{encode_sample, Sample};

/// Reply for commands the node does not understand
pub const UNKNOWN_COMMAND_REPLY: &str = "ERR:UNKNOWN_COMMAND\n";

/// How the emulator builds its reply
#[derive(Debug, Clone)]
pub enum ResponseMode {
    Fixed(Sample),
    /// Raw bytes sent verbatim
    Raw(Vec<u8>),
    Random,
}

struct EmulatorShared {
    command: String,
    mode: RwLock<ResponseMode>,
    muted: AtomicBool,
    served: AtomicU64,
}

/// Cheap cloneable control surface for a running emulator
#[derive(Clone)]
pub struct EmulatorHandle {
    shared: Arc<EmulatorShared>,
    local_addr: SocketAddr,
}

impl EmulatorHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn set_response(&self, sample: Sample) {
        *self.shared.mode.write() = ResponseMode::Fixed(sample);
    }

    pub fn set_raw_response(&self, raw: impl Into<Vec<u8>>) {
        *self.shared.mode.write() = ResponseMode::Raw(raw.into());
    }

    pub fn set_random(&self) {
        *self.shared.mode.write() = ResponseMode::Random;
    }

    pub fn mute(&self, muted: bool) {
        self.shared.muted.store(muted, Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.shared.muted.load(Ordering::Relaxed)
    }

    /// Replies sent so far
    pub fn served(&self) -> u64 {
        self.shared.served.load(Ordering::Relaxed)
    }
}

pub struct SensorEmulator {
    listener: TcpListener,
    handle: EmulatorHandle,
}

impl SensorEmulator {
    pub async fn bind(addr: SocketAddr, command: &str, mode: ResponseMode) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let shared = Arc::new(EmulatorShared {
            command: command.trim().to_string(),
            mode: RwLock::new(mode),
            muted: AtomicBool::new(false),
            served: AtomicU64::new(0),
        });
        Ok(Self {
            listener,
            handle: EmulatorHandle { shared, local_addr },
        })
    }

    pub fn handle(&self) -> EmulatorHandle {
        self.handle.clone()
    }

    /// Run the accept loop on a background task
    pub fn spawn(self) -> (EmulatorHandle, JoinHandle<()>) {
        let handle = self.handle();
        (handle, tokio::spawn(self.run()))
    }

    pub async fn run(self) {
        info!("Sensor emulator listening on {}", self.handle.local_addr);
        loop {
            match self.listener.accept().await {
                Ok((socket, peer)) => {
                    let shared = self.handle.shared.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve_connection(socket, &shared).await {
                            debug!("Emulator connection from {} ended: {}", peer, e);
                        }
                    });
                }
                Err(e) => {
                    warn!("Emulator accept failed: {}", e);
                }
            }
        }
    }
}

async fn serve_connection(socket: TcpStream, shared: &EmulatorShared) -> std::io::Result<()> {
    let mut reader = BufReader::new(socket);
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 {
        return Ok(());
    }

    if shared.muted.load(Ordering::Relaxed) {
        // hold the connection until the client gives up
        let mut sink = Vec::new();
        reader.read_to_end(&mut sink).await?;
        return Ok(());
    }

    let reply = if line.trim() == shared.command {
        match &*shared.mode.read() {
            ResponseMode::Fixed(sample) => encode_sample(sample).into_bytes(),
            ResponseMode::Raw(raw) => raw.clone(),
            ResponseMode::Random => encode_sample(&random_sample()).into_bytes(),
        }
    } else {
        UNKNOWN_COMMAND_REPLY.as_bytes().to_vec()
    };

    let mut socket = reader.into_inner();
    socket.write_all(&reply).await?;
    socket.shutdown().await?;
    shared.served.fetch_add(1, Ordering::Relaxed);
    Ok(())
}

/// Plausible resting readings with occasional excursions past the alert thresholds
pub fn random_sample() -> Sample {
    let mut rng = rand::thread_rng();
    Sample::new(
        rng.gen_range(35.5..39.0),
        rng.gen_range(35.0..90.0),
        rng.gen_range(55.0..130.0),
        rng.gen_range(92.0..100.0),
    )
}
