//! Client for a virtual-lab simulator bridge.
//!
//! The bridge is a separate process that owns the actual hardware simulation.
//! [`VlabClient`] connects to it over TCP and implements
//! [`DeviceSimulator`] on top of a line-based JSON protocol:
//!
//! - Each message is a single line of JSON followed by a newline
//! - The client sends one [`VlabRequest`] and reads exactly one [`VlabResponse`]
//! - Messages carry a `type` tag (`{"type":"run_for","ms":600}`)
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use shadowprobe_core::simulator::{DeviceSimulator, FirmwareImage};
//! use shadowprobe_core::vlab::VlabClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut vlab = VlabClient::new("127.0.0.1:7400".parse()?);
//! vlab.connect().await?;
//! vlab.load(&FirmwareImage::new("build/fw.bin", "board")).await?;
//! vlab.start().await?;
//! vlab.run_for(Duration::from_millis(500)).await?;
//! vlab.on("BUTTON1").await?;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, debug_span, trace, Instrument};

use crate::simulator::{DeviceSimulator, FirmwareImage, Level, SimulatorError};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Timeout for establishing a TCP connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Base timeout for reading a response line. `run_for` adds the requested
/// simulated time on top of this.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Protocol
// ---------------------------------------------------------------------------

/// Requests sent from the harness to the simulator bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VlabRequest {
    /// Liveness probe.
    Ping,
    /// Load a firmware image from `firmware`, running in `working_dir`.
    Load {
        /// Path to the firmware binary.
        firmware: PathBuf,
        /// Working directory of the simulation.
        working_dir: PathBuf,
    },
    /// Start executing the loaded firmware.
    Start,
    /// Drive a digital input line.
    SetInput {
        /// Input line name.
        line: String,
        /// Target level.
        level: Level,
    },
    /// Advance simulated time.
    RunFor {
        /// Milliseconds of simulated time.
        ms: u64,
    },
    /// Drain buffered UART output.
    ReadUart,
    /// Stop the simulation.
    Stop,
}

/// Responses sent from the simulator bridge to the harness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VlabResponse {
    /// The request completed.
    Ok,
    /// UART output drained by [`VlabRequest::ReadUart`].
    Uart {
        /// Serial output, possibly empty.
        data: String,
    },
    /// The request failed.
    Error {
        /// Description of the failure.
        message: String,
    },
}

/// Encodes a message as one JSON line.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

struct Connection {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// TCP client implementing [`DeviceSimulator`] against a virtual-lab bridge.
pub struct VlabClient {
    addr: SocketAddr,
    connection: Option<Connection>,
    running: bool,
}

impl VlabClient {
    /// Creates a disconnected client for the bridge at `addr`.
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connection: None,
            running: false,
        }
    }

    /// The bridge address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Drops the connection without sending `Stop`.
    pub fn disconnect(&mut self) {
        self.connection = None;
        self.running = false;
    }

    /// Sends a liveness probe.
    pub async fn ping(&mut self) -> Result<(), SimulatorError> {
        self.expect_ok(VlabRequest::Ping, READ_TIMEOUT).await
    }

    /// Sends one request and waits up to `read_timeout` for its response.
    pub async fn send(
        &mut self,
        request: &VlabRequest,
        read_timeout: Duration,
    ) -> Result<VlabResponse, SimulatorError> {
        let span = debug_span!("vlab_send", addr = %self.addr);
        async {
            let conn = self.connection.as_mut().ok_or(SimulatorError::NotConnected)?;
            let line = encode_line(request)?;
            trace!(request = line.trim_end(), "sending");
            conn.writer.write_all(line.as_bytes()).await?;
            conn.writer.flush().await?;

            let mut buf = String::new();
            let read = timeout(read_timeout, conn.reader.read_line(&mut buf)).await;
            match read {
                Ok(Ok(0)) => {
                    self.disconnect();
                    Err(SimulatorError::ConnectionLost(
                        "bridge closed the connection".to_string(),
                    ))
                }
                Ok(Ok(_)) => match serde_json::from_str::<VlabResponse>(buf.trim_end()) {
                    Ok(response) => {
                        trace!(?response, "received");
                        Ok(response)
                    }
                    Err(e) => {
                        // A half-read or garbage line leaves the stream unusable.
                        self.disconnect();
                        Err(SimulatorError::Json(e))
                    }
                },
                Ok(Err(e)) => {
                    self.disconnect();
                    Err(SimulatorError::ConnectionLost(e.to_string()))
                }
                Err(_) => {
                    // The bridge may still answer later, which would pair the
                    // late response with the next request.
                    self.disconnect();
                    Err(SimulatorError::Timeout)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn expect_ok(
        &mut self,
        request: VlabRequest,
        read_timeout: Duration,
    ) -> Result<(), SimulatorError> {
        match self.send(&request, read_timeout).await? {
            VlabResponse::Ok => Ok(()),
            VlabResponse::Error { message } => Err(SimulatorError::CommandFailed(message)),
            other => Err(SimulatorError::CommandFailed(format!(
                "unexpected response: {:?}",
                other
            ))),
        }
    }
}

impl std::fmt::Debug for VlabClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VlabClient")
            .field("addr", &self.addr)
            .field("connected", &self.connection.is_some())
            .field("running", &self.running)
            .finish()
    }
}

#[async_trait]
impl DeviceSimulator for VlabClient {
    async fn connect(&mut self) -> Result<(), SimulatorError> {
        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(self.addr))
            .await
            .map_err(|_| SimulatorError::Timeout)??;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        self.connection = Some(Connection {
            reader: BufReader::new(reader),
            writer,
        });
        debug!(addr = %self.addr, "connected to vlab bridge");
        self.ping().await
    }

    fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    async fn load(&mut self, image: &FirmwareImage) -> Result<(), SimulatorError> {
        let request = VlabRequest::Load {
            firmware: image.path.clone(),
            working_dir: image.working_dir.clone(),
        };
        match self.send(&request, READ_TIMEOUT).await? {
            VlabResponse::Ok => Ok(()),
            VlabResponse::Error { message } => Err(SimulatorError::LoadFailed(message)),
            other => Err(SimulatorError::LoadFailed(format!(
                "unexpected response: {:?}",
                other
            ))),
        }
    }

    async fn start(&mut self) -> Result<(), SimulatorError> {
        self.expect_ok(VlabRequest::Start, READ_TIMEOUT).await?;
        self.running = true;
        Ok(())
    }

    async fn set_input(&mut self, line: &str, level: Level) -> Result<(), SimulatorError> {
        self.expect_ok(
            VlabRequest::SetInput {
                line: line.to_string(),
                level,
            },
            READ_TIMEOUT,
        )
        .await
    }

    async fn run_for(&mut self, duration: Duration) -> Result<(), SimulatorError> {
        let ms = duration.as_millis() as u64;
        self.expect_ok(VlabRequest::RunFor { ms }, READ_TIMEOUT.saturating_add(duration))
            .await
    }

    async fn read_uart(&mut self) -> Result<String, SimulatorError> {
        match self.send(&VlabRequest::ReadUart, READ_TIMEOUT).await? {
            VlabResponse::Uart { data } => Ok(data),
            VlabResponse::Error { message } => Err(SimulatorError::CommandFailed(message)),
            VlabResponse::Ok => Ok(String::new()),
        }
    }

    async fn stop(&mut self) -> Result<(), SimulatorError> {
        let result = self.expect_ok(VlabRequest::Stop, READ_TIMEOUT).await;
        self.running = false;
        result
    }

    fn is_running(&self) -> bool {
        self.running && self.connection.is_some()
    }
}
