//! Shared test helpers for shadowprobe-core integration tests.
//!
//! Provides a programmable mock vlab bridge, a recording bridge that accepts
//! every command, a raw-HTTP mock of the shadow endpoint, an in-memory
//! simulator and a few scripted shadow stores.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

use shadowprobe_core::config::HarnessConfig;
use shadowprobe_core::shadow::{ShadowDocument, ShadowError, ShadowStore};
use shadowprobe_core::simulator::{DeviceSimulator, FirmwareImage, Level, SimulatorError};
use shadowprobe_core::vlab::{encode_line, VlabRequest, VlabResponse};

pub const THING: &str = "TemperatureSensor";

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A shadow whose desired temperature is `value`.
pub fn temperature_shadow(value: serde_json::Value) -> ShadowDocument {
    ShadowDocument::from_value(json!({
        "state": {
            "desired": { "temprature": value },
            "reported": { "temprature": value }
        },
        "version": 7,
        "timestamp": 1_700_000_000
    }))
    .unwrap()
}

/// Harness configuration for fast tests: few trials, short observe timeout,
/// logs under `log_dir`.
pub fn test_config(log_dir: &Path, count: u32) -> HarnessConfig {
    let mut config = HarnessConfig::default();
    config.log_dir = Some(log_dir.to_path_buf());
    config.trial.count = count;
    config.trial.observe_timeout_ms = 500;
    config.trial.observe_interval_ms = 10;
    config
}

// ---------------------------------------------------------------------------
// Programmable mock bridge
// ---------------------------------------------------------------------------

/// Describes how the mock bridge handles a single incoming request line.
pub enum MockBehavior {
    /// Read one request and reply with the given response.
    Respond(VlabResponse),
    /// Read one request, sleep for `Duration`, then reply.
    Delay(Duration, VlabResponse),
    /// Read one request and then close the connection.
    Drop,
    /// Read one request and send a line that is not protocol JSON.
    SendGarbage,
    /// Read one request and never answer.
    Hang,
}

/// Start a mock bridge that accepts one connection and processes each
/// [`MockBehavior`] in sequence. The first behavior answers the ping sent by
/// `connect()`.
pub async fn programmable_mock_bridge(behaviors: Vec<MockBehavior>) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        for behavior in behaviors {
            let mut line = String::new();
            match reader.read_line(&mut line).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            }
            match behavior {
                MockBehavior::Respond(response) => {
                    let out = encode_line(&response).unwrap();
                    let _ = writer.write_all(out.as_bytes()).await;
                }
                MockBehavior::Delay(duration, response) => {
                    tokio::time::sleep(duration).await;
                    let out = encode_line(&response).unwrap();
                    let _ = writer.write_all(out.as_bytes()).await;
                }
                MockBehavior::Drop => return,
                MockBehavior::SendGarbage => {
                    let _ = writer.write_all(b"this is not protocol json\n").await;
                }
                MockBehavior::Hang => {
                    std::future::pending::<()>().await;
                }
            }
            let _ = writer.flush().await;
        }
    });

    addr
}

/// Start a bridge that accepts every command, answers `read_uart` with
/// `uart`, and records each request it receives.
pub async fn recording_bridge(uart: &str) -> (SocketAddr, Arc<Mutex<Vec<VlabRequest>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let log = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&log);
    let uart = uart.to_string();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        while let Ok(Some(line)) = lines.next_line().await {
            let request: VlabRequest = match serde_json::from_str(&line) {
                Ok(r) => r,
                Err(_) => return,
            };
            let response = match request {
                VlabRequest::ReadUart => VlabResponse::Uart { data: uart.clone() },
                _ => VlabResponse::Ok,
            };
            seen.lock().unwrap().push(request);
            let out = encode_line(&response).unwrap();
            if writer.write_all(out.as_bytes()).await.is_err() {
                return;
            }
        }
    });

    (addr, log)
}

// ---------------------------------------------------------------------------
// Mock shadow HTTP endpoint
// ---------------------------------------------------------------------------

/// Start an HTTP server that answers every request with `status` and `body`.
/// Returns the base URL and the raw request heads received.
pub async fn mock_shadow_endpoint(status: u16, body: &str) -> (String, Arc<Mutex<Vec<String>>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let requests = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&requests);
    let body = body.to_string();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let mut head = Vec::new();
            let mut buf = [0u8; 1024];
            while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                match stream.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => head.extend_from_slice(&buf[..n]),
                }
            }
            seen.lock()
                .unwrap()
                .push(String::from_utf8_lossy(&head).into_owned());

            let response = format!(
                "HTTP/1.1 {} Mock\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes()).await;
            let _ = stream.shutdown().await;
        }
    });

    (format!("http://{}", addr), requests)
}

// ---------------------------------------------------------------------------
// In-memory collaborators
// ---------------------------------------------------------------------------

/// An in-memory simulator that logs every call.
///
/// `fail_on` names an operation (`"connect"`, `"load"`, `"set_input"`,
/// `"stop"`, ...) that returns an error instead of succeeding.
pub struct ScriptedSimulator {
    pub calls: Arc<Mutex<Vec<String>>>,
    pub uart: String,
    pub fail_on: Option<&'static str>,
    connected: bool,
    running: bool,
}

impl ScriptedSimulator {
    pub fn new() -> (Self, Arc<Mutex<Vec<String>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sim = Self {
            calls: Arc::clone(&calls),
            uart: String::new(),
            fail_on: None,
            connected: false,
            running: false,
        };
        (sim, calls)
    }

    pub fn failing_on(op: &'static str) -> (Self, Arc<Mutex<Vec<String>>>) {
        let (mut sim, calls) = Self::new();
        sim.fail_on = Some(op);
        (sim, calls)
    }

    fn call(&self, entry: String, op: &str) -> Result<(), SimulatorError> {
        self.calls.lock().unwrap().push(entry);
        if self.fail_on == Some(op) {
            return Err(SimulatorError::CommandFailed(format!("{} rejected", op)));
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceSimulator for ScriptedSimulator {
    async fn connect(&mut self) -> Result<(), SimulatorError> {
        self.call("connect".into(), "connect")?;
        self.connected = true;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn load(&mut self, image: &FirmwareImage) -> Result<(), SimulatorError> {
        self.call(format!("load {}", image.path.display()), "load")
    }

    async fn start(&mut self) -> Result<(), SimulatorError> {
        self.call("start".into(), "start")?;
        self.running = true;
        Ok(())
    }

    async fn set_input(&mut self, line: &str, level: Level) -> Result<(), SimulatorError> {
        let level = match level {
            Level::High => "high",
            Level::Low => "low",
        };
        self.call(format!("set_input {} {}", line, level), "set_input")
    }

    async fn run_for(&mut self, duration: Duration) -> Result<(), SimulatorError> {
        self.call(format!("run_for {}", duration.as_millis()), "run_for")
    }

    async fn read_uart(&mut self) -> Result<String, SimulatorError> {
        self.call("read_uart".into(), "read_uart")?;
        Ok(self.uart.clone())
    }

    async fn stop(&mut self) -> Result<(), SimulatorError> {
        self.running = false;
        self.call("stop".into(), "stop")
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

/// A store that answers from a queue of canned results; the last entry
/// repeats once the queue is drained.
pub struct SequenceStore {
    results: Mutex<VecDeque<Result<ShadowDocument, ShadowError>>>,
    pub queries: Mutex<u32>,
}

impl SequenceStore {
    pub fn new(results: Vec<Result<ShadowDocument, ShadowError>>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            queries: Mutex::new(0),
        }
    }

    pub fn query_count(&self) -> u32 {
        *self.queries.lock().unwrap()
    }
}

#[async_trait]
impl ShadowStore for SequenceStore {
    async fn get_shadow(&self, _device_id: &str) -> Result<ShadowDocument, ShadowError> {
        *self.queries.lock().unwrap() += 1;
        let mut results = self.results.lock().unwrap();
        if results.len() > 1 {
            results.pop_front().unwrap()
        } else {
            results
                .front()
                .cloned()
                .unwrap_or_else(|| Err(ShadowError::NotFound(THING.to_string())))
        }
    }
}

/// A store whose queries never complete.
pub struct HangingStore;

#[async_trait]
impl ShadowStore for HangingStore {
    async fn get_shadow(&self, _device_id: &str) -> Result<ShadowDocument, ShadowError> {
        std::future::pending().await
    }
}
