//! Device simulator trait for backend-agnostic firmware execution.
//!
//! This module defines the [`DeviceSimulator`] trait, the seam between the
//! reconciliation harness and whatever runs the firmware under test. The
//! harness only needs to load an image, start it, toggle named digital inputs,
//! advance simulated time, and read back the serial console.
//!
//! The shipped backend is [`VlabClient`](crate::vlab::VlabClient), which talks
//! to a virtual-lab bridge process over TCP. Tests provide in-memory
//! implementations.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur while driving a simulator.
#[derive(Error, Debug)]
pub enum SimulatorError {
    /// The backend is not connected.
    #[error("Not connected to simulator")]
    NotConnected,

    /// The firmware image could not be loaded.
    #[error("Failed to load firmware: {0}")]
    LoadFailed(String),

    /// The simulator rejected a command.
    #[error("Command failed: {0}")]
    CommandFailed(String),

    /// The connection to the simulator was lost.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// An operation timed out.
    #[error("Operation timed out")]
    Timeout,

    /// The firmware did not report readiness.
    #[error("Device not ready: {0}")]
    NotReady(String),

    /// The simulator bridge process could not be launched.
    #[error("Failed to launch simulator: {0}")]
    LaunchFailed(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to encode or decode a protocol message.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Logic level of a digital input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    /// Line released / logic 0.
    Low,
    /// Line asserted / logic 1.
    High,
}

/// A firmware binary and the directory the simulator runs it from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareImage {
    /// Path to the firmware binary.
    pub path: PathBuf,
    /// Working directory for the simulation (board description, peripherals).
    pub working_dir: PathBuf,
}

impl FirmwareImage {
    /// Creates a firmware image reference.
    pub fn new(path: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            working_dir: working_dir.into(),
        }
    }
}

/// Trait for simulated devices running firmware.
///
/// Methods take `&mut self`: a simulator is owned by exactly one harness and
/// driven strictly sequentially.
///
/// # Required Methods
///
/// Implementors must provide [`connect`](DeviceSimulator::connect),
/// [`is_connected`](DeviceSimulator::is_connected),
/// [`load`](DeviceSimulator::load), [`start`](DeviceSimulator::start),
/// [`set_input`](DeviceSimulator::set_input),
/// [`run_for`](DeviceSimulator::run_for),
/// [`read_uart`](DeviceSimulator::read_uart),
/// [`stop`](DeviceSimulator::stop) and
/// [`is_running`](DeviceSimulator::is_running).
#[async_trait]
pub trait DeviceSimulator: Send + Sync {
    /// Establish a connection to the simulator backend.
    async fn connect(&mut self) -> Result<(), SimulatorError>;

    /// Check if the backend is ready to accept commands.
    fn is_connected(&self) -> bool;

    /// Load a firmware image. The simulation is not started.
    async fn load(&mut self, image: &FirmwareImage) -> Result<(), SimulatorError>;

    /// Start executing the loaded firmware.
    async fn start(&mut self) -> Result<(), SimulatorError>;

    /// Drive a named digital input to `level`.
    async fn set_input(&mut self, line: &str, level: Level) -> Result<(), SimulatorError>;

    /// Advance simulated time by `duration`, blocking until it has elapsed.
    async fn run_for(&mut self, duration: Duration) -> Result<(), SimulatorError>;

    /// Drain and return serial console output produced since the last call.
    async fn read_uart(&mut self) -> Result<String, SimulatorError>;

    /// Stop the simulation and release its resources.
    async fn stop(&mut self) -> Result<(), SimulatorError>;

    /// Whether the simulation has been started and not stopped.
    fn is_running(&self) -> bool;

    /// Drive `line` high.
    async fn on(&mut self, line: &str) -> Result<(), SimulatorError> {
        self.set_input(line, Level::High).await
    }

    /// Drive `line` low.
    async fn off(&mut self, line: &str) -> Result<(), SimulatorError> {
        self.set_input(line, Level::Low).await
    }
}
