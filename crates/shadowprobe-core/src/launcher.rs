//! Lifecycle management for the virtual-lab bridge process.
//!
//! [`VlabLauncher`] spawns the bridge command in the simulation working
//! directory and polls its TCP port with `Ping` requests until it answers.
//! The child is killed when the launcher is dropped.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use shadowprobe_core::launcher::{LaunchCommand, VlabLauncher};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let command = LaunchCommand {
//!     program: "vlab-bridge".into(),
//!     args: vec!["--port".into(), "7400".into()],
//! };
//! let mut launcher = VlabLauncher::new(command, "127.0.0.1:7400".parse()?, "board".into());
//! launcher.ensure_running(Duration::from_secs(30)).await?;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::simulator::{DeviceSimulator, SimulatorError};
use crate::vlab::VlabClient;

/// Interval between readiness probes.
const POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Timeout applied to a single readiness probe.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// The program and arguments that start a simulator bridge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchCommand {
    /// Executable name or path.
    pub program: String,
    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,
}

/// Spawns a simulator bridge and waits until it accepts connections.
pub struct VlabLauncher {
    command: LaunchCommand,
    addr: SocketAddr,
    working_dir: PathBuf,
    child: Option<Child>,
}

impl VlabLauncher {
    /// Creates a launcher. Nothing is spawned until
    /// [`ensure_running`](Self::ensure_running).
    pub fn new(command: LaunchCommand, addr: SocketAddr, working_dir: PathBuf) -> Self {
        Self {
            command,
            addr,
            working_dir,
            child: None,
        }
    }

    /// Spawns the bridge (if not already spawned) and waits for it to answer.
    ///
    /// # Errors
    ///
    /// - [`SimulatorError::LaunchFailed`] if the process cannot be spawned or exits early
    /// - [`SimulatorError::Timeout`] if the bridge does not answer within `startup_timeout`
    pub async fn ensure_running(&mut self, startup_timeout: Duration) -> Result<(), SimulatorError> {
        if self.child.is_none() {
            self.spawn()?;
        }
        self.wait_for_ready(startup_timeout).await
    }

    fn spawn(&mut self) -> Result<(), SimulatorError> {
        info!(program = %self.command.program, addr = %self.addr, "launching vlab bridge");
        let child = Command::new(&self.command.program)
            .args(&self.command.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                SimulatorError::LaunchFailed(format!("{}: {}", self.command.program, e))
            })?;
        self.child = Some(child);
        Ok(())
    }

    async fn wait_for_ready(&mut self, startup_timeout: Duration) -> Result<(), SimulatorError> {
        let deadline = tokio::time::Instant::now() + startup_timeout;

        loop {
            if let Some(child) = self.child.as_mut() {
                if let Some(status) = child.try_wait()? {
                    self.child = None;
                    return Err(SimulatorError::LaunchFailed(format!(
                        "bridge exited before becoming ready ({})",
                        status
                    )));
                }
            }

            if self.is_reachable().await {
                debug!(addr = %self.addr, "vlab bridge ready");
                return Ok(());
            }

            if tokio::time::Instant::now() >= deadline {
                warn!(addr = %self.addr, "vlab bridge did not become ready");
                return Err(SimulatorError::Timeout);
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Quick reachability check: connect and ping with a short timeout.
    pub async fn is_reachable(&self) -> bool {
        let addr = self.addr;
        let check = async move {
            let mut client = VlabClient::new(addr);
            let result = client.connect().await;
            client.disconnect();
            result.ok()
        };

        tokio::time::timeout(PROBE_TIMEOUT, check)
            .await
            .is_ok_and(|inner| inner.is_some())
    }

    /// Kills the bridge process if it is running.
    pub async fn shutdown(&mut self) -> Result<(), SimulatorError> {
        if let Some(mut child) = self.child.take() {
            child.kill().await?;
        }
        Ok(())
    }

    /// Whether a child process is currently held.
    pub fn is_spawned(&self) -> bool {
        self.child.is_some()
    }
}

impl std::fmt::Debug for VlabLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VlabLauncher")
            .field("command", &self.command)
            .field("addr", &self.addr)
            .field("working_dir", &self.working_dir)
            .field("spawned", &self.child.is_some())
            .finish()
    }
}
