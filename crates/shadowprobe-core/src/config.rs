//! Harness configuration.
//!
//! Settings live in a JSON file, by default `~/.shadowprobe/config.json`.
//! Every field has a default, so a partial file (or none at all) is valid;
//! the defaults reproduce the stock temperature-sensor trial: 20 presses of
//! `BUTTON1`, each checked against `state.desired.temprature` in `[20, 40]`.
//!
//! # Example
//!
//! ```no_run
//! use shadowprobe_core::config::HarnessConfig;
//!
//! // Load (returns defaults if the default file doesn't exist)
//! let config = HarnessConfig::load(None).unwrap();
//! println!("{} trials against {}", config.trial.count, config.shadow.thing_name);
//! ```

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::launcher::LaunchCommand;
use crate::report::RunMode;
use crate::shadow::{FieldPath, ValueConversion};
use crate::simulator::FirmwareImage;
use crate::stimulus::StimulusEvent;
use crate::window::{AssertionWindow, WindowError};

const CONFIG_DIRNAME: &str = ".shadowprobe";
const CONFIG_FILENAME: &str = "config.json";

/// Errors loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read or written.
    #[error("{path}: {source}")]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The file is not valid configuration JSON.
    #[error("{path}: {source}")]
    Parse {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },

    /// A value is out of range or inconsistent.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// The assertion window is invalid.
    #[error("invalid configuration: {0}")]
    Window(#[from] WindowError),
}

/// Returns the shadowprobe home directory (`~/.shadowprobe/`).
pub fn shadowprobe_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(CONFIG_DIRNAME)
}

/// Default config file path (`~/.shadowprobe/config.json`).
pub fn default_config_path() -> PathBuf {
    shadowprobe_dir().join(CONFIG_FILENAME)
}

/// Top-level harness configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HarnessConfig {
    /// Simulator and firmware settings.
    pub simulator: SimulatorConfig,
    /// Shadow store settings.
    pub shadow: ShadowConfig,
    /// Trial loop settings.
    pub trial: TrialConfig,
    /// Directory for trial logs. Defaults to `~/.shadowprobe/logs/`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

/// Simulator and firmware settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Working directory of the simulation.
    pub working_dir: PathBuf,
    /// Firmware binary to load.
    pub firmware: PathBuf,
    /// Bridge host.
    pub host: String,
    /// Bridge TCP port.
    pub port: u16,
    /// Command that starts the bridge. When absent the bridge must already be running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub launch: Option<LaunchCommand>,
    /// How long a launched bridge may take to answer.
    pub startup_timeout_ms: u64,
    /// Simulated time run after start before the first stimulus.
    pub warmup_ms: u64,
    /// Log UART output after every simulated time step.
    pub print_uart: bool,
    /// UART text that signals the firmware is ready. When set, warm-up
    /// repeats until the marker is seen or `ready_timeout_ms` of simulated
    /// time has passed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_marker: Option<String>,
    /// Upper bound of simulated time spent waiting for `ready_marker`.
    pub ready_timeout_ms: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            working_dir: PathBuf::from("."),
            firmware: PathBuf::from("firmware.bin"),
            host: "127.0.0.1".to_string(),
            port: 7400,
            launch: None,
            startup_timeout_ms: 30_000,
            warmup_ms: 500,
            print_uart: true,
            ready_marker: None,
            ready_timeout_ms: 10_000,
        }
    }
}

impl SimulatorConfig {
    /// Resolves the bridge address.
    pub fn addr(&self) -> Result<SocketAddr, ConfigError> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| ConfigError::Invalid(format!("simulator host '{}': {}", self.host, e)))?
            .next()
            .ok_or_else(|| ConfigError::Invalid(format!("simulator host '{}' did not resolve", self.host)))
    }

    /// The firmware image to load.
    pub fn image(&self) -> FirmwareImage {
        FirmwareImage::new(&self.firmware, &self.working_dir)
    }

    /// Warm-up duration.
    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }
}

/// Shadow store settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShadowConfig {
    /// AWS region.
    pub region: String,
    /// IoT data endpoint host or URL. Defaults to the regional ATS endpoint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Thing (device) whose shadow is observed.
    pub thing_name: String,
    /// Named shadow; the classic shadow when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shadow_name: Option<String>,
    /// Path of the observed value inside the shadow document.
    pub field_path: FieldPath,
    /// How the observed value is read as a number.
    pub conversion: ValueConversion,
}

impl Default for ShadowConfig {
    fn default() -> Self {
        Self {
            region: "us-east-1".to_string(),
            endpoint: None,
            thing_name: "TemperatureSensor".to_string(),
            shadow_name: None,
            field_path: FieldPath::desired("temprature"),
            conversion: ValueConversion::Integer,
        }
    }
}

impl ShadowConfig {
    /// Base URL of the data endpoint, without a trailing slash.
    pub fn base_url(&self) -> String {
        match &self.endpoint {
            Some(ep) if ep.contains("://") => ep.trim_end_matches('/').to_string(),
            Some(ep) => format!("https://{}", ep.trim_end_matches('/')),
            None => format!("https://data-ats.iot.{}.amazonaws.com", self.region),
        }
    }
}

/// Trial loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrialConfig {
    /// Number of trials.
    pub count: u32,
    /// Stimulus applied in every trial.
    pub stimulus: StimulusEvent,
    /// Wall-clock wait after the stimulus before observing.
    pub propagation_ms: u64,
    /// Window every observed value must fall in.
    pub window: AssertionWindow,
    /// Upper bound on one shadow query.
    pub observe_timeout_ms: u64,
    /// Observe attempts per trial; 1 means no retry.
    pub observe_attempts: u32,
    /// Wall-clock wait between observe attempts.
    pub observe_interval_ms: u64,
    /// How a failing trial affects the rest of the run.
    pub mode: RunMode,
}

impl Default for TrialConfig {
    fn default() -> Self {
        Self {
            count: 20,
            stimulus: StimulusEvent::default(),
            propagation_ms: 0,
            window: AssertionWindow::default(),
            observe_timeout_ms: 30_000,
            observe_attempts: 1,
            observe_interval_ms: 1_000,
            mode: RunMode::default(),
        }
    }
}

impl HarnessConfig {
    /// Loads configuration.
    ///
    /// With `Some(path)` the file must exist. With `None` the default path is
    /// tried and a missing file yields [`Default`]. Parse errors are always
    /// reported.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (default_config_path(), false),
        };
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self::default());
            }
            Err(source) => return Err(ConfigError::Io { path, source }),
        };
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse { path, source })
    }

    /// Writes configuration as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json).map_err(io_err)
    }

    /// Checks values that deserialize fine but cannot run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.shadow.thing_name.trim().is_empty() {
            return Err(ConfigError::Invalid("shadow.thing_name is empty".into()));
        }
        if self.shadow.region.trim().is_empty() {
            return Err(ConfigError::Invalid("shadow.region is empty".into()));
        }
        if self.trial.count == 0 {
            return Err(ConfigError::Invalid("trial.count must be at least 1".into()));
        }
        if self.trial.observe_attempts == 0 {
            return Err(ConfigError::Invalid(
                "trial.observe_attempts must be at least 1".into(),
            ));
        }
        if self.trial.observe_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "trial.observe_timeout_ms must be positive".into(),
            ));
        }
        if self.trial.stimulus.line.trim().is_empty() {
            return Err(ConfigError::Invalid("trial.stimulus.line is empty".into()));
        }
        Ok(())
    }

    /// Directory trial logs are written to.
    pub fn log_dir(&self) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| shadowprobe_dir().join("logs"))
    }
}
