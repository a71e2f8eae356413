//! Command-line runner for device/cloud reconciliation trials.
//!
//! # Usage
//!
//! ```bash
//! # Run the configured trials (20 by default) against a running vlab bridge
//! shadowprobe run
//!
//! # Five trials, custom window, stop at the first failure
//! shadowprobe run --trials 5 --low 18 --high 42 --fail-fast
//!
//! # Machine-readable report
//! shadowprobe --format json run > report.json
//!
//! # Read the configured field from a device shadow
//! shadowprobe observe TemperatureSensor
//!
//! # Show or create the configuration file
//! shadowprobe config
//! shadowprobe config --show-path
//! shadowprobe config --init
//! ```
//!
//! Exit codes: 0 when every trial passed, 1 when a trial failed, 2 for
//! configuration or setup errors, 3 when only teardown failed.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use shadowprobe_core::aws::AwsIotShadowClient;
use shadowprobe_core::clock::TokioClock;
use shadowprobe_core::config::{default_config_path, HarnessConfig};
use shadowprobe_core::error::ErrorKind;
use shadowprobe_core::harness::ReconciliationHarness;
use shadowprobe_core::launcher::VlabLauncher;
use shadowprobe_core::report::{RunMode, RunReport, TrialOutcome, TrialRecord};
use shadowprobe_core::session::SessionEvent;
use shadowprobe_core::shadow::{ShadowError, ShadowStore};
use shadowprobe_core::vlab::VlabClient;
use shadowprobe_core::window::AssertionWindow;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Device/cloud reconciliation trials against simulated firmware.
#[derive(Parser)]
#[command(name = "shadowprobe")]
#[command(about = "Press a button on simulated firmware and check the cloud shadow follows")]
#[command(version)]
struct Cli {
    /// Config file (default: ~/.shadowprobe/config.json)
    #[arg(short, long, global = true, env = "SHADOWPROBE_CONFIG")]
    config: Option<PathBuf>,

    /// Output format: text or json
    #[arg(short, long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Log progress to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Run the configured number of trials
    Run {
        /// Number of trials
        #[arg(short = 'n', long)]
        trials: Option<u32>,
        /// Lower bound of the expected window (inclusive)
        #[arg(long)]
        low: Option<f64>,
        /// Upper bound of the expected window (inclusive)
        #[arg(long)]
        high: Option<f64>,
        /// Stop at the first failing trial
        #[arg(long)]
        fail_fast: bool,
        /// Firmware image to load
        #[arg(long)]
        firmware: Option<PathBuf>,
        /// Device (thing) whose shadow is observed
        #[arg(long)]
        thing: Option<String>,
        /// Observe attempts per trial
        #[arg(long)]
        attempts: Option<u32>,
    },

    /// Fetch a device shadow and print the configured field
    Observe {
        /// Device (thing) name; defaults to the configured one
        thing: Option<String>,
        /// Print the whole shadow document
        #[arg(long)]
        raw: bool,
    },

    /// Print the effective configuration
    Config {
        /// Print the config file path instead
        #[arg(long)]
        show_path: bool,
        /// Write the default configuration if the file does not exist
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    }
}

#[derive(Debug)]
enum CliError {
    Config(String),
    Setup(String),
    TrialsFailed(String),
    Observation(String),
    Teardown(String),
    Output(String),
}

impl CliError {
    fn exit_code(&self) -> ExitCode {
        match self {
            CliError::TrialsFailed(_) | CliError::Observation(_) | CliError::Output(_) => {
                ExitCode::from(1)
            }
            CliError::Config(_) | CliError::Setup(_) => ExitCode::from(2),
            CliError::Teardown(_) => ExitCode::from(3),
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Setup(msg) => write!(f, "Setup failed: {}", msg),
            CliError::TrialsFailed(msg) => write!(f, "Trials failed: {}", msg),
            CliError::Observation(msg) => write!(f, "Observation failed: {}", msg),
            CliError::Teardown(msg) => write!(f, "Teardown failed: {}", msg),
            CliError::Output(msg) => write!(f, "Output error: {}", msg),
        }
    }
}

fn config_path(cli: &Cli) -> PathBuf {
    cli.config.clone().unwrap_or_else(default_config_path)
}

fn load_config(cli: &Cli) -> Result<HarnessConfig, CliError> {
    HarnessConfig::load(cli.config.as_deref()).map_err(|e| CliError::Config(e.to_string()))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, CliError> {
    serde_json::to_string_pretty(value).map_err(|e| CliError::Output(e.to_string()))
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Run {
            trials,
            low,
            high,
            fail_fast,
            ref firmware,
            ref thing,
            attempts,
        } => {
            let mut config = load_config(&cli)?;
            if let Some(n) = trials {
                config.trial.count = n;
            }
            if low.is_some() || high.is_some() {
                let current = config.trial.window;
                config.trial.window = AssertionWindow::new(
                    low.unwrap_or(current.low()),
                    high.unwrap_or(current.high()),
                )
                .map_err(|e| CliError::Config(e.to_string()))?;
            }
            if fail_fast {
                config.trial.mode = RunMode::FailFast;
            }
            if let Some(path) = firmware {
                config.simulator.firmware = path.clone();
            }
            if let Some(name) = thing {
                config.shadow.thing_name = name.clone();
            }
            if let Some(n) = attempts {
                config.trial.observe_attempts = n;
            }
            config
                .validate()
                .map_err(|e| CliError::Config(e.to_string()))?;
            run_trials(config, cli.format).await
        }
        Command::Observe { ref thing, raw } => {
            let mut config = load_config(&cli)?;
            if let Some(name) = thing {
                config.shadow.thing_name = name.clone();
            }
            observe(&config, raw, cli.format).await
        }
        Command::Config { show_path, init } => {
            let path = config_path(&cli);
            if init {
                if path.exists() {
                    return Err(CliError::Config(format!(
                        "{} already exists",
                        path.display()
                    )));
                }
                HarnessConfig::default()
                    .save(&path)
                    .map_err(|e| CliError::Config(e.to_string()))?;
                eprintln!("Wrote default configuration to {}", path.display());
                return Ok(());
            }
            if show_path {
                println!("{}", path.display());
                return Ok(());
            }
            let config = load_config(&cli)?;
            println!("{}", to_json(&config)?);
            Ok(())
        }
    }
}

async fn run_trials(config: HarnessConfig, format: OutputFormat) -> Result<(), CliError> {
    let store = AwsIotShadowClient::from_env(&config.shadow)
        .map_err(|e| CliError::Config(e.to_string()))?;
    let addr = config
        .simulator
        .addr()
        .map_err(|e| CliError::Config(e.to_string()))?;

    let mut launcher = match config.simulator.launch.clone() {
        Some(command) => {
            let mut launcher =
                VlabLauncher::new(command, addr, config.simulator.working_dir.clone());
            launcher
                .ensure_running(Duration::from_millis(config.simulator.startup_timeout_ms))
                .await
                .map_err(|e| CliError::Setup(e.to_string()))?;
            Some(launcher)
        }
        None => None,
    };

    let mut harness = ReconciliationHarness::new(
        config,
        Box::new(VlabClient::new(addr)),
        Arc::new(store),
        Arc::new(TokioClock),
    )
    .map_err(|e| CliError::Config(e.to_string()))?;

    let progress = (format == OutputFormat::Text).then(|| {
        let rx = harness.subscribe();
        tokio::spawn(print_progress(rx))
    });

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted; stopping after the current trial");
            ctrl_c.cancel();
        }
    });

    let report = harness.run_with_cancel(&cancel).await;

    // Closing the event channel ends the progress task.
    drop(harness);
    if let Some(task) = progress {
        let _ = task.await;
    }
    if let Some(launcher) = launcher.as_mut() {
        if let Err(e) = launcher.shutdown().await {
            warn!(error = %e, "failed to stop simulator bridge");
        }
    }

    match format {
        OutputFormat::Json => println!("{}", to_json(&report)?),
        OutputFormat::Text => println!("{}", report.summary()),
    }
    report_result(&report)
}

fn report_result(report: &RunReport) -> Result<(), CliError> {
    match report.failure_kind() {
        None => Ok(()),
        Some(ErrorKind::Setup) => Err(CliError::Setup(report.summary())),
        Some(ErrorKind::Teardown) => Err(CliError::Teardown(report.summary())),
        Some(ErrorKind::Observation | ErrorKind::RangeAssertion | ErrorKind::Cancelled) => {
            Err(CliError::TrialsFailed(report.summary()))
        }
    }
}

async fn print_progress(mut rx: broadcast::Receiver<SessionEvent>) {
    loop {
        match rx.recv().await {
            Ok(SessionEvent::Started { session_id, firmware }) => {
                eprintln!("Session {} running {}", session_id, firmware.display());
            }
            Ok(SessionEvent::TrialRecorded(record)) => println!("{}", format_trial(&record)),
            Ok(SessionEvent::Stopped { .. }) => {}
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(skipped = n, "progress output fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn format_trial(record: &TrialRecord) -> String {
    let time = record.timestamp.format("%H:%M:%S%.3f");
    match &record.outcome {
        TrialOutcome::Passed { value } => format!(
            "[{}] trial {:>3}  PASS  {} ({}ms)",
            time, record.index, value, record.elapsed_ms
        ),
        TrialOutcome::Failed { message, .. } => format!(
            "[{}] trial {:>3}  FAIL  {} ({}ms)",
            time, record.index, message, record.elapsed_ms
        ),
    }
}

async fn observe(config: &HarnessConfig, raw: bool, format: OutputFormat) -> Result<(), CliError> {
    let store = AwsIotShadowClient::from_env(&config.shadow)
        .map_err(|e| CliError::Config(e.to_string()))?;
    let thing = &config.shadow.thing_name;
    let timeout = Duration::from_millis(config.trial.observe_timeout_ms);

    info!(thing = %thing, endpoint = store.base_url(), "fetching shadow");
    let document = tokio::time::timeout(timeout, store.get_shadow(thing))
        .await
        .map_err(|_| CliError::Observation(ShadowError::Timeout.to_string()))?
        .map_err(|e| CliError::Observation(e.to_string()))?;

    if raw {
        println!("{}", to_json(document.as_value())?);
        return Ok(());
    }

    let value = document
        .numeric_field_as(&config.shadow.field_path, config.shadow.conversion)
        .map_err(|e| CliError::Observation(e.to_string()))?;
    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "thing": thing,
                "field": config.shadow.field_path,
                "value": value,
                "version": document.version(),
            });
            println!("{}", to_json(&output)?);
        }
        OutputFormat::Text => println!("{} = {}", config.shadow.field_path, value),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        let code = |e: CliError| format!("{:?}", e.exit_code());
        assert_eq!(code(CliError::TrialsFailed("x".into())), format!("{:?}", ExitCode::from(1)));
        assert_eq!(code(CliError::Config("x".into())), format!("{:?}", ExitCode::from(2)));
        assert_eq!(code(CliError::Setup("x".into())), format!("{:?}", ExitCode::from(2)));
        assert_eq!(code(CliError::Teardown("x".into())), format!("{:?}", ExitCode::from(3)));
    }

    #[test]
    fn report_maps_to_error() {
        let mut report = RunReport::new(uuid::Uuid::nil(), 1);
        assert!(matches!(report_result(&report), Err(CliError::TrialsFailed(_))));

        report
            .trials
            .push(TrialRecord::new(1, 10, 1, TrialOutcome::Passed { value: 25.0 }));
        assert!(report_result(&report).is_ok());

        report.teardown_error = Some("stop failed".into());
        assert!(matches!(report_result(&report), Err(CliError::Teardown(_))));

        report.setup_error = Some("no bridge".into());
        assert!(matches!(report_result(&report), Err(CliError::Setup(_))));
    }

    #[test]
    fn trial_lines() {
        let pass = TrialRecord::new(3, 412, 1, TrialOutcome::Passed { value: 25.0 });
        let line = format_trial(&pass);
        assert!(line.ends_with("trial   3  PASS  25 (412ms)"), "{}", line);

        let fail = TrialRecord::new(
            4,
            9,
            1,
            TrialOutcome::Failed {
                kind: ErrorKind::RangeAssertion,
                message: "value 55 outside expected range [20, 40]".into(),
                value: Some(55.0),
            },
        );
        assert!(format_trial(&fail).contains("FAIL  value 55 outside expected range [20, 40]"));
    }
}
