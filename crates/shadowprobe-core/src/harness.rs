//! The reconciliation trial loop.
//!
//! [`ReconciliationHarness`] coordinates two independent systems that are
//! expected to converge: a simulated device running firmware and a cloud state
//! store holding the device's shadow. One trial is:
//!
//! 1. **Stimulate**: press the configured input line on the simulator
//! 2. **Wait**: advance simulated time by the settle duration, then wall-clock
//!    time by the propagation delay
//! 3. **Observe**: read the shadow and extract the configured numeric field
//! 4. **Assert**: the value must fall inside the inclusive window
//!
//! Trials run strictly sequentially against one long-lived [`Session`]. The
//! state store and the clock are injected, so tests can substitute in-memory
//! implementations and a virtual clock.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use shadowprobe_core::clock::TokioClock;
//! use shadowprobe_core::config::HarnessConfig;
//! use shadowprobe_core::harness::ReconciliationHarness;
//! use shadowprobe_core::shadow::StaticShadowStore;
//! use shadowprobe_core::vlab::VlabClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = HarnessConfig::default();
//! let simulator = VlabClient::new(config.simulator.addr()?);
//! let mut harness = ReconciliationHarness::new(
//!     config,
//!     Box::new(simulator),
//!     Arc::new(StaticShadowStore::new()),
//!     Arc::new(TokioClock),
//! )?;
//!
//! harness.setup().await?;
//! let event = harness.config().trial.stimulus.clone();
//! harness.apply_stimulus(&event).await?;
//! let value = harness.observe("TemperatureSensor").await?;
//! ReconciliationHarness::assert_in_range(value, &harness.config().trial.window)?;
//! harness.teardown().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::{ConfigError, HarnessConfig};
use crate::error::HarnessError;
use crate::report::{RunMode, RunReport, TrialOutcome, TrialRecord};
use crate::session::{Session, SessionEvent, SessionState};
use crate::shadow::{ShadowError, ShadowStore};
use crate::simulator::{DeviceSimulator, SimulatorError};
use crate::stimulus::StimulusEvent;
use crate::window::AssertionWindow;

/// Capacity of the session event channel.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How a trial reads the state store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservePolicy {
    /// Observe attempts per trial. 1 means no retry.
    pub attempts: u32,
    /// Wait between attempts.
    pub interval: Duration,
    /// Upper bound on one query.
    pub timeout: Duration,
}

impl ObservePolicy {
    /// Policy described by `config`.
    pub fn from_config(config: &HarnessConfig) -> Self {
        Self {
            attempts: config.trial.observe_attempts.max(1),
            interval: Duration::from_millis(config.trial.observe_interval_ms),
            timeout: Duration::from_millis(config.trial.observe_timeout_ms),
        }
    }
}

/// Orchestrates stimulus, observation and assertion against a device and a
/// shadow store.
pub struct ReconciliationHarness {
    config: HarnessConfig,
    policy: ObservePolicy,
    simulator: Box<dyn DeviceSimulator>,
    store: Arc<dyn ShadowStore>,
    clock: Arc<dyn Clock>,
    session: Option<Session>,
    event_tx: broadcast::Sender<SessionEvent>,
}

impl ReconciliationHarness {
    /// Creates a harness. Nothing is started until [`setup`](Self::setup).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` fails validation.
    pub fn new(
        config: HarnessConfig,
        simulator: Box<dyn DeviceSimulator>,
        store: Arc<dyn ShadowStore>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            policy: ObservePolicy::from_config(&config),
            config,
            simulator,
            store,
            clock,
            session: None,
            event_tx,
        })
    }

    /// The configuration in use.
    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// The current session, if `setup` has run.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Subscribes to session events (start, trial records, stop).
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.event_tx.subscribe()
    }

    fn is_running(&self) -> bool {
        self.session.as_ref().map(Session::state) == Some(SessionState::Running)
    }

    /// Acquires a session: connects, loads firmware, starts and warms up.
    ///
    /// Calling `setup` on a running session is a no-op.
    ///
    /// # Errors
    ///
    /// [`HarnessError::Setup`] if any simulator step fails, including the
    /// ready marker not appearing in time.
    pub async fn setup(&mut self) -> Result<(), HarnessError> {
        if self.is_running() {
            return Ok(());
        }
        let span = info_span!("setup", firmware = %self.config.simulator.firmware.display());
        async {
            if !self.simulator.is_connected() {
                self.simulator.connect().await.map_err(HarnessError::Setup)?;
            }

            let image = self.config.simulator.image();
            self.session = Some(Session::new(
                &self.config.shadow.thing_name,
                image.clone(),
                &self.config.log_dir(),
                self.event_tx.clone(),
            ));

            self.simulator.load(&image).await.map_err(HarnessError::Setup)?;
            self.simulator.start().await.map_err(HarnessError::Setup)?;
            self.warm_up().await.map_err(HarnessError::Setup)?;

            if let Some(session) = self.session.as_mut() {
                session.mark_running();
                info!(session_id = %session.id, "virtual device is running");
            }
            Ok(())
        }
        .instrument(span)
        .await
    }

    async fn warm_up(&mut self) -> Result<(), SimulatorError> {
        let step = self.config.simulator.warmup();
        self.simulator.run_for(step).await?;
        let mut console = self.drain_uart().await;

        let Some(marker) = self.config.simulator.ready_marker.clone() else {
            return Ok(());
        };
        let budget = Duration::from_millis(self.config.simulator.ready_timeout_ms);
        let mut waited = step;
        while !console.contains(&marker) {
            if waited >= budget || step.is_zero() {
                return Err(SimulatorError::NotReady(format!(
                    "'{}' not seen on UART within {} ms",
                    marker,
                    waited.as_millis()
                )));
            }
            self.simulator.run_for(step).await?;
            waited = waited.saturating_add(step);
            console.push_str(&self.drain_uart().await);
        }
        debug!(waited_ms = waited.as_millis() as u64, "ready marker seen");
        Ok(())
    }

    /// Reads pending UART output, logging it when `print_uart` is set.
    async fn drain_uart(&mut self) -> String {
        match self.simulator.read_uart().await {
            Ok(text) => {
                if self.config.simulator.print_uart {
                    for line in text.lines().filter(|l| !l.trim().is_empty()) {
                        debug!(target: "shadowprobe::uart", "{}", line.trim_end());
                    }
                }
                text
            }
            Err(e) => {
                warn!(error = %e, "failed to read UART");
                String::new()
            }
        }
    }

    /// Applies a stimulus: line high, hold, line low, settle, then waits out
    /// the propagation delay.
    ///
    /// # Errors
    ///
    /// [`HarnessError::NotStarted`] without a running session;
    /// [`HarnessError::Setup`] if the simulator fails.
    pub async fn apply_stimulus(&mut self, event: &StimulusEvent) -> Result<(), HarnessError> {
        if !self.is_running() {
            return Err(HarnessError::NotStarted);
        }
        debug!(line = %event.line, "input on");
        self.simulator.on(&event.line).await.map_err(HarnessError::Setup)?;
        self.simulator.run_for(event.hold).await.map_err(HarnessError::Setup)?;
        debug!(line = %event.line, "input off");
        self.simulator.off(&event.line).await.map_err(HarnessError::Setup)?;
        self.simulator.run_for(event.settle).await.map_err(HarnessError::Setup)?;
        self.drain_uart().await;

        self.clock
            .advance(Duration::from_millis(self.config.trial.propagation_ms))
            .await;
        Ok(())
    }

    /// Reads the configured numeric field from the shadow of `device_id`.
    ///
    /// One query, bounded by the observe timeout. Never retried here; see
    /// [`run_trial`](Self::run_trial) for the retry policy.
    ///
    /// # Errors
    ///
    /// [`HarnessError::Observation`] if the query fails or times out, the
    /// device has no shadow, or the field is absent or not numeric.
    pub async fn observe(&self, device_id: &str) -> Result<f64, HarnessError> {
        let query = self.store.get_shadow(device_id);
        let document = tokio::time::timeout(self.policy.timeout, query)
            .await
            .map_err(|_| HarnessError::observation(device_id, ShadowError::Timeout))?
            .map_err(|e| HarnessError::observation(device_id, e))?;
        let value = document
            .numeric_field_as(&self.config.shadow.field_path, self.config.shadow.conversion)
            .map_err(|e| HarnessError::observation(device_id, e))?;
        debug!(device_id, value, version = ?document.version(), "observed");
        Ok(value)
    }

    /// Checks `value` against the inclusive `window`.
    ///
    /// # Errors
    ///
    /// [`HarnessError::RangeAssertion`] if the value is outside the window.
    pub fn assert_in_range(value: f64, window: &AssertionWindow) -> Result<(), HarnessError> {
        if window.contains(value) {
            Ok(())
        } else {
            Err(HarnessError::RangeAssertion {
                value,
                window: *window,
            })
        }
    }

    /// Stops the simulator and the session.
    ///
    /// Without a session this is a no-op. The session is marked stopped even
    /// if the simulator fails to stop.
    ///
    /// # Errors
    ///
    /// [`HarnessError::Teardown`] if the simulator could not be stopped.
    pub async fn teardown(&mut self) -> Result<(), HarnessError> {
        let Some(session) = self.session.as_mut() else {
            return Ok(());
        };
        if session.state() == SessionState::Stopped {
            return Ok(());
        }
        let result = self.simulator.stop().await.map_err(HarnessError::Teardown);
        session.mark_stopped();
        if result.is_ok() {
            info!(session_id = %session.id, "virtual device stopped");
        }
        result
    }

    async fn stimulate_and_check(&mut self) -> (Result<f64, HarnessError>, u32) {
        let event = self.config.trial.stimulus.clone();
        if let Err(e) = self.apply_stimulus(&event).await {
            return (Err(e), 0);
        }

        let device_id = self.config.shadow.thing_name.clone();
        let window = self.config.trial.window;
        let mut attempts = 0;
        loop {
            attempts += 1;
            let checked = self
                .observe(&device_id)
                .await
                .and_then(|value| Self::assert_in_range(value, &window).map(|_| value));
            match checked {
                Ok(value) => return (Ok(value), attempts),
                Err(e) if attempts < self.policy.attempts => {
                    debug!(attempt = attempts, error = %e, "not converged, retrying");
                    self.clock.advance(self.policy.interval).await;
                }
                Err(e) => return (Err(e), attempts),
            }
        }
    }

    /// Runs one trial (stimulus, observe, assert) and records it.
    ///
    /// The outcome is returned rather than raised: a failed trial leaves the
    /// session usable for the next one unless the simulator itself failed.
    pub async fn run_trial(&mut self, index: u32) -> TrialRecord {
        let span = info_span!("trial", index);
        async {
            let start = Instant::now();
            let (result, attempts) = self.stimulate_and_check().await;
            let elapsed_ms = start.elapsed().as_millis() as u64;

            let outcome = match result {
                Ok(value) => {
                    info!(value, elapsed_ms, "trial passed");
                    TrialOutcome::Passed { value }
                }
                Err(e) => {
                    warn!(error = %e, elapsed_ms, "trial failed");
                    TrialOutcome::Failed {
                        kind: e.kind(),
                        value: e.value(),
                        message: e.to_string(),
                    }
                }
            };

            let record = TrialRecord::new(index, elapsed_ms, attempts, outcome);
            if let Some(session) = self.session.as_mut() {
                session.record(record.clone());
            }
            record
        }
        .instrument(span)
        .await
    }

    /// Runs the configured number of trials: setup, trials, teardown.
    pub async fn run(&mut self) -> RunReport {
        self.run_with_cancel(&CancellationToken::new()).await
    }

    /// Like [`run`](Self::run), stopping between trials once `cancel` fires.
    ///
    /// Teardown always runs, and its failure never hides a trial failure.
    /// In [`RunMode::FailFast`] the first failing trial ends the run.
    pub async fn run_with_cancel(&mut self, cancel: &CancellationToken) -> RunReport {
        let requested = self.config.trial.count;

        if let Err(e) = self.setup().await {
            error!(error = %e, "setup failed");
            let session_id = self.session.as_ref().map_or(Uuid::nil(), |s| s.id);
            let mut report = RunReport::new(session_id, requested);
            report.setup_error = Some(e.to_string());
            if let Err(te) = self.teardown().await {
                report.teardown_error = Some(te.to_string());
            }
            return report;
        }

        let session_id = self.session.as_ref().map_or(Uuid::nil(), |s| s.id);
        let mut report = RunReport::new(session_id, requested);

        for index in 1..=requested {
            if cancel.is_cancelled() {
                info!(completed = index - 1, "run cancelled");
                report.cancelled = true;
                break;
            }
            let record = self.run_trial(index).await;
            let failed = !record.passed();
            report.trials.push(record);
            if failed && self.config.trial.mode == RunMode::FailFast {
                break;
            }
        }

        if let Err(e) = self.teardown().await {
            error!(error = %e, "teardown failed");
            report.teardown_error = Some(e.to_string());
        }

        info!(
            passed = report.passed(),
            failed = report.failed(),
            requested,
            "run complete"
        );
        report
    }
}

impl std::fmt::Debug for ReconciliationHarness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReconciliationHarness")
            .field("config", &self.config)
            .field("policy", &self.policy)
            .field("simulator", &"<dyn DeviceSimulator>")
            .field("store", &"<dyn ShadowStore>")
            .field("session", &self.session)
            .finish()
    }
}
