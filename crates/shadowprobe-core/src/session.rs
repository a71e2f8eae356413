//! Session state for a simulated device under test.
//!
//! A [`Session`] is the handle to one running simulation: the firmware image
//! it runs, its lifecycle state, and the trials executed against it.
//!
//! # Architecture
//!
//! - Exactly one session exists per trial group; the harness creates it in
//!   `setup()` and stops it in `teardown()`
//! - Trial records are kept in a ring buffer (up to 1000 entries)
//! - Records are persisted to a JSON Lines file in the log directory
//! - State changes are broadcast as [`SessionEvent`]s so a runner can report
//!   progress while trials execute

use std::collections::VecDeque;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::warn;
use uuid::Uuid;

use crate::report::TrialRecord;
use crate::simulator::FirmwareImage;

/// Maximum number of trial records to retain in the ring buffer.
const MAX_TRIAL_LOG_SIZE: usize = 1000;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, simulation not started.
    Created,
    /// Firmware loaded and running.
    Running,
    /// Stopped; resources released.
    Stopped,
}

/// Events broadcast when session state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SessionEvent {
    /// The simulation started and warmed up.
    Started {
        /// The session identifier.
        session_id: Uuid,
        /// Firmware image running in the session.
        firmware: PathBuf,
    },

    /// A trial finished.
    TrialRecorded(TrialRecord),

    /// The session was stopped.
    Stopped {
        /// The session identifier.
        session_id: Uuid,
    },
}

/// State of one simulation session.
pub struct Session {
    /// The unique identifier for this session.
    pub id: Uuid,

    /// When this session was created.
    pub created_at: DateTime<Utc>,

    /// Name used for the trial log file.
    pub name: String,

    /// The firmware image this session runs.
    pub image: FirmwareImage,

    state: SessionState,

    /// Ring buffer of trial records.
    trial_log: VecDeque<TrialRecord>,

    event_tx: broadcast::Sender<SessionEvent>,

    log_path: Option<PathBuf>,

    /// Buffered writer for the JSON Lines trial log.
    log_writer: Option<BufWriter<std::fs::File>>,
}

impl Session {
    /// Creates a session in the [`SessionState::Created`] state.
    ///
    /// The trial log is created at `{log_dir}/{name}_{timestamp}_{id8}.jsonl`. If
    /// the file cannot be created the session still works; records are kept
    /// in memory only.
    pub fn new(
        name: &str,
        image: FirmwareImage,
        log_dir: &Path,
        event_tx: broadcast::Sender<SessionEvent>,
    ) -> Self {
        let created_at = Utc::now();
        let id = Uuid::new_v4();

        let timestamp = created_at.format("%Y%m%d_%H%M%S");
        let short_id = &id.simple().to_string()[..8];
        let log_path = log_dir.join(format!("{}_{}_{}.jsonl", name, timestamp, short_id));
        let log_writer = std::fs::create_dir_all(log_dir)
            .and_then(|_| std::fs::File::create(&log_path))
            .map(BufWriter::new);
        let (log_path, log_writer) = match log_writer {
            Ok(writer) => (Some(log_path), Some(writer)),
            Err(e) => {
                warn!(path = %log_path.display(), error = %e, "trial log disabled");
                (None, None)
            }
        };

        Self {
            id,
            created_at,
            name: name.to_string(),
            image,
            state: SessionState::Created,
            trial_log: VecDeque::with_capacity(64),
            event_tx,
            log_path,
            log_writer,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Path of the trial log, if one could be created.
    pub fn log_path(&self) -> Option<&Path> {
        self.log_path.as_deref()
    }

    /// Marks the session running and broadcasts [`SessionEvent::Started`].
    pub fn mark_running(&mut self) {
        self.state = SessionState::Running;
        let _ = self.event_tx.send(SessionEvent::Started {
            session_id: self.id,
            firmware: self.image.path.clone(),
        });
    }

    /// Marks the session stopped, flushes the log and broadcasts
    /// [`SessionEvent::Stopped`].
    pub fn mark_stopped(&mut self) {
        if self.state == SessionState::Stopped {
            return;
        }
        self.state = SessionState::Stopped;
        if let Some(writer) = self.log_writer.as_mut() {
            let _ = writer.flush();
        }
        let _ = self.event_tx.send(SessionEvent::Stopped { session_id: self.id });
    }

    /// Appends a trial record, persists it and broadcasts it.
    pub fn record(&mut self, record: TrialRecord) {
        if self.trial_log.len() >= MAX_TRIAL_LOG_SIZE {
            self.trial_log.pop_front();
        }
        self.trial_log.push_back(record.clone());

        if let Some(writer) = self.log_writer.as_mut() {
            if let Ok(json) = serde_json::to_string(&record) {
                let _ = writeln!(writer, "{}", json);
                let _ = writer.flush();
            }
        }

        // Ignore send errors - no subscribers is expected
        let _ = self.event_tx.send(SessionEvent::TrialRecorded(record));
    }

    /// Trial records in chronological order.
    pub fn trial_log(&self) -> Vec<TrialRecord> {
        self.trial_log.iter().cloned().collect()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("created_at", &self.created_at)
            .field("name", &self.name)
            .field("image", &self.image)
            .field("state", &self.state)
            .field("trial_log", &format!("<{} records>", self.trial_log.len()))
            .field("log_path", &self.log_path)
            .finish()
    }
}
