//! Dispatch audit log.
//!
//! Append-only NDJSON record of task lifecycle transitions (one JSON object
//! per line) in `<cache_dir>/events.ndjson`. Each event carries:
//!
//! - `ts`: RFC3339 timestamp
//! - `action`: submitted, completed, failed, or cancelled
//! - `actor`: the owner string (e.g., `user@HOST`)
//! - `backend`: which backend ran the task
//! - `task`: the task identifier
//! - `details`: freeform object with action-specific details
//!
//! Appends are best-effort: a failed write is logged and never fails the
//! dispatch that produced it.

use crate::error::{DispatchError, Result};
use crate::task::Backend;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Lifecycle transitions recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventAction {
    /// Task handed to a backend.
    Submitted,
    /// Task reached the completed state.
    Completed,
    /// Task reached the failed state.
    Failed,
    /// Task reached the cancelled state.
    Cancelled,
}

impl std::fmt::Display for EventAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventAction::Submitted => write!(f, "submitted"),
            EventAction::Completed => write!(f, "completed"),
            EventAction::Failed => write!(f, "failed"),
            EventAction::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// One record in the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// RFC3339 timestamp when the event occurred.
    pub ts: DateTime<Utc>,

    /// The lifecycle transition.
    pub action: EventAction,

    /// Who owns the dispatching process (e.g., `user@HOST`).
    pub actor: String,

    /// Which backend the task ran on.
    pub backend: Backend,

    /// The task identifier.
    pub task: String,

    /// Freeform details (callable name, exit code, target, ...).
    pub details: Value,
}

impl Event {
    /// Create a new event for a task.
    pub fn new(action: EventAction, backend: Backend, task: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            action,
            actor: actor_string(),
            backend,
            task: task.into(),
            details: Value::Object(serde_json::Map::new()),
        }
    }

    /// Attach a details object to this event.
    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    /// Serialize the event to a single-line JSON string.
    pub fn to_ndjson_line(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| DispatchError::Backend(format!("failed to serialize event: {}", e)))
    }
}

/// Get the actor string for event metadata.
fn actor_string() -> String {
    let user = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string());

    let host = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    format!("{}@{}", user, host)
}

/// Handle to the append-only event log.
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    /// Event log rooted in the given cache directory.
    pub fn in_dir(cache_dir: &Path) -> Self {
        Self {
            path: cache_dir.join("events.ndjson"),
        }
    }

    /// Path of the underlying NDJSON file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an event, creating the file and its directory as needed.
    pub fn append(&self, event: &Event) -> Result<()> {
        let line = event.to_ndjson_line()?;

        if let Some(dir) = self.path.parent()
            && !dir.exists()
        {
            fs::create_dir_all(dir).map_err(|e| {
                DispatchError::Backend(format!(
                    "failed to create event log directory '{}': {}",
                    dir.display(),
                    e
                ))
            })?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| {
                DispatchError::Backend(format!(
                    "failed to open event log '{}': {}",
                    self.path.display(),
                    e
                ))
            })?;

        writeln!(file, "{}", line).map_err(|e| {
            DispatchError::Backend(format!(
                "failed to write event log '{}': {}",
                self.path.display(),
                e
            ))
        })
    }

    /// Append an event, swallowing (but logging) any failure.
    ///
    /// The audit log must never fail a dispatch.
    pub(crate) fn record(&self, event: Event) {
        if let Err(e) = self.append(&event) {
            tracing::warn!(error = %e, "dropping audit event");
        }
    }
}
