//! Error types for the offload dispatch core.
//!
//! Uses thiserror for derive macros. Every failure that can be detected
//! before a task is handed to a backend (configuration, serialization,
//! payload size, import safety, malformed compile inputs) is raised before
//! any submission occurs; only `Execution` and `Timeout` can surface after
//! submission, and neither is retried by this crate.

use std::time::Duration;
use thiserror::Error;

/// Main error type for dispatch operations.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The requested execution target or one of its layers cannot be resolved.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A value cannot round-trip through the payload codec.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The encoded payload exceeds the size limit for the remote backend.
    ///
    /// Carries the measured size so callers can react (chunk the input, use
    /// shared storage, or proxy the object) instead of guessing.
    #[error("payload size ({size} bytes) exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    /// A dispatch call was attempted while the callable's owning script is
    /// still loading.
    ///
    /// Allowing the call would let the spawned execution unit reload the
    /// script and re-enter the same dispatch call, respawning forever.
    #[error(
        "cannot dispatch '{callable}' while script '{script}' is still loading.\n\
         Move the call out of the script's load path, or call \
         mark_import_safe(\"{script}\") once the script is known not to \
         dispatch during its own load."
    )]
    ModuleImport { callable: String, script: String },

    /// A callable reference or execution-unit input is malformed (empty or
    /// invalid qualified name, fence collision in user code).
    #[error("invalid callable: {0}")]
    InvalidCallable(String),

    /// The backend reported a non-zero exit or terminal failure.
    ///
    /// `stdout` and `stderr` hold the captured streams verbatim; the
    /// display form shows only the tail of each.
    #[error("{}", render_execution(.exit_code, .stdout, .stderr))]
    Execution {
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    /// A blocking wait exceeded the caller's timeout.
    ///
    /// The underlying task is left running; the caller may await it again.
    #[error("timed out after {0:?} waiting for task completion")]
    Timeout(Duration),

    /// Result retrieval was attempted on a cancelled task.
    #[error("task was cancelled")]
    Cancelled,

    /// A backend could not be reached or driven (spawn failure, transport
    /// error). Distinct from `PayloadTooLarge`, which is always raised
    /// before any backend interaction.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Result type alias for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Render an execution failure with bounded stream tails.
fn render_execution(exit_code: &Option<i32>, stdout: &str, stderr: &str) -> String {
    let code = exit_code.map_or_else(|| "none (killed)".to_string(), |c| c.to_string());
    format!(
        "execution failed\n\nexit code: {}\n\n   stdout:\n{}\n\n   stderr:\n{}",
        code,
        tail(stdout),
        tail(stderr)
    )
}

/// Keep the last few lines of a captured stream for display.
///
/// The full text stays on the error variant; this only bounds what ends up
/// in the rendered message.
fn tail(text: &str) -> String {
    let trimmed = text.trim_start_matches('\n').trim_end();
    let start = trimmed
        .char_indices()
        .rev()
        .take(1024)
        .last()
        .map_or(0, |(i, _)| i);
    let window = &trimmed[start..];
    let lines: Vec<&str> = window.lines().collect();
    let kept = &lines[lines.len().saturating_sub(10)..];
    let shown = kept.join("\n");
    if shown.len() < trimmed.len() {
        format!("[... truncated ...]\n{}", shown)
    } else {
        shown
    }
}
