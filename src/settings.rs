//! Process-wide settings and environment knobs.
//!
//! All tunables consumed by the dispatch core live here: the cache
//! directory for compiled units and run logs, the content-store directory
//! for large-object proxying, the payload size cap for the remote backend,
//! the provisioning-tool invocation, and the log verbosity that gets
//! propagated into compiled execution units.
//!
//! `Settings::from_env` reads the environment exactly once; the resulting
//! struct is immutable and cheap to clone.

use crate::error::{DispatchError, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Payload size cap for the remote backend (10 MB in the reference
/// deployment).
pub const PAYLOAD_SIZE_LIMIT_BYTES: usize = 10 * 1024 * 1024;

/// Default maximum execution time for a dispatched task, in seconds.
pub const DEFAULT_WALLTIME_SECS: u64 = 300;

/// How often a blocking wait re-checks a local subprocess.
pub const SUBPROCESS_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// How often a blocking wait re-polls the remote execution service.
pub const REMOTE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Cache directory override (compiled units, run logs, event log).
pub const ENV_CACHE_DIR: &str = "OFFLOAD_CACHE_DIR";

/// Content-store directory override, shared with spawned execution units.
pub const ENV_STORE_DIR: &str = "OFFLOAD_STORE_DIR";

/// Log verbosity, propagated into compiled execution units.
pub const ENV_LOG: &str = "OFFLOAD_LOG";

/// Disables the import-safety guard for the whole process.
pub const ENV_NO_IMPORT_GUARD: &str = "OFFLOAD_NO_IMPORT_GUARD";

/// Disables the remote payload size cap.
pub const ENV_NO_SIZE_LIMIT: &str = "OFFLOAD_NO_SIZE_LIMIT";

/// Overrides the provisioning-tool invocation (may carry arguments).
pub const ENV_UV_BIN: &str = "OFFLOAD_UV_BIN";

/// Resolved settings for a dispatcher instance.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Directory for compiled units, per-task run directories, and the
    /// dispatch event log.
    pub cache_dir: PathBuf,

    /// Directory backing the content store used for large-object proxying.
    pub store_dir: PathBuf,

    /// Verbosity propagated into compiled execution units via `OFFLOAD_LOG`.
    pub log_level: String,

    /// Remote payload cap in bytes; `None` disables the check.
    pub payload_limit: Option<usize>,

    /// Encoded-size threshold above which local-subprocess payloads are
    /// proxied through the content store.
    pub proxy_threshold: usize,

    /// Provisioning-tool invocation, already split into argv form.
    pub uv_command: Vec<String>,

    /// Poll cadence for remote task status.
    pub remote_poll_interval: Duration,

    /// Poll cadence for local subprocess status.
    pub subprocess_poll_interval: Duration,
}

impl Settings {
    /// Build settings from the process environment.
    ///
    /// Fails only if `OFFLOAD_UV_BIN` is set but cannot be parsed as a
    /// shell command line.
    pub fn from_env() -> Result<Self> {
        let cache_dir = match std::env::var_os(ENV_CACHE_DIR) {
            Some(dir) => PathBuf::from(dir),
            None => std::env::temp_dir().join(format!("offload-{}", std::process::id())),
        };

        let store_dir = match std::env::var_os(ENV_STORE_DIR) {
            Some(dir) => PathBuf::from(dir),
            None => cache_dir.join("store"),
        };

        let log_level = std::env::var(ENV_LOG).unwrap_or_else(|_| "info".to_string());

        let payload_limit = if std::env::var_os(ENV_NO_SIZE_LIMIT).is_some() {
            None
        } else {
            Some(PAYLOAD_SIZE_LIMIT_BYTES)
        };

        let uv_command = match std::env::var(ENV_UV_BIN) {
            Ok(raw) => parse_tool_command(&raw)?,
            Err(_) => vec!["uv".to_string()],
        };

        Ok(Self {
            cache_dir,
            store_dir,
            log_level,
            payload_limit,
            proxy_threshold: PAYLOAD_SIZE_LIMIT_BYTES,
            uv_command,
            remote_poll_interval: REMOTE_POLL_INTERVAL,
            subprocess_poll_interval: SUBPROCESS_POLL_INTERVAL,
        })
    }

    /// The provisioning-tool invocation as a single shell-quoted string,
    /// for embedding in a compiled unit.
    pub fn uv_command_line(&self) -> String {
        shell_words::join(self.uv_command.iter().map(String::as_str))
    }
}

/// Parse a provisioning-tool override into argv form.
fn parse_tool_command(raw: &str) -> Result<Vec<String>> {
    let parts = shell_words::split(raw).map_err(|e| {
        DispatchError::Configuration(format!(
            "failed to parse {} value '{}': {}",
            ENV_UV_BIN, raw, e
        ))
    })?;
    if parts.is_empty() {
        return Err(DispatchError::Configuration(format!(
            "{} is set but empty",
            ENV_UV_BIN
        )));
    }
    Ok(parts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn parse_tool_command_splits_arguments() {
        let parts = parse_tool_command("uvx --from uv uv").unwrap();
        assert_eq!(parts, vec!["uvx", "--from", "uv", "uv"]);
    }

    #[test]
    fn parse_tool_command_rejects_unbalanced_quotes() {
        let err = parse_tool_command("uv \"--managed").unwrap_err();
        assert!(err.to_string().contains("OFFLOAD_UV_BIN"));
    }

    #[test]
    fn parse_tool_command_rejects_empty() {
        assert!(parse_tool_command("").is_err());
        assert!(parse_tool_command("   ").is_err());
    }

    #[test]
    #[serial]
    fn from_env_defaults() {
        unsafe {
            std::env::remove_var(ENV_CACHE_DIR);
            std::env::remove_var(ENV_STORE_DIR);
            std::env::remove_var(ENV_LOG);
            std::env::remove_var(ENV_NO_SIZE_LIMIT);
            std::env::remove_var(ENV_UV_BIN);
        }

        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.payload_limit, Some(PAYLOAD_SIZE_LIMIT_BYTES));
        assert_eq!(settings.uv_command, vec!["uv".to_string()]);
        assert_eq!(settings.log_level, "info");
        assert_eq!(settings.store_dir, settings.cache_dir.join("store"));
    }

    #[test]
    #[serial]
    fn from_env_honors_overrides() {
        unsafe {
            std::env::set_var(ENV_CACHE_DIR, "/tmp/offload-test-cache");
            std::env::set_var(ENV_STORE_DIR, "/tmp/offload-test-store");
            std::env::set_var(ENV_LOG, "debug");
            std::env::set_var(ENV_NO_SIZE_LIMIT, "1");
            std::env::set_var(ENV_UV_BIN, "python -m uv");
        }

        let settings = Settings::from_env().unwrap();
        assert_eq!(settings.cache_dir, PathBuf::from("/tmp/offload-test-cache"));
        assert_eq!(settings.store_dir, PathBuf::from("/tmp/offload-test-store"));
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.payload_limit, None);
        assert_eq!(settings.uv_command, vec!["python", "-m", "uv"]);
        assert_eq!(settings.uv_command_line(), "python -m uv");

        unsafe {
            std::env::remove_var(ENV_CACHE_DIR);
            std::env::remove_var(ENV_STORE_DIR);
            std::env::remove_var(ENV_LOG);
            std::env::remove_var(ENV_NO_SIZE_LIMIT);
            std::env::remove_var(ENV_UV_BIN);
        }
    }
}
