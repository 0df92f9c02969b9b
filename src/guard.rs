//! Import-safety guard.
//!
//! A dispatch call issued while a script is still loading is a footgun: the
//! spawned execution unit reloads the script on the other side, the reload
//! reaches the same dispatch call, and the process respawns itself forever.
//! The guard breaks that loop by refusing to dispatch any callable whose
//! owning script has not finished loading.
//!
//! The registry is process-wide and append-only: a script marked safe stays
//! safe for the process lifetime. Loaders hold a [`LoadGuard`] for the
//! duration of a script's load; the guard marks the script safe when it is
//! dropped, which is the hook point equivalent to "end of module load".
//!
//! Setting `OFFLOAD_NO_IMPORT_GUARD` disables the check for the whole
//! process; the switch is read once, on first use.

use crate::error::{DispatchError, Result};
use crate::settings::ENV_NO_IMPORT_GUARD;
use std::collections::HashSet;
use std::sync::{Mutex, OnceLock, PoisonError};

static SAFE_SCRIPTS: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();
static GUARD_DISABLED: OnceLock<bool> = OnceLock::new();

fn registry() -> &'static Mutex<HashSet<String>> {
    SAFE_SCRIPTS.get_or_init(|| Mutex::new(HashSet::new()))
}

fn guard_disabled() -> bool {
    *GUARD_DISABLED.get_or_init(|| disabled_from_env(std::env::var_os(ENV_NO_IMPORT_GUARD)))
}

fn disabled_from_env(value: Option<std::ffi::OsString>) -> bool {
    value.is_some_and(|v| !v.is_empty())
}

/// Mark a script as finished loading, making its callables dispatchable.
///
/// Idempotent. This performs no validation: it is the caller's
/// responsibility to only mark scripts that do not dispatch during their
/// own load.
pub fn mark_import_safe(script: &str) {
    registry()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(script.to_string());
}

/// Whether a script has been marked import-safe (always true when the
/// guard is disabled).
pub fn is_import_safe(script: &str) -> bool {
    if guard_disabled() {
        return true;
    }
    registry()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .contains(script)
}

/// Fail with `ModuleImport` unless the callable's owning script is safe.
///
/// Called by the dispatch layer before any effective configuration is
/// resolved or execution unit is built.
pub(crate) fn ensure_import_safe(callable: &str, script: &str) -> Result<()> {
    if is_import_safe(script) {
        Ok(())
    } else {
        tracing::debug!(callable, script, "dispatch blocked by import-safety guard");
        Err(DispatchError::ModuleImport {
            callable: callable.to_string(),
            script: script.to_string(),
        })
    }
}

/// RAII marker for a script load in progress.
///
/// While the guard is alive the script stays unsafe to dispatch against;
/// dropping it (or calling [`LoadGuard::complete`]) marks the script safe.
#[derive(Debug)]
pub struct LoadGuard {
    script: String,
}

impl LoadGuard {
    /// Begin loading a script.
    pub fn begin(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
        }
    }

    /// The script being loaded.
    pub fn script(&self) -> &str {
        &self.script
    }

    /// Finish the load explicitly.
    pub fn complete(self) {
        // Drop does the marking.
    }
}

impl Drop for LoadGuard {
    fn drop(&mut self) {
        mark_import_safe(&self.script);
    }
}
