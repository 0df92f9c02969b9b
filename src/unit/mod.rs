//! Execution-unit compiler.
//!
//! Compiles a self-contained shell script that couples three text blocks:
//! the user's code verbatim, a generated runner, and the encoded payload.
//! Executing the script (locally or on a remote worker) writes the blocks
//! out, launches the runner through the provisioning tool, and then prints
//! the result delimiter followed by the encoded return value.
//!
//! Compilation is pure text templating: no I/O, no environment reads. The
//! only failure modes are malformed inputs (an empty or invalid qualified
//! name, or user code that collides with the generated heredoc fences).

use crate::config::EffectiveConfig;
use crate::error::{DispatchError, Result};
use crate::settings::{DEFAULT_WALLTIME_SECS, ENV_LOG, ENV_STORE_DIR, Settings};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::sync::OnceLock;
use std::time::Duration;
use uuid::Uuid;

mod runner;

/// Fixed literal token that precedes the encoded result on standard output.
///
/// Its presence on its own line signals success; its absence together with
/// a non-zero exit status always means failure.
pub const RESULT_DELIMITER: &str = "__OFFLOAD_RESULT__";

/// The identity of a user script: a label, its code text, and its verbatim
/// inline environment-metadata block.
#[derive(Debug, Clone)]
pub struct ScriptSource {
    label: String,
    code: String,
    metadata: String,
}

impl ScriptSource {
    /// Create a script source.
    ///
    /// `label` identifies the script (typically the file stem or path);
    /// `metadata` is the inline dependency-declaration block, passed
    /// through verbatim so the runner provisions the identical environment.
    pub fn new(
        label: impl Into<String>,
        code: impl Into<String>,
        metadata: impl Into<String>,
    ) -> Self {
        Self {
            label: label.into(),
            code: code.into(),
            metadata: metadata.into(),
        }
    }

    /// The script identity used by the import-safety registry.
    pub fn identity(&self) -> &str {
        &self.label
    }

    /// The user code text.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// The verbatim environment-metadata block (may be empty).
    pub fn metadata(&self) -> &str {
        &self.metadata
    }
}

/// A compiled, self-contained execution unit.
///
/// Created per dispatch call and never reused; the payload differs between
/// calls even for the same callable.
#[derive(Debug, Clone)]
pub struct ExecutionUnit {
    name: String,
    script: String,
    walltime: Duration,
}

impl ExecutionUnit {
    /// The unit's unique name (label, content hash, random suffix).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The full shell script text.
    pub fn script(&self) -> &str {
        &self.script
    }

    /// The execution deadline resolved from configuration.
    pub fn walltime(&self) -> Duration {
        self.walltime
    }

    #[cfg(test)]
    pub(crate) fn from_raw_script(name: &str, script: &str, walltime: Duration) -> Self {
        Self {
            name: name.to_string(),
            script: script.to_string(),
            walltime,
        }
    }
}

/// Compile an execution unit from user code, a qualified callable name, an
/// already-encoded payload, and the resolved configuration.
pub fn compile(
    source: &ScriptSource,
    qualified_name: &str,
    payload: &str,
    config: &EffectiveConfig,
    settings: &Settings,
) -> Result<ExecutionUnit> {
    validate_qualified_name(qualified_name)?;

    let hash = content_hash(&source.code);
    let suffix = &Uuid::new_v4().simple().to_string()[..8];
    let name = format!("{}-{}-{}", sanitize_label(&source.label), hash, suffix);

    let fence = format!("OFFLOAD_EOF_{}", hash.to_uppercase());
    for (what, text) in [
        ("user code", source.code.as_str()),
        ("metadata", source.metadata.as_str()),
        ("payload", payload),
    ] {
        if text.contains(&fence) {
            return Err(DispatchError::InvalidCallable(format!(
                "{} for '{}' contains the fence token '{}'",
                what, qualified_name, fence
            )));
        }
    }

    let user_path = format!("{}.py", name);
    let runner_path = format!("{}_runner.py", name);
    let payload_path = format!("{}.in", name);
    let out_path = format!("{}.out", name);

    let runner = runner::render(
        source,
        qualified_name,
        &user_path,
        &payload_path,
        &out_path,
    );

    let script = format!(
        "#!/bin/sh\n\
         set -eu\n\
         \n\
         export {env_log}=\"{log_level}\"\n\
         export {env_store}=\"{store_dir}\"\n\
         \n\
         cat > {user_path} << '{fence}_USER'\n\
         {user_code}\n\
         {fence}_USER\n\
         \n\
         cat > {runner_path} << '{fence}_RUNNER'\n\
         {runner}\n\
         {fence}_RUNNER\n\
         \n\
         cat > {payload_path} << '{fence}_PAYLOAD'\n\
         {payload}\n\
         {fence}_PAYLOAD\n\
         \n\
         {uv} run {runner_path}\n\
         \n\
         echo \"{delimiter}\"\n\
         cat {out_path}\n",
        env_log = ENV_LOG,
        log_level = settings.log_level,
        env_store = ENV_STORE_DIR,
        store_dir = settings.store_dir.display(),
        user_path = user_path,
        fence = fence,
        user_code = source.code.trim_end_matches('\n'),
        runner_path = runner_path,
        runner = runner.trim_end_matches('\n'),
        payload_path = payload_path,
        payload = payload,
        uv = settings.uv_command_line(),
        delimiter = RESULT_DELIMITER,
    );

    let walltime = config
        .walltime()
        .unwrap_or(Duration::from_secs(DEFAULT_WALLTIME_SECS));

    Ok(ExecutionUnit {
        name,
        script,
        walltime,
    })
}

/// Validate a dotted qualified callable name.
pub(crate) fn validate_qualified_name(name: &str) -> Result<()> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$")
            .expect("qualified-name pattern is valid")
    });

    if name.is_empty() {
        return Err(DispatchError::InvalidCallable(
            "qualified name is empty".to_string(),
        ));
    }
    if !pattern.is_match(name) {
        return Err(DispatchError::InvalidCallable(format!(
            "'{}' is not a valid dotted qualified name",
            name
        )));
    }
    Ok(())
}

/// Short content hash for unit and fence naming.
fn content_hash(code: &str) -> String {
    let digest = Sha256::digest(code.as_bytes());
    digest
        .iter()
        .take(4)
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Restrict a script label to characters safe in file names.
fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "script".to_string()
    } else {
        cleaned
    }
}
