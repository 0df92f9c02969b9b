//! Local subprocess executor.
//!
//! Writes a compiled execution unit into a task-scoped run directory,
//! spawns it with stdout/stderr redirected to log files (so no pipe ever
//! fills up behind an unread buffer), and drives it to a terminal state via
//! non-blocking polls. The unit's walltime is enforced here: a subprocess
//! that outlives it is killed and the task fails.

use crate::error::{DispatchError, Result};
use crate::events::{Event, EventAction, EventLog};
use crate::task::{Backend, Task, TaskDriver, TaskOutput, TaskState};
use crate::unit::ExecutionUnit;
use serde_json::json;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

pub(crate) struct SubprocessDriver {
    child: Mutex<Option<Child>>,
    stdout_path: PathBuf,
    stderr_path: PathBuf,
    deadline: Instant,
    walltime: Duration,
    events: EventLog,
}

impl SubprocessDriver {
    /// Write the unit into `run_dir` and spawn it.
    pub(crate) fn spawn(unit: &ExecutionUnit, run_dir: &Path, events: EventLog) -> Result<Self> {
        fs::create_dir_all(run_dir).map_err(|e| {
            DispatchError::Backend(format!(
                "failed to create run directory '{}': {}",
                run_dir.display(),
                e
            ))
        })?;

        let script_path = run_dir.join(format!("{}.sh", unit.name()));
        fs::write(&script_path, unit.script()).map_err(|e| {
            DispatchError::Backend(format!(
                "failed to write execution unit '{}': {}",
                script_path.display(),
                e
            ))
        })?;

        let stdout_path = run_dir.join("stdout.log");
        let stderr_path = run_dir.join("stderr.log");
        let stdout_file = fs::File::create(&stdout_path).map_err(|e| {
            DispatchError::Backend(format!(
                "failed to create stdout log '{}': {}",
                stdout_path.display(),
                e
            ))
        })?;
        let stderr_file = fs::File::create(&stderr_path).map_err(|e| {
            DispatchError::Backend(format!(
                "failed to create stderr log '{}': {}",
                stderr_path.display(),
                e
            ))
        })?;

        let child = Command::new("sh")
            .arg(&script_path)
            .current_dir(run_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout_file))
            .stderr(Stdio::from(stderr_file))
            .spawn()
            .map_err(|e| {
                DispatchError::Backend(format!(
                    "failed to spawn execution unit '{}': {}",
                    unit.name(),
                    e
                ))
            })?;

        Ok(Self {
            child: Mutex::new(Some(child)),
            stdout_path,
            stderr_path,
            deadline: Instant::now() + unit.walltime(),
            walltime: unit.walltime(),
            events,
        })
    }

    fn read_log(path: &Path) -> String {
        fs::read_to_string(path).unwrap_or_default()
    }

    /// Commit the terminal state for an exited subprocess.
    fn finalize_exit(&self, task: &Task, status: ExitStatus) {
        let output = TaskOutput {
            stdout: Self::read_log(&self.stdout_path),
            stderr: Self::read_log(&self.stderr_path),
            exit_code: status.code(),
        };
        let exit_code = output.exit_code;
        let to = if status.success() {
            TaskState::Completed
        } else {
            TaskState::Failed
        };
        if task.transition(to, Some(output)) {
            let action = if to == TaskState::Completed {
                EventAction::Completed
            } else {
                EventAction::Failed
            };
            self.events.record(
                Event::new(action, Backend::Subprocess, task.id().to_string())
                    .with_details(json!({ "exit_code": exit_code })),
            );
        }
    }

    /// Kill an over-deadline subprocess and fail the task.
    fn finalize_walltime(&self, task: &Task, child: &mut Child) {
        let _ = child.kill();
        let _ = child.wait();

        let mut stderr = Self::read_log(&self.stderr_path);
        if !stderr.is_empty() && !stderr.ends_with('\n') {
            stderr.push('\n');
        }
        stderr.push_str(&format!(
            "walltime of {}s exceeded; process killed",
            self.walltime.as_secs()
        ));

        let output = TaskOutput {
            stdout: Self::read_log(&self.stdout_path),
            stderr,
            exit_code: None,
        };
        if task.transition(TaskState::Failed, Some(output)) {
            self.events.record(
                Event::new(EventAction::Failed, Backend::Subprocess, task.id().to_string())
                    .with_details(json!({ "walltime_exceeded": true })),
            );
        }
    }

    fn lock_child(&self) -> std::sync::MutexGuard<'_, Option<Child>> {
        self.child.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for SubprocessDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubprocessDriver")
            .field("stdout_path", &self.stdout_path)
            .field("stderr_path", &self.stderr_path)
            .field("walltime", &self.walltime)
            .finish_non_exhaustive()
    }
}

impl TaskDriver for SubprocessDriver {
    fn poll(&self, task: &Task) {
        if task.is_terminal() {
            return;
        }
        let mut slot = self.lock_child();
        let Some(child) = slot.as_mut() else {
            return;
        };

        match child.try_wait() {
            Ok(Some(status)) => {
                self.finalize_exit(task, status);
                *slot = None;
            }
            Ok(None) => {
                if Instant::now() >= self.deadline {
                    self.finalize_walltime(task, child);
                    *slot = None;
                } else {
                    task.transition(TaskState::Running, None);
                }
            }
            Err(e) => {
                tracing::warn!(task = %task.id(), error = %e, "failed to check subprocess status");
            }
        }
    }

    fn cancel(&self, task: &Task) -> bool {
        let mut slot = self.lock_child();
        let Some(child) = slot.as_mut() else {
            return false;
        };

        // Whichever outcome the backend reports first wins: a process that
        // already exited finalizes naturally and the cancel is refused.
        if let Ok(Some(status)) = child.try_wait() {
            self.finalize_exit(task, status);
            *slot = None;
            return false;
        }

        let _ = child.kill();
        let _ = child.wait();
        *slot = None;

        let output = TaskOutput {
            stdout: Self::read_log(&self.stdout_path),
            stderr: Self::read_log(&self.stderr_path),
            exit_code: None,
        };
        if task.transition(TaskState::Cancelled, Some(output)) {
            self.events.record(Event::new(
                EventAction::Cancelled,
                Backend::Subprocess,
                task.id().to_string(),
            ));
            true
        } else {
            false
        }
    }
}
