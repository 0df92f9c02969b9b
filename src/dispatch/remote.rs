//! Remote execution service interface.
//!
//! The service is a black box that accepts a ready-to-run script plus an
//! opaque per-target endpoint configuration, hands back a task identifier,
//! and reports captured output and an exit status on completion. Everything
//! else (submission protocol, authentication, scheduling) belongs to the
//! collaborator implementing [`RemoteExecutor`].

use crate::config::EffectiveConfig;
use crate::error::Result;
use crate::events::{Event, EventAction, EventLog};
use crate::task::{Backend, Task, TaskDriver, TaskOutput, TaskState};
use crate::unit::ExecutionUnit;
use serde_json::json;
use std::sync::Arc;

/// Status of a remote task, as reported by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    /// Accepted but not yet running.
    Pending,
    /// Running on a worker.
    Running,
    /// Finished; exit status and captured streams are final.
    Finished {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },
}

/// Submit/poll interface to the remote execution service.
///
/// Implementations must be safe to share across threads; the dispatch layer
/// polls from whichever thread happens to be awaiting.
pub trait RemoteExecutor: Send + Sync {
    /// Submit a ready-to-run execution unit to an endpoint, returning the
    /// service's opaque task identifier.
    fn submit(
        &self,
        endpoint: &str,
        unit: &ExecutionUnit,
        config: &EffectiveConfig,
    ) -> Result<String>;

    /// Report the current status of a previously submitted task.
    fn poll(&self, backend_task_id: &str) -> Result<RemoteStatus>;

    /// Request cancellation; true if the service accepted the request.
    fn cancel(&self, backend_task_id: &str) -> Result<bool>;
}

/// Drives one remote task to a terminal state.
pub(crate) struct RemoteDriver {
    executor: Arc<dyn RemoteExecutor>,
    remote_id: String,
    events: EventLog,
}

impl RemoteDriver {
    pub(crate) fn new(
        executor: Arc<dyn RemoteExecutor>,
        remote_id: String,
        events: EventLog,
    ) -> Self {
        Self {
            executor,
            remote_id,
            events,
        }
    }
}

impl std::fmt::Debug for RemoteDriver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteDriver")
            .field("remote_id", &self.remote_id)
            .finish_non_exhaustive()
    }
}

impl TaskDriver for RemoteDriver {
    fn poll(&self, task: &Task) {
        if task.is_terminal() {
            return;
        }
        match self.executor.poll(&self.remote_id) {
            Ok(RemoteStatus::Pending) => {}
            Ok(RemoteStatus::Running) => {
                task.transition(TaskState::Running, None);
            }
            Ok(RemoteStatus::Finished {
                exit_code,
                stdout,
                stderr,
            }) => {
                let to = if exit_code == 0 {
                    TaskState::Completed
                } else {
                    TaskState::Failed
                };
                let output = TaskOutput {
                    stdout,
                    stderr,
                    exit_code: Some(exit_code),
                };
                if task.transition(to, Some(output)) {
                    let action = if to == TaskState::Completed {
                        EventAction::Completed
                    } else {
                        EventAction::Failed
                    };
                    self.events.record(
                        Event::new(action, Backend::Remote, task.id().to_string())
                            .with_details(json!({ "exit_code": exit_code })),
                    );
                }
            }
            Err(e) => {
                // A transient poll failure is not a task outcome.
                tracing::warn!(
                    task = %task.id(),
                    remote_task = %self.remote_id,
                    error = %e,
                    "failed to poll remote task"
                );
            }
        }
    }

    fn cancel(&self, task: &Task) -> bool {
        match self.executor.cancel(&self.remote_id) {
            Ok(true) => {
                if task.transition(TaskState::Cancelled, None) {
                    self.events.record(Event::new(
                        EventAction::Cancelled,
                        Backend::Remote,
                        task.id().to_string(),
                    ));
                    true
                } else {
                    false
                }
            }
            Ok(false) => false,
            Err(e) => {
                tracing::warn!(
                    task = %task.id(),
                    remote_task = %self.remote_id,
                    error = %e,
                    "failed to cancel remote task"
                );
                false
            }
        }
    }
}
