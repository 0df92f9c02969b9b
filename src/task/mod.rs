//! Task handles and result futures for dispatched work.
//!
//! A [`Task`] represents one outstanding or completed dispatch. Its state
//! is monotonic: `Pending → Running → {Completed | Failed | Cancelled}`,
//! with `Running` optional for backends that report no intermediate state,
//! and the transition into a terminal state commits exactly once: a task
//! that finished naturally cannot be flipped to cancelled afterwards, and
//! vice versa.
//!
//! Callers interact through the typed [`TaskFuture`], which offers blocking
//! retrieval with optional timeout, a non-blocking terminal check, and
//! best-effort cancellation. Timing out a wait leaves the task running so
//! it can be awaited again.

use crate::codec;
use crate::config::EffectiveConfig;
use crate::error::{DispatchError, Result};
use crate::unit::RESULT_DELIMITER;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use uuid::Uuid;


/// Which execution strategy a task was dispatched to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Direct invocation on the calling thread.
    InProcess,
    /// Isolated local subprocess.
    Subprocess,
    /// Remote execution service.
    Remote,
}

impl Backend {
    /// Prefix used when forwarding captured user output.
    pub(crate) fn output_prefix(&self) -> &'static str {
        match self {
            Backend::InProcess => "[direct]",
            Backend::Subprocess => "[local]",
            Backend::Remote => "[remote]",
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::InProcess => write!(f, "in_process"),
            Backend::Subprocess => write!(f, "subprocess"),
            Backend::Remote => write!(f, "remote"),
        }
    }
}

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    /// Whether the state is terminal (no further transitions).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskState::Pending => "pending",
            TaskState::Running => "running",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
            TaskState::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// Raw output captured from a backend at terminal time.
#[derive(Debug, Clone, Default)]
pub struct TaskOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

#[derive(Debug)]
struct TaskShared {
    state: TaskState,
    output: Option<TaskOutput>,
    finished_at: Option<DateTime<Utc>>,
}

/// One outstanding or completed dispatch.
#[derive(Debug)]
pub struct Task {
    id: Uuid,
    backend: Backend,
    callable: String,
    backend_task_id: Option<String>,
    submitted_at: DateTime<Utc>,
    shared: Mutex<TaskShared>,
}

impl Task {
    pub(crate) fn new(backend: Backend, callable: &str, backend_task_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            backend,
            callable: callable.to_string(),
            backend_task_id,
            submitted_at: Utc::now(),
            shared: Mutex::new(TaskShared {
                state: TaskState::Pending,
                output: None,
                finished_at: None,
            }),
        }
    }

    /// The task's own identifier (distinct from any backend identifier).
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Which backend the task was dispatched to.
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// Qualified name of the dispatched callable.
    pub fn callable(&self) -> &str {
        &self.callable
    }

    /// Opaque identifier assigned by the backend (absent for in-process).
    pub fn backend_task_id(&self) -> Option<&str> {
        self.backend_task_id.as_deref()
    }

    /// When the task was handed to its backend.
    pub fn submitted_at(&self) -> DateTime<Utc> {
        self.submitted_at
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TaskState {
        self.lock().state
    }

    /// Whether the task has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.state().is_terminal()
    }

    /// Captured raw output, available once the task is terminal.
    pub fn output(&self) -> Option<TaskOutput> {
        self.lock().output.clone()
    }

    /// When the task reached its terminal state, if it has.
    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.lock().finished_at
    }

    /// Attempt a state transition, committing captured output for terminal
    /// states.
    ///
    /// Returns false without changing anything if the task is already
    /// terminal; whichever outcome commits first wins and sticks.
    pub(crate) fn transition(&self, to: TaskState, output: Option<TaskOutput>) -> bool {
        let mut shared = self.lock();
        if shared.state.is_terminal() {
            return false;
        }
        shared.state = to;
        if to.is_terminal() {
            shared.output = output;
            shared.finished_at = Some(Utc::now());
        }
        true
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TaskShared> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Backend-specific polling and cancellation for one task.
///
/// Implementations observe the backend without blocking and commit terminal
/// transitions onto the task; the future layer owns all waiting.
pub(crate) trait TaskDriver: Send + Sync + std::fmt::Debug {
    /// Check the backend once and finalize the task if it reports terminal.
    fn poll(&self, task: &Task);

    /// Best-effort cancellation; true if the backend accepted it.
    fn cancel(&self, task: &Task) -> bool;
}

/// Registry of outstanding tasks.
///
/// The only shared mutable state in the dispatch layer; guarded so that
/// concurrent submissions and removals from multiple threads never
/// interfere.
#[derive(Debug, Default)]
pub(crate) struct TaskRegistry {
    tasks: Mutex<HashMap<Uuid, Arc<Task>>>,
}

impl TaskRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self, task: Arc<Task>) {
        self.lock().insert(task.id(), task);
    }

    pub(crate) fn remove(&self, id: &Uuid) {
        self.lock().remove(id);
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Arc<Task>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

enum FutureState<R> {
    /// In-process dispatch: the value is already here.
    Ready(Mutex<Option<R>>),
    /// Subprocess or remote dispatch: a live task driven by a backend.
    Tracked {
        task: Arc<Task>,
        driver: Arc<dyn TaskDriver>,
        poll_interval: Duration,
        registry: Arc<TaskRegistry>,
    },
}

/// Typed handle to one dispatched task's eventual result.
///
/// Obtained from `submit`; the blocking surfaces (`remote`, `local`) await
/// one internally. The effective configuration the dispatch resolved is
/// exposed read-only via [`TaskFuture::config`].
pub struct TaskFuture<R> {
    state: FutureState<R>,
    config: Arc<EffectiveConfig>,
}

impl<R> TaskFuture<R> {
    pub(crate) fn ready(value: R, config: Arc<EffectiveConfig>) -> Self {
        Self {
            state: FutureState::Ready(Mutex::new(Some(value))),
            config,
        }
    }

    pub(crate) fn tracked(
        task: Arc<Task>,
        driver: Arc<dyn TaskDriver>,
        poll_interval: Duration,
        registry: Arc<TaskRegistry>,
        config: Arc<EffectiveConfig>,
    ) -> Self {
        Self {
            state: FutureState::Tracked {
                task,
                driver,
                poll_interval,
                registry,
            },
            config,
        }
    }

    /// The effective configuration resolved for this dispatch.
    pub fn config(&self) -> &EffectiveConfig {
        &self.config
    }

    /// The underlying task handle, if the backend produced one.
    pub fn task(&self) -> Option<&Arc<Task>> {
        match &self.state {
            FutureState::Ready(_) => None,
            FutureState::Tracked { task, .. } => Some(task),
        }
    }

    /// Current task state.
    pub fn state(&self) -> TaskState {
        match &self.state {
            FutureState::Ready(_) => TaskState::Completed,
            FutureState::Tracked { task, .. } => task.state(),
        }
    }

    /// Non-blocking check: has the task reached a terminal state?
    ///
    /// Never fails; backend polling errors leave the task non-terminal.
    pub fn done(&self) -> bool {
        match &self.state {
            FutureState::Ready(_) => true,
            FutureState::Tracked { task, driver, .. } => {
                driver.poll(task);
                task.is_terminal()
            }
        }
    }

    /// Best-effort cancellation.
    ///
    /// Returns false for in-process tasks (already completed synchronously)
    /// and for tasks already in a terminal state; a cancel that races
    /// natural completion loses if the backend committed first.
    pub fn cancel(&self) -> bool {
        match &self.state {
            FutureState::Ready(_) => false,
            FutureState::Tracked { task, driver, .. } => {
                if task.is_terminal() {
                    return false;
                }
                driver.cancel(task)
            }
        }
    }

    /// Block until the task reaches a terminal state and return its result.
    pub fn result(&self) -> Result<R>
    where
        R: DeserializeOwned,
    {
        self.wait(None)
    }

    /// Like [`TaskFuture::result`], but give up after `timeout`.
    ///
    /// On timeout the underlying task keeps running and the future can be
    /// awaited again.
    pub fn result_timeout(&self, timeout: Duration) -> Result<R>
    where
        R: DeserializeOwned,
    {
        self.wait(Some(timeout))
    }

    fn wait(&self, timeout: Option<Duration>) -> Result<R>
    where
        R: DeserializeOwned,
    {
        match &self.state {
            FutureState::Ready(slot) => slot
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take()
                .ok_or_else(|| {
                    DispatchError::Backend("result was already retrieved".to_string())
                }),
            FutureState::Tracked {
                task,
                driver,
                poll_interval,
                registry,
            } => {
                let deadline = timeout.map(|t| Instant::now() + t);
                loop {
                    driver.poll(task);
                    if task.is_terminal() {
                        break;
                    }
                    let sleep = match deadline {
                        Some(deadline) => {
                            let now = Instant::now();
                            if now >= deadline {
                                return Err(DispatchError::Timeout(
                                    timeout.unwrap_or_default(),
                                ));
                            }
                            (*poll_interval).min(deadline - now)
                        }
                        None => *poll_interval,
                    };
                    std::thread::sleep(sleep);
                }
                registry.remove(&task.id());
                finish(task)
            }
        }
    }
}

impl<R> Drop for TaskFuture<R> {
    fn drop(&mut self) {
        if let FutureState::Tracked { task, registry, .. } = &self.state {
            registry.remove(&task.id());
        }
    }
}

impl<R> std::fmt::Debug for TaskFuture<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.state {
            FutureState::Ready(_) => f.debug_struct("TaskFuture").field("state", &"ready").finish(),
            FutureState::Tracked { task, .. } => f
                .debug_struct("TaskFuture")
                .field("task", &task.id())
                .field("state", &task.state())
                .finish(),
        }
    }
}

/// Convert a terminal task into a typed result.
fn finish<R: DeserializeOwned>(task: &Task) -> Result<R> {
    let output = task.output().unwrap_or_default();
    match task.state() {
        TaskState::Completed => {
            let (user_output, encoded) = split_result(&output.stdout);
            forward_output(task.backend(), user_output, &output.stderr);
            codec::decode(encoded)
        }
        TaskState::Failed => Err(DispatchError::Execution {
            exit_code: output.exit_code,
            stdout: output.stdout,
            stderr: output.stderr,
        }),
        TaskState::Cancelled => Err(DispatchError::Cancelled),
        state => Err(DispatchError::Backend(format!(
            "task finished in non-terminal state {}",
            state
        ))),
    }
}

/// Split captured stdout into user output and the encoded result.
///
/// Everything before the delimiter is user output; everything after it is
/// the encoded result. Without a delimiter the whole capture is treated as
/// the result (decoding then reports what went wrong).
pub(crate) fn split_result(stdout: &str) -> (Option<&str>, &str) {
    match stdout.split_once(RESULT_DELIMITER) {
        Some((user, encoded)) => (
            Some(user.trim_end_matches('\n')),
            encoded.trim_start_matches('\n'),
        ),
        None => (None, stdout),
    }
}

/// Re-emit captured user output on the caller's streams, tagged by backend.
fn forward_output(backend: Backend, user_output: Option<&str>, stderr: &str) {
    let prefix = backend.output_prefix();
    if let Some(user_output) = user_output
        && !user_output.is_empty()
    {
        for line in user_output.lines() {
            println!("{} {}", prefix, line);
        }
    }
    if !stderr.is_empty() {
        for line in stderr.lines() {
            eprintln!("{} {}", prefix, line);
        }
    }
}
