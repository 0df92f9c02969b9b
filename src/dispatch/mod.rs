//! Dispatch layer: hands compiled execution units to backends.
//!
//! A [`Dispatcher`] owns everything the three backends share: resolved
//! settings, the configuration layer set, the optional remote executor, the
//! registry of outstanding tasks, and the audit event log. Callables are
//! built through [`Dispatcher::callable`] and carry a handle back to this
//! shared state, so concurrent submissions from multiple threads only ever
//! contend on the task registry.
//!
//! Submission never blocks beyond in-memory bookkeeping and spawning; all
//! waiting happens in the future layer.

use crate::config::{EffectiveConfig, LayerSet};
use crate::error::{DispatchError, Result};
use crate::events::{Event, EventAction, EventLog};
use crate::settings::Settings;
use crate::task::{Backend, Task, TaskDriver, TaskRegistry};
use crate::unit::ExecutionUnit;
use serde_json::json;
use std::sync::Arc;

mod executor;
pub mod remote;

pub use remote::{RemoteExecutor, RemoteStatus};

use executor::SubprocessDriver;
use remote::RemoteDriver;

/// Shared state behind a dispatcher and all callables built from it.
pub(crate) struct DispatcherInner {
    pub(crate) settings: Settings,
    pub(crate) layers: LayerSet,
    pub(crate) remote: Option<Arc<dyn RemoteExecutor>>,
    pub(crate) registry: Arc<TaskRegistry>,
    pub(crate) events: EventLog,
}

/// Entry point for building callables and submitting work.
#[derive(Clone)]
pub struct Dispatcher {
    pub(crate) inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    /// Start building a dispatcher.
    pub fn builder() -> DispatcherBuilder {
        DispatcherBuilder::default()
    }

    /// Build a dispatcher from the process environment with no layers and
    /// no remote executor.
    pub fn from_env() -> Result<Self> {
        Self::builder().build()
    }

    /// The dispatcher's resolved settings.
    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// Number of outstanding (non-terminal, still referenced) tasks.
    pub fn active_tasks(&self) -> usize {
        self.inner.registry.len()
    }
}

/// Builder for [`Dispatcher`].
#[derive(Default)]
pub struct DispatcherBuilder {
    settings: Option<Settings>,
    layers: LayerSet,
    remote: Option<Arc<dyn RemoteExecutor>>,
}

impl DispatcherBuilder {
    /// Use explicit settings instead of reading the environment.
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    /// Provide the per-target configuration layers.
    pub fn layers(mut self, layers: LayerSet) -> Self {
        self.layers = layers;
        self
    }

    /// Attach the remote execution service collaborator.
    pub fn remote_executor(mut self, executor: Arc<dyn RemoteExecutor>) -> Self {
        self.remote = Some(executor);
        self
    }

    /// Finish building.
    pub fn build(self) -> Result<Dispatcher> {
        let settings = match self.settings {
            Some(settings) => settings,
            None => Settings::from_env()?,
        };
        let events = EventLog::in_dir(&settings.cache_dir);
        Ok(Dispatcher {
            inner: Arc::new(DispatcherInner {
                settings,
                layers: self.layers,
                remote: self.remote,
                registry: Arc::new(TaskRegistry::new()),
                events,
            }),
        })
    }
}

/// Spawn an execution unit in a local subprocess.
///
/// Returns immediately with a pending task and its driver; the unit's
/// walltime becomes the subprocess deadline.
pub(crate) fn submit_subprocess(
    inner: &DispatcherInner,
    callable: &str,
    unit: &ExecutionUnit,
) -> Result<(Arc<Task>, Arc<dyn TaskDriver>)> {
    let task = Arc::new(Task::new(Backend::Subprocess, callable, None));
    let run_dir = inner
        .settings
        .cache_dir
        .join("runs")
        .join(task.id().simple().to_string());

    let driver = SubprocessDriver::spawn(unit, &run_dir, inner.events.clone())?;

    inner.registry.register(Arc::clone(&task));
    inner.events.record(
        Event::new(
            EventAction::Submitted,
            Backend::Subprocess,
            task.id().to_string(),
        )
        .with_details(json!({
            "callable": callable,
            "unit": unit.name(),
            "walltime_secs": unit.walltime().as_secs(),
        })),
    );
    tracing::debug!(
        task = %task.id(),
        unit = unit.name(),
        "execution unit spawned in local subprocess"
    );

    Ok((task, Arc::new(driver)))
}

/// Hand an execution unit to the remote execution service.
pub(crate) fn submit_remote(
    inner: &DispatcherInner,
    callable: &str,
    endpoint: &str,
    unit: &ExecutionUnit,
    config: &EffectiveConfig,
) -> Result<(Arc<Task>, Arc<dyn TaskDriver>)> {
    let executor = inner.remote.as_ref().ok_or_else(|| {
        DispatchError::Configuration(
            "no remote executor configured; attach one with \
             Dispatcher::builder().remote_executor(...)"
                .to_string(),
        )
    })?;

    let remote_id = executor.submit(endpoint, unit, config)?;
    let task = Arc::new(Task::new(Backend::Remote, callable, Some(remote_id.clone())));

    let driver = RemoteDriver::new(Arc::clone(executor), remote_id.clone(), inner.events.clone());

    inner.registry.register(Arc::clone(&task));
    inner.events.record(
        Event::new(
            EventAction::Submitted,
            Backend::Remote,
            task.id().to_string(),
        )
        .with_details(json!({
            "callable": callable,
            "unit": unit.name(),
            "endpoint": endpoint,
            "remote_task": remote_id,
        })),
    );
    tracing::debug!(
        task = %task.id(),
        endpoint,
        "execution unit submitted to remote service"
    );

    Ok((task, Arc::new(driver)))
}

/// Record the synchronous lifecycle of an in-process dispatch.
pub(crate) fn record_in_process(inner: &DispatcherInner, callable: &str) {
    let task_id = uuid::Uuid::new_v4().to_string();
    inner.events.record(
        Event::new(EventAction::Submitted, Backend::InProcess, task_id.clone())
            .with_details(json!({ "callable": callable })),
    );
    inner.events.record(
        Event::new(EventAction::Completed, Backend::InProcess, task_id)
            .with_details(json!({ "callable": callable })),
    );
}
