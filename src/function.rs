//! Callable units: one piece of user logic, four invocation strategies.
//!
//! A [`Callable`] couples a qualified name, the owning script source, and a
//! native closure. The closure serves the in-process backend; the script
//! source feeds the execution-unit compiler for the isolated-subprocess and
//! remote backends. All strategies share one implementation parameterized
//! by backend kind:
//!
//! - [`Callable::call`]: plain native invocation, no dispatch machinery
//! - [`Callable::local`]: isolated local subprocess, blocking
//! - [`Callable::submit`]: asynchronous remote submission
//! - [`Callable::remote`]: blocking remote call (submit + await)
//!
//! Declaration-time configuration is fixed on the builder; call-time
//! overrides ride along in [`CallOptions`] and take the highest precedence.

use crate::codec::{self, ContentStore, EncodeOptions, ProxyPolicy};
use crate::config::{self, ConfigLayer, ConfigValue};
use crate::dispatch::{self, Dispatcher, DispatcherInner};
use crate::error::{DispatchError, Result};
use crate::guard;
use crate::task::{Backend, TaskFuture};
use crate::unit::{self, ScriptSource};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// Call-time overrides for one dispatch.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    target: Option<String>,
    walltime: Option<Duration>,
    config: ConfigLayer,
}

impl CallOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the execution target for this call.
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Override the walltime for this call.
    pub fn walltime(mut self, walltime: Duration) -> Self {
        self.walltime = Some(walltime);
        self
    }

    /// Set one call-time configuration key.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    fn into_layer(self) -> (Option<String>, ConfigLayer) {
        let mut layer = self.config;
        if let Some(walltime) = self.walltime {
            layer.insert(
                "walltime".to_string(),
                ConfigValue::Int(walltime.as_secs() as i64),
            );
        }
        (self.target, layer)
    }
}

/// A registered unit of user logic, dispatchable to any backend.
pub struct Callable<A, R> {
    name: String,
    source: ScriptSource,
    target: Option<String>,
    declaration: ConfigLayer,
    inner: Arc<DispatcherInner>,
    func: Arc<dyn Fn(A) -> R + Send + Sync>,
}

// Manual impl: the derive would demand `A: Clone` and `R: Clone`, which the
// shared `Arc` fields do not need.
impl<A, R> Clone for Callable<A, R> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            source: self.source.clone(),
            target: self.target.clone(),
            declaration: self.declaration.clone(),
            inner: Arc::clone(&self.inner),
            func: Arc::clone(&self.func),
        }
    }
}

// Manual impl: the `func` field is a boxed closure that cannot derive Debug.
impl<A, R> std::fmt::Debug for Callable<A, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callable")
            .field("name", &self.name)
            .field("source", &self.source)
            .field("target", &self.target)
            .field("declaration", &self.declaration)
            .finish_non_exhaustive()
    }
}

impl<A, R> Callable<A, R> {
    /// The qualified name used to resolve the callable inside a loaded
    /// execution unit.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The owning script source.
    pub fn source(&self) -> &ScriptSource {
        &self.source
    }

    /// The default target fixed at declaration time, if any.
    pub fn default_target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// Invoke the native implementation directly on the calling thread.
    ///
    /// This is a plain function call: no guard, no configuration, no codec.
    pub fn call(&self, args: A) -> R {
        (self.func)(args)
    }
}

impl<A, R> Callable<A, R>
where
    A: Serialize,
    R: DeserializeOwned,
{
    /// Dispatch to the chosen backend, returning a future over the result.
    ///
    /// The import-safety guard runs first, then exactly one effective
    /// configuration is resolved, then (for the subprocess and remote
    /// backends) the payload is encoded and the execution unit compiled,
    /// in that order, so every pre-submission failure is raised before any
    /// backend is touched.
    pub fn dispatch(
        &self,
        args: A,
        backend: Backend,
        options: CallOptions,
    ) -> Result<TaskFuture<R>> {
        guard::ensure_import_safe(&self.name, self.source.identity())?;

        let (call_target, call_layer) = options.into_layer();
        let target = call_target.or_else(|| self.target.clone());
        let config = config::resolve(
            target.as_deref(),
            &self.inner.layers,
            &self.declaration,
            &call_layer,
        )?;
        let config = Arc::new(config);

        match backend {
            Backend::InProcess => {
                let value = (self.func)(args);
                dispatch::record_in_process(&self.inner, &self.name);
                Ok(TaskFuture::ready(value, config))
            }
            Backend::Subprocess => {
                let store = ContentStore::at(&self.inner.settings.store_dir)?;
                let payload = codec::encode_with(
                    &args,
                    &EncodeOptions {
                        size_limit: None,
                        proxy: Some(ProxyPolicy {
                            store,
                            threshold: self.inner.settings.proxy_threshold,
                        }),
                    },
                )?;
                let unit = unit::compile(
                    &self.source,
                    &self.name,
                    &payload,
                    &config,
                    &self.inner.settings,
                )?;
                let (task, driver) = dispatch::submit_subprocess(&self.inner, &self.name, &unit)?;
                Ok(TaskFuture::tracked(
                    task,
                    driver,
                    self.inner.settings.subprocess_poll_interval,
                    Arc::clone(&self.inner.registry),
                    config,
                ))
            }
            Backend::Remote => {
                let endpoint = config
                    .endpoint()
                    .map(str::to_string)
                    .or(target)
                    .ok_or_else(|| self.no_target_error())?;
                let payload = codec::encode_with(
                    &args,
                    &EncodeOptions {
                        size_limit: self.inner.settings.payload_limit,
                        proxy: None,
                    },
                )?;
                let unit = unit::compile(
                    &self.source,
                    &self.name,
                    &payload,
                    &config,
                    &self.inner.settings,
                )?;
                let (task, driver) =
                    dispatch::submit_remote(&self.inner, &self.name, &endpoint, &unit, &config)?;
                Ok(TaskFuture::tracked(
                    task,
                    driver,
                    self.inner.settings.remote_poll_interval,
                    Arc::clone(&self.inner.registry),
                    config,
                ))
            }
        }
    }

    /// Submit for asynchronous remote execution.
    pub fn submit(&self, args: A, options: CallOptions) -> Result<TaskFuture<R>> {
        self.dispatch(args, Backend::Remote, options)
    }

    /// Execute remotely and block until the result is available.
    pub fn remote(&self, args: A, options: CallOptions) -> Result<R> {
        self.submit(args, options)?.result()
    }

    /// Execute in an isolated local subprocess and block for the result.
    pub fn local(&self, args: A) -> Result<R> {
        self.dispatch(args, Backend::Subprocess, CallOptions::new())?
            .result()
    }

    fn no_target_error(&self) -> DispatchError {
        let available: Vec<&str> = self.inner.layers.target_names().collect();
        if available.is_empty() {
            DispatchError::Configuration(format!(
                "no execution target specified for '{}'",
                self.name
            ))
        } else {
            DispatchError::Configuration(format!(
                "no execution target specified for '{}'. Available targets: {}. \
                 Pass CallOptions::target(...) or set a default on the builder.",
                self.name,
                available.join(", ")
            ))
        }
    }
}

impl Dispatcher {
    /// Start defining a callable backed by this dispatcher.
    pub fn callable<A, R>(
        &self,
        source: ScriptSource,
        qualified_name: impl Into<String>,
    ) -> CallableBuilder<A, R> {
        CallableBuilder {
            inner: Arc::clone(&self.inner),
            source,
            name: qualified_name.into(),
            target: None,
            declaration: ConfigLayer::new(),
            _types: PhantomData,
        }
    }
}

/// Builder for a [`Callable`], capturing declaration-time defaults.
pub struct CallableBuilder<A, R> {
    inner: Arc<DispatcherInner>,
    source: ScriptSource,
    name: String,
    target: Option<String>,
    declaration: ConfigLayer,
    _types: PhantomData<fn(A) -> R>,
}

impl<A, R> CallableBuilder<A, R> {
    /// Default execution target (`base` or `base.variant`).
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Declaration-time walltime default.
    pub fn walltime(mut self, walltime: Duration) -> Self {
        self.declaration.insert(
            "walltime".to_string(),
            ConfigValue::Int(walltime.as_secs() as i64),
        );
        self
    }

    /// Declaration-time configuration key.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.declaration.insert(key.into(), value.into());
        self
    }

    /// Attach the native implementation and finish.
    ///
    /// Fails if the qualified name is not a valid dotted identifier path.
    pub fn build<F>(self, func: F) -> Result<Callable<A, R>>
    where
        F: Fn(A) -> R + Send + Sync + 'static,
    {
        unit::validate_qualified_name(&self.name)?;
        Ok(Callable {
            name: self.name,
            source: self.source,
            target: self.target,
            declaration: self.declaration,
            inner: self.inner,
            func: Arc::new(func),
        })
    }
}
