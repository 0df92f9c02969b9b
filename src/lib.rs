//! Offload: define a unit of work once, run it anywhere.
//!
//! A callable is registered once (a qualified name, its owning script, and
//! a native implementation) and can then be executed three interchangeable
//! ways without changing the call site:
//!
//! - **in-process**: direct invocation on the calling thread
//! - **local subprocess**: compiled into a self-contained execution unit
//!   and run in an isolated process
//! - **remote**: the same execution unit handed to a remote compute service
//!
//! The pieces that make the three modes behave identically are the layered
//! [`config`] resolver, the transport-safe [`codec`], the [`unit`] compiler
//! that couples code, environment declaration, and payload, the [`task`]
//! future layer, and the [`guard`] that keeps dispatch calls from firing
//! during a script's own load.
//!
//! ```no_run
//! use offload::{Backend, CallOptions, Dispatcher, ScriptSource};
//!
//! # fn main() -> offload::Result<()> {
//! let dispatcher = Dispatcher::from_env()?;
//!
//! let source = ScriptSource::new(
//!     "analysis.py",
//!     "def mean(values):\n    return sum(values) / len(values)\n",
//!     "# /// script\n# dependencies = []\n# ///",
//! );
//! offload::mark_import_safe("analysis.py");
//!
//! let mean = dispatcher
//!     .callable(source, "mean")
//!     .build(|(values,): (Vec<f64>,)| values.iter().sum::<f64>() / values.len() as f64)?;
//!
//! // Same call, three execution modes.
//! let direct = mean.call((vec![1.0, 2.0, 3.0],));
//! let isolated = mean.local((vec![1.0, 2.0, 3.0],))?;
//! let future = mean.submit(
//!     (vec![1.0, 2.0, 3.0],),
//!     CallOptions::new().target("cluster.gpu"),
//! )?;
//! let remote = future.result()?;
//! # let _ = (direct, isolated, remote, Backend::InProcess);
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod function;
pub mod guard;
pub mod settings;
pub mod task;
pub mod unit;

pub use config::{ConfigLayer, ConfigValue, EffectiveConfig, LayerSet, TargetLayer};
pub use dispatch::{Dispatcher, DispatcherBuilder, RemoteExecutor, RemoteStatus};
pub use error::{DispatchError, Result};
pub use function::{CallOptions, Callable, CallableBuilder};
pub use guard::{LoadGuard, is_import_safe, mark_import_safe};
pub use settings::Settings;
pub use task::{Backend, Task, TaskFuture, TaskState};
pub use unit::{ExecutionUnit, RESULT_DELIMITER, ScriptSource};

/// Install a tracing subscriber reading its filter from `OFFLOAD_LOG`.
///
/// Optional convenience for binaries; libraries embedding this crate will
/// usually install their own subscriber instead.
#[cfg(feature = "logging")]
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_env(settings::ENV_LOG)
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init();
}
