//! # Instance contract: supervision of one engine process.
//!
//! The controller owns its [`Instance`]; the instance only receives a weak handle to
//! the narrow [`InstanceCallbacks`] capability set. Signals flow one way:
//!
//! ```text
//! Controller ──owns──► Box<dyn Instance>
//!     ▲                      │ start(token, Weak<dyn InstanceCallbacks>, workdir)
//!     │                      ▼
//!     └──── receive_event / pipelines_ready / signal_crash ◄── reader tasks
//! ```
//!
//! Reader tasks upgrade the weak handle per signal; once the controller is dropped
//! the signals are discarded and the lifetime token terminates the process.

use std::path::Path;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::InstanceError;

/// Signals an instance reports back about its engine process.
///
/// Implementations must not block: they are called from reader tasks.
pub trait InstanceCallbacks: Send + Sync + 'static {
    /// One JSON event line emitted by the engine.
    fn receive_event(&self, payload: String);

    /// The engine reported the given pipelines as started.
    fn pipelines_ready(&self, names: Vec<String>);

    /// An output stream of the engine closed unexpectedly.
    fn signal_crash(&self);
}

/// Supervision of one engine process.
#[async_trait]
pub trait Instance: Send + Sync + 'static {
    /// Spawns the engine rooted at `workdir` and wires its streams to `callbacks`.
    ///
    /// The process is terminated once `token` is cancelled.
    async fn start(
        &self,
        token: CancellationToken,
        callbacks: Weak<dyn InstanceCallbacks>,
        workdir: &Path,
    ) -> Result<(), InstanceError>;

    /// Asks the engine to reload `pipelines.yml` without restarting.
    async fn config_reload(&self) -> Result<(), InstanceError>;

    /// Kills the engine immediately. Idempotent.
    fn kill(&self);
}

/// Delivers a signal to the callbacks if the receiver is still alive.
pub(crate) fn with_callbacks(
    callbacks: &Weak<dyn InstanceCallbacks>,
    f: impl FnOnce(Arc<dyn InstanceCallbacks>),
) {
    if let Some(cb) = callbacks.upgrade() {
        f(cb);
    }
}
