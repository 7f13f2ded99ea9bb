//! # LogWriter: tracing-backed event printer
//!
//! A subscriber that renders incoming [`Event`]s as structured `tracing` records.
//! Pass it to [`DaemonBuilder::with_subscribers`](crate::DaemonBuilder::with_subscribers); install
//! any `tracing` subscriber to see the output.
//!
//! ## Example output (fmt layer)
//! ```text
//! INFO  instance launched controller=0 workdir="/tmp/pipevisor-x/instance/0"
//! DEBUG state changed controller=0 from=created command=start to=started
//! WARN  controller unhealthy controller=0 from=ready command=execute-test to=unknown
//! INFO  session created session="8b1e..." controller=0
//! INFO  shutdown requested source="signal"
//! ```

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let reason = e.reason.as_deref().unwrap_or("");
        let session = e.session.as_deref().unwrap_or("");
        match e.kind {
            EventKind::InstanceLaunched => {
                info!(controller = ?e.controller, workdir = reason, "instance launched");
            }
            EventKind::InstanceCrashed => {
                error!(controller = ?e.controller, stream = reason, "instance crashed");
            }
            EventKind::InstanceExited => {
                info!(controller = ?e.controller, status = reason, "instance exited");
            }
            EventKind::StateChanged => {
                debug!(
                    controller = ?e.controller,
                    from = ?e.from,
                    command = ?e.command,
                    to = ?e.to,
                    "state changed"
                );
            }
            EventKind::ControllerUnhealthy => {
                warn!(
                    controller = ?e.controller,
                    from = ?e.from,
                    command = ?e.command,
                    to = ?e.to,
                    "controller unhealthy"
                );
            }
            EventKind::ConfigReloaded => {
                debug!(controller = ?e.controller, pipelines = ?e.count, "config reloaded");
            }
            EventKind::TestCompleted => {
                debug!(controller = ?e.controller, events = ?e.count, "test completed");
            }
            EventKind::PoolInstanceCreated => {
                info!(controller = ?e.controller, "pool instance created");
            }
            EventKind::PoolInstanceDiscarded => {
                warn!(remaining = ?e.count, "pool instance discarded");
            }
            EventKind::SessionCreated => {
                info!(session, controller = ?e.controller, "session created");
            }
            EventKind::SessionDestroyed => {
                if e.reason.is_some() {
                    warn!(session, controller = ?e.controller, error = reason, "session destroyed after failed teardown");
                } else {
                    info!(session, controller = ?e.controller, "session destroyed");
                }
            }
            EventKind::TestExecuted => {
                debug!(session, results = ?e.count, "test executed");
            }
            EventKind::ShutdownRequested => {
                info!(source = reason, "shutdown requested");
            }
            EventKind::SessionsDrained => {
                info!("sessions drained");
            }
            EventKind::DrainTimeout => {
                warn!(timeout_ms = ?e.timeout_ms, "timed out waiting for sessions to finish");
            }
            EventKind::AllStoppedWithin => {
                info!("all stopped within shutdown timeout");
            }
            EventKind::GraceExceeded => {
                warn!(timeout_ms = ?e.timeout_ms, "shutdown timeout exceeded; forcing stop");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
