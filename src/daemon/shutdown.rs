//! # Shutdown: idempotent trigger and the bounded termination sequence.
//!
//! ```text
//! trigger(Command | Signal)      first call wins; later calls are no-ops
//!   └─► publish ShutdownRequested, cancel trigger token (admission closes)
//!
//! ShutdownSequencer::run
//!   1. timeout(inflight_shutdown_timeout, sessions drained)
//!        ├─ Ok      → SessionsDrained
//!        └─ elapsed → DrainTimeout (waiting abandoned)
//!   2. instance token cancelled, tracker closed
//!   3. timeout(shutdown_timeout, join(server.graceful_stop(), tracker.wait()))
//!        ├─ Ok      → AllStoppedWithin
//!        └─ elapsed → server.force_stop(), GraceExceeded
//! ```
//!
//! The sequence always completes; a partial shutdown is reported, never returned as an error.

use std::future::Future;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::Config;
use crate::events::{Bus, Event, EventKind};

/// What started the shutdown.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShutdownSource {
    /// The control API's `shutdown` operation.
    Command,
    /// An OS termination signal.
    Signal,
}

impl ShutdownSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShutdownSource::Command => "command",
            ShutdownSource::Signal => "signal",
        }
    }
}

/// One-shot shutdown trigger shared by the control API and the signal listener.
pub struct ShutdownTrigger {
    token: CancellationToken,
    source: OnceLock<ShutdownSource>,
    bus: Bus,
}

impl ShutdownTrigger {
    pub fn new(bus: Bus) -> Self {
        Self {
            token: CancellationToken::new(),
            source: OnceLock::new(),
            bus,
        }
    }

    /// Triggers shutdown. Returns `false` if it was already triggered.
    pub fn trigger(&self, source: ShutdownSource) -> bool {
        if self.source.set(source).is_err() {
            return false;
        }
        self.bus
            .publish(Event::new(EventKind::ShutdownRequested).with_reason(source.as_str()));
        self.token.cancel();
        true
    }

    pub fn is_triggered(&self) -> bool {
        self.source.get().is_some()
    }

    /// The source of the first trigger.
    pub fn source(&self) -> Option<ShutdownSource> {
        self.source.get().copied()
    }

    /// Resolves once triggered.
    pub async fn triggered(&self) {
        self.token.cancelled().await
    }
}

/// A network service that can stop accepting work.
#[async_trait]
pub trait Stoppable: Send + Sync {
    /// Stops accepting connections and waits for in-flight calls to finish.
    async fn graceful_stop(&self);

    /// Drops every in-flight call immediately.
    fn force_stop(&self);
}

/// Outcome of a shutdown sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShutdownReport {
    /// All sessions finished within the in-flight timeout.
    pub drained: bool,
    /// Server and instances stopped within the shutdown timeout.
    pub stopped: bool,
}

/// Runs the bounded shutdown phases.
pub struct ShutdownSequencer {
    inflight_timeout: Duration,
    shutdown_timeout: Duration,
    bus: Bus,
}

impl ShutdownSequencer {
    pub fn new(cfg: &Config, bus: Bus) -> Self {
        Self {
            inflight_timeout: cfg.inflight_shutdown_timeout,
            shutdown_timeout: cfg.shutdown_timeout,
            bus,
        }
    }

    /// Waits for `drain`, then stops `server` and every instance on `tracker`.
    pub async fn run<D>(
        &self,
        drain: D,
        server: &dyn Stoppable,
        instances: &CancellationToken,
        tracker: &TaskTracker,
    ) -> ShutdownReport
    where
        D: Future<Output = ()>,
    {
        let drained = match time::timeout(self.inflight_timeout, drain).await {
            Ok(()) => {
                self.bus.publish(Event::new(EventKind::SessionsDrained));
                true
            }
            Err(_elapsed) => {
                self.bus.publish(
                    Event::new(EventKind::DrainTimeout).with_timeout(self.inflight_timeout),
                );
                false
            }
        };

        instances.cancel();
        tracker.close();
        let stop = async {
            tokio::join!(server.graceful_stop(), tracker.wait());
        };

        let stopped = match time::timeout(self.shutdown_timeout, stop).await {
            Ok(()) => {
                self.bus.publish(Event::new(EventKind::AllStoppedWithin));
                true
            }
            Err(_elapsed) => {
                server.force_stop();
                self.bus.publish(
                    Event::new(EventKind::GraceExceeded).with_timeout(self.shutdown_timeout),
                );
                false
            }
        };

        ShutdownReport { drained, stopped }
    }
}
