//! # Runtime events emitted by controllers, the pool, sessions and the daemon.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Instance events**: supervised process lifecycle (launched, crashed, exited)
//! - **Controller events**: state machine transitions and test progress
//! - **Session events**: pool checkout/return and session lifecycle
//! - **Shutdown events**: the phases of the graceful shutdown sequence
//!
//! The [`Event`] struct carries additional metadata such as timestamps, controller
//! id, session id, state transition details and reasons.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use pipevisor::{Command, ControllerState, Event, EventKind};
//!
//! let ev = Event::new(EventKind::StateChanged)
//!     .with_controller(3)
//!     .with_transition(ControllerState::Created, Command::Start, ControllerState::Started);
//!
//! assert_eq!(ev.kind, EventKind::StateChanged);
//! assert_eq!(ev.controller, Some(3));
//! assert_eq!(ev.to, Some(ControllerState::Started));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::engine::{Command, ControllerState};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Instance events ===
    /// Supervised engine process was spawned.
    ///
    /// Sets:
    /// - `controller`: controller id
    /// - `reason`: working directory
    InstanceLaunched,

    /// An output stream of the engine closed unexpectedly.
    ///
    /// Sets:
    /// - `controller`: controller id
    /// - `reason`: which stream closed
    InstanceCrashed,

    /// Engine process exited (after termination or on its own).
    ///
    /// Sets:
    /// - `controller`: controller id
    /// - `reason`: exit status
    InstanceExited,

    // === Controller events ===
    /// State machine applied a command.
    ///
    /// Sets:
    /// - `controller`: controller id
    /// - `from`, `command`, `to`: the applied transition
    StateChanged,

    /// State machine fell into `unknown` (undefined transition or crash).
    ///
    /// Sets:
    /// - `controller`: controller id
    /// - `from`, `command`, `to`: the offending transition
    ControllerUnhealthy,

    /// Engine was asked to reload its pipeline configuration.
    ///
    /// Sets:
    /// - `controller`: controller id
    /// - `count`: number of pipelines written
    ConfigReloaded,

    /// All expected events of the current test arrived.
    ///
    /// Sets:
    /// - `controller`: controller id
    /// - `count`: number of events received
    TestCompleted,

    // === Pool / session events ===
    /// Pool factory created a new controller.
    ///
    /// Sets:
    /// - `controller`: controller id
    /// - `count`: controllers now assigned
    PoolInstanceCreated,

    /// Pool discarded a controller returned as unclean.
    ///
    /// Sets:
    /// - `count`: controllers still held by the pool
    PoolInstanceDiscarded,

    /// Session was created and its setup finished.
    ///
    /// Sets:
    /// - `session`: session id
    /// - `controller`: leased controller id
    SessionCreated,

    /// Session was torn down and deregistered.
    ///
    /// Sets:
    /// - `session`: session id
    /// - `controller`: controller id
    /// - `reason`: teardown failure, if any
    SessionDestroyed,

    /// One test execution of a session finished.
    ///
    /// Sets:
    /// - `session`: session id
    /// - `count`: number of result events
    TestExecuted,

    // === Shutdown events ===
    /// Shutdown was triggered.
    ///
    /// Sets:
    /// - `reason`: trigger source ("command" or "signal")
    ShutdownRequested,

    /// All live sessions were destroyed within the drain timeout.
    SessionsDrained,

    /// Drain timeout elapsed with sessions still alive.
    ///
    /// Sets:
    /// - `timeout_ms`: configured drain timeout
    DrainTimeout,

    /// Control server and supervised instances stopped within the shutdown timeout.
    AllStoppedWithin,

    /// Shutdown timeout elapsed; the control server was force-stopped.
    ///
    /// Sets:
    /// - `timeout_ms`: configured shutdown timeout
    GraceExceeded,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Controller id, if applicable.
    pub controller: Option<usize>,
    /// Session id, if applicable.
    pub session: Option<Arc<str>>,
    /// State before a transition.
    pub from: Option<ControllerState>,
    /// Command applied to the state machine.
    pub command: Option<Command>,
    /// State after a transition.
    pub to: Option<ControllerState>,
    /// Generic counter (events, pipelines).
    pub count: Option<usize>,
    /// Timeout in milliseconds (compact).
    pub timeout_ms: Option<u32>,
    /// Human-readable reason (errors, paths, exit status).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            controller: None,
            session: None,
            from: None,
            command: None,
            to: None,
            count: None,
            timeout_ms: None,
            reason: None,
        }
    }

    /// Attaches a controller id.
    #[inline]
    pub fn with_controller(mut self, id: usize) -> Self {
        self.controller = Some(id);
        self
    }

    /// Attaches a session id.
    #[inline]
    pub fn with_session(mut self, id: impl Into<Arc<str>>) -> Self {
        self.session = Some(id.into());
        self
    }

    /// Attaches a state machine transition.
    #[inline]
    pub fn with_transition(
        mut self,
        from: ControllerState,
        command: Command,
        to: ControllerState,
    ) -> Self {
        self.from = Some(from);
        self.command = Some(command);
        self.to = Some(to);
        self
    }

    /// Attaches a counter.
    #[inline]
    pub fn with_count(mut self, n: usize) -> Self {
        self.count = Some(n);
        self
    }

    /// Attaches a timeout duration (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.timeout_ms = Some(ms);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[inline]
    pub fn is_shutdown_phase(&self) -> bool {
        matches!(
            self.kind,
            EventKind::ShutdownRequested
                | EventKind::SessionsDrained
                | EventKind::DrainTimeout
                | EventKind::AllStoppedWithin
                | EventKind::GraceExceeded
        )
    }
}
