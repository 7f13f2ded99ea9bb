//! # pipevisor
//!
//! **Pipevisor** is a test-execution daemon for pipeline configurations.
//!
//! It supervises a bounded pool of pipeline-engine processes, leases one engine to
//! each test session, pushes sample input lines through the configuration under test
//! and returns the events the engine produced. Clients talk to it over a local
//! control socket.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!        client (JSON lines over a Unix socket)
//!                          │
//!                          ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Daemon                                                           │
//! │  - ControlServer ──► DaemonService (ControlApi)                   │
//! │  - ShutdownTrigger (command or OS signal)                         │
//! │  - ShutdownSequencer (drain, stop, report)                        │
//! └──────────────────────────────┬────────────────────────────────────┘
//!                                ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  SessionController (one live session at a time)                   │
//! │  - Session: setup → execute* → teardown                           │
//! │  - ConfigRewriter (input/output substitution)                     │
//! └──────────────────────────────┬────────────────────────────────────┘
//!                                ▼
//!            Pool<LogstashFactory> (lease / return / discard)
//!                                │
//!           ┌────────────────────┼────────────────────┐
//!           ▼                    ▼                    ▼
//!     ┌────────────┐       ┌────────────┐       ┌────────────┐
//!     │ Controller │       │ Controller │       │ Controller │
//!     │ (states)   │       │ (states)   │       │ (states)   │
//!     └─────┬──────┘       └─────┬──────┘       └─────┬──────┘
//!           ▼                    ▼                    ▼
//!     LogstashInstance     LogstashInstance     LogstashInstance
//!     (engine process)     (engine process)     (engine process)
//!           │                    │                    │
//!           │ Publishes          │ Publishes          │ Publishes
//!           │ - StateChanged     │ - InstanceLaunched │ - InstanceCrashed
//!           │ - ConfigReloaded   │ - TestExecuted     │ - ...
//!           ▼                    ▼                    ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                        Bus (broadcast channel)                    │
//! │                    (capacity: Config::bus_capacity)               │
//! └─────────────────────────────────┬─────────────────────────────────┘
//!                                   ▼
//!                       ┌────────────────────────┐
//!                       │  subscriber_listener   │
//!                       │      (in Daemon)       │
//!                       └───────────┬────────────┘
//!                                   ▼
//!                             SubscriberSet
//!                            (per-sub queues)
//!                        ┌──────────┼──────────┐
//!                        ▼          ▼          ▼
//!                    LogWriter    sub2       subN
//! ```
//!
//! ### Controller lifecycle
//! ```text
//! Created ──Start──► Started ──PipelineReady──► Ready
//!
//! loop per session {
//!   ├─► SetupTest       Ready ──► SettingUpTest ──PipelineReady──► ReadyForTest
//!   ├─► ExecuteTest*    ReadyForTest ──► ExecutingTest ──PipelineReady──► RunningTest
//!   │                      └─ TestComplete (all expected events) ──► ReadyForTest
//!   └─► Teardown        ReadyForTest ──► Started ──PipelineReady──► Ready
//! }
//!
//! Crash or an undefined transition ──► Unknown (terminal; discarded by the pool)
//! ```
//!
//! ## Features
//! | Area              | Description                                                  | Key types / traits                        |
//! |-------------------|--------------------------------------------------------------|-------------------------------------------|
//! | **Daemon**        | Control socket, admission and bounded shutdown.              | [`Daemon`], [`ControlApi`]                |
//! | **Sessions**      | Lease an engine, lay out configs, run inputs, collect events.| [`SessionController`], [`Session`]        |
//! | **Engines**       | Drive one engine process through the test protocol.          | [`Controller`], [`Instance`]              |
//! | **Pool**          | Bounded reuse of engine controllers.                         | [`Pool`], [`Factory`]                     |
//! | **Subscriber API**| Hook into lifecycle events (logging, metrics, custom).       | [`Subscribe`]                             |
//! | **Errors**        | Typed errors with stable labels.                             | [`ControllerError`], [`DaemonError`]      |
//! | **Configuration** | Centralize runtime settings.                                 | [`Config`]                                |
//!
//! ## Optional features
//! - `logging`: exports the built-in [`LogWriter`] subscriber (enabled by default).
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use pipevisor::{Config, Daemon, Subscribe};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = Config {
//!         socket: "/tmp/pipevisor.sock".into(),
//!         max_instances: 2,
//!         ..Config::default()
//!     };
//!
//!     #[cfg(feature = "logging")]
//!     let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(pipevisor::LogWriter::new())];
//!     #[cfg(not(feature = "logging"))]
//!     let subs: Vec<Arc<dyn Subscribe>> = Vec::new();
//!
//!     let daemon = Daemon::builder(cfg).with_subscribers(subs).build();
//!     let report = daemon.run().await?;
//!     if !report.drained {
//!         eprintln!("sessions were still running at shutdown");
//!     }
//!     Ok(())
//! }
//! ```
pub mod config;
pub mod daemon;
pub mod engine;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod pool;
pub mod session;
pub mod subscribers;

// ---- Public re-exports ----

pub use config::Config;
pub use daemon::{
    ControlApi, ControlServer, Daemon, DaemonBuilder, ShutdownReport, ShutdownSource,
};
pub use engine::{
    Command, Controller, ControllerConfig, ControllerState, Instance, InstanceCallbacks,
    StateMachine,
};
pub use error::{
    ControllerError, DaemonError, InstanceError, PoolError, SessionError, StateError,
};
pub use events::{Bus, Event, EventKind};
pub use pipeline::Pipeline;
pub use pool::{Factory, Pool};
pub use session::{ConfigFile, ConfigRewriter, PassthroughRewriter, Session, SessionController};
pub use subscribers::{Subscribe, SubscriberSet};

// Optional: expose the built-in logger subscriber.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
