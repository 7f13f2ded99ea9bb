//! # Engine supervision: one controller per engine process.
//!
//! ```text
//! Pool ──Factory──► LogstashFactory::create(n)
//!                      │
//!                      ▼
//!                   Controller ──owns──► StateMachine (watch<ControllerState>)
//!                      │  ▲             ReceivedEvents / PipelineReadiness
//!                      │  │             Workdir (pipelines.yml)
//!                owns  │  │ Weak<dyn InstanceCallbacks>
//!                      ▼  │
//!                   LogstashInstance ──► stdout / stderr readers, log tail, supervisor
//! ```
//!
//! - [`state`]: the transition table.
//! - [`StateMachine`]: monitored state with cancellable waits.
//! - [`Controller`]: the blocking setup/execute/teardown protocol.
//! - [`Instance`] / [`InstanceCallbacks`]: the process contract and its signals.
//! - [`LogstashInstance`] / [`LogstashFactory`]: the concrete engine and its pool factory.

mod controller;
mod factory;
mod instance;
mod logstash;
mod logtail;
pub mod state;
mod state_machine;
mod tracker;
mod workdir;

#[cfg(test)]
pub(crate) mod testing;

pub use controller::{Controller, ControllerConfig};
pub use factory::LogstashFactory;
pub use instance::{Instance, InstanceCallbacks};
pub use logstash::{LogstashInstance, LogstashSettings};
pub use logtail::{LogSignal, parse_line};
pub use state::{Command, ControllerState};
pub use state_machine::StateMachine;
pub use tracker::{PIPELINES_RUNNING, PipelineReadiness, ReceivedEvents};
pub use workdir::{OUTPUT_ADDRESS, OUTPUT_PIPELINE, STDIN_PIPELINE, Workdir};
