//! Error types used by the orchestration layer.
//!
//! - [`StateError`]: a state machine wait that did not reach its target.
//! - [`InstanceError`]: spawning or signalling the supervised engine process.
//! - [`ControllerError`]: the setup/execute/teardown protocol of one controller.
//! - [`PoolError`]: checking a controller out of the pool.
//! - [`SessionError`]: session creation, lookup and test execution.
//! - [`DaemonError`]: daemon startup and control API decoding.
//!
//! Every type provides `as_label` (a short stable label for logs/metrics).

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::engine::ControllerState;

/// # Errors produced while waiting for a controller state.
///
/// Lets callers distinguish "not ready yet" (`Timeout`) from "system down"
/// (`Shutdown`) and "instance broken" (`Unhealthy`).
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// The target state was not reached before the deadline.
    #[error("timed out after {timeout:?} waiting for state {target} (current: {current})")]
    Timeout {
        /// The awaited state.
        target: ControllerState,
        /// State observed when the deadline expired.
        current: ControllerState,
        /// The caller-supplied timeout.
        timeout: Duration,
    },

    /// Shutdown fired while waiting.
    #[error("shutdown while waiting for state {target}")]
    Shutdown {
        /// The awaited state.
        target: ControllerState,
    },

    /// The machine fell into `unknown` and can never reach the target.
    #[error("controller unhealthy while waiting for state {target}")]
    Unhealthy {
        /// The awaited state.
        target: ControllerState,
    },
}

impl StateError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            StateError::Timeout { .. } => "state_timeout",
            StateError::Shutdown { .. } => "state_shutdown",
            StateError::Unhealthy { .. } => "state_unhealthy",
        }
    }
}

/// # Errors produced by the supervised engine process.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum InstanceError {
    /// The process could not be spawned.
    #[error("failed to launch {}: {source}", .program.display())]
    Spawn {
        /// Program that failed to start.
        program: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A piped standard stream was not available after spawn.
    #[error("engine {0} pipe missing")]
    MissingPipe(&'static str),

    /// The process has not been started or already exited.
    #[error("engine process not running")]
    NotRunning,

    /// Delivering a signal to the process failed.
    #[error("failed to send {signal} to pid {pid}: {source}")]
    Signal {
        /// Signal name.
        signal: &'static str,
        /// Target pid.
        pid: u32,
        #[source]
        source: nix::Error,
    },
}

impl InstanceError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            InstanceError::Spawn { .. } => "instance_spawn",
            InstanceError::MissingPipe(_) => "instance_missing_pipe",
            InstanceError::NotRunning => "instance_not_running",
            InstanceError::Signal { .. } => "instance_signal",
        }
    }
}

/// # Errors produced by a controller's test protocol.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ControllerError {
    /// Waiting for a protocol state failed.
    #[error(transparent)]
    State(#[from] StateError),

    /// The supervised process could not be started or signalled.
    #[error(transparent)]
    Instance(#[from] InstanceError),

    /// Filesystem error while preparing the working directory.
    #[error("{context} {}: {source}", .path.display())]
    Io {
        /// What was being done.
        context: &'static str,
        /// Path involved.
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// `pipelines.yml` could not be encoded.
    #[error("failed to encode pipelines.yml: {0}")]
    Encode(#[from] serde_yaml::Error),
}

impl ControllerError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ControllerError::State(e) => e.as_label(),
            ControllerError::Instance(e) => e.as_label(),
            ControllerError::Io { .. } => "controller_io",
            ControllerError::Encode(_) => "controller_encode",
        }
    }

    pub(crate) fn io(context: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        ControllerError::Io {
            context,
            path: path.into(),
            source,
        }
    }
}

/// # Errors produced by [`Pool::get`](crate::Pool::get).
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum PoolError<E> {
    /// Every resource is assigned and the pool is at capacity. Not retriable.
    #[error("no instance available from pool (max {max})")]
    Exhausted {
        /// Configured maximum size.
        max: usize,
    },

    /// The factory failed to create a new resource.
    #[error("failed to create pool instance: {0}")]
    Create(#[source] E),
}

impl<E> PoolError<E> {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            PoolError::Exhausted { .. } => "pool_exhausted",
            PoolError::Create(_) => "pool_create",
        }
    }
}

/// # Errors produced by sessions and the session controller.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SessionError {
    /// A drain has begun; no new sessions are admitted.
    #[error("shutdown in progress")]
    ShutdownInProgress,

    /// No live session with this id.
    #[error("no valid session with id {id}")]
    NotFound {
        /// Requested session id.
        id: String,
    },

    /// No controller could be leased.
    #[error(transparent)]
    Pool(#[from] PoolError<ControllerError>),

    /// The leased controller failed.
    #[error(transparent)]
    Controller(#[from] ControllerError),

    /// The configuration rewriter rejected a file.
    #[error("failed to rewrite {file}: {reason}")]
    Rewrite {
        /// Config file name.
        file: String,
        /// Rewriter message.
        reason: String,
    },

    /// `execute_test` named an input plugin the session's configuration does not have.
    #[error("input plugin {plugin} not found in session configuration")]
    UnknownInputPlugin {
        /// Requested plugin id.
        plugin: String,
    },

    /// Per-line field overlays were not a JSON array of objects.
    #[error("invalid event fields: {0}")]
    InvalidFields(#[from] serde_json::Error),

    /// A config file name escapes the session directory.
    #[error("invalid config file name {0}")]
    InvalidFileName(String),

    /// Filesystem error in the session directory.
    #[error("{context} {}: {source}", .path.display())]
    Io {
        /// What was being done.
        context: &'static str,
        /// Path involved.
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl SessionError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            SessionError::ShutdownInProgress => "session_shutdown",
            SessionError::NotFound { .. } => "session_not_found",
            SessionError::Pool(e) => e.as_label(),
            SessionError::Controller(e) => e.as_label(),
            SessionError::Rewrite { .. } => "session_rewrite",
            SessionError::UnknownInputPlugin { .. } => "session_unknown_input",
            SessionError::InvalidFields(_) => "session_invalid_fields",
            SessionError::InvalidFileName(_) => "session_invalid_file",
            SessionError::Io { .. } => "session_io",
        }
    }

    pub(crate) fn io(context: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        SessionError::Io {
            context,
            path: path.into(),
            source,
        }
    }
}

/// # Errors produced by the daemon and its control API.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum DaemonError {
    /// The control socket could not be bound.
    #[error("failed to bind control socket {}: {source}", .path.display())]
    Bind {
        /// Socket path.
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The daemon's temporary directory could not be created.
    #[error("failed to create temporary directory: {0}")]
    TempDir(#[source] io::Error),

    /// The `pipelines.yml` manifest could not be decoded.
    #[error("invalid pipelines.yml: {0}")]
    Manifest(#[from] serde_yaml::Error),

    /// A control request was not valid JSON or named an unknown operation.
    #[error("invalid request: {0}")]
    Request(#[from] serde_json::Error),

    /// The request failed in the session layer.
    #[error(transparent)]
    Session(#[from] SessionError),
}

impl DaemonError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            DaemonError::Bind { .. } => "daemon_bind",
            DaemonError::TempDir(_) => "daemon_tempdir",
            DaemonError::Manifest(_) => "daemon_manifest",
            DaemonError::Request(_) => "daemon_request",
            DaemonError::Session(e) => e.as_label(),
        }
    }
}
