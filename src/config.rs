//! # Daemon configuration.
//!
//! Provides [`Config`] centralized settings for the daemon.
//!
//! Config is used in three places:
//! 1. **Daemon startup**: socket path, temp dir, pool size, bus capacity.
//! 2. **Controllers**: [`ControllerConfig`](crate::engine::ControllerConfig) is derived from it.
//! 3. **Engine processes**: [`LogstashSettings`](crate::engine::LogstashSettings) is derived from it.
//!
//! ## Sentinel values
//! - `max_instances = 0` → treated as 1
//! - `temp_dir = None` → the system temp directory
//! - `bus_capacity = 0` → treated as 1
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use pipevisor::Config;
//!
//! let mut cfg = Config::default();
//! cfg.logstash_path = "/usr/share/logstash/bin/logstash".into();
//! cfg.state_timeout = Duration::from_secs(30);
//! cfg.no_cleanup = true;
//!
//! assert_eq!(cfg.pool_size(), 1);
//! ```

use std::path::PathBuf;
use std::time::Duration;

/// Configuration of the daemon and its engine instances.
///
/// ## Notes
/// All fields are public. Prefer the helper accessors over checking sentinels inline.
#[derive(Clone, Debug)]
pub struct Config {
    /// Path of the control socket.
    pub socket: PathBuf,

    /// Engine executable.
    pub logstash_path: PathBuf,

    /// Environment variables passed to the engine.
    ///
    /// Empty inherits the full environment; otherwise the environment is cleared
    /// except for these names.
    pub keep_env: Vec<String>,

    /// Parent of the daemon's temporary directory (`None` = system temp dir).
    pub temp_dir: Option<PathBuf>,

    /// Maximum number of engine instances in the pool (`0` is treated as `1`).
    pub max_instances: usize,

    /// Bound of every controller state wait (readiness, test completion).
    pub state_timeout: Duration,

    /// Pause before test results are returned.
    ///
    /// Absorbs duplicate deliveries of one event through more than one output.
    pub result_grace: Duration,

    /// Time granted to live sessions to finish after a shutdown trigger.
    pub inflight_shutdown_timeout: Duration,

    /// Bound of the final phase: control server stop plus instance termination.
    pub shutdown_timeout: Duration,

    /// Wait after SIGTERM before an engine is killed.
    pub terminate_timeout: Duration,

    /// Poll interval of the engine log tail.
    pub log_poll_interval: Duration,

    /// Keep session directories and the temp dir after use.
    pub no_cleanup: bool,

    /// Capacity of the event bus broadcast channel ring buffer.
    pub bus_capacity: usize,
}

impl Config {
    /// Returns the pool size clamped to a minimum of 1.
    #[inline]
    pub fn pool_size(&self) -> usize {
        self.max_instances.max(1)
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Returns the directory the daemon's temp dir is created in.
    pub fn temp_root(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `socket = <temp>/pipevisor.sock`
    /// - `logstash_path = "logstash"` (looked up in `PATH`)
    /// - `max_instances = 1`
    /// - `state_timeout = 60s`
    /// - `result_grace = 50ms`
    /// - `inflight_shutdown_timeout = 10s`, `shutdown_timeout = 3s`
    /// - `terminate_timeout = 10s`
    /// - `log_poll_interval = 50ms`
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            socket: std::env::temp_dir().join("pipevisor.sock"),
            logstash_path: PathBuf::from("logstash"),
            keep_env: Vec::new(),
            temp_dir: None,
            max_instances: 1,
            state_timeout: Duration::from_secs(60),
            result_grace: Duration::from_millis(50),
            inflight_shutdown_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(3),
            terminate_timeout: Duration::from_secs(10),
            log_poll_interval: Duration::from_millis(50),
            no_cleanup: false,
            bus_capacity: 1024,
        }
    }
}
