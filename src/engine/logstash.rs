//! # LogstashInstance: the engine as a supervised child process.
//!
//! ## Architecture
//! ```text
//! start(token, callbacks, workdir)
//!   spawn `logstash --path.settings W --path.logs W --path.data W/data`
//!   tracker.spawn:
//!     ├─ stdout reader ── `{...}` lines ──► receive_event
//!     │                └─ EOF (not cancelled) ──► signal_crash
//!     ├─ stderr reader ── lines ──► tracing::debug!
//!     │                └─ EOF (not cancelled) ──► signal_crash
//!     ├─ log tail ── readiness lines ──► pipelines_ready
//!     └─ supervisor: holds stdin open, waits for
//!          ├─ process exit
//!          ├─ token cancelled ──► SIGTERM, wait ≤ terminate_timeout, then SIGKILL
//!          └─ kill()          ──► SIGKILL
//! ```
//!
//! All tasks run on the shared [`TaskTracker`] so the daemon can join every instance
//! during shutdown.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::config::Config;
use crate::engine::instance::{Instance, InstanceCallbacks, with_callbacks};
use crate::engine::logtail;
use crate::engine::workdir::Workdir;
use crate::error::InstanceError;
use crate::events::{Bus, Event, EventKind};

/// Process-level settings of a [`LogstashInstance`].
#[derive(Clone, Debug)]
pub struct LogstashSettings {
    /// Engine executable.
    pub program: PathBuf,
    /// Environment variables passed through; empty inherits the full environment.
    pub keep_env: Vec<String>,
    /// Wait after SIGTERM before escalating to SIGKILL.
    pub terminate_timeout: Duration,
    /// Poll interval of the log tail.
    pub log_poll_interval: Duration,
}

impl From<&Config> for LogstashSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            program: cfg.logstash_path.clone(),
            keep_env: cfg.keep_env.clone(),
            terminate_timeout: cfg.terminate_timeout,
            log_poll_interval: cfg.log_poll_interval,
        }
    }
}

type PidSlot = Arc<Mutex<Option<u32>>>;

/// One supervised engine process.
pub struct LogstashInstance {
    controller: usize,
    settings: LogstashSettings,
    tracker: TaskTracker,
    bus: Bus,
    pid: PidSlot,
    kill: CancellationToken,
}

impl LogstashInstance {
    pub fn new(
        controller: usize,
        settings: LogstashSettings,
        tracker: TaskTracker,
        bus: Bus,
    ) -> Self {
        Self {
            controller,
            settings,
            tracker,
            bus,
            pid: Arc::new(Mutex::new(None)),
            kill: CancellationToken::new(),
        }
    }

    fn command(&self, workdir: &Path) -> Command {
        let layout = Workdir::new(workdir);
        let mut command = Command::new(&self.settings.program);
        command
            .arg("--path.settings")
            .arg(workdir)
            .arg("--path.logs")
            .arg(workdir)
            .arg("--path.data")
            .arg(layout.data_dir())
            .current_dir(workdir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if !self.settings.keep_env.is_empty() {
            command.env_clear();
            for name in &self.settings.keep_env {
                if let Some(value) = std::env::var_os(name) {
                    command.env(name, value);
                }
            }
        }
        command
    }

    fn current_pid(&self) -> Option<u32> {
        *self.pid.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Instance for LogstashInstance {
    async fn start(
        &self,
        token: CancellationToken,
        callbacks: Weak<dyn InstanceCallbacks>,
        workdir: &Path,
    ) -> Result<(), InstanceError> {
        let mut child = self
            .command(workdir)
            .spawn()
            .map_err(|source| InstanceError::Spawn {
                program: self.settings.program.clone(),
                source,
            })?;

        let stdin = child.stdin.take().ok_or(InstanceError::MissingPipe("stdin"))?;
        let stdout = child.stdout.take().ok_or(InstanceError::MissingPipe("stdout"))?;
        let stderr = child.stderr.take().ok_or(InstanceError::MissingPipe("stderr"))?;

        *self.pid.lock().unwrap_or_else(PoisonError::into_inner) = child.id();
        debug!(controller = self.controller, pid = child.id(), "spawned engine");

        let streams = StreamWatch {
            controller: self.controller,
            token: token.clone(),
            kill: self.kill.clone(),
            callbacks: callbacks.clone(),
            bus: self.bus.clone(),
        };
        self.tracker.spawn(streams.clone().read(stdout, "stdout", true));
        self.tracker.spawn(streams.read(stderr, "stderr", false));
        self.tracker.spawn(logtail::follow(
            Workdir::new(workdir).log_file(),
            self.settings.log_poll_interval,
            token.clone(),
            callbacks,
        ));
        self.tracker.spawn(supervise(
            child,
            stdin,
            Supervision {
                controller: self.controller,
                token,
                kill: self.kill.clone(),
                terminate_timeout: self.settings.terminate_timeout,
                pid: Arc::clone(&self.pid),
                bus: self.bus.clone(),
            },
        ));

        self.bus.publish(
            Event::new(EventKind::InstanceLaunched)
                .with_controller(self.controller)
                .with_reason(workdir.to_string_lossy()),
        );
        Ok(())
    }

    async fn config_reload(&self) -> Result<(), InstanceError> {
        let pid = self.current_pid().ok_or(InstanceError::NotRunning)?;
        send_signal(pid, Signal::SIGHUP)
    }

    fn kill(&self) {
        self.kill.cancel();
    }
}

fn send_signal(pid: u32, sig: Signal) -> Result<(), InstanceError> {
    let target = i32::try_from(pid).map_err(|_| InstanceError::NotRunning)?;
    signal::kill(Pid::from_raw(target), sig).map_err(|source| InstanceError::Signal {
        signal: sig.as_str(),
        pid,
        source,
    })
}

/// Shared context of the stdout/stderr readers.
#[derive(Clone)]
struct StreamWatch {
    controller: usize,
    token: CancellationToken,
    kill: CancellationToken,
    callbacks: Weak<dyn InstanceCallbacks>,
    bus: Bus,
}

impl StreamWatch {
    /// Reads `stream` line by line until EOF or cancellation. With `events`, lines
    /// that look like JSON objects are forwarded as received events. Invalid UTF-8 is
    /// decoded lossily; only EOF or an I/O error counts as a crash.
    async fn read<R>(self, stream: R, name: &'static str, events: bool)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let mut lines = BufReader::new(stream).split(b'\n');
        loop {
            let next = tokio::select! {
                _ = self.token.cancelled() => return,
                next = lines.next_segment() => next,
            };
            match next {
                Ok(Some(bytes)) => {
                    let line = String::from_utf8_lossy(&bytes);
                    let trimmed = line.trim();
                    if events && trimmed.starts_with('{') {
                        let payload = trimmed.to_string();
                        with_callbacks(&self.callbacks, |cb| cb.receive_event(payload));
                    } else if !trimmed.is_empty() {
                        debug!(
                            controller = self.controller,
                            stream = name,
                            line = trimmed,
                            "engine output"
                        );
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(controller = self.controller, stream = name, ?err, "engine stream failed");
                    break;
                }
            }
        }

        if !self.token.is_cancelled() && !self.kill.is_cancelled() {
            self.bus.publish(
                Event::new(EventKind::InstanceCrashed)
                    .with_controller(self.controller)
                    .with_reason(name),
            );
            with_callbacks(&self.callbacks, |cb| cb.signal_crash());
        }
    }
}

struct Supervision {
    controller: usize,
    token: CancellationToken,
    kill: CancellationToken,
    terminate_timeout: Duration,
    pid: PidSlot,
    bus: Bus,
}

/// Holds stdin open and reaps the process.
async fn supervise(mut child: Child, stdin: ChildStdin, ctx: Supervision) {
    let status = tokio::select! {
        status = child.wait() => status,
        _ = ctx.token.cancelled() => terminate(&mut child, ctx.terminate_timeout).await,
        _ = ctx.kill.cancelled() => force_kill(&mut child).await,
    };
    drop(stdin);
    *ctx.pid.lock().unwrap_or_else(PoisonError::into_inner) = None;

    let reason = match status {
        Ok(status) => status.to_string(),
        Err(err) => format!("wait failed: {err}"),
    };
    ctx.bus.publish(
        Event::new(EventKind::InstanceExited)
            .with_controller(ctx.controller)
            .with_reason(reason),
    );
}

/// SIGTERM, bounded wait, then SIGKILL.
async fn terminate(child: &mut Child, timeout: Duration) -> std::io::Result<ExitStatus> {
    let Some(pid) = child.id() else {
        return child.wait().await;
    };
    if let Err(err) = send_signal(pid, Signal::SIGTERM) {
        warn!(%err, "graceful terminate failed; killing");
        return force_kill(child).await;
    }
    match time::timeout(timeout, child.wait()).await {
        Ok(status) => status,
        Err(_elapsed) => {
            warn!(pid, ?timeout, "engine ignored SIGTERM; killing");
            force_kill(child).await
        }
    }
}

async fn force_kill(child: &mut Child) -> std::io::Result<ExitStatus> {
    child.start_kill()?;
    child.wait().await
}
