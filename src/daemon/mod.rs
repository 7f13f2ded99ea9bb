//! # Daemon: wires pool, sessions, control server and shutdown together.
//!
//! ```text
//! Daemon::run()
//!   temp dir  <temp_root>/pipevisor-XXXX/{instance,session}
//!   Bus ──► subscriber_listener ──► SubscriberSet (LogWriter, custom)
//!   Pool<LogstashFactory> (max_instances) ──► SessionController
//!   ControlServer(socket) ──► DaemonService ──► SessionController
//!
//!   select!
//!     ├─ trigger (control API `shutdown`)
//!     └─ OS signal ──► trigger(Signal)
//!
//!   ShutdownSequencer::run(sessions.wait_finish(), server, instance token, tracker)
//! ```
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use pipevisor::{Config, Daemon, LogWriter, Subscribe};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cfg = Config::default();
//!     cfg.socket = "/tmp/pipevisor.sock".into();
//!     cfg.logstash_path = "/usr/share/logstash/bin/logstash".into();
//!
//!     let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
//!     let daemon = Daemon::builder(cfg).with_subscribers(subs).build();
//!     let report = daemon.run().await?;
//!     println!("drained: {}, stopped: {}", report.drained, report.stopped);
//!     Ok(())
//! }
//! ```

mod server;
mod service;
mod shutdown;
mod signals;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use crate::config::Config;
use crate::engine::LogstashFactory;
use crate::error::DaemonError;
use crate::events::Bus;
use crate::pool::Pool;
use crate::session::{ConfigRewriter, PassthroughRewriter, SessionController};
use crate::subscribers::{Subscribe, SubscriberSet};

pub use server::{ControlApi, ControlServer, Request, Response, dispatch};
pub use service::DaemonService;
pub use shutdown::{
    ShutdownReport, ShutdownSequencer, ShutdownSource, ShutdownTrigger, Stoppable,
};
pub use signals::wait_for_shutdown_signal;

/// Builder for a [`Daemon`].
pub struct DaemonBuilder {
    cfg: Config,
    subscribers: Vec<Arc<dyn Subscribe>>,
    rewriter: Arc<dyn ConfigRewriter>,
}

impl DaemonBuilder {
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
            rewriter: Arc::new(PassthroughRewriter),
        }
    }

    /// Sets event subscribers.
    ///
    /// Subscribers receive lifecycle events through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Sets the configuration rewriter used by sessions (default: [`PassthroughRewriter`]).
    pub fn with_rewriter(mut self, rewriter: Arc<dyn ConfigRewriter>) -> Self {
        self.rewriter = rewriter;
        self
    }

    pub fn build(self) -> Daemon {
        Daemon {
            bus: Bus::new(self.cfg.bus_capacity_clamped()),
            cfg: self.cfg,
            subscribers: self.subscribers,
            rewriter: self.rewriter,
        }
    }
}

/// The test-execution daemon.
pub struct Daemon {
    cfg: Config,
    bus: Bus,
    subscribers: Vec<Arc<dyn Subscribe>>,
    rewriter: Arc<dyn ConfigRewriter>,
}

impl Daemon {
    pub fn builder(cfg: Config) -> DaemonBuilder {
        DaemonBuilder::new(cfg)
    }

    /// Event bus shared by every component of this daemon.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Serves the control API until shutdown is triggered, then runs the shutdown
    /// sequence. Fails only if startup fails.
    pub async fn run(&self) -> Result<ShutdownReport, DaemonError> {
        self.subscriber_listener(Arc::new(SubscriberSet::new(self.subscribers.clone())));

        let temp = tempfile::Builder::new()
            .prefix("pipevisor-")
            .tempdir_in(self.cfg.temp_root())
            .map_err(DaemonError::TempDir)?;
        info!(temp = %temp.path().display(), "daemon starting");

        let tracker = TaskTracker::new();
        let instances = CancellationToken::new();
        let factory = LogstashFactory::new(
            temp.path(),
            &self.cfg,
            tracker.clone(),
            instances.clone(),
            self.bus.clone(),
        );
        let pool = Pool::new(factory, self.cfg.pool_size(), self.bus.clone());
        let sessions = Arc::new(SessionController::new(
            pool,
            temp.path().join("session"),
            Arc::clone(&self.rewriter),
            self.cfg.no_cleanup,
            self.bus.clone(),
        ));

        let trigger = Arc::new(ShutdownTrigger::new(self.bus.clone()));
        let service = Arc::new(DaemonService::new(Arc::clone(&sessions), Arc::clone(&trigger)));
        let server = ControlServer::bind(&self.cfg.socket, service)?;

        self.wait_for_trigger(&trigger).await;

        let report = ShutdownSequencer::new(&self.cfg, self.bus.clone())
            .run(sessions.wait_finish(), server.as_ref(), &instances, &tracker)
            .await;

        drop(server);
        drop(sessions);
        if self.cfg.no_cleanup {
            let kept = temp.keep();
            info!(temp = %kept.display(), "keeping temporary directory");
        }
        Ok(report)
    }

    async fn wait_for_trigger(&self, trigger: &ShutdownTrigger) {
        tokio::select! {
            _ = trigger.triggered() => {}
            res = wait_for_shutdown_signal() => match res {
                Ok(signal) => {
                    info!(signal, "termination signal received");
                    trigger.trigger(ShutdownSource::Signal);
                }
                Err(e) => {
                    warn!(%e, "signal handlers unavailable; waiting for shutdown command");
                    trigger.triggered().await;
                }
            },
        }
    }

    /// Subscribes to the bus and forwards events to the subscriber set (fire-and-forget).
    fn subscriber_listener(&self, set: Arc<SubscriberSet>) {
        let mut rx = self.bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(ev) => set.emit(&ev),
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "subscriber listener lagged");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::UnixStream;

    use super::*;
    use crate::events::{Event, EventKind};

    #[derive(Default)]
    struct Kinds(std::sync::Mutex<Vec<EventKind>>);

    #[async_trait]
    impl Subscribe for Kinds {
        async fn on_event(&self, event: &Event) {
            self.0.lock().unwrap().push(event.kind);
        }
    }

    #[tokio::test]
    async fn test_shutdown_command_stops_idle_daemon() {
        let dir = tempfile::tempdir().unwrap();
        let socket = dir.path().join("control.sock");
        let cfg = Config {
            socket: socket.clone(),
            temp_dir: Some(dir.path().to_path_buf()),
            inflight_shutdown_timeout: Duration::from_millis(200),
            shutdown_timeout: Duration::from_millis(200),
            ..Config::default()
        };
        let kinds = Arc::new(Kinds::default());
        let daemon = Daemon::builder(cfg)
            .with_subscribers(vec![kinds.clone() as Arc<dyn Subscribe>])
            .build();

        let running = tokio::spawn(async move { daemon.run().await });

        let mut stream = None;
        for _ in 0..100 {
            if let Ok(s) = UnixStream::connect(&socket).await {
                stream = Some(s);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let (reader, mut writer) = stream.unwrap().into_split();
        writer.write_all(b"{\"op\":\"shutdown\"}\n").await.unwrap();
        let mut lines = BufReader::new(reader).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), r#"{"status":"done"}"#);

        let report = tokio::time::timeout(Duration::from_secs(2), running)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(report, ShutdownReport { drained: true, stopped: true });
        assert!(!socket.exists());

        tokio::time::sleep(Duration::from_millis(20)).await;
        let seen = kinds.0.lock().unwrap().clone();
        assert!(seen.contains(&EventKind::ShutdownRequested));
        assert!(seen.contains(&EventKind::SessionsDrained));
    }
}
