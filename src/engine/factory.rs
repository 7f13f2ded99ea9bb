use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::Config;
use crate::engine::controller::{Controller, ControllerConfig};
use crate::engine::logstash::{LogstashInstance, LogstashSettings};
use crate::engine::workdir::Workdir;
use crate::error::ControllerError;
use crate::events::Bus;
use crate::pool::Factory;

/// Pool factory creating launched, engine-backed controllers.
///
/// Controller `n` works in `<root>/instance/<n>`. Its lifetime token is a child of
/// the daemon-wide instance token, and its supervision tasks run on the shared tracker.
pub struct LogstashFactory {
    root: PathBuf,
    settings: LogstashSettings,
    controller: ControllerConfig,
    tracker: TaskTracker,
    token: CancellationToken,
    bus: Bus,
}

impl LogstashFactory {
    pub fn new(
        root: &Path,
        cfg: &Config,
        tracker: TaskTracker,
        token: CancellationToken,
        bus: Bus,
    ) -> Self {
        Self {
            root: root.join("instance"),
            settings: LogstashSettings::from(cfg),
            controller: ControllerConfig::from(cfg),
            tracker,
            token,
            bus,
        }
    }
}

#[async_trait]
impl Factory for LogstashFactory {
    type Item = Controller;
    type Error = ControllerError;

    async fn create(&self, id: usize) -> Result<Arc<Controller>, ControllerError> {
        let instance = LogstashInstance::new(
            id,
            self.settings.clone(),
            self.tracker.clone(),
            self.bus.clone(),
        );
        let controller = Controller::new(
            id,
            Workdir::new(self.root.join(id.to_string())),
            Box::new(instance),
            self.bus.clone(),
            self.controller.clone(),
            self.token.child_token(),
        );
        controller.launch().await?;
        Ok(controller)
    }

    fn is_healthy(&self, controller: &Controller) -> bool {
        controller.is_healthy()
    }
}
