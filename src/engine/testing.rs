//! In-process engine double for controller, pool and session tests.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::engine::controller::{Controller, ControllerConfig};
use crate::engine::instance::{Instance, InstanceCallbacks};
use crate::engine::tracker::PIPELINES_RUNNING;
use crate::engine::workdir::Workdir;
use crate::error::{ControllerError, InstanceError};
use crate::events::Bus;
use crate::pipeline::parse_manifest;
use crate::pool::Factory;

#[derive(Default)]
struct Shared {
    auto: AtomicBool,
    reloads: AtomicUsize,
    killed: AtomicBool,
    workdir: Mutex<Option<PathBuf>>,
    token: Mutex<Option<CancellationToken>>,
    callbacks: Mutex<Option<Weak<dyn InstanceCallbacks>>>,
    emit: Mutex<Option<(String, Vec<String>)>>,
}

/// Cheap handle; clones share state so tests keep one while the controller owns another.
#[derive(Clone, Default)]
pub(crate) struct FakeInstance {
    shared: Arc<Shared>,
}

impl FakeInstance {
    /// Reports nothing on its own.
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Reports every pipeline of `pipelines.yml` ready on start and on each reload.
    pub(crate) fn auto() -> Self {
        let fake = Self::default();
        fake.set_auto(true);
        fake
    }

    pub(crate) fn set_auto(&self, auto: bool) {
        self.shared.auto.store(auto, Ordering::SeqCst);
    }

    /// After a reload that loads a pipeline whose id starts with `prefix`,
    /// emits `events` once readiness has been reported.
    pub(crate) fn emit_on_reload(&self, prefix: &str, events: Vec<String>) {
        *self.shared.emit.lock().unwrap() = Some((prefix.to_string(), events));
    }

    pub(crate) fn reloads(&self) -> usize {
        self.shared.reloads.load(Ordering::SeqCst)
    }

    pub(crate) fn killed(&self) -> bool {
        self.shared.killed.load(Ordering::SeqCst)
    }

    pub(crate) fn token(&self) -> Option<CancellationToken> {
        self.shared.token.lock().unwrap().clone()
    }

    pub(crate) fn callbacks(&self) -> Option<Arc<dyn InstanceCallbacks>> {
        self.shared.callbacks.lock().unwrap().as_ref()?.upgrade()
    }

    /// Simulates closure of the engine's output streams.
    pub(crate) fn crash(&self) {
        if let Some(cb) = self.callbacks() {
            cb.signal_crash();
        }
    }

    fn report(&self) {
        if !self.shared.auto.load(Ordering::SeqCst) {
            return;
        }
        let Some(cb) = self.callbacks() else { return };
        let Some(root) = self.shared.workdir.lock().unwrap().clone() else { return };

        let text = std::fs::read_to_string(Workdir::new(&root).pipelines_file()).unwrap();
        let mut ids: Vec<String> = parse_manifest(&text)
            .unwrap()
            .into_iter()
            .map(|p| p.id)
            .collect();
        let emit = self
            .shared
            .emit
            .lock()
            .unwrap()
            .clone()
            .filter(|(prefix, _)| ids.iter().any(|id| id.starts_with(prefix.as_str())));

        ids.push(PIPELINES_RUNNING.to_string());
        cb.pipelines_ready(ids);

        if let Some((_, events)) = emit {
            for event in events {
                cb.receive_event(event);
            }
        }
    }
}

#[async_trait]
impl Instance for FakeInstance {
    async fn start(
        &self,
        token: CancellationToken,
        callbacks: Weak<dyn InstanceCallbacks>,
        workdir: &Path,
    ) -> Result<(), InstanceError> {
        *self.shared.token.lock().unwrap() = Some(token);
        *self.shared.callbacks.lock().unwrap() = Some(callbacks);
        *self.shared.workdir.lock().unwrap() = Some(workdir.to_path_buf());
        self.report();
        Ok(())
    }

    async fn config_reload(&self) -> Result<(), InstanceError> {
        if self.killed() {
            return Err(InstanceError::NotRunning);
        }
        self.shared.reloads.fetch_add(1, Ordering::SeqCst);
        self.report();
        Ok(())
    }

    fn kill(&self) {
        self.shared.killed.store(true, Ordering::SeqCst);
    }
}

/// Creates launched controllers backed by auto-reporting [`FakeInstance`]s.
#[derive(Clone)]
pub(crate) struct FakeFactory {
    pub(crate) root: PathBuf,
    pub(crate) bus: Bus,
    pub(crate) cfg: ControllerConfig,
    pub(crate) created: Arc<Mutex<Vec<FakeInstance>>>,
    pub(crate) events: Arc<Mutex<Option<(String, Vec<String>)>>>,
}

impl FakeFactory {
    pub(crate) fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            bus: Bus::default(),
            cfg: ControllerConfig {
                wait_timeout: std::time::Duration::from_secs(2),
                result_grace: std::time::Duration::from_millis(5),
            },
            created: Arc::default(),
            events: Arc::default(),
        }
    }

    /// Every instance created afterwards emits `events` on input reloads.
    pub(crate) fn emit_on_reload(&self, prefix: &str, events: Vec<String>) {
        *self.events.lock().unwrap() = Some((prefix.to_string(), events));
    }

    pub(crate) fn instances(&self) -> Vec<FakeInstance> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl Factory for FakeFactory {
    type Item = Controller;
    type Error = ControllerError;

    async fn create(&self, id: usize) -> Result<Arc<Controller>, ControllerError> {
        let fake = FakeInstance::auto();
        if let Some((prefix, events)) = self.events.lock().unwrap().clone() {
            fake.emit_on_reload(&prefix, events);
        }
        self.created.lock().unwrap().push(fake.clone());

        let controller = Controller::new(
            id,
            Workdir::new(self.root.join("instance").join(id.to_string())),
            Box::new(fake),
            self.bus.clone(),
            self.cfg.clone(),
            CancellationToken::new(),
        );
        controller.launch().await?;
        Ok(controller)
    }

    fn is_healthy(&self, controller: &Controller) -> bool {
        controller.is_healthy()
    }
}
