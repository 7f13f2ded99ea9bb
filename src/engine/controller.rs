//! # Controller: blocking test protocol over one supervised engine.
//!
//! A [`Controller`] owns a [`StateMachine`], the per-test trackers and its
//! [`Instance`]. It turns the engine's indirect signals (log lines, stdout events,
//! stream closure) into commands, and exposes a blocking
//! setup → execute* → teardown protocol to its session.
//!
//! ## Protocol
//! ```text
//! launch()          created ─start─► started ─(bootstrap ready)─► ready
//! setup_test(p)     wait ready          ─setup-test─►   setting_up_test ─(ready)─► ready_for_test
//! execute_test(p,n) wait ready_for_test ─execute-test─► executing_test  ─(ready)─► running_test
//!                   n events received   ─test-complete─► ready_for_test
//! get_results()     wait ready_for_test, grace sleep, copy of the event buffer
//! teardown()        wait ready_for_test ─teardown─►     started ─(bootstrap ready)─► ready
//! signal_crash()    any ─crash─► unknown, process killed
//! ```
//!
//! ## Rules
//! - Every reconfiguration rewrites `pipelines.yml`, resets both trackers and then
//!   asks the instance to reload; the process is never restarted between tests.
//! - Completion is detected in `receive_event`; the `test-complete` transition runs
//!   on a detached task so the reader that delivered the event never blocks.
//! - Dropping the last `Arc<Controller>` cancels its lifetime token, which
//!   terminates the engine process.

use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::time;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use crate::config::Config;
use crate::engine::instance::{Instance, InstanceCallbacks};
use crate::engine::state::{Command, ControllerState};
use crate::engine::state_machine::StateMachine;
use crate::engine::tracker::{PipelineReadiness, ReceivedEvents};
use crate::engine::workdir::Workdir;
use crate::error::ControllerError;
use crate::events::{Bus, Event, EventKind};
use crate::pipeline::Pipeline;

/// Timing knobs of a [`Controller`].
#[derive(Clone, Debug)]
pub struct ControllerConfig {
    /// Bound of every protocol state wait.
    pub wait_timeout: Duration,
    /// Pause before results are returned, absorbing duplicate deliveries.
    pub result_grace: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            wait_timeout: Duration::from_secs(60),
            result_grace: Duration::from_millis(50),
        }
    }
}

impl From<&Config> for ControllerConfig {
    fn from(cfg: &Config) -> Self {
        Self {
            wait_timeout: cfg.state_timeout,
            result_grace: cfg.result_grace,
        }
    }
}

/// Drives one engine instance through the test protocol.
pub struct Controller {
    id: usize,
    workdir: Workdir,
    state: Arc<StateMachine>,
    received: ReceivedEvents,
    readiness: PipelineReadiness,
    instance: Box<dyn Instance>,
    bus: Bus,
    cfg: ControllerConfig,
    token: CancellationToken,
    _guard: DropGuard,
}

impl Controller {
    /// Creates a controller in `created`. `token` bounds its lifetime and is
    /// cancelled when the controller is dropped.
    pub fn new(
        id: usize,
        workdir: Workdir,
        instance: Box<dyn Instance>,
        bus: Bus,
        cfg: ControllerConfig,
        token: CancellationToken,
    ) -> Arc<Self> {
        let state = Arc::new(StateMachine::new(id, token.clone(), bus.clone()));
        Arc::new(Self {
            id,
            workdir,
            state,
            received: ReceivedEvents::new(),
            readiness: PipelineReadiness::new(),
            instance,
            bus,
            cfg,
            _guard: token.clone().drop_guard(),
            token,
        })
    }

    /// Prepares the working directory and starts the engine with the bootstrap
    /// pipelines only.
    pub async fn launch(self: &Arc<Self>) -> Result<(), ControllerError> {
        self.state.execute_command(Command::Start);
        self.workdir.prepare().await?;
        self.readiness
            .reset(self.workdir.bootstrap_pipelines().into_iter().map(|p| p.id));

        let callbacks: Weak<dyn InstanceCallbacks> =
            Arc::downgrade(self) as Weak<dyn InstanceCallbacks>;
        self.instance
            .start(self.token.clone(), callbacks, self.workdir.root())
            .await?;
        Ok(())
    }

    /// Loads `pipelines` next to the bootstrap pipelines; returns once they run.
    pub async fn setup_test(&self, pipelines: &[Pipeline]) -> Result<(), ControllerError> {
        self.wait_for(ControllerState::Ready).await?;
        self.state.execute_command(Command::SetupTest);
        self.reconfigure(pipelines, 0).await
    }

    /// Loads `pipelines` (the test configuration plus one input pipeline) and
    /// arms completion for `expected` events.
    pub async fn execute_test(
        &self,
        pipelines: &[Pipeline],
        expected: usize,
    ) -> Result<(), ControllerError> {
        self.wait_for(ControllerState::ReadyForTest).await?;
        self.state.execute_command(Command::ExecuteTest);
        self.reconfigure(pipelines, expected).await
    }

    /// Waits for the current test to complete and returns the received events.
    pub async fn get_results(&self) -> Result<Vec<String>, ControllerError> {
        // expected == 0 never reaches receive_event
        if self.received.is_complete_first_time() {
            self.complete_when_running();
        }
        self.wait_for(ControllerState::ReadyForTest).await?;
        time::sleep(self.cfg.result_grace).await;
        Ok(self.received.get())
    }

    /// Unloads every test pipeline; the engine keeps running.
    pub async fn teardown(&self) -> Result<(), ControllerError> {
        self.wait_for(ControllerState::ReadyForTest).await?;
        self.state.execute_command(Command::Teardown);
        self.reconfigure(&[], 0).await
    }

    pub fn is_healthy(&self) -> bool {
        self.state.is_healthy()
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Current protocol state.
    pub fn state(&self) -> ControllerState {
        self.state.current()
    }

    pub fn workdir(&self) -> &Path {
        self.workdir.root()
    }

    async fn wait_for(&self, target: ControllerState) -> Result<(), ControllerError> {
        self.state
            .wait_for_state(target, self.cfg.wait_timeout)
            .await
            .map_err(ControllerError::from)
    }

    async fn reconfigure(&self, extra: &[Pipeline], expected: usize) -> Result<(), ControllerError> {
        let written = self.workdir.write_pipelines(extra).await?;
        self.received.reset(expected);
        self.readiness.reset(written.iter().map(|p| p.id.clone()));
        self.instance.config_reload().await?;

        self.bus.publish(
            Event::new(EventKind::ConfigReloaded)
                .with_controller(self.id)
                .with_count(written.len()),
        );
        Ok(())
    }

    fn complete_when_running(&self) {
        let state = Arc::clone(&self.state);
        let bus = self.bus.clone();
        let id = self.id;
        let timeout = self.cfg.wait_timeout;
        let received = self.received.len();

        tokio::spawn(async move {
            match state.wait_for_state(ControllerState::RunningTest, timeout).await {
                Ok(()) => {
                    state.execute_command(Command::TestComplete);
                    bus.publish(
                        Event::new(EventKind::TestCompleted)
                            .with_controller(id)
                            .with_count(received),
                    );
                }
                Err(err) => {
                    warn!(controller = id, %err, "test completed but never reached running state");
                }
            }
        });
    }
}

impl InstanceCallbacks for Controller {
    fn receive_event(&self, payload: String) {
        self.received.append(payload);
        if self.received.is_complete_first_time() {
            self.complete_when_running();
        }
    }

    fn pipelines_ready(&self, names: Vec<String>) {
        debug!(controller = self.id, ?names, "pipelines ready");
        self.readiness.set_ready(names);
        if self.readiness.is_ready() {
            self.state.execute_command(Command::PipelineReady);
        }
    }

    fn signal_crash(&self) {
        warn!(controller = self.id, state = %self.state.current(), "engine crashed");
        self.state.execute_command(Command::Crash);
        self.instance.kill();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::FakeInstance;
    use crate::engine::tracker::PIPELINES_RUNNING;
    use crate::error::StateError;
    use crate::pipeline::parse_manifest;

    fn config() -> ControllerConfig {
        ControllerConfig {
            wait_timeout: Duration::from_secs(2),
            result_grace: Duration::from_millis(10),
        }
    }

    fn controller(dir: &Path, fake: &FakeInstance) -> Arc<Controller> {
        Controller::new(
            0,
            Workdir::new(dir),
            Box::new(fake.clone()),
            Bus::default(),
            config(),
            CancellationToken::new(),
        )
    }

    fn ready(ctrl: &Controller, names: &[&str]) {
        let mut names: Vec<String> = names.iter().map(|s| s.to_string()).collect();
        names.push(PIPELINES_RUNNING.to_string());
        ctrl.pipelines_ready(names);
    }

    fn written_ids(ctrl: &Controller) -> Vec<String> {
        let text = std::fs::read_to_string(ctrl.workdir().join("pipelines.yml")).unwrap();
        parse_manifest(&text).unwrap().into_iter().map(|p| p.id).collect()
    }

    #[tokio::test]
    async fn test_end_to_end_protocol() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeInstance::new();
        let ctrl = controller(dir.path(), &fake);

        ctrl.launch().await.unwrap();
        assert_eq!(ctrl.state(), ControllerState::Started);
        ready(&ctrl, &["stdin", "output"]);
        assert_eq!(ctrl.state(), ControllerState::Ready);

        let main = Pipeline::new("main", "/sut/main.conf");
        ctrl.setup_test(std::slice::from_ref(&main)).await.unwrap();
        assert_eq!(ctrl.state(), ControllerState::SettingUpTest);
        assert_eq!(written_ids(&ctrl), vec!["stdin", "output", "main"]);

        ready(&ctrl, &["stdin", "output", "main"]);
        assert_eq!(ctrl.state(), ControllerState::ReadyForTest);

        let input = Pipeline::new("input", "/inputs/1/input.conf").single_ordered();
        ctrl.execute_test(&[main, input], 2).await.unwrap();
        assert_eq!(ctrl.state(), ControllerState::ExecutingTest);

        ready(&ctrl, &["stdin", "output", "main", "input"]);
        ctrl.receive_event(r#"{"message":"one"}"#.to_string());
        ctrl.receive_event(r#"{"message":"two"}"#.to_string());

        let results = ctrl.get_results().await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(ctrl.state(), ControllerState::ReadyForTest);

        ctrl.teardown().await.unwrap();
        assert_eq!(ctrl.state(), ControllerState::Started);
        let ids = written_ids(&ctrl);
        assert!(!ids.contains(&"main".to_string()));
        assert!(!ids.contains(&"input".to_string()));
        assert_eq!(fake.reloads(), 3);
    }

    #[tokio::test]
    async fn test_zero_expected_events_complete_in_get_results() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeInstance::auto();
        let ctrl = controller(dir.path(), &fake);

        ctrl.launch().await.unwrap();
        ctrl.setup_test(&[]).await.unwrap();
        ctrl.execute_test(&[], 0).await.unwrap();

        let results = ctrl.get_results().await.unwrap();
        assert!(results.is_empty());
        assert_eq!(ctrl.state(), ControllerState::ReadyForTest);
    }

    #[tokio::test]
    async fn test_events_before_running_still_complete() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeInstance::auto();
        let ctrl = controller(dir.path(), &fake);
        ctrl.launch().await.unwrap();
        ctrl.setup_test(&[]).await.unwrap();

        fake.set_auto(false);
        ctrl.execute_test(&[Pipeline::new("input", "/in.conf")], 1).await.unwrap();
        ctrl.receive_event("{}".to_string());
        assert_eq!(ctrl.state(), ControllerState::ExecutingTest);

        ready(&ctrl, &["stdin", "output", "input"]);
        assert_eq!(ctrl.get_results().await.unwrap(), vec!["{}".to_string()]);
    }

    #[tokio::test]
    async fn test_setup_times_out_without_readiness() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeInstance::new();
        let ctrl = Controller::new(
            1,
            Workdir::new(dir.path()),
            Box::new(fake.clone()),
            Bus::default(),
            ControllerConfig {
                wait_timeout: Duration::from_millis(20),
                result_grace: Duration::ZERO,
            },
            CancellationToken::new(),
        );
        ctrl.launch().await.unwrap();

        let err = ctrl.setup_test(&[]).await.unwrap_err();
        assert_eq!(err.as_label(), "state_timeout");
        assert_eq!(fake.reloads(), 0);
    }

    #[tokio::test]
    async fn test_crash_kills_and_fails_waiters() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeInstance::new();
        let ctrl = controller(dir.path(), &fake);
        ctrl.launch().await.unwrap();

        let waiter = {
            let ctrl = Arc::clone(&ctrl);
            tokio::spawn(async move { ctrl.setup_test(&[]).await })
        };
        tokio::task::yield_now().await;
        fake.crash();

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, ControllerError::State(StateError::Unhealthy { .. })));
        assert!(!ctrl.is_healthy());
        assert!(fake.killed());
    }

    #[tokio::test]
    async fn test_drop_cancels_lifetime_token() {
        let dir = tempfile::tempdir().unwrap();
        let fake = FakeInstance::new();
        let ctrl = controller(dir.path(), &fake);
        ctrl.launch().await.unwrap();

        let token = fake.token().unwrap();
        assert!(!token.is_cancelled());
        drop(ctrl);
        assert!(token.is_cancelled());
        assert!(fake.callbacks().is_none());
    }
}
