use std::sync::Arc;

use async_trait::async_trait;

use crate::daemon::server::ControlApi;
use crate::daemon::shutdown::{ShutdownSource, ShutdownTrigger};
use crate::engine::Controller;
use crate::error::{ControllerError, DaemonError, SessionError};
use crate::pipeline::parse_manifest;
use crate::pool::Factory;
use crate::session::{ConfigFile, SessionController};

/// [`ControlApi`] backed by a [`SessionController`].
///
/// Once shutdown is triggered new sessions are refused; existing sessions may still
/// execute and tear down so the drain can complete.
pub struct DaemonService<F>
where
    F: Factory<Item = Controller, Error = ControllerError>,
{
    sessions: Arc<SessionController<F>>,
    trigger: Arc<ShutdownTrigger>,
}

impl<F> DaemonService<F>
where
    F: Factory<Item = Controller, Error = ControllerError>,
{
    pub fn new(sessions: Arc<SessionController<F>>, trigger: Arc<ShutdownTrigger>) -> Self {
        Self { sessions, trigger }
    }
}

#[async_trait]
impl<F> ControlApi for DaemonService<F>
where
    F: Factory<Item = Controller, Error = ControllerError>,
{
    async fn setup_test(
        &self,
        pipelines: &str,
        files: Vec<ConfigFile>,
    ) -> Result<String, DaemonError> {
        if self.trigger.is_triggered() {
            return Err(SessionError::ShutdownInProgress.into());
        }
        let pipelines = parse_manifest(pipelines)?;
        let session = self.sessions.create(pipelines, &files).await?;
        Ok(session.id().to_string())
    }

    async fn execute_test(
        &self,
        session: &str,
        input_plugin: &str,
        lines: Vec<String>,
        fields: &str,
        expected: Option<usize>,
    ) -> Result<Vec<String>, DaemonError> {
        let session = self.sessions.get(session)?;
        let expected = expected.unwrap_or(lines.len());
        let results = session
            .execute_test(input_plugin, &lines, fields, expected)
            .await?;
        Ok(results)
    }

    async fn teardown_test(&self, session: &str) -> Result<(), DaemonError> {
        self.sessions.destroy_by_id(session).await?;
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), DaemonError> {
        self.trigger.trigger(ShutdownSource::Command);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::FakeFactory;
    use crate::events::Bus;
    use crate::pool::Pool;
    use crate::session::PassthroughRewriter;

    fn service(dir: &std::path::Path) -> (DaemonService<FakeFactory>, Arc<ShutdownTrigger>) {
        let factory = FakeFactory::new(dir);
        let sessions = SessionController::new(
            Pool::new(factory, 1, Bus::default()),
            dir.join("session"),
            Arc::new(PassthroughRewriter),
            false,
            Bus::default(),
        );
        let trigger = Arc::new(ShutdownTrigger::new(Bus::default()));
        (DaemonService::new(Arc::new(sessions), Arc::clone(&trigger)), trigger)
    }

    const MANIFEST: &str = "- pipeline.id: main\n  path.config: main.conf\n";

    #[tokio::test]
    async fn test_setup_and_teardown() {
        let dir = tempfile::tempdir().unwrap();
        let (svc, _) = service(dir.path());

        let id = svc
            .setup_test(MANIFEST, vec![ConfigFile::new("main.conf", "input {} output {}")])
            .await
            .unwrap();
        assert!(!id.is_empty());
        svc.teardown_test(&id).await.unwrap();

        let err = svc.teardown_test(&id).await.unwrap_err();
        assert_eq!(err.as_label(), "session_not_found");
    }

    #[tokio::test]
    async fn test_invalid_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let (svc, _) = service(dir.path());
        let err = svc.setup_test("pipeline.id: [", Vec::new()).await.unwrap_err();
        assert_eq!(err.as_label(), "daemon_manifest");
    }

    #[tokio::test]
    async fn test_shutdown_refuses_new_sessions_only() {
        let dir = tempfile::tempdir().unwrap();
        let (svc, trigger) = service(dir.path());
        let id = svc
            .setup_test(MANIFEST, vec![ConfigFile::new("main.conf", "")])
            .await
            .unwrap();

        svc.shutdown().await.unwrap();
        assert_eq!(trigger.source(), Some(ShutdownSource::Command));

        let err = svc.setup_test(MANIFEST, Vec::new()).await.unwrap_err();
        assert_eq!(err.to_string(), "shutdown in progress");

        // plugin lookup still reaches the live session
        let err = svc
            .execute_test(&id, "in", vec!["a".into()], "", None)
            .await
            .unwrap_err();
        assert_eq!(err.as_label(), "session_unknown_input");
        svc.teardown_test(&id).await.unwrap();
    }
}
