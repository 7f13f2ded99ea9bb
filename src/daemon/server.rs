//! # Control server: JSON lines over a Unix domain socket.
//!
//! Each connection carries newline-delimited requests; every request gets exactly
//! one response line.
//!
//! ```text
//! → {"op":"setup_test","pipelines":"- pipeline.id: main\n  path.config: main.conf\n","files":[{"name":"main.conf","body":"..."}]}
//! ← {"status":"session","session":"0b8e..."}
//! → {"op":"execute_test","session":"0b8e...","input_plugin":"in","lines":["a","b"],"fields":"[{},{}]"}
//! ← {"status":"results","results":["{...}","{...}"]}
//! → {"op":"teardown_test","session":"0b8e..."}
//! ← {"status":"done"}
//! → {"op":"nope"}
//! ← {"status":"error","error":"invalid request: ...","label":"daemon_request"}
//! ```
//!
//! ## Stopping
//! - graceful: stop accepting, close idle connections, let in-flight calls answer.
//! - force: drop in-flight calls.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::daemon::shutdown::Stoppable;
use crate::error::DaemonError;
use crate::session::ConfigFile;

/// The daemon's control operations.
#[async_trait]
pub trait ControlApi: Send + Sync + 'static {
    /// Creates a session from a `pipelines.yml` manifest and its config files.
    async fn setup_test(
        &self,
        pipelines: &str,
        files: Vec<ConfigFile>,
    ) -> Result<String, DaemonError>;

    /// Runs one test in `session`. `expected` defaults to the number of lines.
    async fn execute_test(
        &self,
        session: &str,
        input_plugin: &str,
        lines: Vec<String>,
        fields: &str,
        expected: Option<usize>,
    ) -> Result<Vec<String>, DaemonError>;

    async fn teardown_test(&self, session: &str) -> Result<(), DaemonError>;

    /// Triggers daemon shutdown.
    async fn shutdown(&self) -> Result<(), DaemonError>;
}

/// One control request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    SetupTest {
        pipelines: String,
        #[serde(default)]
        files: Vec<ConfigFile>,
    },
    ExecuteTest {
        session: String,
        input_plugin: String,
        #[serde(default)]
        lines: Vec<String>,
        #[serde(default)]
        fields: String,
        #[serde(default)]
        expected: Option<usize>,
    },
    TeardownTest {
        session: String,
    },
    Shutdown,
}

/// One control response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Session { session: String },
    Results { results: Vec<String> },
    Done,
    Error { error: String, label: String },
}

impl Response {
    fn failure(err: &DaemonError) -> Self {
        Response::Error {
            error: err.to_string(),
            label: err.as_label().to_string(),
        }
    }
}

/// Decodes one request line and runs it against `api`.
pub async fn dispatch(api: &dyn ControlApi, line: &str) -> Response {
    let request: Request = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => return Response::failure(&DaemonError::from(e)),
    };

    let result = match request {
        Request::SetupTest { pipelines, files } => api
            .setup_test(&pipelines, files)
            .await
            .map(|session| Response::Session { session }),
        Request::ExecuteTest {
            session,
            input_plugin,
            lines,
            fields,
            expected,
        } => api
            .execute_test(&session, &input_plugin, lines, &fields, expected)
            .await
            .map(|results| Response::Results { results }),
        Request::TeardownTest { session } => {
            api.teardown_test(&session).await.map(|()| Response::Done)
        }
        Request::Shutdown => api.shutdown().await.map(|()| Response::Done),
    };
    result.unwrap_or_else(|e| Response::failure(&e))
}

/// Unix socket server for [`ControlApi`].
pub struct ControlServer {
    path: PathBuf,
    accept: CancellationToken,
    force: CancellationToken,
    connections: TaskTracker,
}

impl ControlServer {
    /// Binds `path` (replacing a stale socket) and starts accepting.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(path: &Path, api: Arc<dyn ControlApi>) -> Result<Arc<Self>, DaemonError> {
        remove_stale_socket(path)?;
        let listener = UnixListener::bind(path).map_err(|source| DaemonError::Bind {
            path: path.to_path_buf(),
            source,
        })?;
        info!(socket = %path.display(), "control server listening");

        let server = Arc::new(Self {
            path: path.to_path_buf(),
            accept: CancellationToken::new(),
            force: CancellationToken::new(),
            connections: TaskTracker::new(),
        });
        server.connections.spawn(accept_loop(
            listener,
            api,
            server.accept.clone(),
            server.force.clone(),
            server.connections.clone(),
        ));
        Ok(server)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Stoppable for ControlServer {
    async fn graceful_stop(&self) {
        self.accept.cancel();
        self.connections.close();
        self.connections.wait().await;
    }

    fn force_stop(&self) {
        self.accept.cancel();
        self.force.cancel();
        self.connections.close();
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        self.force.cancel();
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(socket = %self.path.display(), %e, "failed to remove control socket");
            }
        }
    }
}

fn remove_stale_socket(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::FileTypeExt;

    let bind_error = |source| DaemonError::Bind {
        path: path.to_path_buf(),
        source,
    };
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_socket() => {
            std::fs::remove_file(path).map_err(bind_error)?;
            debug!(socket = %path.display(), "removed stale control socket");
            Ok(())
        }
        Ok(_) => Err(bind_error(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            "path exists and is not a socket",
        ))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(bind_error(e)),
    }
}

async fn accept_loop(
    listener: UnixListener,
    api: Arc<dyn ControlApi>,
    accept: CancellationToken,
    force: CancellationToken,
    connections: TaskTracker,
) {
    loop {
        let accepted = tokio::select! {
            _ = accept.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, _addr)) => {
                connections.spawn(serve_connection(
                    stream,
                    Arc::clone(&api),
                    accept.clone(),
                    force.clone(),
                ));
            }
            Err(e) => warn!(%e, "control accept failed"),
        }
    }
    debug!("control server stopped accepting");
}

async fn serve_connection(
    stream: UnixStream,
    api: Arc<dyn ControlApi>,
    accept: CancellationToken,
    force: CancellationToken,
) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        let line = tokio::select! {
            _ = accept.cancelled() => break,
            _ = force.cancelled() => break,
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                debug!(%e, "control connection read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = tokio::select! {
            _ = force.cancelled() => break,
            response = dispatch(api.as_ref(), &line) => response,
        };
        let mut out = match serde_json::to_vec(&response) {
            Ok(out) => out,
            Err(e) => {
                warn!(%e, "failed to encode control response");
                break;
            }
        };
        out.push(b'\n');
        if let Err(e) = writer.write_all(&out).await {
            debug!(%e, "control connection write failed");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
    use tokio::sync::Notify;

    use super::*;
    use crate::error::SessionError;

    /// Echoes requests; `execute_test` blocks until `release` is notified.
    #[derive(Default)]
    struct StubApi {
        release: Notify,
    }

    #[async_trait]
    impl ControlApi for StubApi {
        async fn setup_test(
            &self,
            pipelines: &str,
            files: Vec<ConfigFile>,
        ) -> Result<String, DaemonError> {
            Ok(format!("{}:{}", pipelines.len(), files.len()))
        }

        async fn execute_test(
            &self,
            _session: &str,
            _input_plugin: &str,
            lines: Vec<String>,
            _fields: &str,
            expected: Option<usize>,
        ) -> Result<Vec<String>, DaemonError> {
            self.release.notified().await;
            Ok(lines.into_iter().take(expected.unwrap_or(usize::MAX)).collect())
        }

        async fn teardown_test(&self, session: &str) -> Result<(), DaemonError> {
            Err(SessionError::NotFound { id: session.to_string() }.into())
        }

        async fn shutdown(&self) -> Result<(), DaemonError> {
            Ok(())
        }
    }

    struct Client {
        lines: tokio::io::Lines<BufReader<OwnedReadHalf>>,
        writer: OwnedWriteHalf,
    }

    impl Client {
        async fn connect(path: &Path) -> Self {
            let (reader, writer) = UnixStream::connect(path).await.unwrap().into_split();
            Self {
                lines: BufReader::new(reader).lines(),
                writer,
            }
        }

        async fn send(&mut self, line: &str) {
            self.writer.write_all(format!("{line}\n").as_bytes()).await.unwrap();
        }

        async fn recv(&mut self) -> Option<Response> {
            let line = self.lines.next_line().await.unwrap()?;
            Some(serde_json::from_str(&line).unwrap())
        }
    }

    fn socket(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("control.sock")
    }

    #[tokio::test]
    async fn test_request_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let server = ControlServer::bind(&socket(&dir), Arc::new(StubApi::default())).unwrap();
        let mut client = Client::connect(server.path()).await;

        client
            .send(r#"{"op":"setup_test","pipelines":"abc","files":[{"name":"a.conf","body":""}]}"#)
            .await;
        assert_eq!(client.recv().await, Some(Response::Session { session: "3:1".into() }));

        client.send(r#"{"op":"teardown_test","session":"x"}"#).await;
        assert_eq!(
            client.recv().await,
            Some(Response::Error {
                error: "no valid session with id x".into(),
                label: "session_not_found".into(),
            })
        );

        client.send(r#"{"op":"launch_rockets"}"#).await;
        match client.recv().await {
            Some(Response::Error { label, .. }) => assert_eq!(label, "daemon_request"),
            other => panic!("unexpected response {other:?}"),
        }

        client.send(r#"{"op":"shutdown"}"#).await;
        assert_eq!(client.recv().await, Some(Response::Done));
    }

    #[tokio::test]
    async fn test_graceful_stop_lets_in_flight_call_answer() {
        let dir = tempfile::tempdir().unwrap();
        let api = Arc::new(StubApi::default());
        let server = ControlServer::bind(&socket(&dir), api.clone()).unwrap();
        let mut busy = Client::connect(server.path()).await;
        let mut idle = Client::connect(server.path()).await;

        busy.send(r#"{"op":"execute_test","session":"s","input_plugin":"in","lines":["a","b"]}"#)
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let stopping = {
            let server = Arc::clone(&server);
            tokio::spawn(async move { server.graceful_stop().await })
        };
        // idle connections are closed
        assert_eq!(idle.recv().await, None);
        assert!(!stopping.is_finished());

        api.release.notify_one();
        assert_eq!(
            busy.recv().await,
            Some(Response::Results { results: vec!["a".into(), "b".into()] })
        );
        tokio::time::timeout(Duration::from_secs(1), stopping)
            .await
            .unwrap()
            .unwrap();
        assert!(UnixStream::connect(server.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_force_stop_drops_in_flight_call() {
        let dir = tempfile::tempdir().unwrap();
        let server = ControlServer::bind(&socket(&dir), Arc::new(StubApi::default())).unwrap();
        let mut busy = Client::connect(server.path()).await;

        busy.send(r#"{"op":"execute_test","session":"s","input_plugin":"in"}"#).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        server.force_stop();

        assert_eq!(busy.recv().await, None);
    }

    #[tokio::test]
    async fn test_stale_socket_is_replaced_and_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = socket(&dir);
        let first = ControlServer::bind(&path, Arc::new(StubApi::default())).unwrap();
        first.force_stop();
        std::mem::forget(first);

        let second = ControlServer::bind(&path, Arc::new(StubApi::default())).unwrap();
        drop(second);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_regular_file_is_not_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = socket(&dir);
        std::fs::write(&path, "keep me").unwrap();

        let err = ControlServer::bind(&path, Arc::new(StubApi::default())).err().unwrap();
        assert_eq!(err.as_label(), "daemon_bind");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "keep me");
    }
}
