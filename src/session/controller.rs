//! # SessionController: serialized session admission over the pool.
//!
//! ```text
//! create(pipelines, files)
//!   create_lock ───────────────┐  one creator at a time
//!   gate.wait_for(finished || live == 0)
//!     ├─ finished  → Err(ShutdownInProgress)
//!     └─ live == 0 → pool.get() → register (live += 1) → session.setup()
//!                                   └─ setup failed → deregister, return controller unclean
//!
//! destroy_by_id(id)
//!   deregister → session.teardown() → pool.return_instance(clean = teardown ok) → live -= 1
//!
//! wait_finish()
//!   finished = true (wakes blocked creators) → future resolving at live == 0
//! ```
//!
//! Only one session is live at a time, whatever the pool's capacity.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, watch};
use tracing::debug;
use uuid::Uuid;

use crate::engine::Controller;
use crate::error::{ControllerError, SessionError};
use crate::events::{Bus, Event, EventKind};
use crate::pipeline::Pipeline;
use crate::pool::{Factory, Pool};
use crate::session::live::{ConfigFile, Session};
use crate::session::rewrite::ConfigRewriter;

#[derive(Clone, Copy, Debug, Default)]
struct Gate {
    live: usize,
    finished: bool,
}

/// Tracks live sessions and leases controllers for them.
pub struct SessionController<F>
where
    F: Factory<Item = Controller, Error = ControllerError>,
{
    pool: Pool<F>,
    root: PathBuf,
    rewriter: Arc<dyn ConfigRewriter>,
    no_cleanup: bool,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    gate: watch::Sender<Gate>,
    create_lock: AsyncMutex<()>,
    bus: Bus,
}

impl<F> SessionController<F>
where
    F: Factory<Item = Controller, Error = ControllerError>,
{
    /// Session directories are created under `root`.
    pub fn new(
        pool: Pool<F>,
        root: impl Into<PathBuf>,
        rewriter: Arc<dyn ConfigRewriter>,
        no_cleanup: bool,
        bus: Bus,
    ) -> Self {
        let (gate, _rx) = watch::channel(Gate::default());
        Self {
            pool,
            root: root.into(),
            rewriter,
            no_cleanup,
            sessions: Mutex::new(HashMap::new()),
            gate,
            create_lock: AsyncMutex::new(()),
            bus,
        }
    }

    /// Creates and sets up a session once no other session is live.
    pub async fn create(
        &self,
        pipelines: Vec<Pipeline>,
        files: &[ConfigFile],
    ) -> Result<Arc<Session>, SessionError> {
        let _serial = self.create_lock.lock().await;

        let mut rx = self.gate.subscribe();
        let finished = rx
            .wait_for(|g| g.finished || g.live == 0)
            .await
            .map(|g| g.finished)
            .unwrap_or(true);
        if finished {
            return Err(SessionError::ShutdownInProgress);
        }

        let controller = self.pool.get().await?;
        let id = Uuid::new_v4().to_string();
        let session = Arc::new(Session::new(
            id.clone(),
            controller,
            self.root.join(&id),
            Arc::clone(&self.rewriter),
            self.no_cleanup,
            self.bus.clone(),
        ));

        self.lock().insert(id.clone(), Arc::clone(&session));
        self.gate.send_modify(|g| g.live += 1);
        self.bus.publish(
            Event::new(EventKind::SessionCreated)
                .with_session(id.as_str())
                .with_controller(session.controller().id()),
        );

        if let Err(err) = session.setup(pipelines, files).await {
            debug!(session = %id, %err, "session setup failed");
            self.lock().remove(&id);
            session.cleanup().await;
            self.release(&session, Some(&err)).await;
            return Err(err);
        }
        Ok(session)
    }

    /// Looks up a live session.
    pub fn get(&self, id: &str) -> Result<Arc<Session>, SessionError> {
        self.lock()
            .get(id)
            .cloned()
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })
    }

    /// Tears the session down and returns its controller to the pool.
    ///
    /// A failed teardown discards the controller instead of reusing it.
    pub async fn destroy_by_id(&self, id: &str) -> Result<(), SessionError> {
        let session = self
            .lock()
            .remove(id)
            .ok_or_else(|| SessionError::NotFound { id: id.to_string() })?;

        let result = session.teardown().await;
        self.release(&session, result.as_ref().err()).await;
        result
    }

    /// Rejects every future `create` and returns a future that resolves once no
    /// session is live.
    pub fn wait_finish(&self) -> impl Future<Output = ()> + Send + 'static + use<F> {
        self.gate.send_modify(|g| g.finished = true);
        let mut rx = self.gate.subscribe();
        async move {
            let _ = rx.wait_for(|g| g.live == 0).await;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.gate.borrow().finished
    }

    /// Number of live sessions.
    pub fn live(&self) -> usize {
        self.gate.borrow().live
    }

    pub fn pool(&self) -> &Pool<F> {
        &self.pool
    }

    /// Returns the controller to the pool, discarding it on `failure`.
    async fn release(&self, session: &Session, failure: Option<&SessionError>) {
        self.pool
            .return_instance(Arc::clone(session.controller()), failure.is_none())
            .await;
        self.gate.send_modify(|g| g.live = g.live.saturating_sub(1));
        let mut ev = Event::new(EventKind::SessionDestroyed)
            .with_session(session.id())
            .with_controller(session.controller().id());
        if let Some(err) = failure {
            ev = ev.with_reason(err.to_string());
        }
        self.bus.publish(ev);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
