//! # Per-test trackers owned by a controller.
//!
//! - [`ReceivedEvents`]: ordered buffer of event payloads plus the expected count
//!   and a completed-once latch.
//! - [`PipelineReadiness`]: pipeline name → ready flag, plus the
//!   [`PIPELINES_RUNNING`] sentinel for the engine's own "pipelines running" signal.
//!
//! Both are guarded by a single std mutex each; no lock is held across an await.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Tracked name standing for the engine's "all pipelines running" log line.
pub const PIPELINES_RUNNING: &str = "__lfv_pipelines_running";

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Default)]
struct Received {
    events: Vec<String>,
    expected: usize,
    completed: bool,
}

/// Append-only event buffer with a once-per-cycle completion latch.
#[derive(Debug, Default)]
pub struct ReceivedEvents {
    inner: Mutex<Received>,
}

impl ReceivedEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one event payload.
    pub fn append(&self, event: impl Into<String>) {
        lock(&self.inner).events.push(event.into());
    }

    /// Returns `true` exactly once per reset cycle: the first time the buffer
    /// length equals the expected count.
    ///
    /// `expected == 0` completes without any event arriving.
    pub fn is_complete_first_time(&self) -> bool {
        let mut inner = lock(&self.inner);
        if !inner.completed && inner.events.len() == inner.expected {
            inner.completed = true;
            return true;
        }
        false
    }

    /// Clears the buffer and latch and sets a new expected count.
    pub fn reset(&self, expected: usize) {
        let mut inner = lock(&self.inner);
        inner.events.clear();
        inner.expected = expected;
        inner.completed = false;
    }

    /// Returns a copy of the buffer.
    pub fn get(&self) -> Vec<String> {
        lock(&self.inner).events.clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Readiness flags for the pipelines of the current configuration.
#[derive(Debug, Default)]
pub struct PipelineReadiness {
    inner: Mutex<HashMap<String, bool>>,
}

impl PipelineReadiness {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks exactly `names` plus [`PIPELINES_RUNNING`], all not ready.
    pub fn reset<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inner = lock(&self.inner);
        inner.clear();
        for name in names {
            inner.insert(name.into(), false);
        }
        inner.insert(PIPELINES_RUNNING.to_string(), false);
    }

    /// Marks the given names ready. Untracked names are recorded too; they do not
    /// block readiness because they are ready by construction.
    pub fn set_ready<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut inner = lock(&self.inner);
        for name in names {
            inner.insert(name.into(), true);
        }
    }

    /// True iff every tracked entry is ready.
    pub fn is_ready(&self) -> bool {
        lock(&self.inner).values().all(|ready| *ready)
    }

    /// Names still waiting, sorted.
    pub fn pending(&self) -> Vec<String> {
        let inner = lock(&self.inner);
        let mut names: Vec<String> = inner
            .iter()
            .filter(|(_, ready)| !**ready)
            .map(|(name, _)| name.clone())
            .collect();
        names.sort_unstable();
        names
    }
}
