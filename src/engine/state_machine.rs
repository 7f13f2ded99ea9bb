//! # StateMachine: monitored controller state with cancellable waits.
//!
//! Holds the current [`ControllerState`] in a [`tokio::sync::watch`] channel.
//! Every command is applied atomically under the channel's lock and wakes all waiters.
//!
//! ## Rules
//! - `execute_command` never fails: an undefined `(state, command)` pair moves the
//!   machine to `unknown` and publishes `ControllerUnhealthy`.
//! - `wait_for_state` returns `Ok` only while the target state holds.
//! - Cancellation of the lifetime token fails every pending and future wait with
//!   [`StateError::Shutdown`]; the cancellation branch is checked first, so a wait
//!   never hangs past shutdown and never succeeds after it.
//!
//! ```text
//! wait_for_state(target, timeout)
//!   select! (biased)
//!     ├─ token.cancelled()          → Err(Shutdown)
//!     └─ timeout(rx.wait_for(...))
//!          ├─ state == target       → Ok
//!          ├─ state == unknown      → Err(Unhealthy)
//!          └─ elapsed               → Err(Timeout)
//! ```

use std::time::Duration;

use tokio::sync::watch;
use tokio::time;
use tokio_util::sync::CancellationToken;

use crate::engine::state::{Command, ControllerState, transition};
use crate::error::StateError;
use crate::events::{Bus, Event, EventKind};

/// State holder for one controller.
pub struct StateMachine {
    controller: usize,
    state: watch::Sender<ControllerState>,
    token: CancellationToken,
    bus: Bus,
}

impl StateMachine {
    /// Creates a machine in [`ControllerState::Created`].
    ///
    /// `token` is the owning controller's lifetime token.
    pub fn new(controller: usize, token: CancellationToken, bus: Bus) -> Self {
        let (state, _rx) = watch::channel(ControllerState::Created);
        Self {
            controller,
            state,
            token,
            bus,
        }
    }

    /// Returns the current state.
    pub fn current(&self) -> ControllerState {
        *self.state.borrow()
    }

    /// Applies `command` and returns the resulting state.
    pub fn execute_command(&self, command: Command) -> ControllerState {
        let mut from = ControllerState::Unknown;
        let mut to = ControllerState::Unknown;
        self.state.send_modify(|state| {
            from = *state;
            to = transition(from, command);
            *state = to;
        });

        let kind = if to == ControllerState::Unknown && from != ControllerState::Unknown {
            EventKind::ControllerUnhealthy
        } else {
            EventKind::StateChanged
        };
        self.bus.publish(
            Event::new(kind)
                .with_controller(self.controller)
                .with_transition(from, command, to),
        );
        to
    }

    /// Waits until the machine is in `target`.
    ///
    /// Fails with [`StateError::Shutdown`] once the lifetime token is cancelled,
    /// [`StateError::Unhealthy`] if the machine falls into `unknown` (unless that
    /// is the target) and [`StateError::Timeout`] after `timeout`.
    pub async fn wait_for_state(
        &self,
        target: ControllerState,
        timeout: Duration,
    ) -> Result<(), StateError> {
        let mut rx = self.state.subscribe();
        let reached = rx.wait_for(|s| *s == target || *s == ControllerState::Unknown);

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(StateError::Shutdown { target }),
            res = time::timeout(timeout, reached) => match res {
                Ok(Ok(state)) if *state == target => Ok(()),
                Ok(Ok(_)) => Err(StateError::Unhealthy { target }),
                // The sender lives as long as `self`, so a closed channel means teardown.
                Ok(Err(_closed)) => Err(StateError::Shutdown { target }),
                Err(_elapsed) => Err(StateError::Timeout {
                    target,
                    current: self.current(),
                    timeout,
                }),
            },
        }
    }

    /// True unless the machine reached `unknown`.
    pub fn is_healthy(&self) -> bool {
        self.current() != ControllerState::Unknown
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    const WAIT: Duration = Duration::from_secs(2);

    fn machine() -> (Arc<StateMachine>, CancellationToken) {
        let token = CancellationToken::new();
        (Arc::new(StateMachine::new(0, token.clone(), Bus::default())), token)
    }

    #[tokio::test]
    async fn test_commands_follow_table() {
        let (sm, _token) = machine();
        assert_eq!(sm.execute_command(Command::Start), ControllerState::Started);
        assert_eq!(sm.execute_command(Command::PipelineReady), ControllerState::Ready);
        assert_eq!(sm.execute_command(Command::PipelineReady), ControllerState::Ready);
        assert_eq!(sm.execute_command(Command::SetupTest), ControllerState::SettingUpTest);
        assert!(sm.is_healthy());
    }

    #[tokio::test]
    async fn test_invalid_command_degrades_to_unknown() {
        let (sm, _token) = machine();
        sm.execute_command(Command::Start);
        assert_eq!(sm.execute_command(Command::ExecuteTest), ControllerState::Unknown);
        assert!(!sm.is_healthy());

        // unknown is terminal
        assert_eq!(sm.execute_command(Command::Start), ControllerState::Unknown);
        assert!(!sm.is_healthy());
    }

    #[tokio::test]
    async fn test_unhealthy_transition_is_published() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let sm = StateMachine::new(7, CancellationToken::new(), bus);

        sm.execute_command(Command::Teardown);

        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::ControllerUnhealthy);
        assert_eq!(ev.controller, Some(7));
        assert_eq!(ev.from, Some(ControllerState::Created));
        assert_eq!(ev.command, Some(Command::Teardown));
    }

    #[tokio::test]
    async fn test_wait_returns_immediately_when_in_target() {
        let (sm, _token) = machine();
        sm.wait_for_state(ControllerState::Created, WAIT).await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_wakes_on_transition() {
        let (sm, _token) = machine();
        let waiter = {
            let sm = Arc::clone(&sm);
            tokio::spawn(async move { sm.wait_for_state(ControllerState::Ready, WAIT).await })
        };

        tokio::task::yield_now().await;
        sm.execute_command(Command::Start);
        sm.execute_command(Command::PipelineReady);

        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let (sm, _token) = machine();
        let err = sm
            .wait_for_state(ControllerState::Ready, Duration::from_millis(20))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StateError::Timeout {
                target: ControllerState::Ready,
                current: ControllerState::Created,
                timeout: Duration::from_millis(20),
            }
        );
    }

    #[tokio::test]
    async fn test_cancellation_releases_pending_waiters() {
        let (sm, token) = machine();
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let sm = Arc::clone(&sm);
                tokio::spawn(async move { sm.wait_for_state(ControllerState::Ready, WAIT).await })
            })
            .collect();

        tokio::task::yield_now().await;
        token.cancel();

        for w in waiters {
            assert_eq!(
                w.await.unwrap().unwrap_err(),
                StateError::Shutdown {
                    target: ControllerState::Ready
                }
            );
        }
    }

    #[tokio::test]
    async fn test_wait_after_cancellation_fails_even_if_state_matches() {
        let (sm, token) = machine();
        token.cancel();
        let err = sm
            .wait_for_state(ControllerState::Created, WAIT)
            .await
            .unwrap_err();
        assert_eq!(err.as_label(), "state_shutdown");
    }

    #[tokio::test]
    async fn test_wait_fails_fast_when_unhealthy() {
        let (sm, _token) = machine();
        let waiter = {
            let sm = Arc::clone(&sm);
            tokio::spawn(async move { sm.wait_for_state(ControllerState::Ready, WAIT).await })
        };

        tokio::task::yield_now().await;
        sm.execute_command(Command::Crash);

        assert_eq!(
            waiter.await.unwrap().unwrap_err(),
            StateError::Unhealthy {
                target: ControllerState::Ready
            }
        );
    }
}
