//! # Controller lifecycle states and the transition table.
//!
//! ```text
//!  created ──start──► started ──pipeline-ready──► ready ◄──┐ pipeline-ready
//!                        ▲                          │ ─────┘
//!                        │                     setup-test
//!                        │                          ▼
//!                        │                   setting_up_test
//!                        │                          │ pipeline-ready
//!                        │ teardown                 ▼
//!                        └──────────────────── ready_for_test ◄──────────┐
//!                                                   │ execute-test       │
//!                                                   ▼                    │ test-complete
//!                                             executing_test             │
//!                                                   │ pipeline-ready     │
//!                                                   ▼                    │
//!                                              running_test ─────────────┘
//!                                                (pipeline-ready: stays)
//!
//!  any other (state, command) pair ──► unknown (terminal)
//! ```

use std::fmt;

/// Lifecycle state of one supervised engine instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerState {
    Created,
    Started,
    Ready,
    SettingUpTest,
    ReadyForTest,
    ExecutingTest,
    RunningTest,
    /// Terminal error state reached by any undefined transition.
    Unknown,
}

impl ControllerState {
    /// All states, in declaration order.
    pub const ALL: [ControllerState; 8] = [
        ControllerState::Created,
        ControllerState::Started,
        ControllerState::Ready,
        ControllerState::SettingUpTest,
        ControllerState::ReadyForTest,
        ControllerState::ExecutingTest,
        ControllerState::RunningTest,
        ControllerState::Unknown,
    ];

    /// Returns the snake_case name used in logs and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            ControllerState::Created => "created",
            ControllerState::Started => "started",
            ControllerState::Ready => "ready",
            ControllerState::SettingUpTest => "setting_up_test",
            ControllerState::ReadyForTest => "ready_for_test",
            ControllerState::ExecutingTest => "executing_test",
            ControllerState::RunningTest => "running_test",
            ControllerState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input to the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Start,
    PipelineReady,
    SetupTest,
    ExecuteTest,
    TestComplete,
    Teardown,
    Crash,
}

impl Command {
    /// All commands, in declaration order.
    pub const ALL: [Command; 7] = [
        Command::Start,
        Command::PipelineReady,
        Command::SetupTest,
        Command::ExecuteTest,
        Command::TestComplete,
        Command::Teardown,
        Command::Crash,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::PipelineReady => "pipeline-ready",
            Command::SetupTest => "setup-test",
            Command::ExecuteTest => "execute-test",
            Command::TestComplete => "test-complete",
            Command::Teardown => "teardown",
            Command::Crash => "crash",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Looks up `(state, command)` in the transition table.
///
/// Pairs without an entry map to [`ControllerState::Unknown`]; `unknown` itself
/// has no outgoing transitions.
pub fn transition(state: ControllerState, command: Command) -> ControllerState {
    use Command as C;
    use ControllerState as S;

    match (state, command) {
        (S::Created, C::Start) => S::Started,
        (S::Started, C::PipelineReady) => S::Ready,
        (S::Ready, C::PipelineReady) => S::Ready,
        (S::Ready, C::SetupTest) => S::SettingUpTest,
        (S::SettingUpTest, C::PipelineReady) => S::ReadyForTest,
        (S::ReadyForTest, C::ExecuteTest) => S::ExecutingTest,
        (S::ReadyForTest, C::Teardown) => S::Started,
        (S::ExecutingTest, C::PipelineReady) => S::RunningTest,
        (S::RunningTest, C::PipelineReady) => S::RunningTest,
        (S::RunningTest, C::TestComplete) => S::ReadyForTest,
        _ => S::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: [(ControllerState, Command, ControllerState); 10] = [
        (ControllerState::Created, Command::Start, ControllerState::Started),
        (ControllerState::Started, Command::PipelineReady, ControllerState::Ready),
        (ControllerState::Ready, Command::PipelineReady, ControllerState::Ready),
        (ControllerState::Ready, Command::SetupTest, ControllerState::SettingUpTest),
        (ControllerState::SettingUpTest, Command::PipelineReady, ControllerState::ReadyForTest),
        (ControllerState::ReadyForTest, Command::ExecuteTest, ControllerState::ExecutingTest),
        (ControllerState::ReadyForTest, Command::Teardown, ControllerState::Started),
        (ControllerState::ExecutingTest, Command::PipelineReady, ControllerState::RunningTest),
        (ControllerState::RunningTest, Command::PipelineReady, ControllerState::RunningTest),
        (ControllerState::RunningTest, Command::TestComplete, ControllerState::ReadyForTest),
    ];

    #[test]
    fn test_defined_transitions_match_table() {
        for (from, cmd, to) in TABLE {
            assert_eq!(transition(from, cmd), to, "{from} --{cmd}-->");
        }
    }

    #[test]
    fn test_every_other_pair_is_unknown() {
        for state in ControllerState::ALL {
            for cmd in Command::ALL {
                let defined = TABLE.iter().any(|(f, c, _)| *f == state && *c == cmd);
                if !defined {
                    assert_eq!(
                        transition(state, cmd),
                        ControllerState::Unknown,
                        "{state} --{cmd}--> should be unknown"
                    );
                }
            }
        }
    }

    #[test]
    fn test_crash_is_never_defined() {
        for state in ControllerState::ALL {
            assert_eq!(transition(state, Command::Crash), ControllerState::Unknown);
        }
    }

    #[test]
    fn test_full_cycle_returns_to_started() {
        let commands = [
            Command::Start,
            Command::PipelineReady,
            Command::SetupTest,
            Command::PipelineReady,
            Command::ExecuteTest,
            Command::PipelineReady,
            Command::PipelineReady,
            Command::TestComplete,
            Command::ExecuteTest,
            Command::PipelineReady,
            Command::TestComplete,
            Command::Teardown,
        ];
        let end = commands
            .into_iter()
            .fold(ControllerState::Created, transition);
        assert_eq!(end, ControllerState::Started);
    }

    #[test]
    fn test_display_names() {
        assert_eq!(ControllerState::SettingUpTest.to_string(), "setting_up_test");
        assert_eq!(Command::PipelineReady.to_string(), "pipeline-ready");
    }
}
