//! The narration state machine.
//!
//! States only change through [`StateMachine::transition`] (whitelisted
//! edges) or [`StateMachine::fail`] (any state to `Error`). A rejected
//! transition returns a typed error and leaves the state untouched.

use crate::error::{NarrateError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Idle,
    Initializing,
    Ready,
    Processing,
    Playing,
    Paused,
    Stopping,
    Error,
}

impl std::fmt::Display for ReaderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Processing => "processing",
            Self::Playing => "playing",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

fn valid(from: ReaderState, to: ReaderState) -> bool {
    use ReaderState::*;
    match (from, to) {
        // Start
        (Idle | Error, Initializing) => true,
        // Engine validation outcome
        (Initializing, Ready) => true,
        // Document lifecycle
        (Ready, Processing) | (Processing, Ready) => true,
        // Playback
        (Ready, Playing) => true,
        (Playing, Paused) | (Paused, Playing) => true,
        (Playing | Paused, Ready) => true,
        // Shutdown from anywhere, then quiesce
        (Stopping, Stopping) => false,
        (_, Stopping) => true,
        (Stopping, Idle) => true,
        _ => false,
    }
}

#[derive(Debug)]
pub struct StateMachine {
    state: ReaderState,
    last_error: Option<String>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: ReaderState::Idle,
            last_error: None,
        }
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    /// The most recent non-recoverable error, retained for diagnostics.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Move to `to` if the edge is whitelisted, returning the previous
    /// state. An invalid edge is rejected without mutating anything.
    pub fn transition(&mut self, to: ReaderState) -> Result<ReaderState> {
        if !valid(self.state, to) {
            return Err(NarrateError::State(format!(
                "cannot move from {} to {to}",
                self.state
            )));
        }
        Ok(std::mem::replace(&mut self.state, to))
    }

    /// Record a fatal error: any state to `Error`, retaining the message.
    pub fn fail(&mut self, message: impl Into<String>) -> ReaderState {
        self.last_error = Some(message.into());
        std::mem::replace(&mut self.state, ReaderState::Error)
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ReaderState::*;

    #[test]
    fn full_happy_path() {
        let mut m = StateMachine::new();
        for to in [Initializing, Ready, Processing, Ready, Playing, Paused, Playing, Ready] {
            assert!(m.transition(to).is_ok(), "expected edge to {to}");
        }
        assert!(m.transition(Stopping).is_ok());
        assert!(m.transition(Idle).is_ok());
    }

    #[test]
    fn invalid_edges_do_not_mutate() {
        let mut m = StateMachine::new();
        // Play from Idle is not a thing.
        assert!(m.transition(Playing).is_err());
        assert_eq!(m.state(), Idle);
        // Neither is pausing while idle.
        assert!(m.transition(Paused).is_err());
        assert_eq!(m.state(), Idle);
    }

    #[test]
    fn error_recovers_through_start_or_shutdown() {
        let mut m = StateMachine::new();
        let _ = m.transition(Initializing);
        let prev = m.fail("engine validation failed");
        assert_eq!(prev, Initializing);
        assert_eq!(m.state(), Error);
        assert_eq!(m.last_error(), Some("engine validation failed"));

        // Error -> Initializing (Start again)
        assert!(m.transition(Initializing).is_ok());
        let _ = m.fail("again");
        // Error -> Stopping -> Idle (Shutdown)
        assert!(m.transition(Stopping).is_ok());
        assert!(m.transition(Idle).is_ok());
    }

    #[test]
    fn shutdown_reachable_from_active_states() {
        for start in [Initializing, Ready, Processing, Playing, Paused, Error] {
            let mut m = StateMachine::new();
            let _ = m.transition(Initializing);
            // Force into the state under test.
            while m.state() != start {
                let _ = m.fail("force");
                if start == Error {
                    break;
                }
                let _ = m.transition(Initializing);
                if start == Initializing {
                    break;
                }
                let _ = m.transition(Ready);
                if start == Ready {
                    break;
                }
                match start {
                    Processing => {
                        let _ = m.transition(Processing);
                    }
                    Playing | Paused => {
                        let _ = m.transition(Playing);
                        if start == Paused {
                            let _ = m.transition(Paused);
                        }
                    }
                    _ => {}
                }
                break;
            }
            assert_eq!(m.state(), start, "setup failed for {start}");
            assert!(m.transition(Stopping).is_ok(), "shutdown from {start}");
        }
    }

    #[test]
    fn paused_cannot_jump_to_processing() {
        let mut m = StateMachine::new();
        let _ = m.transition(Initializing);
        let _ = m.transition(Ready);
        let _ = m.transition(Playing);
        let _ = m.transition(Paused);
        assert!(m.transition(Processing).is_err());
        assert_eq!(m.state(), Paused);
    }
}
