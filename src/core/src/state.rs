//! Pod and container state machine.
//!
//! ```text
//!   ready ──▶ running ──▶ paused
//!     ▲          │  ▲        │
//!     └──────────┘  └────────┘
//! ```
//!
//! The same state type is persisted for pods and containers, as
//! `{"state": "<ready|running|paused>"}`.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{PodError, Result};

/// A single pod or container state value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateString {
    /// Created (or stopped) and ready to be run.
    Ready,
    /// Currently running.
    Running,
    /// Paused while running.
    Paused,
    /// Any persisted value outside the enumeration.
    #[serde(other)]
    Unknown,
}

impl fmt::Display for StateString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateString::Ready => write!(f, "ready"),
            StateString::Running => write!(f, "running"),
            StateString::Paused => write!(f, "paused"),
            StateString::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for StateString {
    type Err = PodError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ready" => Ok(StateString::Ready),
            "running" => Ok(StateString::Running),
            "paused" => Ok(StateString::Paused),
            _ => Err(PodError::ConfigError(format!(
                "unknown state '{}' (supported: ready, running, paused)",
                s
            ))),
        }
    }
}

/// Persisted pod/container state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    pub state: StateString,
}

impl State {
    pub fn new(state: StateString) -> Self {
        Self { state }
    }

    /// Whether the state is one of ready, running or paused.
    pub fn valid(&self) -> bool {
        matches!(
            self.state,
            StateString::Ready | StateString::Running | StateString::Paused
        )
    }

    /// Check that this state equals `old_state` and that moving to
    /// `new_state` is allowed.
    pub fn valid_transition(&self, old_state: StateString, new_state: StateString) -> Result<()> {
        if self.state != old_state {
            return Err(PodError::InvalidState {
                current: self.state,
                expected: old_state,
            });
        }

        let allowed = match self.state {
            StateString::Ready => new_state == StateString::Running,
            StateString::Running => {
                new_state == StateString::Paused || new_state == StateString::Ready
            }
            StateString::Paused => new_state == StateString::Running,
            StateString::Unknown => false,
        };

        if allowed {
            Ok(())
        } else {
            Err(PodError::InvalidTransition {
                from: self.state,
                to: new_state,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [StateString; 4] = [
        StateString::Ready,
        StateString::Running,
        StateString::Paused,
        StateString::Unknown,
    ];

    fn allowed(from: StateString, to: StateString) -> bool {
        matches!(
            (from, to),
            (StateString::Ready, StateString::Running)
                | (StateString::Running, StateString::Paused)
                | (StateString::Running, StateString::Ready)
                | (StateString::Paused, StateString::Running)
        )
    }

    #[test]
    fn test_valid_states() {
        assert!(State::new(StateString::Ready).valid());
        assert!(State::new(StateString::Running).valid());
        assert!(State::new(StateString::Paused).valid());
        assert!(!State::new(StateString::Unknown).valid());
    }

    #[test]
    fn test_out_of_range_state_is_invalid() {
        for raw in [r#"{"state":"stopped"}"#, r#"{"state":""}"#, r#"{"state":"READY"}"#] {
            let state: State = serde_json::from_str(raw).unwrap();
            assert!(!state.valid(), "{raw} should be invalid");
        }
    }

    #[test]
    fn test_transition_table() {
        for from in ALL {
            for to in ALL {
                let result = State::new(from).valid_transition(from, to);
                if allowed(from, to) {
                    assert!(result.is_ok(), "{from} -> {to} should be allowed");
                } else {
                    let err = result.unwrap_err();
                    let msg = err.to_string();
                    assert!(matches!(err, PodError::InvalidTransition { .. }));
                    assert!(msg.contains(&from.to_string()), "{msg}");
                    assert!(msg.contains(&to.to_string()), "{msg}");
                }
            }
        }
    }

    #[test]
    fn test_transition_from_unexpected_state() {
        let state = State::new(StateString::Paused);
        let err = state
            .valid_transition(StateString::Ready, StateString::Running)
            .unwrap_err();
        assert!(matches!(
            err,
            PodError::InvalidState {
                current: StateString::Paused,
                expected: StateString::Ready,
            }
        ));
    }

    #[test]
    fn test_state_json_format() {
        let json = serde_json::to_string(&State::new(StateString::Running)).unwrap();
        assert_eq!(json, r#"{"state":"running"}"#);

        let parsed: State = serde_json::from_str(r#"{"state":"paused"}"#).unwrap();
        assert_eq!(parsed.state, StateString::Paused);
    }

    #[test]
    fn test_state_from_str() {
        assert_eq!("ready".parse::<StateString>().unwrap(), StateString::Ready);
        assert_eq!("running".parse::<StateString>().unwrap(), StateString::Running);
        assert_eq!("paused".parse::<StateString>().unwrap(), StateString::Paused);
        assert!("unknown".parse::<StateString>().is_err());
        assert!("".parse::<StateString>().is_err());
    }
}
