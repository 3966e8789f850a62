//! Step events: the outcome (`Status`) and lifecycle phase (`State`) of a step

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::NotificationError;

/// Outcome of a step's action.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
pub enum Status {
    /// Action has not settled yet
    Undefined,
    /// Action settled without error
    Successed,
    /// Action settled with an error (after retries, if any)
    Failed,
    /// Step was interrupted and must not be rolled forward or back
    Canceled,
}

/// Lifecycle phase of a step.
///
/// Only ever advances `Idle -> Running -> Completed`.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
pub enum State {
    /// Not started
    Idle,
    /// Action is running or retrying
    Running,
    /// Action has settled; terminal
    Completed,
}

/// A state or status transition, as carried by a notification.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
pub enum Event {
    /// Outcome change
    Status(Status),
    /// Lifecycle change
    State(State),
}

impl Status {
    /// Event name, as used by `FromStr`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Undefined => "Undefined",
            Self::Successed => "Successed",
            Self::Failed => "Failed",
            Self::Canceled => "Canceled",
        }
    }

    /// Whether the action has settled one way or the other.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Successed | Self::Failed)
    }

    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Successed,
            2 => Self::Failed,
            3 => Self::Canceled,
            _ => Self::Undefined,
        }
    }
}

impl State {
    /// Event name, as used by `FromStr`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Running => "Running",
            Self::Completed => "Completed",
        }
    }

    /// Whether no further transition can happen.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Self::Running,
            2 => Self::Completed,
            _ => Self::Idle,
        }
    }
}

impl Event {
    /// Events a saga republishes for every registered step.
    pub const PROPAGATED: [Event; 5] = [
        Event::State(State::Running),
        Event::State(State::Completed),
        Event::Status(Status::Canceled),
        Event::Status(Status::Failed),
        Event::Status(Status::Successed),
    ];

    /// Name of the wrapped status or state.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Status(status) => status.as_str(),
            Self::State(state) => state.as_str(),
        }
    }

    /// The status, if this is a status event.
    pub fn as_status(&self) -> Option<Status> {
        match self {
            Self::Status(status) => Some(*status),
            Self::State(_) => None,
        }
    }

    /// The state, if this is a state event.
    pub fn as_state(&self) -> Option<State> {
        match self {
            Self::State(state) => Some(*state),
            Self::Status(_) => None,
        }
    }
}

impl From<Status> for Event {
    fn from(status: Status) -> Self {
        Self::Status(status)
    }
}

impl From<State> for Event {
    fn from(state: State) -> Self {
        Self::State(state)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Status {
    type Err = NotificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Undefined" => Ok(Self::Undefined),
            "Successed" => Ok(Self::Successed),
            "Failed" => Ok(Self::Failed),
            "Canceled" => Ok(Self::Canceled),
            other => Err(NotificationError::InvalidEvent(other.into())),
        }
    }
}

impl FromStr for State {
    type Err = NotificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Idle" => Ok(Self::Idle),
            "Running" => Ok(Self::Running),
            "Completed" => Ok(Self::Completed),
            other => Err(NotificationError::InvalidEvent(other.into())),
        }
    }
}

impl FromStr for Event {
    type Err = NotificationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<State>()
            .map(Event::State)
            .or_else(|_| s.parse::<Status>().map(Event::Status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        assert_eq!(Event::from(Status::Successed).to_string(), "Successed");
        assert_eq!(Event::from(State::Completed).to_string(), "Completed");
        assert_eq!(Status::Canceled.as_str(), "Canceled");
    }

    #[test]
    fn test_event_parse() {
        assert_eq!("Running".parse::<Event>().unwrap(), Event::State(State::Running));
        assert_eq!("Failed".parse::<Event>().unwrap(), Event::Status(Status::Failed));

        // The retrier's internal decision is not an event
        let err = "Retry".parse::<Event>().unwrap_err();
        assert_eq!(err.to_string(), "invalid event: Retry");
        assert!("".parse::<Event>().is_err());
    }

    #[test]
    fn test_state_ordering() {
        assert!(State::Idle < State::Running);
        assert!(State::Running < State::Completed);
        assert!(State::Completed.is_terminal());
    }

    #[test]
    fn test_raw_round_trip() {
        for status in [Status::Undefined, Status::Successed, Status::Failed, Status::Canceled] {
            assert_eq!(Status::from_u8(status as u8), status);
        }
        for state in [State::Idle, State::Running, State::Completed] {
            assert_eq!(State::from_u8(state as u8), state);
        }
    }

    #[test]
    fn test_propagated_events() {
        assert_eq!(Event::PROPAGATED.len(), 5);
        assert!(!Event::PROPAGATED.contains(&Event::State(State::Idle)));
        assert!(!Event::PROPAGATED.contains(&Event::Status(Status::Undefined)));
    }
}
