//! Notifications broadcast on every step transition

use serde::{Deserialize, Serialize};

use crate::{Event, Identifier, NotificationError};

/// Immutable `(identifier, event)` pair.
///
/// Only built through [`Notification::new`] or [`Notification::parse`], so a
/// notification always names a step and carries a valid event.
#[derive(
    Clone,
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
#[serde(try_from = "RawNotification")]
pub struct Notification {
    identifier: Identifier,
    event: Event,
}

/// Unvalidated wire form; deserialization goes through [`Notification::new`].
#[derive(Deserialize)]
struct RawNotification {
    identifier: Identifier,
    event: Event,
}

impl TryFrom<RawNotification> for Notification {
    type Error = NotificationError;

    fn try_from(raw: RawNotification) -> Result<Self, Self::Error> {
        Self::new(raw.identifier, raw.event)
    }
}

impl Notification {
    /// Build a notification, rejecting an empty identifier.
    pub fn new(identifier: Identifier, event: impl Into<Event>) -> Result<Self, NotificationError> {
        if identifier.is_empty() {
            return Err(NotificationError::InvalidIdentifier);
        }

        Ok(Self {
            identifier,
            event: event.into(),
        })
    }

    /// Build a notification from an event name such as `"Completed"`.
    pub fn parse(identifier: Identifier, event: &str) -> Result<Self, NotificationError> {
        if identifier.is_empty() {
            return Err(NotificationError::InvalidIdentifier);
        }

        let event = event.parse::<Event>()?;
        Ok(Self { identifier, event })
    }

    /// Unchecked; step identifiers are never empty.
    pub(crate) fn for_step(identifier: Identifier, event: Event) -> Self {
        Self { identifier, event }
    }

    /// Step the notification is about.
    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    /// Transition the step went through.
    pub fn event(&self) -> Event {
        self.event
    }
}

impl std::fmt::Display for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.identifier, self.event)
    }
}
