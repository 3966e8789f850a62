//! Error types for saga construction, dispatch and cancellation

use crate::Identifier;

/// Error from building a [`Notification`](crate::Notification)
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum NotificationError {
    /// Identifier was empty
    #[error("invalid identifier")]
    InvalidIdentifier,
    /// Name did not denote a `State` or `Status`
    #[error("invalid event: {0}")]
    InvalidEvent(Box<str>),
}

/// Why an [`ExecutionContext`](crate::ExecutionContext) stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    /// Context was cancelled explicitly
    #[error("context canceled")]
    Canceled,
    /// Context deadline elapsed
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Error from saga and step orchestration
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum SagaError {
    /// Steps must be named
    #[error("step name cannot be empty")]
    EmptyStepName,
    /// A step may only be run once
    #[error("step {0} has already been started")]
    StepAlreadyStarted(Identifier),
    /// A reaction outlived the step it runs
    #[error("step {0} has been dropped")]
    StepDropped(Identifier),
    /// `plan()` was called before `when`/`is`
    #[error("incomplete plan: missing {0}")]
    IncompletePlan(&'static str),
    /// `run()` was called before `add_steps`
    #[error("saga has no starter step")]
    MissingStarter,
    /// A saga is only run once
    #[error("saga is already running")]
    AlreadyRunning,
    /// Execution context stopped while waiting for the saga to finish
    #[error("saga interrupted: {0}")]
    Interrupted(ContextError),
}

/// Error from journal storage
#[derive(Debug, thiserror::Error)]
pub enum JournalError {
    /// Backing store failed
    #[error("Storage error: {0}")]
    Storage(Box<str>),
    /// Snapshot could not be written
    #[error("Encode error: {0}")]
    Encode(Box<str>),
    /// Snapshot bytes were malformed or held invalid entries
    #[error("Decode error: {0}")]
    Decode(Box<str>),
}

impl SagaError {
    /// Check if this error came from the execution context
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted(_))
    }
}

impl ContextError {
    /// Check if the context timed out rather than being cancelled
    pub fn is_deadline(&self) -> bool {
        matches!(self, Self::DeadlineExceeded)
    }
}
