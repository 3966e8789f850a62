//! Orchestration-Based SAGA Engine
//!
//! Steps wrap retryable async actions and broadcast every lifecycle transition.
//! A `Saga` routes those transitions through a declarative execution plan:
//! "when step X reaches event Y, run these actions". Compensations are simply
//! actions registered on a step's `Failed` status.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! // 1. Build steps, optionally with a retry policy
//! let retrier = Arc::new(Retrier::new(
//!     backoff::exponential(3, Duration::from_millis(100), 2.0),
//!     Classifier::Default,
//! ));
//! let reserve = Arc::new(Step::new("reserve", reserve_action, Some(retrier)));
//! let charge = Arc::new(Step::new("charge", charge_action, None));
//!
//! // 2. Wire reactions
//! let mut saga = Saga::new();
//! saga.add_steps(reserve.clone(), [charge.clone()]);
//! saga.when(&reserve).is(Status::Successed).then([charge.as_action()]).plan()?;
//! saga.when(&charge).is(Status::Failed).then([release_action]).plan()?;
//!
//! // 3. Run until the last step completes
//! saga.run(&ExecutionContext::new(), || charge.state() == State::Completed).await?;
//! ```

#![warn(missing_docs)]

// === Core Types ===
mod context;
mod errors;
mod event;
mod identifier;
mod notification;

// === Execution ===
mod action;
pub mod backoff;
mod classifier;
mod retrier;
mod step;

// === Dispatch ===
mod execution_plan;
mod notifier;
mod observer;
mod saga;

// === Storage ===
mod journal;

// === Helpers ===
#[cfg(any(test, feature = "test-harness"))]
pub mod test_support;

// === Re-exports ===

// Types
pub use context::ExecutionContext;
pub use event::{Event, State, Status};
pub use identifier::Identifier;
pub use notification::Notification;

// Errors
pub use errors::{ContextError, JournalError, NotificationError, SagaError};

// Execution
pub use action::{Action, ActionPanicked};
pub use backoff::Backoff;
pub use classifier::{Classifier, ErrorMatcher, Verdict};
pub use retrier::{Retrier, RetrierConfig};
pub use step::{Step, StepConfig};

// Dispatch
pub use execution_plan::{DispatchFailure, DispatchStats, DispatchStatsSnapshot, ExecutionPlan};
pub use notifier::Notifier;
pub use observer::{CompletionSignal, Observer, PlanObserver, TracingObserver};
pub use saga::{Saga, SagaConfig, DEFAULT_RECHECK_INTERVAL};

// Storage
pub use journal::{InMemoryJournal, JournalEntry, JournalObserver, NotificationJournal};
