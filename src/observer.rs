//! Observers: consumers of step notifications

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::{ContextError, Event, ExecutionContext, ExecutionPlan, Notification, State};

/// Subscriber to a [`Notifier`](crate::Notifier).
///
/// `execute` is awaited by the notifier before `notify` returns, so anything
/// an observer starts inside `execute` has finished by then.
#[async_trait]
pub trait Observer: Send + Sync + 'static {
    /// Handle one notification.
    async fn execute(&self, ctx: &ExecutionContext, notification: &Notification);
}

/// Forwards notifications into an execution plan.
///
/// Several steps' notifiers share one `PlanObserver`, giving many producers a
/// single dispatch table.
pub struct PlanObserver {
    plan: Arc<ExecutionPlan>,
}

impl PlanObserver {
    /// Dispatch into `plan`.
    pub fn new(plan: Arc<ExecutionPlan>) -> Self {
        Self { plan }
    }

    /// Plan notifications are dispatched into.
    pub fn execution_plan(&self) -> &Arc<ExecutionPlan> {
        &self.plan
    }
}

#[async_trait]
impl Observer for PlanObserver {
    async fn execute(&self, ctx: &ExecutionContext, notification: &Notification) {
        // Reaction failures are recorded on the plan, never returned to the producer
        let _ = self.plan.run(ctx, notification).await;
    }
}

/// Tracing-based observer
pub struct TracingObserver;

#[async_trait]
impl Observer for TracingObserver {
    async fn execute(&self, _ctx: &ExecutionContext, notification: &Notification) {
        let step = notification.identifier();
        match notification.event() {
            Event::State(state) => {
                tracing::info!(step = %step, state = %state, "Step state changed");
            }
            Event::Status(status) => {
                tracing::info!(step = %step, status = %status, "Step status changed");
            }
        }
    }
}

/// Wakes waiters whenever a step broadcasts `Completed`.
#[derive(Default)]
pub struct CompletionSignal {
    notify: Notify,
}

impl CompletionSignal {
    /// Create a signal with no waiters
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until `is_done` returns true.
    ///
    /// The predicate is re-evaluated after every `Completed` broadcast and
    /// at least every `recheck`. Returns the context error if `ctx` stops
    /// first.
    pub async fn wait_until<F>(
        &self,
        ctx: &ExecutionContext,
        recheck: Duration,
        is_done: F,
    ) -> Result<(), ContextError>
    where
        F: Fn() -> bool,
    {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so a completion between the check and
            // the select is not lost
            notified.as_mut().enable();

            if is_done() {
                return Ok(());
            }

            tokio::select! {
                biased;
                err = ctx.done() => return Err(err),
                _ = &mut notified => {}
                _ = tokio::time::sleep(recheck) => {}
            }
        }
    }
}

#[async_trait]
impl Observer for CompletionSignal {
    async fn execute(&self, _ctx: &ExecutionContext, notification: &Notification) {
        if notification.event() == Event::State(State::Completed) {
            self.notify.notify_waiters();
        }
    }
}
