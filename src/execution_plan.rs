//! Execution plan: the `(identifier, event) -> actions` dispatch table

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinSet;

use crate::{Action, Event, ExecutionContext, Identifier, Notification};

/// Failures of the reactions registered under one notification key.
#[derive(Clone, Debug)]
pub struct DispatchFailure {
    notification: Notification,
    errors: Vec<Arc<anyhow::Error>>,
}

impl DispatchFailure {
    /// Step that produced the notification.
    pub fn identifier(&self) -> &Identifier {
        self.notification.identifier()
    }

    /// Event the reactions were registered on.
    pub fn event(&self) -> Event {
        self.notification.event()
    }

    /// Key the reactions were registered under.
    pub fn notification(&self) -> &Notification {
        &self.notification
    }

    /// Every reaction error, oldest first.
    pub fn errors(&self) -> &[Arc<anyhow::Error>] {
        &self.errors
    }
}

impl std::fmt::Display for DispatchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "errors while executing actions for {}/{}: ",
            self.identifier(),
            self.event()
        )?;
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for DispatchFailure {}

/// Dispatch counters
#[derive(Default)]
pub struct DispatchStats {
    /// Notifications handed to `run`
    pub notifications_received: AtomicU64,
    /// Notifications with a registered entry
    pub notifications_matched: AtomicU64,
    /// Reactions executed
    pub actions_run: AtomicU64,
    /// Reactions that returned an error or panicked
    pub actions_failed: AtomicU64,
}

impl DispatchStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a snapshot of current stats
    pub fn snapshot(&self) -> DispatchStatsSnapshot {
        DispatchStatsSnapshot {
            notifications_received: self.notifications_received.load(Ordering::Relaxed),
            notifications_matched: self.notifications_matched.load(Ordering::Relaxed),
            actions_run: self.actions_run.load(Ordering::Relaxed),
            actions_failed: self.actions_failed.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of dispatch stats
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DispatchStatsSnapshot {
    #[allow(missing_docs)]
    pub notifications_received: u64,
    #[allow(missing_docs)]
    pub notifications_matched: u64,
    #[allow(missing_docs)]
    pub actions_run: u64,
    #[allow(missing_docs)]
    pub actions_failed: u64,
}

#[derive(Default)]
struct Table {
    actions: HashMap<Notification, Vec<Action>>,
    failures: HashMap<Notification, DispatchFailure>,
}

/// Declarative dispatch table.
///
/// Entries only accumulate: [`add`](Self::add) appends to a key's action list
/// and never replaces it. A key with no entry is a valid "no reaction" state.
/// One mutex guards both the table and the recorded failures, so builders may
/// keep adding entries while a saga is dispatching.
#[derive(Default)]
pub struct ExecutionPlan {
    table: Mutex<Table>,
    stats: DispatchStats,
}

impl ExecutionPlan {
    /// Create an empty plan
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `actions` under `notification`'s key.
    pub fn add(&self, notification: Notification, actions: impl IntoIterator<Item = Action>) {
        self.table
            .lock()
            .actions
            .entry(notification)
            .or_default()
            .extend(actions);
    }

    /// Actions registered for `notification`, if any.
    pub fn get(&self, notification: &Notification) -> Option<Vec<Action>> {
        self.table.lock().actions.get(notification).cloned()
    }

    /// Number of keys with registered actions.
    pub fn len(&self) -> usize {
        self.table.lock().actions.len()
    }

    /// Whether no key has registered actions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run every action registered for `notification` in parallel.
    ///
    /// Waits for all of them. Every failure is collected rather than stopping
    /// at the first; the aggregate is recorded (see [`failures`](Self::failures))
    /// and also returned. An unregistered key runs nothing and succeeds.
    pub async fn run(
        &self,
        ctx: &ExecutionContext,
        notification: &Notification,
    ) -> Result<(), DispatchFailure> {
        self.stats
            .notifications_received
            .fetch_add(1, Ordering::Relaxed);

        let Some(actions) = self.get(notification) else {
            tracing::debug!(notification = %notification, "No reaction registered");
            return Ok(());
        };
        self.stats
            .notifications_matched
            .fetch_add(1, Ordering::Relaxed);

        let mut tasks = JoinSet::new();
        for action in actions {
            let ctx = ctx.clone();
            tasks.spawn(async move { action.run(ctx).await });
        }

        let mut errors = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            self.stats.actions_run.fetch_add(1, Ordering::Relaxed);
            let result = joined.unwrap_or_else(|e| Err(anyhow::Error::new(e)));
            if let Err(e) = result {
                errors.push(Arc::new(e));
            }
        }

        if errors.is_empty() {
            return Ok(());
        }

        self.stats
            .actions_failed
            .fetch_add(errors.len() as u64, Ordering::Relaxed);
        let failure = DispatchFailure {
            notification: notification.clone(),
            errors,
        };
        tracing::warn!(error = %failure, "Reaction failed");

        self.table
            .lock()
            .failures
            .entry(notification.clone())
            .and_modify(|recorded| recorded.errors.extend(failure.errors.iter().cloned()))
            .or_insert_with(|| failure.clone());

        Err(failure)
    }

    /// Every failure recorded so far, one per key.
    pub fn failures(&self) -> Vec<DispatchFailure> {
        self.table.lock().failures.values().cloned().collect()
    }

    /// Failure recorded for one key, if any.
    pub fn failure_for(&self, notification: &Notification) -> Option<DispatchFailure> {
        self.table.lock().failures.get(notification).cloned()
    }

    /// Dispatch counters so far.
    pub fn stats(&self) -> DispatchStatsSnapshot {
        self.stats.snapshot()
    }
}

impl std::fmt::Debug for ExecutionPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let table = self.table.lock();
        f.debug_struct("ExecutionPlan")
            .field("keys", &table.actions.len())
            .field("failures", &table.failures.len())
            .finish()
    }
}
