//! Notifier: fans a notification out to every subscribed observer

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::task::JoinSet;

use crate::{ExecutionContext, Notification, Observer};

/// Publisher half of the notification bus.
///
/// Subscription is append-only and not deduplicated: adding the same observer
/// twice delivers every notification to it twice.
#[derive(Default)]
pub struct Notifier {
    observers: RwLock<Vec<Arc<dyn Observer>>>,
}

impl Notifier {
    /// Create a notifier with no observers
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe `observer` to every later notification.
    pub fn add(&self, observer: Arc<dyn Observer>) {
        self.observers.write().push(observer);
    }

    /// Number of subscriptions, duplicates included.
    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    /// Whether nobody is subscribed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `notification` to all observers in parallel and wait for every
    /// one of them to finish.
    pub async fn notify(&self, ctx: &ExecutionContext, notification: &Notification) {
        let observers = self.observers.read().clone();
        if observers.is_empty() {
            return;
        }

        let mut tasks = JoinSet::new();
        for observer in observers {
            let ctx = ctx.clone();
            let notification = notification.clone();
            tasks.spawn(async move {
                observer.execute(&ctx, &notification).await;
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(
                    notification = %notification,
                    error = %e,
                    "Observer task failed"
                );
            }
        }
    }
}

impl std::fmt::Debug for Notifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("observers", &self.len())
            .finish()
    }
}
