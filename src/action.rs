//! Actions: opaque side-effecting units of work

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;

use crate::ExecutionContext;

type ActionFn = dyn Fn(ExecutionContext) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync;

/// A cloneable async unit of work.
///
/// The engine only observes whether the returned future resolved to `Ok` or
/// `Err`. A panic inside the action is caught and reported as an error.
///
/// ```rust,ignore
/// let charge = Action::new(|ctx| async move {
///     payments.charge(&ctx, order_id).await
/// });
/// ```
#[derive(Clone)]
pub struct Action {
    func: Arc<ActionFn>,
}

/// Error produced when an action panics
#[derive(Debug, thiserror::Error)]
#[error("action panicked: {0}")]
pub struct ActionPanicked(pub Box<str>);

impl Action {
    /// Wrap an async closure as an action.
    pub fn new<F, Fut>(func: F) -> Self
    where
        F: Fn(ExecutionContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            func: Arc::new(move |ctx| func(ctx).boxed()),
        }
    }

    /// Run the action to completion.
    pub async fn run(&self, ctx: ExecutionContext) -> anyhow::Result<()> {
        let fut = match std::panic::catch_unwind(AssertUnwindSafe(|| (self.func)(ctx))) {
            Ok(fut) => fut,
            Err(payload) => return Err(panicked(payload)),
        };

        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(panicked(payload)),
        }
    }
}

fn panicked(payload: Box<dyn std::any::Any + Send>) -> anyhow::Error {
    let message: Box<str> = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).into()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str().into()
    } else {
        "unknown panic payload".into()
    };
    tracing::error!(panic = %message, "Action panicked");
    ActionPanicked(message).into()
}

impl std::fmt::Debug for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Action").finish_non_exhaustive()
    }
}
