//! Steps: retryable units of work with a broadcast lifecycle

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::{
    Action, Event, ExecutionContext, Identifier, Notification, Notifier, Retrier, SagaError,
    State, Status,
};

/// Step configuration
pub struct StepConfig {
    /// Retry policy for the action. Default: none, the action runs once.
    pub retrier: Option<Arc<Retrier>>,
    /// Default: `Undefined`
    pub initial_status: Status,
    /// Default: `Idle`. A step that does not start `Idle` cannot be run.
    pub initial_state: State,
    /// Private notifier the step broadcasts on. Default: a fresh notifier.
    pub notifier: Arc<Notifier>,
}

impl Default for StepConfig {
    fn default() -> Self {
        Self {
            retrier: None,
            initial_status: Status::Undefined,
            initial_state: State::Idle,
            notifier: Arc::new(Notifier::new()),
        }
    }
}

/// A unit of work in a saga.
///
/// Running a step moves it `Idle -> Running -> Completed` and settles its
/// status to `Successed` or `Failed`. Every transition is broadcast on the
/// step's notifier as a [`Notification`].
///
/// A step runs at most once. The `Idle -> Running` move is atomic, so a
/// concurrent or repeated [`run`](Self::run) is rejected with
/// [`SagaError::StepAlreadyStarted`] and broadcasts nothing.
pub struct Step {
    identifier: Identifier,
    action: Action,
    retrier: Option<Arc<Retrier>>,
    status: AtomicU8,
    state: AtomicU8,
    notifier: Arc<Notifier>,
}

impl Step {
    /// Create a step named `name`.
    ///
    /// # Panics
    ///
    /// Panics if `name` is empty; use [`try_new`](Self::try_new) to get an
    /// error instead.
    pub fn new(name: &str, action: Action, retrier: Option<Arc<Retrier>>) -> Self {
        match Self::try_new(name, action, retrier) {
            Ok(step) => step,
            Err(e) => panic!("{}", e),
        }
    }

    /// Create a step, returning an error if `name` is empty.
    pub fn try_new(
        name: &str,
        action: Action,
        retrier: Option<Arc<Retrier>>,
    ) -> Result<Self, SagaError> {
        Self::with_config(
            name,
            action,
            StepConfig {
                retrier,
                ..StepConfig::default()
            },
        )
    }

    /// Create a step from explicit configuration.
    pub fn with_config(name: &str, action: Action, config: StepConfig) -> Result<Self, SagaError> {
        if name.is_empty() {
            return Err(SagaError::EmptyStepName);
        }

        Ok(Self {
            identifier: Identifier::new(name),
            action,
            retrier: config.retrier,
            status: AtomicU8::new(config.initial_status as u8),
            state: AtomicU8::new(config.initial_state as u8),
            notifier: config.notifier,
        })
    }

    /// Unique identifier, `name:suffix`.
    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    /// Name the step was created with.
    pub fn name(&self) -> &str {
        self.identifier.name()
    }

    /// Current outcome.
    pub fn status(&self) -> Status {
        Status::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Current lifecycle phase.
    pub fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Notifier the step broadcasts on.
    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    /// Notification this step would broadcast for `event`.
    pub fn notification(&self, event: impl Into<Event>) -> Notification {
        Notification::for_step(self.identifier.clone(), event.into())
    }

    /// Run the action (through the retrier, if any) and broadcast the
    /// resulting transitions. Returns the settled action result.
    ///
    /// # Cancel safety
    ///
    /// Dropping the returned future after the step started still settles
    /// it: the step is marked `Failed` and `Completed`, and whichever of
    /// those broadcasts had not gone out yet is sent from a spawned task.
    /// Outside a tokio runtime only the stored status and state change.
    pub async fn run(&self, ctx: &ExecutionContext) -> anyhow::Result<()> {
        if self
            .state
            .compare_exchange(
                State::Idle as u8,
                State::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return Err(SagaError::StepAlreadyStarted(self.identifier.clone()).into());
        }

        let mut guard = SettleOnDrop {
            step: self,
            ctx,
            pending: Pending::Status,
        };

        tracing::info!(step = %self.identifier, "Step started");
        self.broadcast(ctx, State::Running).await;

        let result = match &self.retrier {
            Some(retrier) => retrier.retry(ctx, &self.action).await,
            None => self.action.run(ctx.clone()).await,
        };

        let status = match &result {
            Ok(()) => {
                tracing::info!(step = %self.identifier, "Step succeeded");
                Status::Successed
            }
            Err(e) => {
                tracing::warn!(step = %self.identifier, error = %e, "Step failed");
                Status::Failed
            }
        };
        self.status.store(status as u8, Ordering::Release);
        guard.pending = Pending::Completed;
        self.broadcast(ctx, status).await;

        self.state.store(State::Completed as u8, Ordering::Release);
        guard.pending = Pending::Nothing;
        self.broadcast(ctx, State::Completed).await;

        result
    }

    /// An action that runs this step, for wiring it as a reaction.
    ///
    /// The action holds the step weakly, so a plan that registers it does
    /// not keep the step alive. Running it after the step was dropped fails
    /// with [`SagaError::StepDropped`].
    pub fn as_action(self: &Arc<Self>) -> Action {
        let step = Arc::downgrade(self);
        let identifier = self.identifier.clone();
        Action::new(move |ctx| {
            let step = step.upgrade();
            let identifier = identifier.clone();
            async move {
                match step {
                    Some(step) => step.run(&ctx).await,
                    None => Err(SagaError::StepDropped(identifier).into()),
                }
            }
        })
    }

    async fn broadcast(&self, ctx: &ExecutionContext, event: impl Into<Event>) {
        self.notifier.notify(ctx, &self.notification(event)).await;
    }
}

/// Broadcasts still owed by a step run
#[derive(Clone, Copy, PartialEq, Eq)]
enum Pending {
    Status,
    Completed,
    Nothing,
}

/// Settles a step whose `run` future is dropped before finishing.
struct SettleOnDrop<'a> {
    step: &'a Step,
    ctx: &'a ExecutionContext,
    pending: Pending,
}

impl Drop for SettleOnDrop<'_> {
    fn drop(&mut self) {
        if self.pending == Pending::Nothing {
            return;
        }

        let step = self.step;
        tracing::warn!(step = %step.identifier, "Step run dropped before settling");

        let mut owed = Vec::with_capacity(2);
        if self.pending == Pending::Status {
            step.status.store(Status::Failed as u8, Ordering::Release);
            owed.push(step.notification(Status::Failed));
        }
        step.state.store(State::Completed as u8, Ordering::Release);
        owed.push(step.notification(State::Completed));

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let notifier = Arc::clone(&step.notifier);
        let ctx = self.ctx.clone();
        handle.spawn(async move {
            for notification in owed {
                notifier.notify(&ctx, &notification).await;
            }
        });
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("identifier", &self.identifier)
            .field("status", &self.status())
            .field("state", &self.state())
            .field("retrier", &self.retrier.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{backoff, Classifier, Observer};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<Event>>,
    }

    #[async_trait]
    impl Observer for Recorder {
        async fn execute(&self, _ctx: &ExecutionContext, notification: &Notification) {
            self.events.lock().push(notification.event());
        }
    }

    fn ok() -> Action {
        Action::new(|_ctx| async { Ok(()) })
    }

    fn fail() -> Action {
        Action::new(|_ctx| async { Err::<(), _>(anyhow::anyhow!("declined")) })
    }

    fn recorded(step: &Step) -> Arc<Recorder> {
        let recorder = Arc::new(Recorder::default());
        step.notifier().add(recorder.clone());
        recorder
    }

    #[test]
    fn test_new_step() {
        let step = Step::new("reserve", ok(), None);
        assert_eq!(step.name(), "reserve");
        assert!(step.identifier().as_str().starts_with("reserve:"));
        assert_eq!(step.status(), Status::Undefined);
        assert_eq!(step.state(), State::Idle);
    }

    #[test]
    fn test_empty_name_rejected() {
        let err = Step::try_new("", ok(), None).unwrap_err();
        assert_eq!(err, SagaError::EmptyStepName);
    }

    #[test]
    #[should_panic(expected = "step name cannot be empty")]
    fn test_empty_name_panics() {
        let _ = Step::new("", ok(), None);
    }

    #[tokio::test]
    async fn test_successful_run_broadcasts_lifecycle() {
        let step = Step::new("reserve", ok(), None);
        let recorder = recorded(&step);

        step.run(&ExecutionContext::new()).await.unwrap();

        assert_eq!(step.status(), Status::Successed);
        assert_eq!(step.state(), State::Completed);
        assert_eq!(
            *recorder.events.lock(),
            vec![
                Event::State(State::Running),
                Event::Status(Status::Successed),
                Event::State(State::Completed),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_run_broadcasts_lifecycle() {
        let step = Step::new("charge", fail(), None);
        let recorder = recorded(&step);

        let err = step.run(&ExecutionContext::new()).await.unwrap_err();

        assert_eq!(err.to_string(), "declined");
        assert_eq!(step.status(), Status::Failed);
        assert_eq!(step.state(), State::Completed);
        assert_eq!(
            *recorder.events.lock(),
            vec![
                Event::State(State::Running),
                Event::Status(Status::Failed),
                Event::State(State::Completed),
            ]
        );
    }

    #[tokio::test]
    async fn test_panicking_action_still_completes() {
        let action = Action::new(|_ctx| async {
            if true {
                panic!("bug in action");
            }
            Ok(())
        });
        let step = Step::new("buggy", action, None);
        let recorder = recorded(&step);

        assert!(step.run(&ExecutionContext::new()).await.is_err());
        assert_eq!(step.status(), Status::Failed);
        assert_eq!(step.state(), State::Completed);
        assert_eq!(
            recorder.events.lock().last(),
            Some(&Event::State(State::Completed))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_through_retrier() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let action = Action::new(move |_ctx| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(anyhow::anyhow!("busy"))
                } else {
                    Ok(())
                }
            }
        });
        let retrier = Arc::new(Retrier::new(
            backoff::constant(2, Duration::from_millis(5)),
            Classifier::Default,
        ));
        let step = Step::new("flaky", action, Some(retrier));
        let recorder = recorded(&step);

        step.run(&ExecutionContext::new()).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(step.status(), Status::Successed);
        // Retries are invisible to observers
        assert_eq!(recorder.events.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_second_run_rejected() {
        let step = Step::new("once", ok(), None);
        let recorder = recorded(&step);
        let ctx = ExecutionContext::new();

        step.run(&ctx).await.unwrap();
        let err = step.run(&ctx).await.unwrap_err();

        assert!(matches!(
            err.downcast_ref::<SagaError>(),
            Some(SagaError::StepAlreadyStarted(_))
        ));
        assert_eq!(step.state(), State::Completed);
        assert_eq!(step.status(), Status::Successed);
        assert_eq!(recorder.events.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_non_idle_initial_state_cannot_run() {
        let step = Step::with_config(
            "restored",
            ok(),
            StepConfig {
                initial_state: State::Completed,
                initial_status: Status::Successed,
                ..StepConfig::default()
            },
        )
        .unwrap();

        assert!(step.run(&ExecutionContext::new()).await.is_err());
        assert_eq!(step.status(), Status::Successed);
    }

    #[tokio::test]
    async fn test_shared_notifier() {
        let notifier = Arc::new(Notifier::new());
        let recorder = Arc::new(Recorder::default());
        notifier.add(recorder.clone());

        let config = || StepConfig {
            notifier: notifier.clone(),
            ..StepConfig::default()
        };
        let a = Step::with_config("a", ok(), config()).unwrap();
        let b = Step::with_config("b", fail(), config()).unwrap();

        let ctx = ExecutionContext::new();
        a.run(&ctx).await.unwrap();
        let _ = b.run(&ctx).await;

        assert_eq!(recorder.events.lock().len(), 6);
    }

    #[tokio::test]
    async fn test_as_action_runs_step() {
        let step = Arc::new(Step::new("downstream", ok(), None));
        let action = step.as_action();

        action.run(ExecutionContext::new()).await.unwrap();
        assert_eq!(step.state(), State::Completed);
        assert_eq!(step.status(), Status::Successed);
    }

    #[tokio::test]
    async fn test_as_action_does_not_keep_step_alive() {
        let step = Arc::new(Step::new("downstream", ok(), None));
        let action = step.as_action();
        let weak = Arc::downgrade(&step);

        drop(step);
        assert!(weak.upgrade().is_none());

        let err = action.run(ExecutionContext::new()).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<SagaError>(),
            Some(SagaError::StepDropped(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_run_still_completes() {
        let action = Action::new(|_ctx| async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        });
        let step = Step::new("slow", action, None);
        let recorder = recorded(&step);
        let ctx = ExecutionContext::new();

        let outcome = tokio::time::timeout(Duration::from_millis(50), step.run(&ctx)).await;
        assert!(outcome.is_err());

        assert_eq!(step.status(), Status::Failed);
        assert_eq!(step.state(), State::Completed);

        // Owed broadcasts go out from a spawned task
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(
            *recorder.events.lock(),
            vec![
                Event::State(State::Running),
                Event::Status(Status::Failed),
                Event::State(State::Completed),
            ]
        );
    }

    #[tokio::test]
    async fn test_completed_run_owes_nothing() {
        let step = Step::new("reserve", ok(), None);
        let recorder = recorded(&step);

        step.run(&ExecutionContext::new()).await.unwrap();
        tokio::task::yield_now().await;

        assert_eq!(step.status(), Status::Successed);
        assert_eq!(recorder.events.lock().len(), 3);
    }
}
