//! Saga controller: wires steps to an execution plan and drives a run

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::{
    Action, CompletionSignal, DispatchFailure, Event, ExecutionContext, ExecutionPlan,
    Identifier, Notification, Notifier, Observer, PlanObserver, SagaError, Step,
};

/// Default interval at which the run loop re-evaluates its predicate without
/// a completion signal.
pub const DEFAULT_RECHECK_INTERVAL: Duration = Duration::from_millis(50);

/// Saga configuration
pub struct SagaConfig {
    /// Dispatch table shared by every step. Default: a fresh plan.
    pub execution_plan: Arc<ExecutionPlan>,
    /// Saga-level notifier that republishes every step transition.
    /// Default: a fresh notifier.
    pub notifier: Arc<Notifier>,
    /// Default: 50ms
    pub recheck_interval: Duration,
}

impl Default for SagaConfig {
    fn default() -> Self {
        Self {
            execution_plan: Arc::new(ExecutionPlan::new()),
            notifier: Arc::new(Notifier::new()),
            recheck_interval: DEFAULT_RECHECK_INTERVAL,
        }
    }
}

/// Scratch state for one `when / is / then / plan` chain
#[derive(Default)]
struct Planner {
    identifier: Option<Identifier>,
    event: Option<Event>,
    actions: Vec<Action>,
}

struct SagaSteps {
    starter: Arc<Step>,
    middles: Vec<Arc<Step>>,
}

/// Coordinates a set of steps through a shared execution plan.
///
/// ```rust,ignore
/// let mut saga = Saga::new();
/// saga.add_steps(reserve.clone(), [charge.clone()]);
/// saga.when(&reserve).is(Status::Successed).then([charge.as_action()]).plan()?;
/// saga.when(&charge).is(Status::Failed).then([release]).plan()?;
///
/// saga.run(&ctx, || charge.state() == State::Completed).await?;
/// ```
pub struct Saga {
    plan: Arc<ExecutionPlan>,
    notifier: Arc<Notifier>,
    planner: Planner,
    steps: Option<SagaSteps>,
    started: AtomicBool,
    recheck_interval: Duration,
}

impl Saga {
    /// Create a saga with a fresh plan and notifier.
    pub fn new() -> Self {
        Self::with_config(SagaConfig::default())
    }

    /// Create a saga from explicit configuration.
    pub fn with_config(config: SagaConfig) -> Self {
        Self {
            plan: config.execution_plan,
            notifier: config.notifier,
            planner: Planner::default(),
            steps: None,
            started: AtomicBool::new(false),
            recheck_interval: config.recheck_interval,
        }
    }

    /// Set the starter and middle steps.
    ///
    /// Replaces any steps set before. Every step also gets a pass-through
    /// reaction for each of [`Event::PROPAGATED`] that republishes the
    /// transition on the saga notifier.
    pub fn add_steps(&mut self, starter: Arc<Step>, middles: impl IntoIterator<Item = Arc<Step>>) {
        let middles: Vec<_> = middles.into_iter().collect();

        self.propagate(&starter);
        for step in &middles {
            self.propagate(step);
        }

        tracing::debug!(
            starter = %starter.identifier(),
            middles = middles.len(),
            "Saga steps added"
        );
        self.steps = Some(SagaSteps { starter, middles });
    }

    fn propagate(&self, step: &Step) {
        for event in Event::PROPAGATED {
            let notification = step.notification(event);
            let notifier = Arc::clone(&self.notifier);
            let republished = notification.clone();
            let action = Action::new(move |ctx| {
                let notifier = notifier.clone();
                let notification = republished.clone();
                async move {
                    notifier.notify(&ctx, &notification).await;
                    Ok(())
                }
            });
            self.plan.add(notification, [action]);
        }
    }

    /// Start a plan entry keyed on `step`.
    pub fn when(&mut self, step: &Step) -> &mut Self {
        self.planner.identifier = Some(step.identifier().clone());
        self
    }

    /// Event the pending entry reacts to.
    pub fn is(&mut self, event: impl Into<Event>) -> &mut Self {
        self.planner.event = Some(event.into());
        self
    }

    /// Actions the pending entry runs. Replaces any set before.
    pub fn then(&mut self, actions: impl IntoIterator<Item = Action>) -> &mut Self {
        self.planner.actions = actions.into_iter().collect();
        self
    }

    /// Commit the pending entry to the execution plan and reset the builder.
    ///
    /// The builder is reset even when the entry is incomplete.
    pub fn plan(&mut self) -> Result<(), SagaError> {
        let Planner {
            identifier,
            event,
            actions,
        } = std::mem::take(&mut self.planner);

        let identifier = identifier.ok_or(SagaError::IncompletePlan("when"))?;
        let event = event.ok_or(SagaError::IncompletePlan("is"))?;

        self.plan
            .add(Notification::for_step(identifier, event), actions);
        Ok(())
    }

    /// Subscribe `observer` to every step transition the saga republishes.
    pub fn subscribe(&self, observer: Arc<dyn Observer>) {
        self.notifier.add(observer);
    }

    /// Run the starter step, then wait until `is_done` holds.
    ///
    /// Reactions registered in the plan drive the remaining steps. The
    /// predicate is re-evaluated whenever a step completes and at least
    /// every `recheck_interval`. A starter failure is not an error here;
    /// compensations are expected to react to it.
    pub async fn run<F>(&self, ctx: &ExecutionContext, is_done: F) -> Result<(), SagaError>
    where
        F: Fn() -> bool,
    {
        let steps = self.steps.as_ref().ok_or(SagaError::MissingStarter)?;
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(SagaError::AlreadyRunning);
        }

        let observer: Arc<dyn Observer> = Arc::new(PlanObserver::new(Arc::clone(&self.plan)));
        let signal = Arc::new(CompletionSignal::new());

        // Steps may share a notifier; subscribe each one once
        let mut subscribed: Vec<&Arc<Notifier>> = Vec::new();
        for step in std::iter::once(&steps.starter).chain(&steps.middles) {
            let notifier = step.notifier();
            if subscribed.iter().any(|n| Arc::ptr_eq(n, notifier)) {
                continue;
            }
            notifier.add(Arc::clone(&observer));
            notifier.add(signal.clone());
            subscribed.push(notifier);
        }

        tracing::info!(
            starter = %steps.starter.identifier(),
            steps = 1 + steps.middles.len(),
            "Saga started"
        );

        if let Err(e) = steps.starter.run(ctx).await {
            tracing::info!(
                starter = %steps.starter.identifier(),
                error = %e,
                "Starter step failed"
            );
        }

        match signal
            .wait_until(ctx, self.recheck_interval, is_done)
            .await
        {
            Ok(()) => {
                tracing::info!(starter = %steps.starter.identifier(), "Saga finished");
                Ok(())
            }
            Err(err) => {
                tracing::warn!(error = %err, "Saga interrupted");
                Err(SagaError::Interrupted(err))
            }
        }
    }

    /// Dispatch table shared by every step.
    pub fn execution_plan(&self) -> &Arc<ExecutionPlan> {
        &self.plan
    }

    /// Notifier republishing every step transition.
    pub fn notifier(&self) -> &Arc<Notifier> {
        &self.notifier
    }

    /// Reaction failures recorded so far.
    pub fn dispatch_failures(&self) -> Vec<DispatchFailure> {
        self.plan.failures()
    }

    /// Step run first, once steps were added.
    pub fn starter(&self) -> Option<&Arc<Step>> {
        self.steps.as_ref().map(|s| &s.starter)
    }

    /// Starter first, then middles in the order they were added.
    pub fn steps(&self) -> Vec<Arc<Step>> {
        match &self.steps {
            Some(steps) => std::iter::once(&steps.starter)
                .chain(&steps.middles)
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }
}

impl Default for Saga {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Saga {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Saga")
            .field("plan", &self.plan)
            .field("steps", &self.steps().len())
            .field("started", &self.started.load(Ordering::Relaxed))
            .finish()
    }
}
