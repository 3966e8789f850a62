//! Bounded, jittered, cancellable retrying of actions

use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::backoff;
use crate::{Action, Classifier, ExecutionContext, Verdict};

/// Retrier configuration
#[derive(Clone, Debug, Default)]
pub struct RetrierConfig {
    /// Decides which errors are retried. Default: retry every error.
    pub classifier: Classifier,
    /// Seed for the jitter source. Default: seeded from the OS.
    pub seed: Option<u64>,
}

/// Retries an action according to a backoff schedule.
///
/// Each entry of the schedule grants one retry. Before retry `i` the retrier
/// sleeps `schedule[i]` perturbed by full jitter, i.e. a uniformly random
/// duration in `[0, 2 * schedule[i])`. The jitter source is locked, so one
/// retrier may be shared by concurrently running steps.
pub struct Retrier {
    backoff: Vec<Duration>,
    classifier: Classifier,
    rng: Mutex<StdRng>,
}

impl Retrier {
    /// Create a retrier with an OS-seeded jitter source.
    pub fn new(backoff: impl Into<Vec<Duration>>, classifier: Classifier) -> Self {
        Self::with_config(
            backoff,
            RetrierConfig {
                classifier,
                ..RetrierConfig::default()
            },
        )
    }

    /// Create a retrier from explicit configuration.
    pub fn with_config(backoff: impl Into<Vec<Duration>>, config: RetrierConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            backoff: backoff.into(),
            classifier: config.classifier,
            rng: Mutex::new(rng),
        }
    }

    /// Maximum number of retries after the first invocation.
    pub fn budget(&self) -> usize {
        self.backoff.len()
    }

    /// Classification policy in use.
    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Run `action`, retrying while the classifier says so and budget remains.
    ///
    /// Returns the final action result. If `ctx` stops during a backoff
    /// sleep, the context's [`ContextError`](crate::ContextError) is returned
    /// instead and the action is not invoked again.
    pub async fn retry(&self, ctx: &ExecutionContext, action: &Action) -> anyhow::Result<()> {
        let mut attempt = 0;

        loop {
            let result = action.run(ctx.clone()).await;

            match self.classifier.classify_result(&result) {
                Verdict::Succeeded | Verdict::Failed => return result,
                Verdict::Retry => {
                    if attempt >= self.backoff.len() {
                        if let Err(e) = &result {
                            tracing::warn!(
                                attempts = attempt + 1,
                                error = %e,
                                "Retry budget exhausted"
                            );
                        }
                        return result;
                    }

                    let delay = self.jittered(attempt);
                    tracing::debug!(
                        attempt = attempt + 1,
                        budget = self.backoff.len(),
                        delay_ms = delay.as_millis() as u64,
                        "Action failed with retryable error, backing off"
                    );

                    tokio::select! {
                        biased;
                        err = ctx.done() => {
                            tracing::debug!(error = %err, "Retry interrupted by context");
                            return Err(err.into());
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }

                    attempt += 1;
                }
            }
        }
    }

    /// Nominal delay for `attempt` plus uniform jitter of the same magnitude.
    fn jittered(&self, attempt: usize) -> Duration {
        let nominal = self.backoff[attempt];
        let factor: f64 = self.rng.lock().random_range(-1.0..1.0);
        backoff::scale(nominal, 1.0 + factor)
    }
}

impl std::fmt::Debug for Retrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retrier")
            .field("backoff", &self.backoff)
            .field("classifier", &self.classifier)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ContextError, ErrorMatcher};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, thiserror::Error)]
    #[error("transient")]
    struct Transient;

    #[derive(Debug, thiserror::Error)]
    #[error("fatal")]
    struct Fatal;

    /// Action failing `failures` times before succeeding; returns it with
    /// its invocation counter.
    fn flaky(failures: u32) -> (Action, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let action = Action::new(move |_ctx| {
            let counter = counter.clone();
            async move {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n < failures {
                    Err(anyhow::Error::new(Transient))
                } else {
                    Ok(())
                }
            }
        });
        (action, calls)
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_invokes_budget_plus_one() {
        let retrier = Retrier::new(backoff::constant(3, Duration::from_millis(10)), Classifier::Default);
        let (action, calls) = flaky(u32::MAX);

        let err = retrier.retry(&ExecutionContext::new(), &action).await.unwrap_err();

        assert!(err.is::<Transient>());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_one_failure() {
        let retrier = Retrier::new(backoff::constant(1, Duration::from_millis(10)), Classifier::Default);
        let (action, calls) = flaky(1);

        retrier.retry(&ExecutionContext::new(), &action).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_schedule_runs_once() {
        let retrier = Retrier::new(Vec::new(), Classifier::Default);
        let (action, calls) = flaky(u32::MAX);

        assert!(retrier.retry(&ExecutionContext::new(), &action).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_verdict_stops_immediately() {
        let classifier = Classifier::whitelist([ErrorMatcher::kind::<Transient>()]);
        let retrier = Retrier::new(backoff::constant(5, Duration::from_secs(1)), classifier);

        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let action = Action::new(move |_ctx| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(anyhow::Error::new(Fatal))
            }
        });

        let err = retrier.retry(&ExecutionContext::new(), &action).await.unwrap_err();
        assert!(err.is::<Fatal>());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_wins_over_sleep() {
        let retrier = Retrier::new(backoff::constant(3, Duration::from_secs(10)), Classifier::Default);
        let (action, calls) = flaky(u32::MAX);

        let ctx = ExecutionContext::new();
        ctx.cancel();
        let err = retrier.retry(&ctx, &action).await.unwrap_err();

        assert_eq!(err.downcast_ref::<ContextError>(), Some(&ContextError::Canceled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// Seeded retrier with a 10s schedule whose first jittered delay is at
    /// least one second, plus that delay.
    fn slow_seeded_retrier() -> (Retrier, Duration) {
        let config = |seed| RetrierConfig {
            classifier: Classifier::Default,
            seed: Some(seed),
        };
        let schedule = || backoff::constant(3, Duration::from_secs(10));

        (0..100)
            .find_map(|seed| {
                let delay = Retrier::with_config(schedule(), config(seed)).jittered(0);
                (delay >= Duration::from_secs(1))
                    .then(|| (Retrier::with_config(schedule(), config(seed)), delay))
            })
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_sleep() {
        let (retrier, delay) = slow_seeded_retrier();
        let (action, calls) = flaky(u32::MAX);

        let ctx = ExecutionContext::new();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let started = tokio::time::Instant::now();
        let err = retrier.retry(&ctx, &action).await.unwrap_err();

        assert_eq!(err.downcast_ref::<ContextError>(), Some(&ContextError::Canceled));
        assert!(started.elapsed() >= Duration::from_millis(50));
        assert!(started.elapsed() < delay);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_during_backoff_sleep() {
        let (retrier, delay) = slow_seeded_retrier();
        let (action, calls) = flaky(u32::MAX);

        let ctx = ExecutionContext::with_timeout(delay / 2);
        let started = tokio::time::Instant::now();
        let err = retrier.retry(&ctx, &action).await.unwrap_err();

        assert_eq!(
            err.downcast_ref::<ContextError>(),
            Some(&ContextError::DeadlineExceeded)
        );
        assert!(started.elapsed() < delay);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_interrupts_sleep() {
        let retrier = Retrier::with_config(
            backoff::constant(3, Duration::from_secs(10)),
            RetrierConfig {
                classifier: Classifier::Default,
                seed: Some(7),
            },
        );
        let (action, calls) = flaky(u32::MAX);

        let ctx = ExecutionContext::with_timeout(Duration::ZERO);
        let err = retrier.retry(&ctx, &action).await.unwrap_err();

        assert_eq!(
            err.downcast_ref::<ContextError>(),
            Some(&ContextError::DeadlineExceeded)
        );
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_jitter_bounds() {
        let nominal = Duration::from_millis(100);
        let retrier = Retrier::with_config(
            backoff::constant(1, nominal),
            RetrierConfig {
                seed: Some(42),
                ..RetrierConfig::default()
            },
        );

        for _ in 0..1_000 {
            let delay = retrier.jittered(0);
            assert!(delay <= nominal * 2);
        }
    }

    #[test]
    fn test_seeded_jitter_is_reproducible() {
        let schedule = backoff::exponential(4, Duration::from_millis(50), 2.0);
        let config = RetrierConfig {
            seed: Some(9),
            ..RetrierConfig::default()
        };
        let a = Retrier::with_config(schedule.clone(), config.clone());
        let b = Retrier::with_config(schedule, config);

        let delays_a: Vec<_> = (0..4).map(|i| a.jittered(i)).collect();
        let delays_b: Vec<_> = (0..4).map(|i| b.jittered(i)).collect();
        assert_eq!(delays_a, delays_b);
    }
}
