//! Backoff schedules
//!
//! A schedule is a plain list of durations. Its length is the retry budget:
//! a retrier with a schedule of `n` entries invokes an action at most `n + 1`
//! times, sleeping roughly `schedule[i]` before retry `i + 1`.

use std::time::Duration;

/// Backoff strategy, chosen at construction time.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Backoff {
    /// `amount` repeated `attempts` times
    #[allow(missing_docs)]
    Constant { attempts: usize, amount: Duration },
    /// `initial, initial * rate, initial * rate^2, ...`
    #[allow(missing_docs)]
    Exponential {
        attempts: usize,
        initial: Duration,
        rate: f64,
    },
    /// Exponential growth clamped to `limit` once reached
    #[allow(missing_docs)]
    LimitedExponential {
        attempts: usize,
        initial: Duration,
        limit: Duration,
        rate: f64,
    },
}

impl Backoff {
    /// Produce the schedule for this strategy.
    pub fn generate(&self) -> Vec<Duration> {
        match *self {
            Self::Constant { attempts, amount } => constant(attempts, amount),
            Self::Exponential {
                attempts,
                initial,
                rate,
            } => exponential(attempts, initial, rate),
            Self::LimitedExponential {
                attempts,
                initial,
                limit,
                rate,
            } => limited_exponential(attempts, initial, limit, rate),
        }
    }

    /// Number of retries the schedule allows.
    pub fn attempts(&self) -> usize {
        match *self {
            Self::Constant { attempts, .. }
            | Self::Exponential { attempts, .. }
            | Self::LimitedExponential { attempts, .. } => attempts,
        }
    }
}

impl From<Backoff> for Vec<Duration> {
    fn from(backoff: Backoff) -> Self {
        backoff.generate()
    }
}

/// `[amount; attempts]`
///
/// ```rust,ignore
/// assert_eq!(constant(3, secs(1)), [secs(1), secs(1), secs(1)]);
/// ```
pub fn constant(attempts: usize, amount: Duration) -> Vec<Duration> {
    vec![amount; attempts]
}

/// `initial * rate^i` for `i` in `0..attempts`.
///
/// ```rust,ignore
/// assert_eq!(exponential(3, secs(1), 2.0), [secs(1), secs(2), secs(4)]);
/// ```
pub fn exponential(attempts: usize, initial: Duration, rate: f64) -> Vec<Duration> {
    let mut ret = Vec::with_capacity(attempts);
    let mut next = initial;
    for _ in 0..attempts {
        ret.push(next);
        next = scale(next, rate);
    }
    ret
}

/// Like [`exponential`], but once a term would reach `limit` that term and
/// every later one is `limit`.
///
/// ```rust,ignore
/// assert_eq!(
///     limited_exponential(5, secs(1), secs(5), 2.0),
///     [secs(1), secs(2), secs(4), secs(5), secs(5)],
/// );
/// ```
pub fn limited_exponential(
    attempts: usize,
    initial: Duration,
    limit: Duration,
    rate: f64,
) -> Vec<Duration> {
    let mut ret = Vec::with_capacity(attempts);
    let mut next = initial;
    let mut clamped = false;
    for _ in 0..attempts {
        if !clamped && next < limit {
            ret.push(next);
            next = scale(next, rate);
        } else {
            clamped = true;
            ret.push(limit);
        }
    }
    ret
}

/// Multiply a duration by `rate`, saturating instead of panicking.
pub(crate) fn scale(duration: Duration, rate: f64) -> Duration {
    const NANOS_PER_SEC: u128 = 1_000_000_000;

    let nanos = duration.as_nanos() as f64 * rate;
    if nanos.is_nan() || nanos <= 0.0 {
        return Duration::ZERO;
    }
    if nanos >= Duration::MAX.as_nanos() as f64 {
        return Duration::MAX;
    }

    let nanos = nanos.round() as u128;
    let secs = u64::try_from(nanos / NANOS_PER_SEC).unwrap_or(u64::MAX);
    Duration::new(secs, (nanos % NANOS_PER_SEC) as u32)
}
