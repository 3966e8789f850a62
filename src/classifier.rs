//! Error classification: decides whether a failed action is retried

use std::error::Error as StdError;
use std::sync::Arc;

/// Decision reached for one action outcome.
///
/// Internal to retrying; never carried by a notification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// No error; stop
    Succeeded,
    /// Transient error; try again if budget remains
    Retry,
    /// Permanent error; stop
    Failed,
}

type MatchFn = dyn Fn(&(dyn StdError + 'static)) -> bool + Send + Sync;

/// Predicate identifying an error, either directly or anywhere in its
/// source chain.
#[derive(Clone)]
pub struct ErrorMatcher {
    label: Box<str>,
    matches: Arc<MatchFn>,
}

impl ErrorMatcher {
    /// Match any error of type `E`.
    pub fn kind<E>() -> Self
    where
        E: StdError + 'static,
    {
        Self {
            label: std::any::type_name::<E>().into(),
            matches: Arc::new(|err: &(dyn StdError + 'static)| err.is::<E>()),
        }
    }

    /// Match errors equal to `expected`.
    pub fn value<E>(expected: E) -> Self
    where
        E: StdError + PartialEq + Send + Sync + 'static,
    {
        Self {
            label: expected.to_string().into_boxed_str(),
            matches: Arc::new(move |err: &(dyn StdError + 'static)| {
                err.downcast_ref::<E>() == Some(&expected)
            }),
        }
    }

    /// Match with an arbitrary predicate.
    pub fn predicate<F>(label: &str, matches: F) -> Self
    where
        F: Fn(&(dyn StdError + 'static)) -> bool + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            matches: Arc::new(matches),
        }
    }

    /// Whether `err` or any of its causes matches.
    pub fn is_match(&self, err: &anyhow::Error) -> bool {
        err.chain().any(|cause| (self.matches)(cause))
    }
}

impl std::fmt::Debug for ErrorMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ErrorMatcher({})", self.label)
    }
}

/// Retry classification policy.
#[derive(Clone, Debug, Default)]
pub enum Classifier {
    /// Every error is retried
    #[default]
    Default,
    /// Listed errors are retried, anything else fails fast
    Whitelist(Vec<ErrorMatcher>),
    /// Listed errors fail fast, anything else is retried
    Blacklist(Vec<ErrorMatcher>),
}

impl Classifier {
    /// Retry only errors matching one of `matchers`.
    pub fn whitelist(matchers: impl IntoIterator<Item = ErrorMatcher>) -> Self {
        Self::Whitelist(matchers.into_iter().collect())
    }

    /// Retry every error except those matching one of `matchers`.
    pub fn blacklist(matchers: impl IntoIterator<Item = ErrorMatcher>) -> Self {
        Self::Blacklist(matchers.into_iter().collect())
    }

    /// Classify an action outcome. `None` is always `Succeeded`.
    pub fn classify(&self, error: Option<&anyhow::Error>) -> Verdict {
        let Some(err) = error else {
            return Verdict::Succeeded;
        };

        match self {
            Self::Default => Verdict::Retry,
            Self::Whitelist(list) => {
                if list.iter().any(|m| m.is_match(err)) {
                    Verdict::Retry
                } else {
                    Verdict::Failed
                }
            }
            Self::Blacklist(list) => {
                if list.iter().any(|m| m.is_match(err)) {
                    Verdict::Failed
                } else {
                    Verdict::Retry
                }
            }
        }
    }

    /// Classify an action result.
    pub fn classify_result(&self, result: &anyhow::Result<()>) -> Verdict {
        self.classify(result.as_ref().err())
    }
}
