//! Step identity

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Length of the hex suffix appended to a step name.
const SUFFIX_LEN: usize = 12;

/// Unique identifier for a step instance.
///
/// Rendered as `name:suffix`, where the suffix is a truncated hash of the
/// name and its creation instant.
#[derive(
    Clone,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
pub struct Identifier(String);

impl Identifier {
    /// Create a fresh identifier for `name`.
    pub fn new(name: &str) -> Self {
        let suffix = unique_suffix(name);
        Self(format!("{}:{}", name, suffix))
    }

    /// Wrap an existing identifier string verbatim.
    ///
    /// No uniqueness is added; an empty string is representable here and is
    /// rejected later by [`Notification::new`](crate::Notification::new).
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The step name the identifier was derived from.
    pub fn name(&self) -> &str {
        match self.0.rsplit_once(':') {
            Some((name, _)) => name,
            None => &self.0,
        }
    }

    /// Get the identifier as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier carries no text at all.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Identifier({})", self.0)
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn unique_suffix(name: &str) -> String {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(1);

    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let sequence = COUNTER.fetch_add(1, Ordering::Relaxed);

    let mut hasher = Sha256::new();
    hasher.update(nanos.to_be_bytes());
    hasher.update(sequence.to_be_bytes());
    hasher.update(name.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..SUFFIX_LEN].to_string()
}
