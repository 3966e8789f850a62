//! Notification journal storage trait

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{ExecutionContext, Identifier, JournalError, Notification, Observer};

/// Journal storage trait
pub trait NotificationJournal: Send + Sync + 'static {
    /// Record a notification, returning its sequence number.
    fn append(&self, notification: &Notification) -> Result<u64, JournalError>;
    /// Every entry in sequence order.
    fn entries(&self) -> Result<Vec<JournalEntry>, JournalError>;
    /// Entries of one step in sequence order.
    fn entries_for(&self, identifier: &Identifier) -> Result<Vec<JournalEntry>, JournalError>;
    /// Number of recorded entries.
    fn len(&self) -> Result<usize, JournalError>;

    /// Whether nothing has been recorded.
    fn is_empty(&self) -> Result<bool, JournalError> {
        Ok(self.len()? == 0)
    }
}

#[derive(
    Clone,
    Debug,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    rkyv::Archive,
    rkyv::Serialize,
    rkyv::Deserialize,
)]
pub struct JournalEntry {
    /// Journal-wide sequence number, starting at 1
    pub sequence: u64,
    /// Wall-clock time of the append, milliseconds since the Unix epoch
    pub recorded_at_millis: u64,
    #[allow(missing_docs)]
    pub notification: Notification,
}

/// In-memory journal
pub struct InMemoryJournal {
    data: RwLock<HashMap<Identifier, Vec<JournalEntry>>>,
    counter: AtomicU64,
}

impl InMemoryJournal {
    /// Create an empty journal
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            counter: AtomicU64::new(1),
        }
    }

    /// Dump every entry as an rkyv archive, for diagnostics.
    ///
    /// The engine never reads or writes snapshots itself; they exist so a
    /// host can inspect a finished run elsewhere.
    pub fn snapshot(&self) -> Result<Vec<u8>, JournalError> {
        let entries = self.entries()?;
        let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(&entries)
            .map_err(|e| JournalError::Encode(e.to_string().into()))?;
        Ok(bytes.to_vec())
    }

    /// Load a [`snapshot`](Self::snapshot) dump for inspection.
    ///
    /// Every entry is revalidated like a freshly built notification.
    /// Sequence numbers continue after the highest restored entry.
    pub fn restore(bytes: &[u8]) -> Result<Self, JournalError> {
        let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);
        let entries = rkyv::from_bytes::<Vec<JournalEntry>, rkyv::rancor::Error>(&aligned)
            .map_err(|e| JournalError::Decode(e.to_string().into()))?;

        let next = entries.iter().map(|e| e.sequence).max().unwrap_or(0) + 1;
        let mut data: HashMap<Identifier, Vec<JournalEntry>> = HashMap::new();
        for mut entry in entries {
            let sequence = entry.sequence;
            entry.notification = Notification::new(
                entry.notification.identifier().clone(),
                entry.notification.event(),
            )
            .map_err(|e| JournalError::Decode(format!("entry {}: {}", sequence, e).into()))?;
            data.entry(entry.notification.identifier().clone())
                .or_default()
                .push(entry);
        }

        Ok(Self {
            data: RwLock::new(data),
            counter: AtomicU64::new(next),
        })
    }
}

impl NotificationJournal for InMemoryJournal {
    fn append(&self, notification: &Notification) -> Result<u64, JournalError> {
        let mut data = self
            .data
            .write()
            .map_err(|e| JournalError::Storage(e.to_string().into()))?;

        // Sequence is taken under the write lock so per-step order matches it
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let entry = JournalEntry {
            sequence: seq,
            recorded_at_millis: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_millis() as u64)
                .unwrap_or(0),
            notification: notification.clone(),
        };
        data.entry(notification.identifier().clone())
            .or_default()
            .push(entry);

        Ok(seq)
    }

    fn entries(&self) -> Result<Vec<JournalEntry>, JournalError> {
        let data = self
            .data
            .read()
            .map_err(|e| JournalError::Storage(e.to_string().into()))?;
        let mut entries: Vec<_> = data.values().flatten().cloned().collect();
        entries.sort_by_key(|e| e.sequence);
        Ok(entries)
    }

    fn entries_for(&self, identifier: &Identifier) -> Result<Vec<JournalEntry>, JournalError> {
        let data = self
            .data
            .read()
            .map_err(|e| JournalError::Storage(e.to_string().into()))?;
        Ok(data.get(identifier).cloned().unwrap_or_default())
    }

    fn len(&self) -> Result<usize, JournalError> {
        let data = self
            .data
            .read()
            .map_err(|e| JournalError::Storage(e.to_string().into()))?;
        Ok(data.values().map(Vec::len).sum())
    }
}

impl Default for InMemoryJournal {
    fn default() -> Self {
        Self::new()
    }
}

/// Observer that appends every notification to a journal
pub struct JournalObserver {
    journal: Arc<dyn NotificationJournal>,
}

impl JournalObserver {
    /// Record into `journal`.
    pub fn new(journal: Arc<dyn NotificationJournal>) -> Self {
        Self { journal }
    }

    /// Journal being recorded into.
    pub fn journal(&self) -> &Arc<dyn NotificationJournal> {
        &self.journal
    }
}

#[async_trait]
impl Observer for JournalObserver {
    async fn execute(&self, _ctx: &ExecutionContext, notification: &Notification) {
        if let Err(e) = self.journal.append(notification) {
            tracing::error!(notification = %notification, error = %e, "Journal append failed");
        }
    }
}
