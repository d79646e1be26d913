use crate::error::CoreError;
use crate::ident::CorrelationId;
use crate::types::{now_ms, DurableBody, RecordKind, ThreadId};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

/// One durable outbound operation: written before the first transmission
/// attempt, removed on confirmed delivery, terminal success, or explicit
/// cancel. Survives a process restart under the same correlation id.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct QueueRecord {
    pub id: CorrelationId,
    pub body: DurableBody,
    pub queued_at_ms: u64,
}

impl QueueRecord {
    pub fn new(id: CorrelationId, body: DurableBody) -> Self {
        Self {
            id,
            body,
            queued_at_ms: now_ms(),
        }
    }

    pub fn kind(&self) -> RecordKind {
        self.body.kind()
    }

    pub fn thread(&self) -> ThreadId {
        self.body.thread()
    }
}

/// Storage boundary for the offline queue. Implementations must make
/// `enqueue` idempotent by id and visible before they return, so the
/// engine's enqueue-before-transmit ordering holds across a crash.
pub trait QueueStore: Send + Sync {
    fn enqueue(&self, record: &QueueRecord) -> Result<(), CoreError>;

    /// Removes the record for `id`. Absent ids are a successful no-op;
    /// the return value reports whether a record was actually removed.
    fn dequeue(&self, id: &CorrelationId) -> Result<bool, CoreError>;

    /// All records for `thread`, oldest first.
    fn list_by_thread(&self, thread: ThreadId) -> Result<Vec<QueueRecord>, CoreError>;
}

/// Vec-backed store for embedders that accept losing the queue on restart,
/// and for tests. Insertion order is list order; re-enqueueing an id
/// replaces the record in place.
#[derive(Default)]
pub struct MemoryQueueStore {
    records: Mutex<Vec<QueueRecord>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.lock().expect("queue mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &CorrelationId) -> bool {
        self.records
            .lock()
            .expect("queue mutex poisoned")
            .iter()
            .any(|record| &record.id == id)
    }
}

impl QueueStore for MemoryQueueStore {
    fn enqueue(&self, record: &QueueRecord) -> Result<(), CoreError> {
        let mut records = self.records.lock().expect("queue mutex poisoned");
        match records.iter_mut().find(|existing| existing.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
        Ok(())
    }

    fn dequeue(&self, id: &CorrelationId) -> Result<bool, CoreError> {
        let mut records = self.records.lock().expect("queue mutex poisoned");
        let before = records.len();
        records.retain(|record| &record.id != id);
        Ok(records.len() != before)
    }

    fn list_by_thread(&self, thread: ThreadId) -> Result<Vec<QueueRecord>, CoreError> {
        let records = self.records.lock().expect("queue mutex poisoned");
        Ok(records
            .iter()
            .filter(|record| record.thread() == thread)
            .cloned()
            .collect())
    }
}
