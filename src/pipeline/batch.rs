use crate::event::EventRecord;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// An immutable group of records delivered together.
#[derive(Debug, Clone)]
pub struct Batch {
    /// Unique batch ID (for deduplication on the backend)
    batch_id: Uuid,

    /// Monotonic sequence number within one pipeline, starting at 0
    sequence: u64,

    created_at: DateTime<Utc>,

    /// Records in queue order
    records: Vec<EventRecord>,
}

impl Batch {
    /// Returns `None` for an empty record list; batches are never empty.
    pub(crate) fn new(sequence: u64, records: Vec<EventRecord>) -> Option<Self> {
        if records.is_empty() {
            return None;
        }
        Some(Self {
            batch_id: Uuid::new_v4(),
            sequence,
            created_at: Utc::now(),
            records,
        })
    }

    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn records(&self) -> &[EventRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
