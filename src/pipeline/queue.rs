use crate::config::types::OverflowPolicy;
use crate::event::EventRecord;
use crate::stats::PipelineStats;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

/// Bounded in-memory buffer between instrumentation hooks and the flush
/// scheduler.
///
/// Many producers call `offer`; the scheduler is the only drainer. Every
/// drain happens under the same lock, so two flush triggers can never hand
/// out the same record twice.
pub struct IngestionQueue {
    capacity: usize,
    batch_threshold: usize,
    policy: OverflowPolicy,
    records: Mutex<VecDeque<EventRecord>>,
    closed: AtomicBool,
    size_signal: Notify,
    stats: Arc<PipelineStats>,
}

impl IngestionQueue {
    pub fn new(
        capacity: usize,
        batch_threshold: usize,
        policy: OverflowPolicy,
        stats: Arc<PipelineStats>,
    ) -> Self {
        Self {
            capacity: capacity.max(1),
            batch_threshold: batch_threshold.max(1),
            policy,
            records: Mutex::new(VecDeque::with_capacity(capacity.min(4096))),
            closed: AtomicBool::new(false),
            size_signal: Notify::new(),
            stats,
        }
    }

    /// Add a record without blocking.
    ///
    /// Returns false when the record was not accepted: the queue is closed,
    /// or it is full and the policy drops the newest record.
    pub fn offer(&self, record: EventRecord) -> bool {
        if self.closed.load(Ordering::Acquire) {
            self.stats.record_closed_drop();
            return false;
        }

        let len = {
            let mut records = self.lock();
            // `close` flips the flag under this lock; a drain that follows it
            // must not miss a late push
            if self.closed.load(Ordering::Acquire) {
                drop(records);
                self.stats.record_closed_drop();
                return false;
            }
            if records.len() >= self.capacity {
                match self.policy {
                    OverflowPolicy::DropNewest => {
                        drop(records);
                        self.stats.record_overflow_drop();
                        tracing::trace!(
                            capacity = self.capacity,
                            "Queue full, dropping newest event"
                        );
                        return false;
                    }
                    OverflowPolicy::DropOldest => {
                        records.pop_front();
                        self.stats.record_overflow_drop();
                        tracing::trace!(
                            capacity = self.capacity,
                            "Queue full, dropping oldest event"
                        );
                    }
                }
            }
            records.push_back(record);
            records.len()
        };

        self.stats.record_enqueued();
        if len >= self.batch_threshold {
            self.size_signal.notify_one();
        }
        true
    }

    /// Remove up to `max` records in FIFO order.
    pub fn drain(&self, max: usize) -> Vec<EventRecord> {
        let mut records = self.lock();
        let n = max.min(records.len());
        records.drain(..n).collect()
    }

    /// Remove exactly `n` records, or nothing if fewer are queued.
    pub fn drain_exact(&self, n: usize) -> Option<Vec<EventRecord>> {
        let mut records = self.lock();
        if n == 0 || records.len() < n {
            return None;
        }
        Some(records.drain(..n).collect())
    }

    /// Resolves once the queue has reached the batch threshold since the
    /// last wake-up.
    pub async fn size_triggered(&self) {
        self.size_signal.notified().await
    }

    /// Stop accepting new records. Already queued records stay drainable.
    ///
    /// Once this returns, no offer can add to the queue.
    pub fn close(&self) {
        let _records = self.lock();
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<EventRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
