use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free pipeline counters shared by every component of one pipeline.
#[derive(Debug, Default)]
pub struct PipelineStats {
    offered: AtomicU64,
    sampled_out: AtomicU64,
    capture_failures: AtomicU64,
    enqueued: AtomicU64,
    dropped_overflow: AtomicU64,
    dropped_closed: AtomicU64,
    discarded_at_shutdown: AtomicU64,
    batches_sent: AtomicU64,
    batches_delivered: AtomicU64,
    batches_rejected: AtomicU64,
    batches_lost: AtomicU64,
    batches_abandoned: AtomicU64,
    events_delivered: AtomicU64,
    delivery_attempts: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub offered: u64,
    pub sampled_out: u64,
    pub capture_failures: u64,
    pub enqueued: u64,
    pub dropped_overflow: u64,
    pub dropped_closed: u64,
    pub discarded_at_shutdown: u64,
    pub batches_sent: u64,
    pub batches_delivered: u64,
    pub batches_rejected: u64,
    pub batches_lost: u64,
    pub batches_abandoned: u64,
    pub events_delivered: u64,
    pub delivery_attempts: u64,
}

fn bump(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_offered(&self) {
        bump(&self.offered, 1);
    }

    pub(crate) fn record_sampled_out(&self) {
        bump(&self.sampled_out, 1);
    }

    pub(crate) fn record_capture_failure(&self) {
        bump(&self.capture_failures, 1);
    }

    pub(crate) fn record_enqueued(&self) {
        bump(&self.enqueued, 1);
    }

    pub(crate) fn record_overflow_drop(&self) {
        bump(&self.dropped_overflow, 1);
    }

    pub(crate) fn record_closed_drop(&self) {
        bump(&self.dropped_closed, 1);
    }

    pub(crate) fn record_discarded_at_shutdown(&self, records: usize) {
        bump(&self.discarded_at_shutdown, records as u64);
    }

    pub(crate) fn record_batch_sent(&self) {
        bump(&self.batches_sent, 1);
    }

    pub(crate) fn record_delivered(&self, events: usize) {
        bump(&self.batches_delivered, 1);
        bump(&self.events_delivered, events as u64);
    }

    pub(crate) fn record_rejected(&self) {
        bump(&self.batches_rejected, 1);
    }

    pub(crate) fn record_lost(&self) {
        bump(&self.batches_lost, 1);
    }

    pub(crate) fn record_abandoned(&self, batches: usize) {
        bump(&self.batches_abandoned, batches as u64);
    }

    pub(crate) fn record_attempt(&self) {
        bump(&self.delivery_attempts, 1);
    }

    pub fn dropped_overflow(&self) -> u64 {
        self.dropped_overflow.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        StatsSnapshot {
            offered: load(&self.offered),
            sampled_out: load(&self.sampled_out),
            capture_failures: load(&self.capture_failures),
            enqueued: load(&self.enqueued),
            dropped_overflow: load(&self.dropped_overflow),
            dropped_closed: load(&self.dropped_closed),
            discarded_at_shutdown: load(&self.discarded_at_shutdown),
            batches_sent: load(&self.batches_sent),
            batches_delivered: load(&self.batches_delivered),
            batches_rejected: load(&self.batches_rejected),
            batches_lost: load(&self.batches_lost),
            batches_abandoned: load(&self.batches_abandoned),
            events_delivered: load(&self.events_delivered),
            delivery_attempts: load(&self.delivery_attempts),
        }
    }
}
