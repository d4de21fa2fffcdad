use crate::delivery::{DeliveryClient, DeliveryOutcome, DeliveryReport};
use crate::pipeline::batch::Batch;
use crate::pipeline::batcher::Batcher;
use crate::pipeline::queue::IngestionQueue;
use crate::stats::{PipelineStats, StatsSnapshot};
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Scheduled,
    Flushing,
    Draining,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// Periodic flush; drains everything queued
    Timer,
    /// Queue reached `max_batch_size`; drains full batches only
    Size,
}

/// Outcome of a shutdown drain.
#[derive(Debug, Clone, Serialize)]
pub struct ShutdownReport {
    /// Batches handed to delivery during the drain itself
    pub batches_flushed: usize,
    /// Records whose batch never got a delivery slot before the deadline
    pub records_discarded: usize,
    /// Deliveries still running at the deadline, aborted
    pub batches_abandoned: usize,
    pub timed_out: bool,
    pub stats: StatsSnapshot,
}

/// Sealed batches whose delivery task is waiting for a free slot.
#[derive(Debug, Default)]
struct Backlog {
    batches: AtomicUsize,
    records: AtomicUsize,
}

impl Backlog {
    fn park(&self, records: usize) {
        self.batches.fetch_add(1, Ordering::AcqRel);
        self.records.fetch_add(records, Ordering::AcqRel);
    }

    fn unpark(&self, records: usize) {
        self.batches.fetch_sub(1, Ordering::AcqRel);
        self.records.fetch_sub(records, Ordering::AcqRel);
    }

    fn batches(&self) -> usize {
        self.batches.load(Ordering::Acquire)
    }

    fn records(&self) -> usize {
        self.records.load(Ordering::Acquire)
    }
}

/// Owns the batcher and every in-flight delivery of one pipeline.
///
/// Runs as a single task: flushes on the timer or the queue's size signal,
/// spawns deliveries, and drains on stop. At most `max_in_flight` deliveries
/// talk to the network at once. Timer flushes never wait for a slot: their
/// batches park until one frees up, with at most one queue's worth of
/// batches parked.
pub struct FlushScheduler {
    queue: Arc<IngestionQueue>,
    batcher: Batcher,
    client: Arc<DeliveryClient>,
    flush_interval: Duration,
    max_in_flight: usize,
    max_backlog: usize,
    permits: Arc<Semaphore>,
    backlog: Arc<Backlog>,
    inflight: JoinSet<DeliveryReport>,
    state: watch::Sender<SchedulerState>,
    shutdown: CancellationToken,
    default_shutdown_timeout: Duration,
    stats: Arc<PipelineStats>,
}

impl FlushScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        queue: Arc<IngestionQueue>,
        batcher: Batcher,
        client: Arc<DeliveryClient>,
        flush_interval: Duration,
        max_in_flight: usize,
        default_shutdown_timeout: Duration,
        state: watch::Sender<SchedulerState>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        let max_in_flight = max_in_flight.max(1);
        let max_backlog = queue.capacity().div_ceil(batcher.max_batch_size()).max(1);
        Self {
            queue,
            batcher,
            client,
            flush_interval,
            max_in_flight,
            max_backlog,
            permits: Arc::new(Semaphore::new(max_in_flight)),
            backlog: Arc::new(Backlog::default()),
            inflight: JoinSet::new(),
            state,
            shutdown: CancellationToken::new(),
            default_shutdown_timeout,
            stats,
        }
    }

    /// Token cancelled when the drain starts; interrupts retry backoff.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Run until `stop` yields a drain timeout, or until its sender is
    /// dropped, in which case the default shutdown timeout applies.
    pub async fn run(mut self, mut stop: oneshot::Receiver<Duration>) -> ShutdownReport {
        let start = Instant::now() + self.flush_interval;
        let mut ticker = interval_at(start, self.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.set_state(SchedulerState::Scheduled);
        info!(
            flush_interval_ms = self.flush_interval.as_millis() as u64,
            max_batch_size = self.batcher.max_batch_size(),
            max_in_flight = self.max_in_flight,
            "Flush scheduler started"
        );

        let timeout = loop {
            let queue = Arc::clone(&self.queue);
            tokio::select! {
                result = &mut stop => {
                    break result.unwrap_or(self.default_shutdown_timeout);
                }
                _ = ticker.tick() => {
                    self.flush(FlushTrigger::Timer);
                }
                _ = queue.size_triggered() => {
                    self.flush(FlushTrigger::Size);
                }
                Some(result) = self.inflight.join_next(), if !self.inflight.is_empty() => {
                    self.on_delivery_finished(result);
                    // A freed slot may unblock full batches left behind by a size flush
                    if self.queue.len() >= self.batcher.max_batch_size() {
                        self.flush(FlushTrigger::Size);
                    }
                }
            }
        };

        self.drain(timeout).await
    }

    fn flush(&mut self, trigger: FlushTrigger) {
        if self.queue.is_empty() {
            return;
        }
        self.set_state(SchedulerState::Flushing);

        let mut dispatched = 0usize;
        while self.has_room(trigger) {
            let batch = match trigger {
                FlushTrigger::Timer => self.batcher.drain_batch(),
                FlushTrigger::Size => self.batcher.drain_full_batch(),
            };
            let Some(batch) = batch else {
                break;
            };
            self.dispatch(batch);
            dispatched += 1;
        }

        if dispatched > 0 {
            debug!(
                trigger = ?trigger,
                batches = dispatched,
                parked = self.backlog.batches(),
                "Flushed"
            );
        }
        if !self.queue.is_empty() && !self.has_room(trigger) {
            debug!(
                trigger = ?trigger,
                queued = self.queue.len(),
                "Delivery backlog full, leaving records queued"
            );
        }
        self.set_state(SchedulerState::Scheduled);
    }

    /// Size flushes only start deliveries that get a slot right away; timer
    /// flushes may also park batches behind busy slots.
    fn has_room(&self, trigger: FlushTrigger) -> bool {
        match trigger {
            FlushTrigger::Size => self.inflight.len() < self.max_in_flight,
            FlushTrigger::Timer => self.backlog.batches() < self.max_backlog,
        }
    }

    fn dispatch(&mut self, batch: Batch) {
        self.stats.record_batch_sent();
        self.backlog.park(batch.len());

        let permits = Arc::clone(&self.permits);
        let backlog = Arc::clone(&self.backlog);
        let client = Arc::clone(&self.client);
        let shutdown = self.shutdown.clone();
        self.inflight.spawn(async move {
            // The semaphore is never closed
            let _permit = permits.acquire_owned().await;
            backlog.unpark(batch.len());
            client.send(&batch, &shutdown).await
        });
    }

    fn on_delivery_finished(&self, result: Result<DeliveryReport, JoinError>) {
        match result {
            Ok(report) => {
                if let DeliveryOutcome::Lost(reason) = &report.outcome {
                    debug!(
                        batch_id = %report.batch_id,
                        reason = %reason,
                        "Delivery task finished without delivering"
                    );
                }
            }
            Err(e) if e.is_cancelled() => {}
            Err(e) => {
                error!(error = %e, "Delivery task panicked");
                self.stats.record_lost();
            }
        }
    }

    async fn drain(mut self, timeout: Duration) -> ShutdownReport {
        self.set_state(SchedulerState::Draining);
        self.queue.close();
        self.shutdown.cancel();

        let deadline = Instant::now() + timeout;
        info!(
            queued = self.queue.len(),
            in_flight = self.inflight.len(),
            timeout_ms = timeout.as_millis() as u64,
            "Draining telemetry pipeline"
        );

        // The queue is closed, so this hands over a bounded remainder
        let mut batches_flushed = 0usize;
        while let Some(batch) = self.batcher.drain_batch() {
            self.dispatch(batch);
            batches_flushed += 1;
        }

        let finished = tokio::time::timeout_at(deadline, async {
            while let Some(result) = self.inflight.join_next().await {
                self.on_delivery_finished(result);
            }
        })
        .await;

        let mut timed_out = false;
        let mut records_discarded = 0usize;
        let mut batches_abandoned = 0usize;
        if finished.is_err() {
            timed_out = true;
            self.inflight.abort_all();
            let mut aborted = 0usize;
            while let Some(result) = self.inflight.join_next().await {
                match result {
                    Err(e) if e.is_cancelled() => aborted += 1,
                    other => self.on_delivery_finished(other),
                }
            }

            // Aborted tasks still parked never reached the network
            let parked = self.backlog.batches();
            records_discarded = self.backlog.records();
            batches_abandoned = aborted.saturating_sub(parked);

            if records_discarded > 0 {
                self.stats.record_discarded_at_shutdown(records_discarded);
                warn!(
                    records = records_discarded,
                    "Shutdown deadline reached, discarding events still waiting for delivery"
                );
            }
            if batches_abandoned > 0 {
                self.stats.record_abandoned(batches_abandoned);
                warn!(
                    batches = batches_abandoned,
                    "Shutdown deadline reached, abandoning in-flight deliveries"
                );
            }
        }

        self.set_state(SchedulerState::Stopped);
        let report = ShutdownReport {
            batches_flushed,
            records_discarded,
            batches_abandoned,
            timed_out,
            stats: self.stats.snapshot(),
        };
        info!(
            batches_flushed,
            records_discarded,
            batches_abandoned,
            timed_out,
            "Telemetry pipeline stopped"
        );
        report
    }

    fn set_state(&self, state: SchedulerState) {
        self.state.send_replace(state);
    }
}
