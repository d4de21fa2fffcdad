use crate::delivery::backoff::Backoff;
use crate::delivery::transport::{Transport, TransportResponse};
use crate::delivery::wire::{encode_batch, EncodedBatch, SdkInfo, ServerInfo};
use crate::pipeline::batch::Batch;
use crate::quota::QuotaMonitor;
use crate::stats::PipelineStats;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Classification of a single attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Delivered,
    Rejected(String),
    TransientFailure(String),
}

/// Final fate of a batch.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryOutcome {
    Delivered,
    /// Permanently refused by the backend; never retried
    Rejected(String),
    /// Retries exhausted, or cut short by shutdown
    Lost(String),
}

#[derive(Debug, Clone)]
pub struct DeliveryReport {
    pub batch_id: Uuid,
    pub sequence: u64,
    pub events: usize,
    pub attempts: u32,
    pub outcome: DeliveryOutcome,
    /// `accepted` count from the response body, when the backend sent one
    pub accepted: Option<u64>,
}

impl DeliveryReport {
    pub fn is_delivered(&self) -> bool {
        self.outcome == DeliveryOutcome::Delivered
    }
}

pub fn classify_status(status: u16) -> AttemptOutcome {
    match status {
        200..=299 => AttemptOutcome::Delivered,
        408 | 429 => AttemptOutcome::TransientFailure(format!("HTTP {}", status)),
        500..=599 => AttemptOutcome::TransientFailure(format!("HTTP {}", status)),
        _ => AttemptOutcome::Rejected(format!("HTTP {}", status)),
    }
}

/// Serializes batches, sends them through a [`Transport`] and applies the
/// retry policy.
pub struct DeliveryClient {
    transport: Arc<dyn Transport>,
    backoff: Backoff,
    max_retries: u32,
    monitor: Arc<QuotaMonitor>,
    sdk: SdkInfo,
    server: ServerInfo,
    stats: Arc<PipelineStats>,
    debug: bool,
}

impl DeliveryClient {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        transport: Arc<dyn Transport>,
        backoff: Backoff,
        max_retries: u32,
        monitor: Arc<QuotaMonitor>,
        sdk: SdkInfo,
        server: ServerInfo,
        stats: Arc<PipelineStats>,
        debug: bool,
    ) -> Self {
        Self {
            transport,
            backoff,
            max_retries,
            monitor,
            sdk,
            server,
            stats,
            debug,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Deliver one batch, making at most `max_retries + 1` attempts.
    ///
    /// Cancelling `shutdown` interrupts a backoff sleep and the batch is
    /// reported lost; an attempt already in flight is never interrupted here.
    pub async fn send(&self, batch: &Batch, shutdown: &CancellationToken) -> DeliveryReport {
        let encoded = match encode_batch(batch, &self.sdk, &self.server) {
            Ok(encoded) => encoded,
            Err(e) => {
                error!(batch_id = %batch.batch_id(), error = %e, "Failed to encode batch");
                self.stats.record_rejected();
                return self.report(batch, 0, DeliveryOutcome::Rejected(e.to_string()), None);
            }
        };

        let mut attempt = 0u32;
        loop {
            attempt += 1;
            self.stats.record_attempt();

            let (outcome, response) = self.attempt(&encoded, attempt).await;

            let reason = match outcome {
                AttemptOutcome::Delivered => {
                    let accepted = response.as_ref().and_then(|r| r.body.as_ref()?.accepted);
                    if self.debug {
                        info!(
                            batch_id = %encoded.batch_id,
                            sequence = encoded.sequence,
                            events = encoded.events,
                            attempt,
                            "Batch delivered"
                        );
                    } else {
                        debug!(
                            batch_id = %encoded.batch_id,
                            sequence = encoded.sequence,
                            events = encoded.events,
                            attempt,
                            "Batch delivered"
                        );
                    }
                    self.stats.record_delivered(encoded.events);
                    return self.report(batch, attempt, DeliveryOutcome::Delivered, accepted);
                }
                AttemptOutcome::Rejected(reason) => {
                    warn!(
                        batch_id = %encoded.batch_id,
                        events = encoded.events,
                        reason = %reason,
                        "Batch rejected by ingestion endpoint, dropping"
                    );
                    self.stats.record_rejected();
                    return self.report(batch, attempt, DeliveryOutcome::Rejected(reason), None);
                }
                AttemptOutcome::TransientFailure(reason) => reason,
            };

            if attempt > self.max_retries {
                error!(
                    batch_id = %encoded.batch_id,
                    attempts = attempt,
                    error = %reason,
                    "Max retries exceeded, batch lost"
                );
                self.stats.record_lost();
                return self.report(batch, attempt, DeliveryOutcome::Lost(reason), None);
            }

            let retry_after = response.as_ref().and_then(|r| r.retry_after);
            let backoff = self.backoff.delay(attempt - 1, retry_after);
            warn!(
                batch_id = %encoded.batch_id,
                attempt,
                backoff_ms = backoff.as_millis() as u64,
                error = %reason,
                "Delivery failed, retrying"
            );

            if !self.sleep_unless_cancelled(backoff, shutdown).await {
                warn!(
                    batch_id = %encoded.batch_id,
                    attempts = attempt,
                    "Shutdown interrupted retry backoff, batch lost"
                );
                self.stats.record_lost();
                return self.report(
                    batch,
                    attempt,
                    DeliveryOutcome::Lost(format!("shutdown during backoff after {}", reason)),
                    None,
                );
            }
        }
    }

    async fn attempt(
        &self,
        encoded: &EncodedBatch,
        attempt: u32,
    ) -> (AttemptOutcome, Option<TransportResponse>) {
        match self.transport.send(encoded, attempt).await {
            Ok(response) => {
                if !response.quota.is_empty() {
                    self.monitor.observe(&response.quota);
                }
                (classify_status(response.status), Some(response))
            }
            Err(e) => (AttemptOutcome::TransientFailure(e.to_string()), None),
        }
    }

    /// Returns false if shutdown fired first.
    async fn sleep_unless_cancelled(&self, delay: Duration, shutdown: &CancellationToken) -> bool {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    fn report(
        &self,
        batch: &Batch,
        attempts: u32,
        outcome: DeliveryOutcome,
        accepted: Option<u64>,
    ) -> DeliveryReport {
        DeliveryReport {
            batch_id: batch.batch_id(),
            sequence: batch.sequence(),
            events: batch.len(),
            attempts,
            outcome,
            accepted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::transport::TransportError;
    use crate::event::{capture, CaptureLimits, EventKind, RawEvent};
    use crate::quota::{QuotaLevel, QuotaState};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted responses and records what was sent.
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<TransportResponse, TransportError>>>,
        seen: Mutex<Vec<(u32, Uuid, Vec<u8>)>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<TransportResponse, TransportError>>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(script.into()),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(
            &self,
            batch: &EncodedBatch,
            attempt: u32,
        ) -> Result<TransportResponse, TransportError> {
            self.seen
                .lock()
                .unwrap()
                .push((attempt, batch.batch_id, batch.body.clone()));
            self.script
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(TransportResponse::new(500)))
        }
    }

    fn make_client(
        transport: Arc<ScriptedTransport>,
        max_retries: u32,
    ) -> (DeliveryClient, Arc<PipelineStats>, QuotaState) {
        let stats = Arc::new(PipelineStats::new());
        let quota = QuotaState::new();
        let monitor = Arc::new(QuotaMonitor::new(quota.clone(), None, 0.1));
        let client = DeliveryClient::new(
            transport,
            Backoff::new(Duration::from_millis(10), Duration::from_millis(100)),
            max_retries,
            monitor,
            SdkInfo::current(),
            ServerInfo::new("test", "0.0.0", "stdio"),
            Arc::clone(&stats),
            false,
        );
        (client, stats, quota)
    }

    fn make_batch(n: usize) -> Batch {
        let records = (0..n)
            .map(|i| {
                capture(
                    RawEvent::new(EventKind::ToolCall, format!("tool-{}", i)),
                    "trace",
                    &CaptureLimits::default(),
                )
                .unwrap()
            })
            .collect();
        Batch::new(0, records).unwrap()
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(classify_status(200), AttemptOutcome::Delivered);
        assert_eq!(classify_status(202), AttemptOutcome::Delivered);
        for status in [408, 429, 500, 502, 503] {
            assert!(matches!(classify_status(status), AttemptOutcome::TransientFailure(_)));
        }
        for status in [400, 401, 403, 404, 413, 422] {
            assert!(matches!(classify_status(status), AttemptOutcome::Rejected(_)));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_delivered_first_attempt() {
        let transport = ScriptedTransport::new(vec![Ok(TransportResponse::new(200))]);
        let (client, stats, _) = make_client(Arc::clone(&transport), 3);

        let report = client.send(&make_batch(3), &CancellationToken::new()).await;

        assert!(report.is_delivered());
        assert_eq!(report.attempts, 1);
        assert_eq!(stats.snapshot().events_delivered, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_resend_identical_body() {
        let transport = ScriptedTransport::new(vec![
            Ok(TransportResponse::new(503)),
            Err(TransportError::Timeout(Duration::from_secs(1))),
            Ok(TransportResponse::new(200)),
        ]);
        let (client, _, _) = make_client(Arc::clone(&transport), 3);
        let batch = make_batch(2);

        let report = client.send(&batch, &CancellationToken::new()).await;
        assert!(report.is_delivered());
        assert_eq!(report.attempts, 3);

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen.iter().map(|s| s.0).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(seen.iter().all(|s| s.1 == batch.batch_id()));
        assert!(seen.iter().all(|s| s.2 == seen[0].2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_transient_failure_is_lost() {
        let transport = ScriptedTransport::new(vec![]);
        let (client, stats, _) = make_client(Arc::clone(&transport), 3);

        let report = client.send(&make_batch(1), &CancellationToken::new()).await;

        assert!(matches!(report.outcome, DeliveryOutcome::Lost(_)));
        assert_eq!(report.attempts, 4);
        assert_eq!(transport.seen.lock().unwrap().len(), 4);
        assert_eq!(stats.snapshot().batches_lost, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_not_retried() {
        let transport = ScriptedTransport::new(vec![Ok(TransportResponse::new(401))]);
        let (client, stats, _) = make_client(Arc::clone(&transport), 3);

        let report = client.send(&make_batch(1), &CancellationToken::new()).await;

        assert!(matches!(report.outcome, DeliveryOutcome::Rejected(_)));
        assert_eq!(report.attempts, 1);
        assert_eq!(stats.snapshot().batches_rejected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_backoff_loses_batch() {
        let transport = ScriptedTransport::new(vec![]);
        let (client, _, _) = make_client(Arc::clone(&transport), 3);
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let report = client.send(&make_batch(1), &shutdown).await;

        assert!(matches!(report.outcome, DeliveryOutcome::Lost(_)));
        assert_eq!(report.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_signal_reaches_monitor() {
        let transport =
            ScriptedTransport::new(vec![Ok(TransportResponse::new(200).with_quota(1000, 20))]);
        let (client, _, quota) = make_client(Arc::clone(&transport), 0);

        client.send(&make_batch(1), &CancellationToken::new()).await;

        assert_eq!(quota.level(), QuotaLevel::ApproachingLimit);
        assert_eq!(quota.snapshot().detail.remaining, Some(20));
    }
}
