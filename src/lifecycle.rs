use crate::config::{ConfigError, PipelineConfig};
use crate::delivery::{
    Backoff, DeliveryClient, HttpTransport, SdkInfo, ServerInfo, Transport, TransportError,
};
use crate::event::capture::new_trace_id;
use crate::event::CaptureLimits;
use crate::instrument::{Instrumentation, Session, Shared};
use crate::pipeline::{Batcher, FlushScheduler, IngestionQueue, SchedulerState, ShutdownReport};
use crate::quota::{QuotaMonitor, QuotaState};
use crate::sampler::Sampler;
use crate::stats::{PipelineStats, StatsSnapshot};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("a tokio runtime is required to start the pipeline")]
    NoRuntime,

    #[error("pipeline already started")]
    AlreadyStarted,

    #[error("pipeline is not running")]
    NotRunning,

    #[error("flush scheduler task failed: {0}")]
    Scheduler(String),
}

enum Phase {
    Created,
    Running {
        stop: oneshot::Sender<Duration>,
        handle: JoinHandle<ShutdownReport>,
    },
    Stopped,
}

/// One telemetry pipeline, from hook to ingestion endpoint.
///
/// Create it when instrumentation attaches, `start` it inside a tokio
/// runtime, and `stop` it when the server closes. Dropping a running
/// pipeline still drains queued events using the policy's shutdown timeout.
pub struct Pipeline {
    config: PipelineConfig,
    server: ServerInfo,
    transport: Arc<dyn Transport>,
    shared: Arc<Shared>,
    quota: QuotaState,
    stats: Arc<PipelineStats>,
    state_tx: watch::Sender<SchedulerState>,
    state_rx: watch::Receiver<SchedulerState>,
    phase: Mutex<Phase>,
}

impl Pipeline {
    /// Build a pipeline that delivers over HTTP to the configured endpoint.
    pub fn new(config: PipelineConfig, server: ServerInfo) -> Result<Self, LifecycleError> {
        let transport = HttpTransport::new(
            config.endpoint(),
            config.api_key(),
            config.policy().request_timeout,
        )?;
        Ok(Self::with_transport(config, server, Arc::new(transport)))
    }

    /// Build a pipeline on a caller-supplied transport.
    pub fn with_transport(
        config: PipelineConfig,
        server: ServerInfo,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let policy = config.policy();
        let stats = Arc::new(PipelineStats::new());
        let quota = QuotaState::new();
        let queue = Arc::new(IngestionQueue::new(
            config.max_queue_size(),
            config.max_batch_size(),
            policy.overflow,
            Arc::clone(&stats),
        ));

        let shared = Arc::new(Shared {
            queue,
            sampler: Sampler::new(config.sample_rate(), quota.clone(), policy.adaptive_sampling),
            stats: Arc::clone(&stats),
            trace_id: new_trace_id(),
            limits: CaptureLimits {
                max_attribute_bytes: policy.max_attribute_bytes,
                max_attributes: policy.max_attributes,
            },
            session: RwLock::new(Session::default()),
            debug: config.debug(),
        });

        let (state_tx, state_rx) = watch::channel(SchedulerState::Idle);

        Self {
            config,
            server,
            transport,
            shared,
            quota,
            stats,
            state_tx,
            state_rx,
            phase: Mutex::new(Phase::Created),
        }
    }

    /// Spawn the flush scheduler and emit `server.initialize`.
    pub fn start(&self) -> Result<Instrumentation, LifecycleError> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| LifecycleError::NoRuntime)?;

        let mut phase = self.phase();
        if !matches!(*phase, Phase::Created) {
            return Err(LifecycleError::AlreadyStarted);
        }

        let policy = self.config.policy();
        let monitor = Arc::new(QuotaMonitor::new(
            self.quota.clone(),
            self.config.on_quota_warning().cloned(),
            policy.quota_warning_ratio,
        ));
        let client = Arc::new(DeliveryClient::new(
            Arc::clone(&self.transport),
            Backoff::new(policy.backoff_base, policy.backoff_max),
            policy.max_retries,
            monitor,
            SdkInfo::current(),
            self.server.clone(),
            Arc::clone(&self.stats),
            self.config.debug(),
        ));
        let scheduler = FlushScheduler::new(
            Arc::clone(&self.shared.queue),
            Batcher::new(Arc::clone(&self.shared.queue), self.config.max_batch_size()),
            client,
            self.config.flush_interval(),
            policy.max_in_flight,
            policy.shutdown_timeout,
            self.state_tx.clone(),
            Arc::clone(&self.stats),
        );

        let (stop, stop_rx) = oneshot::channel();
        let handle = runtime.spawn(scheduler.run(stop_rx));
        *phase = Phase::Running { stop, handle };
        drop(phase);

        info!(
            endpoint = %self.config.endpoint(),
            server = %self.server.name,
            trace_id = %self.shared.trace_id,
            sample_rate = self.config.sample_rate(),
            "Telemetry pipeline started"
        );

        let instrumentation = self.instrumentation();
        instrumentation.lifecycle("initialize");
        Ok(instrumentation)
    }

    /// Emit `server.close`, drain, and wait up to `timeout` for deliveries.
    pub async fn stop(&self, timeout: Duration) -> Result<ShutdownReport, LifecycleError> {
        let running = {
            let mut phase = self.phase();
            match std::mem::replace(&mut *phase, Phase::Stopped) {
                Phase::Running { stop, handle } => Some((stop, handle)),
                other => {
                    *phase = other;
                    None
                }
            }
        };
        let Some((stop, handle)) = running else {
            return Err(LifecycleError::NotRunning);
        };

        self.instrumentation().lifecycle("close");

        // The scheduler owns the receiver until it exits; a send failure means
        // it is already gone and the join below reports why.
        let _ = stop.send(timeout);
        handle
            .await
            .map_err(|e| LifecycleError::Scheduler(e.to_string()))
    }

    /// A new hook handle; usable before `start`, records wait in the queue.
    pub fn instrumentation(&self) -> Instrumentation {
        Instrumentation::new(Arc::clone(&self.shared))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn server(&self) -> &ServerInfo {
        &self.server
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        *self.state_rx.borrow()
    }

    /// Watch scheduler state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<SchedulerState> {
        self.state_rx.clone()
    }

    pub fn quota_state(&self) -> &QuotaState {
        &self.quota
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn is_running(&self) -> bool {
        matches!(*self.phase(), Phase::Running { .. })
    }

    fn phase(&self) -> MutexGuard<'_, Phase> {
        self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
