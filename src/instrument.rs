use crate::event::{capture, CaptureLimits, ClientInfo, EventKind, EventStatus, RawEvent};
use crate::pipeline::IngestionQueue;
use crate::sampler::Sampler;
use crate::stats::PipelineStats;
use chrono::Utc;
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;
use tracing::{debug, warn};

/// Message recorded when a tool reports failure inside a successful result.
const ERROR_RESULT_MESSAGE: &str = "tool returned an error result";

/// What the MCP session has told us about its peer.
#[derive(Debug, Clone, Default)]
pub(crate) struct Session {
    pub(crate) client: Option<ClientInfo>,
    pub(crate) protocol_version: Option<String>,
}

/// State shared between the pipeline and every instrumentation handle.
pub(crate) struct Shared {
    pub(crate) queue: Arc<IngestionQueue>,
    pub(crate) sampler: Sampler,
    pub(crate) stats: Arc<PipelineStats>,
    pub(crate) trace_id: String,
    pub(crate) limits: CaptureLimits,
    pub(crate) session: RwLock<Session>,
    pub(crate) debug: bool,
}

/// Cheap, cloneable handle used by server hooks to feed the pipeline.
///
/// Every method is non-blocking and never fails into the caller: telemetry
/// problems are logged and counted, the wrapped handler always runs.
#[derive(Clone)]
pub struct Instrumentation {
    shared: Arc<Shared>,
}

impl Instrumentation {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Identifier shared by every record from this pipeline instance.
    pub fn trace_id(&self) -> &str {
        &self.shared.trace_id
    }

    /// Remember the client identity from the initialize handshake. Later
    /// events that carry no client of their own report this one.
    pub fn set_client(&self, client: ClientInfo) {
        self.session_mut().client = Some(client);
    }

    /// Remember the protocol revision negotiated with the client.
    pub fn set_protocol_version(&self, version: impl Into<String>) {
        self.session_mut().protocol_version = Some(version.into());
    }

    pub fn client(&self) -> Option<ClientInfo> {
        self.session().client
    }

    /// Submit one raw event. Returns true if it was queued.
    pub fn report(&self, raw: RawEvent) -> bool {
        self.submit(raw, true)
    }

    /// Emit a `server.<phase>` lifecycle event.
    pub fn lifecycle(&self, phase: &str) -> bool {
        self.report(RawEvent::lifecycle(format!("server.{}", phase)))
    }

    pub async fn observe_tool<A, F, T, E>(
        &self,
        name: &str,
        arguments: &A,
        handler: F,
    ) -> Result<T, E>
    where
        A: Serialize + ?Sized,
        F: Future<Output = Result<T, E>>,
        T: Serialize,
        E: Display,
    {
        self.observe(EventKind::ToolCall, name, arguments, |_| false, handler)
            .await
    }

    /// Like `observe_tool`, for handlers that report tool failures inside an
    /// `Ok` result (MCP's `isError`). Results matching `is_error` are
    /// recorded with error status and still returned untouched.
    pub async fn observe_tool_with<A, P, F, T, E>(
        &self,
        name: &str,
        arguments: &A,
        is_error: P,
        handler: F,
    ) -> Result<T, E>
    where
        A: Serialize + ?Sized,
        P: FnOnce(&T) -> bool,
        F: Future<Output = Result<T, E>>,
        T: Serialize,
        E: Display,
    {
        self.observe(EventKind::ToolCall, name, arguments, is_error, handler)
            .await
    }

    pub async fn observe_resource<F, T, E>(&self, uri: &str, handler: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        T: Serialize,
        E: Display,
    {
        let arguments = serde_json::json!({ "uri": uri });
        self.observe(EventKind::ResourceRead, uri, &arguments, |_| false, handler)
            .await
    }

    pub async fn observe_prompt<A, F, T, E>(
        &self,
        name: &str,
        arguments: &A,
        handler: F,
    ) -> Result<T, E>
    where
        A: Serialize + ?Sized,
        F: Future<Output = Result<T, E>>,
        T: Serialize,
        E: Display,
    {
        self.observe(EventKind::PromptInvocation, name, arguments, |_| false, handler)
            .await
    }

    async fn observe<A, P, F, T, E>(
        &self,
        kind: EventKind,
        name: &str,
        arguments: &A,
        is_error: P,
        handler: F,
    ) -> Result<T, E>
    where
        A: Serialize + ?Sized,
        P: FnOnce(&T) -> bool,
        F: Future<Output = Result<T, E>>,
        T: Serialize,
        E: Display,
    {
        // Sample before doing any capture work
        if !self.shared.sampler.should_capture() {
            self.shared.stats.record_offered();
            self.shared.stats.record_sampled_out();
            return handler.await;
        }

        let started_at = Utc::now();
        let clock = Instant::now();
        let result = handler.await;
        let elapsed = clock.elapsed();
        let ended_at = started_at
            + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero());

        let raw = RawEvent::new(kind, name)
            .attribute("arguments", arguments)
            .started_at(started_at)
            .ended_at(ended_at)
            .duration(elapsed);
        let flagged = match &result {
            Ok(value) => is_error(value),
            Err(_) => false,
        };
        let raw = match &result {
            Ok(value) if flagged => raw
                .attribute("result", value)
                .status(EventStatus::error(ERROR_RESULT_MESSAGE)),
            Ok(value) => raw.attribute("result", value),
            Err(e) => raw.status(EventStatus::error(e.to_string())),
        };

        self.submit(raw, false);
        result
    }

    fn submit(&self, mut raw: RawEvent, sample: bool) -> bool {
        let shared = &self.shared;
        shared.stats.record_offered();

        if sample && !shared.sampler.should_capture() {
            shared.stats.record_sampled_out();
            return false;
        }

        if raw.client.is_none() || raw.protocol_version.is_none() {
            let session = self.session();
            raw.client = raw.client.or(session.client);
            raw.protocol_version = raw.protocol_version.or(session.protocol_version);
        }

        let record = match capture(raw, &shared.trace_id, &shared.limits) {
            Ok(record) => record,
            Err(e) => {
                shared.stats.record_capture_failure();
                warn!(error = %e, "Failed to capture event, dropping");
                return false;
            }
        };

        let kind = record.kind();
        let accepted = shared.queue.offer(record);
        if !accepted && shared.debug {
            debug!(kind = ?kind, closed = shared.queue.is_closed(), "Event not queued");
        }
        accepted
    }

    fn session(&self) -> Session {
        self.shared
            .session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn session_mut(&self) -> std::sync::RwLockWriteGuard<'_, Session> {
        self.shared
            .session
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
