use crate::quota::state::{QuotaDetail, QuotaLevel, QuotaState};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// User hook invoked on transitions into `ApproachingLimit` or `Exceeded`.
///
/// Runs synchronously on the delivery task that observed the transition; keep
/// it short and hand real work off elsewhere.
pub type QuotaCallback = Arc<dyn Fn(QuotaLevel, &QuotaDetail) + Send + Sync>;

/// Callbacks slower than this are reported.
const CALLBACK_BUDGET: Duration = Duration::from_millis(100);

/// Quota metadata extracted from one delivery response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuotaSignal {
    /// HTTP status of the response the signal came from
    pub status: u16,
    /// Explicit state reported by the backend, if any
    pub state: Option<QuotaLevel>,
    pub detail: QuotaDetail,
}

impl QuotaSignal {
    pub fn is_empty(&self) -> bool {
        self.state.is_none() && self.detail.limit.is_none() && self.detail.remaining.is_none()
    }
}

/// Classify quota pressure; `None` when the response carried no quota data.
pub fn classify(signal: &QuotaSignal, warning_ratio: f64) -> Option<QuotaLevel> {
    if let Some(state) = signal.state {
        return (state != QuotaLevel::Unknown).then_some(state);
    }

    let remaining = signal.detail.remaining?;
    if remaining == 0 || signal.status == 429 {
        return Some(QuotaLevel::Exceeded);
    }

    match signal.detail.limit {
        Some(limit) if limit > 0 && (remaining as f64 / limit as f64) <= warning_ratio => {
            Some(QuotaLevel::ApproachingLimit)
        }
        _ => Some(QuotaLevel::Ok),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct QuotaTransition {
    pub from: QuotaLevel,
    pub to: QuotaLevel,
    pub detail: QuotaDetail,
}

pub struct QuotaMonitor {
    state: QuotaState,
    callback: Option<QuotaCallback>,
    warning_ratio: f64,
}

impl fmt::Debug for QuotaMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QuotaMonitor")
            .field("state", &self.state)
            .field("callback", &self.callback.is_some())
            .field("warning_ratio", &self.warning_ratio)
            .finish()
    }
}

impl QuotaMonitor {
    pub fn new(state: QuotaState, callback: Option<QuotaCallback>, warning_ratio: f64) -> Self {
        Self {
            state,
            callback,
            warning_ratio,
        }
    }

    pub fn state(&self) -> &QuotaState {
        &self.state
    }

    /// Record a delivery response's quota signal.
    ///
    /// Returns the transition when the level changed. The callback fires once
    /// per transition into a warning level, never for repeated observations of
    /// the same level.
    pub fn observe(&self, signal: &QuotaSignal) -> Option<QuotaTransition> {
        let level = classify(signal, self.warning_ratio)?;
        let previous = self.state.update(level, signal.detail.clone());
        if previous == level {
            return None;
        }

        let transition = QuotaTransition {
            from: previous,
            to: level,
            detail: signal.detail.clone(),
        };

        if level.is_warning() {
            warn!(
                from = ?previous,
                to = ?level,
                remaining = ?signal.detail.remaining,
                limit = ?signal.detail.limit,
                "Ingestion quota pressure changed"
            );
            self.notify(&transition);
        } else {
            info!(from = ?previous, to = ?level, "Ingestion quota level changed");
        }

        Some(transition)
    }

    fn notify(&self, transition: &QuotaTransition) {
        let Some(callback) = &self.callback else {
            debug!("No quota warning callback registered");
            return;
        };

        let started = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            callback(transition.to, &transition.detail)
        }));
        let elapsed = started.elapsed();

        if let Err(payload) = result {
            error!(
                level = ?transition.to,
                panic = %panic_message(payload.as_ref()),
                "Quota warning callback panicked"
            );
        }

        if elapsed > CALLBACK_BUDGET {
            warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                "Quota warning callback is slow; it blocks delivery response handling"
            );
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
