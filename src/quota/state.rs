use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaLevel {
    #[default]
    Unknown,
    Ok,
    ApproachingLimit,
    Exceeded,
}

impl QuotaLevel {
    /// Levels that trigger the quota warning callback.
    pub fn is_warning(&self) -> bool {
        matches!(self, QuotaLevel::ApproachingLimit | QuotaLevel::Exceeded)
    }
}

/// Backend-provided quota metadata.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuotaDetail {
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    pub reset_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QuotaSnapshot {
    pub level: QuotaLevel,
    pub detail: QuotaDetail,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Last known quota signal for one pipeline instance.
///
/// Cloning shares the underlying state. Only the quota monitor writes it.
#[derive(Debug, Clone, Default)]
pub struct QuotaState {
    inner: Arc<RwLock<QuotaSnapshot>>,
}

impl QuotaState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(&self) -> QuotaLevel {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .level
    }

    pub fn snapshot(&self) -> QuotaSnapshot {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Store a new observation and return the level it replaced.
    pub(crate) fn update(&self, level: QuotaLevel, detail: QuotaDetail) -> QuotaLevel {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        let previous = guard.level;
        *guard = QuotaSnapshot {
            level,
            detail,
            updated_at: Some(Utc::now()),
        };
        previous
    }
}
