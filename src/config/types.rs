use crate::config::parse::ConfigError;
use crate::delivery::wire::ServerInfo;
use crate::quota::{QuotaCallback, QuotaDetail, QuotaLevel};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_ENDPOINT: &str = "https://ingest.mcpwatch.dev";
pub const DEFAULT_SAMPLE_RATE: f64 = 1.0;
pub const DEFAULT_MAX_BATCH_SIZE: usize = 50;
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Queue capacity as a multiple of `max_batch_size` when not set explicitly.
pub const QUEUE_SIZE_MULTIPLIER: usize = 20;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Reject the incoming record when the queue is full
    #[default]
    DropNewest,
    /// Evict the oldest queued record to make room
    DropOldest,
}

/// Tunables behind the pipeline's default delivery and buffering policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelinePolicy {
    /// Queue capacity; derived from `max_batch_size` when unset
    pub max_queue_size: Option<usize>,
    pub overflow: OverflowPolicy,
    /// Retries after the first attempt for transient failures
    pub max_retries: u32,
    #[serde(with = "humantime_serde")]
    pub backoff_base: Duration,
    #[serde(with = "humantime_serde")]
    pub backoff_max: Duration,
    /// Per-attempt bound, covering connect, send and response body
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Drain budget used when the pipeline is dropped without `stop`
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
    pub max_in_flight: usize,
    pub max_attribute_bytes: usize,
    pub max_attributes: usize,
    /// remaining/limit ratio at or below which quota counts as approaching
    pub quota_warning_ratio: f64,
    /// Scale the sample rate down while quota is under pressure
    pub adaptive_sampling: bool,
}

impl Default for PipelinePolicy {
    fn default() -> Self {
        Self {
            max_queue_size: None,
            overflow: OverflowPolicy::DropNewest,
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
            request_timeout: Duration::from_secs(10),
            shutdown_timeout: Duration::from_secs(5),
            max_in_flight: 4,
            max_attribute_bytes: 4096,
            max_attributes: 64,
            quota_warning_ratio: 0.1,
            adaptive_sampling: false,
        }
    }
}

impl PipelinePolicy {
    fn validate(&self, max_batch_size: usize, problems: &mut Vec<String>) {
        if let Some(size) = self.max_queue_size {
            if size < max_batch_size {
                problems.push(format!(
                    "policy.max_queue_size ({}) must be at least max_batch_size ({})",
                    size, max_batch_size
                ));
            }
        }
        if self.backoff_base.is_zero() {
            problems.push("policy.backoff_base must be greater than zero".to_string());
        }
        if self.backoff_max < self.backoff_base {
            problems.push(
                "policy.backoff_max must not be smaller than policy.backoff_base".to_string(),
            );
        }
        if self.request_timeout.is_zero() {
            problems.push("policy.request_timeout must be greater than zero".to_string());
        }
        if self.max_in_flight == 0 {
            problems.push("policy.max_in_flight must be at least 1".to_string());
        }
        if self.max_attribute_bytes == 0 {
            problems.push("policy.max_attribute_bytes must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.quota_warning_ratio) {
            problems.push(format!(
                "policy.quota_warning_ratio ({}) must be within [0, 1]",
                self.quota_warning_ratio
            ));
        }
    }
}

/// Validated, immutable pipeline configuration.
///
/// Built once at instrumentation-attach time through [`PipelineConfig::builder`];
/// a new pipeline is needed to change any of it.
#[derive(Clone)]
pub struct PipelineConfig {
    api_key: String,
    endpoint: Url,
    sample_rate: f64,
    max_batch_size: usize,
    flush_interval: Duration,
    on_quota_warning: Option<QuotaCallback>,
    debug: bool,
    policy: PipelinePolicy,
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("api_key", &redact(&self.api_key))
            .field("endpoint", &self.endpoint.as_str())
            .field("sample_rate", &self.sample_rate)
            .field("max_batch_size", &self.max_batch_size)
            .field("flush_interval", &self.flush_interval)
            .field("on_quota_warning", &self.on_quota_warning.is_some())
            .field("debug", &self.debug)
            .field("policy", &self.policy)
            .finish()
    }
}

fn redact(key: &str) -> String {
    let visible: String = key.chars().take(8).collect();
    format!("{}…", visible)
}

impl PipelineConfig {
    pub fn builder(api_key: impl Into<String>) -> PipelineConfigBuilder {
        PipelineConfigBuilder::new(api_key)
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    pub fn flush_interval(&self) -> Duration {
        self.flush_interval
    }

    pub fn on_quota_warning(&self) -> Option<&QuotaCallback> {
        self.on_quota_warning.as_ref()
    }

    pub fn debug(&self) -> bool {
        self.debug
    }

    pub fn policy(&self) -> &PipelinePolicy {
        &self.policy
    }

    pub fn max_queue_size(&self) -> usize {
        self.policy
            .max_queue_size
            .unwrap_or(self.max_batch_size.saturating_mul(QUEUE_SIZE_MULTIPLIER))
    }
}

pub struct PipelineConfigBuilder {
    api_key: String,
    endpoint: String,
    sample_rate: f64,
    max_batch_size: usize,
    flush_interval: Duration,
    on_quota_warning: Option<QuotaCallback>,
    debug: bool,
    policy: PipelinePolicy,
}

impl PipelineConfigBuilder {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            sample_rate: DEFAULT_SAMPLE_RATE,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            on_quota_warning: None,
            debug: false,
            policy: PipelinePolicy::default(),
        }
    }

    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn sample_rate(mut self, sample_rate: f64) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    pub fn flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    pub fn on_quota_warning<F>(mut self, callback: F) -> Self
    where
        F: Fn(QuotaLevel, &QuotaDetail) + Send + Sync + 'static,
    {
        self.on_quota_warning = Some(Arc::new(callback));
        self
    }

    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn policy(mut self, policy: PipelinePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Validate every option and freeze the configuration.
    ///
    /// All problems are reported together.
    pub fn build(self) -> Result<PipelineConfig, ConfigError> {
        let mut problems = Vec::new();

        if self.api_key.trim().is_empty() {
            problems.push("api_key is required".to_string());
        }

        let endpoint = match Url::parse(self.endpoint.trim()) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => {
                Some(url)
            }
            Ok(url) => {
                problems.push(format!(
                    "endpoint '{}' must be an http(s) URL with a host",
                    url
                ));
                None
            }
            Err(e) => {
                problems.push(format!("endpoint '{}' is not a valid URL: {}", self.endpoint, e));
                None
            }
        };

        if self.sample_rate.is_nan() {
            problems.push("sample_rate must be a number".to_string());
        }

        if self.max_batch_size == 0 {
            problems.push("max_batch_size must be at least 1".to_string());
        }

        if self.flush_interval.is_zero() {
            problems.push("flush_interval must be greater than zero".to_string());
        }

        self.policy.validate(self.max_batch_size, &mut problems);

        match (endpoint, problems.is_empty()) {
            (Some(endpoint), true) => Ok(PipelineConfig {
                api_key: self.api_key,
                endpoint,
                sample_rate: self.sample_rate.clamp(0.0, 1.0),
                max_batch_size: self.max_batch_size,
                flush_interval: self.flush_interval,
                on_quota_warning: self.on_quota_warning,
                debug: self.debug,
                policy: self.policy,
            }),
            _ if problems.len() == 1 => Err(ConfigError::Validation(problems.remove(0))),
            _ => Err(ConfigError::ValidationList(problems)),
        }
    }
}

/// On-disk configuration (YAML).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    pub api_key: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub debug: bool,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    #[serde(default = "default_flush_interval", with = "humantime_serde")]
    pub flush_interval: Duration,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub policy: PipelinePolicy,
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_sample_rate() -> f64 {
    DEFAULT_SAMPLE_RATE
}

fn default_max_batch_size() -> usize {
    DEFAULT_MAX_BATCH_SIZE
}

fn default_flush_interval() -> Duration {
    DEFAULT_FLUSH_INTERVAL
}

/// Identity of the instrumented server, reported with every batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSection {
    pub name: String,
    pub version: String,
    pub transport: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            name: "unknown".to_string(),
            version: "unknown".to_string(),
            transport: "unknown".to_string(),
        }
    }
}

impl FileConfig {
    /// Build the validated pipeline configuration. Callbacks cannot be
    /// expressed in a file; attach one through the builder if needed.
    pub fn to_builder(&self) -> PipelineConfigBuilder {
        PipelineConfig::builder(self.api_key.clone())
            .endpoint(self.endpoint.clone())
            .sample_rate(self.sample_rate)
            .max_batch_size(self.max_batch_size)
            .flush_interval(self.flush_interval)
            .debug(self.debug)
            .policy(self.policy.clone())
    }

    pub fn to_pipeline_config(&self) -> Result<PipelineConfig, ConfigError> {
        self.to_builder().build()
    }

    pub fn server_info(&self) -> ServerInfo {
        ServerInfo {
            name: self.server.name.clone(),
            version: self.server.version.clone(),
            transport: self.server.transport.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::builder("mw_test_key").build().unwrap();
        assert_eq!(config.endpoint().as_str(), "https://ingest.mcpwatch.dev/");
        assert_eq!(config.sample_rate(), 1.0);
        assert_eq!(config.max_batch_size(), 50);
        assert_eq!(config.flush_interval(), Duration::from_secs(1));
        assert_eq!(config.max_queue_size(), 1000);
        assert!(!config.debug());
        assert!(config.on_quota_warning().is_none());
    }

    #[test]
    fn test_empty_api_key_rejected() {
        let err = PipelineConfig::builder("").build().unwrap_err();
        assert!(err.to_string().contains("api_key is required"));
    }

    #[test]
    fn test_invalid_endpoint_rejected() {
        let err = PipelineConfig::builder("k")
            .endpoint("not a url")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("not a valid URL"));

        let err = PipelineConfig::builder("k")
            .endpoint("ftp://ingest.example.com")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("http(s)"));
    }

    #[test]
    fn test_sample_rate_clamped() {
        let high = PipelineConfig::builder("k").sample_rate(1.7).build().unwrap();
        assert_eq!(high.sample_rate(), 1.0);
        let low = PipelineConfig::builder("k").sample_rate(-0.2).build().unwrap();
        assert_eq!(low.sample_rate(), 0.0);
        assert!(PipelineConfig::builder("k").sample_rate(f64::NAN).build().is_err());
    }

    #[test]
    fn test_zero_values_rejected_together() {
        let err = PipelineConfig::builder("k")
            .max_batch_size(0)
            .flush_interval(Duration::ZERO)
            .build()
            .unwrap_err();
        match err {
            ConfigError::ValidationList(problems) => {
                assert_eq!(problems.len(), 2);
                assert!(problems[0].contains("max_batch_size"));
                assert!(problems[1].contains("flush_interval"));
            }
            other => panic!("expected a validation list, got {:?}", other),
        }
    }

    #[test]
    fn test_policy_validation() {
        let policy = PipelinePolicy {
            max_queue_size: Some(10),
            max_in_flight: 0,
            ..PipelinePolicy::default()
        };
        let err = PipelineConfig::builder("k")
            .policy(policy)
            .build()
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("max_queue_size"));
        assert!(message.contains("max_in_flight"));
    }

    #[test]
    fn test_debug_redacts_api_key() {
        let config = PipelineConfig::builder("mw_live_supersecretvalue").build().unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("supersecretvalue"));
        assert!(rendered.contains("mw_live_"));
    }

    #[test]
    fn test_callback_registered() {
        let config = PipelineConfig::builder("k")
            .on_quota_warning(|_level, _detail| {})
            .build()
            .unwrap();
        assert!(config.on_quota_warning().is_some());
    }
}
