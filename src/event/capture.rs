use crate::event::record::{
    Attributes, ClientInfo, EventKind, EventRecord, EventStatus, DEFAULT_PROTOCOL_VERSION,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::{Duration, Instant};
use thiserror::Error;
use uuid::Uuid;

/// Attribute holding the number of attributes discarded by the count limit.
pub const DROPPED_ATTRIBUTES_KEY: &str = "mcpwatch.dropped_attributes";

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("event name is empty")]
    EmptyName,

    #[error("event ended before it started ({ended_at} < {started_at})")]
    NegativeDuration {
        started_at: DateTime<Utc>,
        ended_at: DateTime<Utc>,
    },

    #[error("attribute '{key}' could not be serialized: {source}")]
    Attribute {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Memory bounds applied to every captured record.
#[derive(Debug, Clone, Copy)]
pub struct CaptureLimits {
    pub max_attribute_bytes: usize,
    pub max_attributes: usize,
}

impl Default for CaptureLimits {
    fn default() -> Self {
        Self {
            max_attribute_bytes: 4096,
            max_attributes: 64,
        }
    }
}

/// Raw call data handed over by an instrumentation hook.
#[derive(Debug, Clone, Deserialize)]
pub struct RawEvent {
    pub kind: EventKind,
    pub name: String,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(default)]
    pub status: EventStatus,
    #[serde(default = "Utc::now")]
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    /// Measured elapsed time; preferred over the wall-clock difference
    #[serde(default, with = "humantime_serde")]
    pub duration: Option<Duration>,
    #[serde(default)]
    pub parent_span_id: Option<String>,
    #[serde(default)]
    pub client: Option<ClientInfo>,
    /// Negotiated MCP protocol revision, if known
    #[serde(default)]
    pub protocol_version: Option<String>,
    #[serde(skip)]
    pending_error: Option<(String, String)>,
}

impl RawEvent {
    pub fn new(kind: EventKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            attributes: Attributes::new(),
            status: EventStatus::Ok,
            started_at: Utc::now(),
            ended_at: None,
            duration: None,
            parent_span_id: None,
            client: None,
            protocol_version: None,
            pending_error: None,
        }
    }

    pub fn lifecycle(phase: impl Into<String>) -> Self {
        let now = Utc::now();
        let mut raw = Self::new(EventKind::LifecycleEvent, phase);
        raw.started_at = now;
        raw.ended_at = Some(now);
        raw
    }

    /// Add a serializable attribute.
    ///
    /// Serialization failures are remembered and reported by `capture`, so
    /// hooks can build events without handling errors inline.
    pub fn attribute<T: Serialize + ?Sized>(
        mut self,
        key: impl Into<String>,
        value: &T,
    ) -> Self {
        let key = key.into();
        match serde_json::to_value(value) {
            Ok(value) => self.attributes.insert(key, value),
            Err(e) => {
                if self.pending_error.is_none() {
                    self.pending_error = Some((key, e.to_string()));
                }
            }
        }
        self
    }

    pub fn status(mut self, status: EventStatus) -> Self {
        self.status = status;
        self
    }

    pub fn started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }

    pub fn ended_at(mut self, ended_at: DateTime<Utc>) -> Self {
        self.ended_at = Some(ended_at);
        self
    }

    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    pub fn parent_span(mut self, span_id: impl Into<String>) -> Self {
        self.parent_span_id = Some(span_id.into());
        self
    }

    pub fn client(mut self, client: ClientInfo) -> Self {
        self.client = Some(client);
        self
    }

    pub fn protocol_version(mut self, version: impl Into<String>) -> Self {
        self.protocol_version = Some(version.into());
        self
    }
}

/// Build a bounded, immutable `EventRecord` from raw hook data.
pub fn capture(
    raw: RawEvent,
    trace_id: &str,
    limits: &CaptureLimits,
) -> Result<EventRecord, CaptureError> {
    if raw.name.trim().is_empty() {
        return Err(CaptureError::EmptyName);
    }

    if let Some((key, message)) = raw.pending_error {
        return Err(CaptureError::Attribute {
            key,
            source: serde::de::Error::custom(message),
        });
    }

    let duration = match (raw.duration, raw.ended_at) {
        (Some(measured), _) => Some(measured),
        (None, Some(ended_at)) => {
            let elapsed = (ended_at - raw.started_at).to_std().map_err(|_| {
                CaptureError::NegativeDuration {
                    started_at: raw.started_at,
                    ended_at,
                }
            })?;
            Some(elapsed)
        }
        (None, None) => None,
    };

    let status = match raw.status {
        EventStatus::Error { code, message } => EventStatus::Error {
            code,
            message: message.map(|m| truncate_string(m, limits.max_attribute_bytes)),
        },
        ok => ok,
    };

    let max_bytes = limits.max_attribute_bytes;
    let client = raw.client.map(|client| ClientInfo {
        name: truncate_string(client.name, max_bytes),
        version: truncate_string(client.version, max_bytes),
    });
    let protocol_version = raw
        .protocol_version
        .map(|v| truncate_string(v, max_bytes))
        .unwrap_or_else(|| DEFAULT_PROTOCOL_VERSION.to_string());

    Ok(EventRecord {
        event_id: new_event_id(),
        trace_id: trace_id.to_string(),
        span_id: new_span_id(),
        parent_span_id: raw.parent_span_id,
        kind: raw.kind,
        name: truncate_string(raw.name, limits.max_attribute_bytes),
        started_at: raw.started_at,
        ended_at: raw.ended_at,
        duration,
        attributes: bound_attributes(raw.attributes, limits),
        status,
        client,
        protocol_version,
        captured_at: Instant::now(),
    })
}

fn bound_attributes(attributes: Attributes, limits: &CaptureLimits) -> Attributes {
    let total = attributes.len();
    let mut bounded: Attributes = attributes
        .into_iter()
        .take(limits.max_attributes)
        .map(|(key, value)| (key, bound_value(value, limits.max_attribute_bytes)))
        .collect();

    let dropped = total.saturating_sub(limits.max_attributes);
    if dropped > 0 {
        bounded.insert(DROPPED_ATTRIBUTES_KEY, Value::from(dropped as u64));
    }
    bounded
}

fn bound_value(value: Value, max_bytes: usize) -> Value {
    match value {
        Value::String(s) => Value::String(truncate_string(s, max_bytes)),
        Value::Array(_) | Value::Object(_) => {
            let encoded = value.to_string();
            if encoded.len() <= max_bytes {
                value
            } else {
                Value::String(truncate_string(encoded, max_bytes))
            }
        }
        scalar => scalar,
    }
}

/// Truncate to at most `max_bytes` of content (on a char boundary) and append
/// a marker recording how much was cut.
pub fn truncate_string(s: String, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s;
    }
    let mut cut = max_bytes;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}…[truncated {} bytes]", &s[..cut], s.len() - cut)
}

pub fn new_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

pub fn new_span_id() -> String {
    format!("{:016x}", rand::random::<u64>())
}

fn new_event_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn limits(max_attribute_bytes: usize, max_attributes: usize) -> CaptureLimits {
        CaptureLimits {
            max_attribute_bytes,
            max_attributes,
        }
    }

    #[test]
    fn test_capture_tool_call() {
        let started = Utc::now();
        let raw = RawEvent::new(EventKind::ToolCall, "search")
            .attribute("request_params", &json!({"query": "rust"}))
            .started_at(started)
            .ended_at(started + chrono::Duration::milliseconds(25));

        let record = capture(raw, "trace-1", &CaptureLimits::default()).unwrap();

        assert_eq!(record.name(), "search");
        assert_eq!(record.trace_id(), "trace-1");
        assert_eq!(record.method(), "tools/call");
        assert_eq!(record.duration(), Some(Duration::from_millis(25)));
        assert_eq!(record.span_id().len(), 16);
        assert!(!record.status().is_error());
    }

    #[test]
    fn test_measured_duration_wins() {
        let started = Utc::now();
        let raw = RawEvent::new(EventKind::ResourceRead, "file:///tmp/a")
            .started_at(started)
            .ended_at(started + chrono::Duration::seconds(3))
            .duration(Duration::from_millis(7));

        let record = capture(raw, "t", &CaptureLimits::default()).unwrap();
        assert_eq!(record.duration(), Some(Duration::from_millis(7)));
    }

    #[test]
    fn test_end_before_start_is_rejected() {
        let started = Utc::now();
        let raw = RawEvent::new(EventKind::ToolCall, "x")
            .started_at(started)
            .ended_at(started - chrono::Duration::seconds(1));

        let err = capture(raw, "t", &CaptureLimits::default()).unwrap_err();
        assert!(matches!(err, CaptureError::NegativeDuration { .. }));
    }

    #[test]
    fn test_empty_name_is_rejected() {
        let raw = RawEvent::new(EventKind::PromptInvocation, "  ");
        let err = capture(raw, "t", &CaptureLimits::default()).unwrap_err();
        assert!(matches!(err, CaptureError::EmptyName));
    }

    #[test]
    fn test_long_string_is_truncated_with_marker() {
        let payload = "x".repeat(100);
        let raw = RawEvent::new(EventKind::ToolCall, "echo").attribute("text", &payload);

        let record = capture(raw, "t", &limits(10, 64)).unwrap();
        let text = record.attributes().get("text").unwrap().as_str().unwrap();
        assert_eq!(text, "xxxxxxxxxx…[truncated 90 bytes]");
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let truncated = truncate_string("ééééé".to_string(), 3);
        assert!(truncated.starts_with('é'));
        assert!(truncated.ends_with("[truncated 8 bytes]"));
    }

    #[test]
    fn test_large_structured_value_becomes_truncated_string() {
        let big = json!({"rows": (0..100).collect::<Vec<_>>()});
        let raw = RawEvent::new(EventKind::ToolCall, "list").attribute("response_content", &big);

        let record = capture(raw, "t", &limits(32, 64)).unwrap();
        let value = record.attributes().get("response_content").unwrap();
        assert!(value.as_str().unwrap().starts_with(r#"{"rows":[0,1,2"#));
        assert!(value.as_str().unwrap().contains("[truncated"));
    }

    #[test]
    fn test_small_structured_value_is_kept() {
        let raw =
            RawEvent::new(EventKind::ToolCall, "add").attribute("request_params", &json!({"a": 1}));
        let record = capture(raw, "t", &CaptureLimits::default()).unwrap();
        assert_eq!(record.attributes().get("request_params"), Some(&json!({"a": 1})));
    }

    #[test]
    fn test_attribute_count_is_bounded() {
        let mut raw = RawEvent::new(EventKind::ToolCall, "many");
        for i in 0..10 {
            raw = raw.attribute(format!("k{}", i), &i);
        }

        let record = capture(raw, "t", &limits(1024, 4)).unwrap();
        assert_eq!(record.attributes().len(), 5);
        assert_eq!(record.attributes().get("k3"), Some(&json!(3)));
        assert!(record.attributes().get("k4").is_none());
        assert_eq!(record.attributes().get(DROPPED_ATTRIBUTES_KEY), Some(&json!(6)));
    }

    #[test]
    fn test_lifecycle_method_is_phase() {
        let raw = RawEvent::lifecycle("server.initialize");
        let record = capture(raw, "t", &CaptureLimits::default()).unwrap();
        assert_eq!(record.kind(), EventKind::LifecycleEvent);
        assert_eq!(record.method(), "initialize");
        assert_eq!(record.duration(), Some(Duration::ZERO));
    }

    #[test]
    fn test_raw_event_from_json_line() {
        let line = r#"{"kind":"tool_call","name":"weather","attributes":{"city":"Oslo"},
            "status":{"error":{"message":"timeout"}},"duration":"120ms",
            "client":{"name":"inspector","version":"0.9.1"}}"#;
        let raw: RawEvent = serde_json::from_str(line).unwrap();

        assert_eq!(raw.kind, EventKind::ToolCall);
        assert_eq!(raw.duration, Some(Duration::from_millis(120)));
        assert!(raw.status.is_error());
        assert_eq!(raw.client, Some(ClientInfo::new("inspector", "0.9.1")));
        assert!(raw.protocol_version.is_none());
    }

    #[test]
    fn test_protocol_version_defaults_to_latest() {
        let record = capture(
            RawEvent::new(EventKind::ToolCall, "echo"),
            "t",
            &CaptureLimits::default(),
        )
        .unwrap();
        assert_eq!(record.protocol_version(), DEFAULT_PROTOCOL_VERSION);
        assert!(record.client().is_none());

        let raw = RawEvent::new(EventKind::ToolCall, "echo")
            .protocol_version("2025-06-18")
            .client(ClientInfo::new("claude-desktop", "1.4.0"));
        let record = capture(raw, "t", &CaptureLimits::default()).unwrap();
        assert_eq!(record.protocol_version(), "2025-06-18");
        assert_eq!(record.client().unwrap().name, "claude-desktop");
    }

    #[test]
    fn test_client_identity_is_bounded() {
        let raw = RawEvent::new(EventKind::ToolCall, "echo")
            .client(ClientInfo::new("c".repeat(40), "1.0"));
        let record = capture(raw, "t", &limits(8, 64)).unwrap();
        let client = record.client().unwrap();
        assert!(client.name.starts_with("cccccccc…"));
        assert_eq!(client.version, "1.0");
    }
}
