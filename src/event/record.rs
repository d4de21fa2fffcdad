use chrono::{DateTime, Utc};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ToolCall,
    ResourceRead,
    PromptInvocation,
    LifecycleEvent,
}

impl EventKind {
    /// MCP method label reported with the event.
    ///
    /// Lifecycle events use their phase name instead (see `EventRecord::method`).
    pub fn mcp_method(&self) -> &'static str {
        match self {
            EventKind::ToolCall => "tools/call",
            EventKind::ResourceRead => "resources/read",
            EventKind::PromptInvocation => "prompts/get",
            EventKind::LifecycleEvent => "lifecycle",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    #[default]
    Ok,
    Error {
        #[serde(default)]
        code: Option<i64>,
        #[serde(default)]
        message: Option<String>,
    },
}

impl EventStatus {
    pub fn error(message: impl Into<String>) -> Self {
        EventStatus::Error {
            code: None,
            message: Some(message.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, EventStatus::Error { .. })
    }
}

/// Latest MCP protocol revision; reported when the session has not
/// negotiated another one.
pub const DEFAULT_PROTOCOL_VERSION: &str = "2025-11-25";

/// The MCP client on the other end of the session, from the initialize
/// handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub name: String,
    #[serde(default)]
    pub version: String,
}

impl ClientInfo {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// Insertion-ordered attribute map.
///
/// Serializes as a JSON object whose keys appear in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes(Vec<(String, Value)>);

impl Attributes {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Insert a value, replacing an existing entry in place.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        match self.0.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.0.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|(k, _)| k.as_str())
    }
}

impl IntoIterator for Attributes {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl FromIterator<(String, Value)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut attributes = Attributes::new();
        for (key, value) in iter {
            attributes.insert(key, value);
        }
        attributes
    }
}

impl Serialize for Attributes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, value) in &self.0 {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Attributes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct AttributesVisitor;

        impl<'de> Visitor<'de> for AttributesVisitor {
            type Value = Attributes;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of attribute names to values")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Attributes, A::Error> {
                let mut attributes = Attributes::new();
                while let Some((key, value)) = access.next_entry::<String, Value>()? {
                    attributes.insert(key, value);
                }
                Ok(attributes)
            }
        }

        deserializer.deserialize_map(AttributesVisitor)
    }
}

/// One captured occurrence: a tool call, resource read, prompt invocation or
/// lifecycle event.
///
/// Records are immutable once built; construct them through
/// [`capture`](crate::event::capture).
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub(crate) event_id: String,
    pub(crate) trace_id: String,
    pub(crate) span_id: String,
    pub(crate) parent_span_id: Option<String>,
    pub(crate) kind: EventKind,
    pub(crate) name: String,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) ended_at: Option<DateTime<Utc>>,
    pub(crate) duration: Option<Duration>,
    pub(crate) attributes: Attributes,
    pub(crate) status: EventStatus,
    pub(crate) client: Option<ClientInfo>,
    pub(crate) protocol_version: String,
    pub(crate) captured_at: Instant,
}

impl EventRecord {
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn span_id(&self) -> &str {
        &self.span_id
    }

    pub fn parent_span_id(&self) -> Option<&str> {
        self.parent_span_id.as_deref()
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// MCP method for the record; lifecycle events report their phase
    /// (`server.initialize` -> `initialize`).
    pub fn method(&self) -> &str {
        match self.kind {
            EventKind::LifecycleEvent => self
                .name
                .strip_prefix("server.")
                .unwrap_or(self.name.as_str()),
            kind => kind.mcp_method(),
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn status(&self) -> &EventStatus {
        &self.status
    }

    pub fn client(&self) -> Option<&ClientInfo> {
        self.client.as_ref()
    }

    pub fn protocol_version(&self) -> &str {
        &self.protocol_version
    }

    /// Monotonic instant at which the record was built.
    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }
}
