use crate::event::{Attributes, ClientInfo, EventKind, EventRecord, EventStatus};
use crate::pipeline::batch::Batch;
use crate::quota::{QuotaDetail, QuotaLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const SDK_NAME: &str = "mcpwatch-rust";
pub const EVENTS_PATH: &str = "v1/events";

/// Identity of this SDK, sent with every batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SdkInfo {
    pub name: String,
    pub version: String,
    pub runtime: String,
    pub host: Option<String>,
}

impl SdkInfo {
    pub fn current() -> Self {
        Self {
            name: SDK_NAME.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            runtime: "rust".to_string(),
            host: hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok()),
        }
    }

    pub fn user_agent(&self) -> String {
        format!("{}/{}", self.name, self.version)
    }
}

/// The instrumented MCP server, as described by the embedding application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub name: String,
    pub version: String,
    pub transport: String,
}

impl ServerInfo {
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        transport: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            transport: transport.into(),
        }
    }
}

/// Wire form of one record.
#[derive(Debug, Serialize, Deserialize)]
pub struct WireEvent {
    pub event_id: String,
    pub trace_id: String,
    pub span_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    pub kind: EventKind,
    pub method: String,
    pub mcp_protocol_version: String,
    pub name: String,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,
    pub attributes: Attributes,
    pub status: EventStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientInfo>,
}

impl From<&EventRecord> for WireEvent {
    fn from(record: &EventRecord) -> Self {
        Self {
            event_id: record.event_id().to_string(),
            trace_id: record.trace_id().to_string(),
            span_id: record.span_id().to_string(),
            parent_span_id: record.parent_span_id().map(str::to_string),
            kind: record.kind(),
            method: record.method().to_string(),
            mcp_protocol_version: record.protocol_version().to_string(),
            name: record.name().to_string(),
            started_at: record.started_at(),
            ended_at: record.ended_at(),
            duration_ms: record.duration().map(|d| d.as_micros() as f64 / 1000.0),
            attributes: record.attributes().clone(),
            status: record.status().clone(),
            client: record.client().cloned(),
        }
    }
}

/// Request body for `POST {endpoint}/v1/events`.
#[derive(Debug, Serialize, Deserialize)]
pub struct WireBatch {
    pub batch_id: Uuid,
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    pub batch: Vec<WireEvent>,
    pub sdk: SdkInfo,
    pub server: ServerInfo,
}

/// A batch serialized once; every attempt resends these exact bytes.
#[derive(Debug, Clone)]
pub struct EncodedBatch {
    pub batch_id: Uuid,
    pub sequence: u64,
    pub events: usize,
    pub body: Vec<u8>,
}

pub fn encode_batch(
    batch: &Batch,
    sdk: &SdkInfo,
    server: &ServerInfo,
) -> Result<EncodedBatch, serde_json::Error> {
    let wire = WireBatch {
        batch_id: batch.batch_id(),
        sequence: batch.sequence(),
        created_at: batch.created_at(),
        batch: batch.records().iter().map(WireEvent::from).collect(),
        sdk: sdk.clone(),
        server: server.clone(),
    };

    Ok(EncodedBatch {
        batch_id: batch.batch_id(),
        sequence: batch.sequence(),
        events: batch.len(),
        body: serde_json::to_vec(&wire)?,
    })
}

/// Optional JSON body of an ingestion response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IngestResponse {
    #[serde(default)]
    pub accepted: Option<u64>,
    #[serde(default)]
    pub rejected: Option<u64>,
    #[serde(default)]
    pub quota: Option<WireQuota>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WireQuota {
    #[serde(default)]
    pub state: Option<QuotaLevel>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub remaining: Option<u64>,
    #[serde(default)]
    pub reset_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message: Option<String>,
}

impl WireQuota {
    pub fn detail(&self) -> QuotaDetail {
        QuotaDetail {
            limit: self.limit,
            remaining: self.remaining,
            reset_at: self.reset_at,
            message: self.message.clone(),
        }
    }
}
