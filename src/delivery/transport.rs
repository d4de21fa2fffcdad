use crate::delivery::wire::{EncodedBatch, IngestResponse, SdkInfo, EVENTS_PATH};
use crate::quota::{QuotaDetail, QuotaSignal};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER, USER_AGENT};
use reqwest::Url;
use std::time::Duration;
use thiserror::Error;

pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";
pub const ATTEMPT_HEADER: &str = "X-MCPWatch-Attempt";
pub const QUOTA_LIMIT_HEADER: &str = "X-Quota-Limit";
pub const QUOTA_REMAINING_HEADER: &str = "X-Quota-Remaining";
pub const QUOTA_RESET_HEADER: &str = "X-Quota-Reset";

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connection(String),
}

/// What came back from one attempt that reached the server.
#[derive(Debug, Clone, Default)]
pub struct TransportResponse {
    pub status: u16,
    pub retry_after: Option<Duration>,
    pub quota: QuotaSignal,
    pub body: Option<IngestResponse>,
}

impl TransportResponse {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            quota: QuotaSignal {
                status,
                ..QuotaSignal::default()
            },
            ..Self::default()
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn with_quota(mut self, limit: u64, remaining: u64) -> Self {
        self.quota.detail.limit = Some(limit);
        self.quota.detail.remaining = Some(remaining);
        self
    }

    pub fn with_body(mut self, body: IngestResponse) -> Self {
        if let Some(quota) = &body.quota {
            merge_body_quota(&mut self.quota, quota.state, quota.detail());
        }
        self.body = Some(body);
        self
    }
}

/// Sends one encoded batch for one attempt.
///
/// Implementations must not retry; the delivery client owns the retry policy.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        batch: &EncodedBatch,
        attempt: u32,
    ) -> Result<TransportResponse, TransportError>;
}

/// `reqwest`-backed transport posting JSON to `{endpoint}/v1/events`.
#[derive(Debug)]
pub struct HttpTransport {
    url: Url,
    api_key: String,
    user_agent: String,
    client: reqwest::Client,
    request_timeout: Duration,
}

impl HttpTransport {
    pub fn new(
        endpoint: &Url,
        api_key: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let base = endpoint.as_str().trim_end_matches('/');
        let url = Url::parse(&format!("{}/{}", base, EVENTS_PATH))
            .map_err(|e| TransportError::Connection(format!("invalid endpoint: {}", e)))?;

        let client = reqwest::Client::builder()
            .connect_timeout(request_timeout)
            .build()?;

        Ok(Self {
            url,
            api_key: api_key.into(),
            user_agent: SdkInfo::current().user_agent(),
            client,
            request_timeout,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn attempt(
        &self,
        batch: &EncodedBatch,
        attempt: u32,
    ) -> Result<TransportResponse, TransportError> {
        let response = self
            .client
            .post(self.url.clone())
            .header(AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, &self.user_agent)
            .header(IDEMPOTENCY_KEY_HEADER, batch.batch_id.to_string())
            .header(ATTEMPT_HEADER, attempt.to_string())
            .body(batch.body.clone())
            .send()
            .await?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let text = response.text().await.unwrap_or_default();

        let mut result = TransportResponse::new(status);
        result.retry_after = parse_retry_after(&headers, Utc::now());
        result.quota.detail = quota_from_headers(&headers);

        // Bodies are optional and may not be JSON at all
        if !text.trim().is_empty() {
            if let Ok(body) = serde_json::from_str::<IngestResponse>(&text) {
                result = result.with_body(body);
            }
        }

        Ok(result)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        batch: &EncodedBatch,
        attempt: u32,
    ) -> Result<TransportResponse, TransportError> {
        match tokio::time::timeout(self.request_timeout, self.attempt(batch, attempt)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(self.request_timeout)),
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok()).map(str::trim)
}

/// `Retry-After` as delay-seconds or an HTTP date.
pub fn parse_retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let value = header_str(headers, RETRY_AFTER.as_str())?;
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

pub fn quota_from_headers(headers: &HeaderMap) -> QuotaDetail {
    QuotaDetail {
        limit: header_str(headers, QUOTA_LIMIT_HEADER).and_then(|v| v.parse().ok()),
        remaining: header_str(headers, QUOTA_REMAINING_HEADER).and_then(|v| v.parse().ok()),
        reset_at: header_str(headers, QUOTA_RESET_HEADER).and_then(parse_reset),
        message: None,
    }
}

/// Epoch seconds or RFC 3339.
fn parse_reset(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(epoch) = value.parse::<i64>() {
        return Utc.timestamp_opt(epoch, 0).single();
    }
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Body quota fills in whatever the headers left out; an explicit state wins.
fn merge_body_quota(
    signal: &mut QuotaSignal,
    state: Option<crate::quota::QuotaLevel>,
    body: QuotaDetail,
) {
    if state.is_some() {
        signal.state = state;
    }
    let detail = &mut signal.detail;
    detail.limit = detail.limit.or(body.limit);
    detail.remaining = detail.remaining.or(body.remaining);
    detail.reset_at = detail.reset_at.or(body.reset_at);
    detail.message = detail.message.take().or(body.message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delivery::wire::WireQuota;
    use crate::quota::QuotaLevel;
    use reqwest::header::HeaderValue;

    #[test]
    fn test_retry_after_seconds() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(
            parse_retry_after(&headers, Utc::now()),
            Some(Duration::from_secs(7))
        );
    }

    #[test]
    fn test_retry_after_http_date() {
        let now = Utc.with_ymd_and_hms(2015, 10, 21, 7, 28, 0).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            RETRY_AFTER,
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:30 GMT"),
        );
        assert_eq!(
            parse_retry_after(&headers, now),
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_retry_after_garbage_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(parse_retry_after(&headers, Utc::now()), None);
    }

    #[test]
    fn test_quota_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(QUOTA_LIMIT_HEADER, HeaderValue::from_static("1000"));
        headers.insert(QUOTA_REMAINING_HEADER, HeaderValue::from_static("42"));
        headers.insert(QUOTA_RESET_HEADER, HeaderValue::from_static("1700000000"));

        let detail = quota_from_headers(&headers);
        assert_eq!(detail.limit, Some(1000));
        assert_eq!(detail.remaining, Some(42));
        assert_eq!(detail.reset_at.unwrap().timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_body_quota_merges_under_headers() {
        let body = IngestResponse {
            quota: Some(WireQuota {
                state: Some(QuotaLevel::Exceeded),
                limit: Some(10),
                remaining: Some(0),
                message: Some("monthly limit reached".to_string()),
                ..WireQuota::default()
            }),
            ..IngestResponse::default()
        };
        let response = TransportResponse::new(200).with_quota(500, 3).with_body(body);

        assert_eq!(response.quota.state, Some(QuotaLevel::Exceeded));
        assert_eq!(response.quota.detail.limit, Some(500));
        assert_eq!(response.quota.detail.remaining, Some(3));
        assert_eq!(
            response.quota.detail.message.as_deref(),
            Some("monthly limit reached")
        );
    }

    #[test]
    fn test_events_url() {
        let endpoint = Url::parse("https://ingest.example.com/base/").unwrap();
        let transport = HttpTransport::new(&endpoint, "k", Duration::from_secs(1)).unwrap();
        assert_eq!(
            transport.url().as_str(),
            "https://ingest.example.com/base/v1/events"
        );
    }
}
