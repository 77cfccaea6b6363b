//! Cloud Logging / Cloud Monitoring over their REST APIs.
//!
//! Pages are fetched lazily inside `try_stream!` generators, so a consumer
//! that stops early never requests the next page.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_stream::try_stream;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::UpstreamConfig;
use crate::error::{OpsError, Result};
use crate::model::{
    DataPoint, LabelDescriptor, LogEntry, MetricDescriptor, MetricLabels, MonitoredResource,
    TimeSeries,
};
use crate::source::{
    DescriptorListRequest, LogListRequest, LogSource, MetricSource, TimeSeriesRequest,
};

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
/// Refresh metadata tokens this long before they expire.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);
const MAX_LOG_PAGE_SIZE: usize = 1000;

#[derive(Debug)]
struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Bearer tokens: a fixed token from the environment, or the GCE metadata server.
#[derive(Debug)]
pub struct TokenProvider {
    static_token: Option<String>,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenProvider {
    pub fn from_env(var: &str) -> Self {
        let static_token = std::env::var(var).ok().filter(|t| !t.trim().is_empty());
        if static_token.is_none() {
            debug!(var, "no access token in environment, falling back to metadata server");
        }
        Self {
            static_token,
            cached: Mutex::new(None),
        }
    }

    pub fn fixed(token: impl Into<String>) -> Self {
        Self {
            static_token: Some(token.into()),
            cached: Mutex::new(None),
        }
    }

    async fn token(&self, http: &reqwest::Client) -> Result<String> {
        if let Some(t) = &self.static_token {
            return Ok(t.clone());
        }

        let mut cached = self.cached.lock().await;
        if let Some(c) = cached.as_ref() {
            if Instant::now() + TOKEN_REFRESH_MARGIN < c.expires_at {
                return Ok(c.value.clone());
            }
        }

        #[derive(Deserialize)]
        struct MetadataToken {
            access_token: String,
            expires_in: u64,
        }

        let resp = http
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| OpsError::Upstream(format!("metadata server unreachable: {e}")))?;
        let token: MetadataToken = read_json(resp).await?;
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(token.access_token)
    }
}

/// REST client implementing both source traits.
#[derive(Clone)]
pub struct GcpClient {
    http: reqwest::Client,
    logging_endpoint: String,
    monitoring_endpoint: String,
    tokens: Arc<TokenProvider>,
}

impl GcpClient {
    pub fn new(cfg: &UpstreamConfig) -> Result<Self> {
        Self::with_tokens(cfg, TokenProvider::from_env(&cfg.access_token_env))
    }

    pub fn with_tokens(cfg: &UpstreamConfig, tokens: TokenProvider) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_secs.max(1)))
            .build()?;
        Ok(Self {
            http,
            logging_endpoint: cfg.logging_endpoint.trim_end_matches('/').to_string(),
            monitoring_endpoint: cfg.monitoring_endpoint.trim_end_matches('/').to_string(),
            tokens: Arc::new(tokens),
        })
    }

    fn project_url(&self, project_id: &str, collection: &str) -> String {
        format!(
            "{}/v3/projects/{}/{}",
            self.monitoring_endpoint,
            urlencoding::encode(project_id),
            collection
        )
    }
}

async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        warn!(status = status.as_u16(), "upstream call failed");
        return Err(OpsError::UpstreamStatus {
            status: status.as_u16(),
            body,
        });
    }
    Ok(resp.json::<T>().await?)
}

fn next_token(token: Option<String>) -> Option<String> {
    token.filter(|t| !t.is_empty())
}

impl LogSource for GcpClient {
    fn list_entries(&self, request: LogListRequest) -> BoxStream<'static, Result<LogEntry>> {
        let client = self.clone();
        let url = format!("{}/v2/entries:list", client.logging_endpoint);
        let stream = try_stream! {
            let mut page_token: Option<String> = None;
            loop {
                let token = client.tokens.token(&client.http).await?;
                let mut body = serde_json::json!({
                    "resourceNames": [format!("projects/{}", request.project_id)],
                    "filter": request.filter,
                    "orderBy": request.order.as_str(),
                    "pageSize": request.page_size.clamp(1, MAX_LOG_PAGE_SIZE),
                });
                if let Some(t) = &page_token {
                    body["pageToken"] = Value::String(t.clone());
                }
                let resp = client.http.post(&url).bearer_auth(token).json(&body).send().await?;
                let page: EntriesPage = read_json(resp).await?;
                debug!(count = page.entries.len(), "log entries page");
                for raw in page.entries {
                    yield raw.into_entry();
                }
                page_token = next_token(page.next_page_token);
                if page_token.is_none() {
                    break;
                }
            }
        };
        Box::pin(stream)
    }
}

impl MetricSource for GcpClient {
    fn list_time_series(
        &self,
        request: TimeSeriesRequest,
    ) -> BoxStream<'static, Result<TimeSeries>> {
        let client = self.clone();
        let url = client.project_url(&request.project_id, "timeSeries");
        let stream = try_stream! {
            let mut page_token: Option<String> = None;
            loop {
                let token = client.tokens.token(&client.http).await?;
                let mut query = vec![
                    ("filter", request.filter.clone()),
                    ("interval.startTime", request.start.to_rfc3339()),
                    ("interval.endTime", request.end.to_rfc3339()),
                    ("aggregation.alignmentPeriod", format!("{}s", request.alignment_period_sec)),
                    ("aggregation.perSeriesAligner", request.aligner.clone()),
                    ("view", "FULL".to_string()),
                ];
                if let Some(t) = &page_token {
                    query.push(("pageToken", t.clone()));
                }
                let resp = client.http.get(&url).bearer_auth(token).query(&query).send().await?;
                let page: TimeSeriesPage = read_json(resp).await?;
                for raw in page.time_series {
                    yield raw.into_series();
                }
                page_token = next_token(page.next_page_token);
                if page_token.is_none() {
                    break;
                }
            }
        };
        Box::pin(stream)
    }

    fn list_metric_descriptors(
        &self,
        request: DescriptorListRequest,
    ) -> BoxStream<'static, Result<MetricDescriptor>> {
        let client = self.clone();
        let url = client.project_url(&request.project_id, "metricDescriptors");
        let stream = try_stream! {
            let mut page_token: Option<String> = None;
            loop {
                let token = client.tokens.token(&client.http).await?;
                let mut query: Vec<(&str, String)> = Vec::new();
                if !request.filter.is_empty() {
                    query.push(("filter", request.filter.clone()));
                }
                if let Some(t) = &page_token {
                    query.push(("pageToken", t.clone()));
                }
                let resp = client.http.get(&url).bearer_auth(token).query(&query).send().await?;
                let page: DescriptorsPage = read_json(resp).await?;
                for raw in page.metric_descriptors {
                    yield raw.into_descriptor();
                }
                page_token = next_token(page.next_page_token);
                if page_token.is_none() {
                    break;
                }
            }
        };
        Box::pin(stream)
    }
}

// ---- wire shapes ----

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntriesPage {
    #[serde(default)]
    entries: Vec<RawLogEntry>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLogEntry {
    timestamp: Option<DateTime<Utc>>,
    receive_timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    log_name: String,
    #[serde(default)]
    resource: MonitoredResource,
    #[serde(default)]
    labels: BTreeMap<String, String>,
    trace: Option<String>,
    span_id: Option<String>,
    text_payload: Option<String>,
    json_payload: Option<Map<String, Value>>,
    #[serde(default)]
    insert_id: String,
}

impl RawLogEntry {
    fn into_entry(self) -> LogEntry {
        LogEntry {
            timestamp: self
                .timestamp
                .or(self.receive_timestamp)
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            severity: self.severity.unwrap_or_else(|| "DEFAULT".to_string()),
            log_name: self.log_name,
            resource: self.resource,
            labels: self.labels,
            trace: self.trace.filter(|t| !t.is_empty()),
            span_id: self.span_id.filter(|s| !s.is_empty()),
            text_payload: self.text_payload,
            json_payload: self.json_payload,
            insert_id: self.insert_id,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimeSeriesPage {
    #[serde(default)]
    time_series: Vec<RawTimeSeries>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTimeSeries {
    #[serde(default)]
    metric: MetricLabels,
    #[serde(default)]
    resource: MonitoredResource,
    #[serde(default)]
    points: Vec<RawPoint>,
}

#[derive(Debug, Deserialize)]
struct RawPoint {
    interval: RawInterval,
    #[serde(default)]
    value: RawTypedValue,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawInterval {
    end_time: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTypedValue {
    /// int64 is encoded as a JSON string.
    int64_value: Option<String>,
    double_value: Option<f64>,
    bool_value: Option<bool>,
}

impl RawTypedValue {
    fn as_f64(&self) -> f64 {
        if let Some(v) = &self.int64_value {
            return v.parse::<i64>().map(|n| n as f64).unwrap_or(0.0);
        }
        if let Some(v) = self.double_value {
            return v;
        }
        match self.bool_value {
            Some(true) => 1.0,
            _ => 0.0,
        }
    }
}

impl RawTimeSeries {
    fn into_series(self) -> TimeSeries {
        TimeSeries {
            metric: self.metric,
            resource: self.resource,
            points: self
                .points
                .into_iter()
                .map(|p| DataPoint {
                    time: p.interval.end_time,
                    value: p.value.as_f64(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DescriptorsPage {
    #[serde(default)]
    metric_descriptors: Vec<RawDescriptor>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDescriptor {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    display_name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    metric_kind: Option<String>,
    #[serde(default)]
    value_type: Option<String>,
    #[serde(default)]
    unit: String,
    #[serde(default)]
    labels: Vec<RawLabel>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLabel {
    key: String,
    value_type: Option<String>,
    #[serde(default)]
    description: String,
}

impl RawDescriptor {
    fn into_descriptor(self) -> MetricDescriptor {
        MetricDescriptor {
            kind: self.kind,
            display_name: self.display_name,
            description: self.description,
            metric_kind: self
                .metric_kind
                .unwrap_or_else(|| "METRIC_KIND_UNSPECIFIED".to_string()),
            value_type: self
                .value_type
                .unwrap_or_else(|| "VALUE_TYPE_UNSPECIFIED".to_string()),
            unit: self.unit,
            labels: self
                .labels
                .into_iter()
                .map(|l| LabelDescriptor {
                    key: l.key,
                    // labels without a value type are strings
                    value_type: l.value_type.unwrap_or_else(|| "STRING".to_string()),
                    description: l.description,
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn log_entry_page_decodes() {
        let page: EntriesPage = serde_json::from_value(json!({
            "entries": [{
                "logName": "projects/p/logs/run.googleapis.com%2Fstderr",
                "resource": {"type": "cloud_run_revision", "labels": {"service_name": "api"}},
                "timestamp": "2025-01-01T10:00:00.123456Z",
                "severity": "ERROR",
                "insertId": "abc",
                "trace": "projects/p/traces/42",
                "jsonPayload": {"message": "db timeout", "latency_ms": 1200}
            }, {
                "logName": "projects/p/logs/syslog",
                "receiveTimestamp": "2025-01-01T09:00:00Z",
                "textPayload": "kernel panic"
            }],
            "nextPageToken": ""
        }))
        .unwrap();

        assert!(next_token(page.next_page_token).is_none());
        let entries: Vec<LogEntry> = page.entries.into_iter().map(RawLogEntry::into_entry).collect();
        assert_eq!(entries[0].resource.kind, "cloud_run_revision");
        assert_eq!(entries[0].message(), Some("db timeout"));
        assert_eq!(entries[0].trace.as_deref(), Some("projects/p/traces/42"));
        assert_eq!(entries[1].severity, "DEFAULT");
        assert_eq!(entries[1].timestamp.to_rfc3339(), "2025-01-01T09:00:00+00:00");
        assert_eq!(entries[1].message(), Some("kernel panic"));
    }

    #[test]
    fn typed_values_become_floats() {
        let page: TimeSeriesPage = serde_json::from_value(json!({
            "timeSeries": [{
                "metric": {"type": "run.googleapis.com/request_count", "labels": {"response_code": "500"}},
                "resource": {"type": "cloud_run_revision"},
                "points": [
                    {"interval": {"startTime": "2025-01-01T00:00:00Z", "endTime": "2025-01-01T00:01:00Z"}, "value": {"int64Value": "17"}},
                    {"interval": {"endTime": "2025-01-01T00:02:00Z"}, "value": {"doubleValue": 0.25}},
                    {"interval": {"endTime": "2025-01-01T00:03:00Z"}, "value": {"boolValue": true}},
                    {"interval": {"endTime": "2025-01-01T00:04:00Z"}, "value": {"distributionValue": {}}}
                ]
            }],
            "nextPageToken": "next"
        }))
        .unwrap();

        assert_eq!(next_token(page.next_page_token).as_deref(), Some("next"));
        let series = page.time_series.into_iter().next().unwrap().into_series();
        let values: Vec<f64> = series.points.iter().map(|p| p.value).collect();
        assert_eq!(values, vec![17.0, 0.25, 1.0, 0.0]);
        assert_eq!(series.metric.labels["response_code"], "500");
    }

    #[test]
    fn descriptor_defaults() {
        let page: DescriptorsPage = serde_json::from_value(json!({
            "metricDescriptors": [{
                "type": "compute.googleapis.com/instance/cpu/utilization",
                "displayName": "CPU utilization",
                "metricKind": "GAUGE",
                "valueType": "DOUBLE",
                "unit": "10^2.%",
                "labels": [{"key": "instance_name"}]
            }]
        }))
        .unwrap();
        let d = page.metric_descriptors.into_iter().next().unwrap().into_descriptor();
        assert_eq!(d.metric_kind, "GAUGE");
        assert_eq!(d.labels[0].value_type, "STRING");
        assert_eq!(d.description, "");
    }

    #[test]
    fn project_ids_are_path_encoded() {
        let client = GcpClient::with_tokens(&UpstreamConfig::default(), TokenProvider::fixed("t")).unwrap();
        assert_eq!(
            client.project_url("my proj", "timeSeries"),
            "https://monitoring.googleapis.com/v3/projects/my%20proj/timeSeries"
        );
    }
}
