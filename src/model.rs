use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 日志条目。由上游逐条产出，仅在一次工具调用期间存活。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub severity: String,
    pub log_name: String,
    pub resource: MonitoredResource,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_payload: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub json_payload: Option<Map<String, Value>>,
    #[serde(default)]
    pub insert_id: String,
}

impl LogEntry {
    /// Human-readable message: the text payload, else `jsonPayload.message`.
    pub fn message(&self) -> Option<&str> {
        if let Some(text) = self.text_payload.as_deref().filter(|t| !t.is_empty()) {
            return Some(text);
        }
        self.json_payload
            .as_ref()
            .and_then(|p| p.get("message"))
            .and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitoredResource {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricLabels {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    pub time: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub metric: MetricLabels,
    pub resource: MonitoredResource,
    pub points: Vec<DataPoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelDescriptor {
    pub key: String,
    pub value_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    pub display_name: String,
    pub description: String,
    pub metric_kind: String,
    pub value_type: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub unit: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<LabelDescriptor>,
}

// ---- tool results ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogQueryMeta {
    pub project_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub filter: String,
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogQueryStats {
    pub returned_count: usize,
    pub sampled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogQueryResult {
    pub query_meta: LogQueryMeta,
    pub entries: Vec<LogEntry>,
    pub stats: LogQueryStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopErrorsMeta {
    pub project_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub group_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorGroup {
    pub key: String,
    pub count: usize,
    pub percentage: f64,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub sample_entry: LogEntry,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopErrorsStats {
    pub total_errors: usize,
    pub unique_groups: usize,
    pub scanned_logs: usize,
    /// Set when the scan stopped at the cap; more errors may exist in the window.
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopErrorsResult {
    pub query_meta: TopErrorsMeta,
    pub error_groups: Vec<ErrorGroup>,
    pub stats: TopErrorsStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeriesMeta {
    pub project_id: String,
    pub metric_type: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeriesStats {
    pub series_count: usize,
    pub point_count_total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeriesResult {
    pub query_meta: TimeSeriesMeta,
    pub series: Vec<TimeSeries>,
    pub stats: TimeSeriesStats,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptorsMeta {
    pub project_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub filter: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptorsStats {
    pub returned_count: usize,
    pub truncated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptorListResult {
    pub query_meta: DescriptorsMeta,
    pub descriptors: Vec<MetricDescriptor>,
    pub stats: DescriptorsStats,
}
