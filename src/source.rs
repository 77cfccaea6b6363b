//! Upstream data-source boundary.
//!
//! Every call yields a lazily produced, ordered, finite stream; the stream
//! ends on "done" or yields an `Err` and stops. Callers bound consumption
//! themselves.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};

use crate::error::{OpsError, Result};
use crate::model::{LogEntry, MetricDescriptor, TimeSeries};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    TimestampDesc,
}

impl Order {
    pub fn as_str(&self) -> &'static str {
        match self {
            Order::TimestampDesc => "timestamp desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogListRequest {
    pub project_id: String,
    /// Logging query language expression, already carrying the time bounds.
    pub filter: String,
    pub order: Order,
    pub page_size: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeriesRequest {
    pub project_id: String,
    pub filter: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub alignment_period_sec: i64,
    pub aligner: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorListRequest {
    pub project_id: String,
    pub filter: String,
}

pub trait LogSource: Send + Sync {
    fn list_entries(&self, request: LogListRequest) -> BoxStream<'static, Result<LogEntry>>;
}

pub trait MetricSource: Send + Sync {
    fn list_time_series(&self, request: TimeSeriesRequest)
        -> BoxStream<'static, Result<TimeSeries>>;

    fn list_metric_descriptors(
        &self,
        request: DescriptorListRequest,
    ) -> BoxStream<'static, Result<MetricDescriptor>>;
}

/// Requests seen by a [`MemorySource`], in arrival order.
#[derive(Debug, Clone, Default)]
pub struct RecordedRequests {
    pub logs: Vec<LogListRequest>,
    pub time_series: Vec<TimeSeriesRequest>,
    pub descriptors: Vec<DescriptorListRequest>,
}

/// In-process source that replays fixed records in order. Filter expressions
/// are recorded but not evaluated.
#[derive(Clone, Default)]
pub struct MemorySource {
    entries: Vec<LogEntry>,
    series: Vec<TimeSeries>,
    descriptors: Vec<MetricDescriptor>,
    failure: Option<String>,
    requests: Arc<Mutex<RecordedRequests>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entries(mut self, entries: Vec<LogEntry>) -> Self {
        self.entries = entries;
        self
    }

    pub fn with_series(mut self, series: Vec<TimeSeries>) -> Self {
        self.series = series;
        self
    }

    pub fn with_descriptors(mut self, descriptors: Vec<MetricDescriptor>) -> Self {
        self.descriptors = descriptors;
        self
    }

    /// Every stream yields its records and then this error.
    pub fn failing_with(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    pub fn requests(&self) -> RecordedRequests {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    fn replay<T: Send + 'static>(&self, items: Vec<T>) -> BoxStream<'static, Result<T>> {
        let tail = self
            .failure
            .clone()
            .map(|msg| Err(OpsError::Upstream(msg)));
        stream::iter(items.into_iter().map(Ok).chain(tail)).boxed()
    }

    fn record(&self, f: impl FnOnce(&mut RecordedRequests)) {
        if let Ok(mut r) = self.requests.lock() {
            f(&mut r);
        }
    }
}

impl LogSource for MemorySource {
    fn list_entries(&self, request: LogListRequest) -> BoxStream<'static, Result<LogEntry>> {
        self.record(|r| r.logs.push(request));
        self.replay(self.entries.clone())
    }
}

impl MetricSource for MemorySource {
    fn list_time_series(
        &self,
        request: TimeSeriesRequest,
    ) -> BoxStream<'static, Result<TimeSeries>> {
        self.record(|r| r.time_series.push(request));
        self.replay(self.series.clone())
    }

    fn list_metric_descriptors(
        &self,
        request: DescriptorListRequest,
    ) -> BoxStream<'static, Result<MetricDescriptor>> {
        self.record(|r| r.descriptors.push(request));
        self.replay(self.descriptors.clone())
    }
}

/// Quote a value for a filter expression.
pub fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// `metric.type = "..." AND resource.type = "..." AND k = "v" ...`, keys in
/// sorted order.
pub fn metric_filter(
    metric_type: &str,
    resource_type: &str,
    extra: &BTreeMap<String, String>,
) -> String {
    let mut filter = format!("metric.type = {}", quote(metric_type));
    if !resource_type.is_empty() {
        filter.push_str(&format!(" AND resource.type = {}", quote(resource_type)));
    }
    for (k, v) in extra {
        filter.push_str(&format!(" AND {k} = {}", quote(v)));
    }
    filter
}

/// Append RFC3339 timestamp bounds to an optional user filter.
pub fn log_filter(user_filter: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    let bounds = format!(
        "timestamp >= {} AND timestamp <= {}",
        quote(&start.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
        quote(&end.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
    );
    let user_filter = user_filter.trim();
    if user_filter.is_empty() {
        bounds
    } else {
        format!("{user_filter} AND {bounds}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn log_filter_appends_bounds() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single().unwrap();
        let end = Utc.with_ymd_and_hms(2025, 1, 1, 1, 0, 0).single().unwrap();
        assert_eq!(
            log_filter("", start, end),
            r#"timestamp >= "2025-01-01T00:00:00Z" AND timestamp <= "2025-01-01T01:00:00Z""#
        );
        assert_eq!(
            log_filter("severity>=ERROR ", start, end),
            r#"severity>=ERROR AND timestamp >= "2025-01-01T00:00:00Z" AND timestamp <= "2025-01-01T01:00:00Z""#
        );
    }

    #[test]
    fn metric_filter_sorts_and_escapes() {
        let mut extra = BTreeMap::new();
        extra.insert("metric.labels.zone".to_string(), "us\"east".to_string());
        extra.insert("metric.labels.app".to_string(), "web".to_string());
        assert_eq!(
            metric_filter("run.googleapis.com/request_count", "cloud_run_revision", &extra),
            r#"metric.type = "run.googleapis.com/request_count" AND resource.type = "cloud_run_revision" AND metric.labels.app = "web" AND metric.labels.zone = "us\"east""#
        );
        assert_eq!(metric_filter("x", "", &BTreeMap::new()), r#"metric.type = "x""#);
    }

    #[tokio::test]
    async fn memory_source_replays_then_fails() {
        let src = MemorySource::new()
            .with_descriptors(vec![])
            .failing_with("quota exhausted");
        let items: Vec<_> = src
            .list_metric_descriptors(DescriptorListRequest {
                project_id: "p".into(),
                filter: String::new(),
            })
            .collect()
            .await;
        assert_eq!(items.len(), 1);
        assert!(items[0].is_err());
        assert_eq!(src.requests().descriptors.len(), 1);
    }
}
