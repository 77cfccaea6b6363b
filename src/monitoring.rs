use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use serde::Deserialize;
use tracing::info;

use crate::config::Limits;
use crate::error::Result;
use crate::guardrail::Validator;
use crate::model::{
    DescriptorListResult, DescriptorsMeta, DescriptorsStats, MetricDescriptor, TimeSeries,
    TimeSeriesMeta, TimeSeriesResult, TimeSeriesStats,
};
use crate::registry::{InputSchema, Property, Tool, ToolDescriptor, ToolOutput};
use crate::source::{metric_filter, DescriptorListRequest, MetricSource, TimeSeriesRequest};
use crate::timerange::TimeRangeSpec;
use crate::tools::{as_bound, require, resolve_window, time_range_property};

pub const DEFAULT_ALIGNMENT_PERIOD_SEC: i64 = 60;
pub const TIME_SERIES_DEFAULT_LIMIT: usize = 20;
pub const DESCRIPTORS_DEFAULT_LIMIT: usize = 100;
pub const DESCRIPTORS_MAX_LIMIT: usize = 500;
const ALIGNER: &str = "ALIGN_MEAN";

#[derive(Debug, Deserialize)]
pub struct QueryTimeSeriesArgs {
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub metric_type: String,
    #[serde(default)]
    pub resource_type: Option<String>,
    #[serde(default)]
    pub filters: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub alignment_period_sec: Option<i64>,
    #[serde(default)]
    pub time_range: Option<TimeRangeSpec>,
    #[serde(default)]
    pub max_series: Option<i64>,
}

/// `monitoring.query_time_series`: mean-aligned points for one metric type.
pub struct QueryTimeSeriesTool {
    validator: Arc<dyn Validator>,
    source: Arc<dyn MetricSource>,
}

impl QueryTimeSeriesTool {
    pub fn new(validator: Arc<dyn Validator>, source: Arc<dyn MetricSource>) -> Self {
        Self { validator, source }
    }

    pub fn descriptor(limits: &Limits) -> ToolDescriptor {
        ToolDescriptor {
            name: "monitoring.query_time_series".to_string(),
            description: "Query Cloud Monitoring time series data.".to_string(),
            input_schema: InputSchema::object()
                .property("project_id", Property::string("GCP project ID"))
                .property(
                    "metric_type",
                    Property::string("Metric type (e.g., 'run.googleapis.com/request_count')"),
                )
                .property(
                    "resource_type",
                    Property::string("Resource type (e.g., 'cloud_run_revision')"),
                )
                .property(
                    "filters",
                    Property::object("Additional filters as key-value pairs"),
                )
                .property(
                    "alignment_period_sec",
                    Property::integer(format!(
                        "Alignment period in seconds (default: {DEFAULT_ALIGNMENT_PERIOD_SEC})"
                    ))
                    .with_default(DEFAULT_ALIGNMENT_PERIOD_SEC),
                )
                .property("time_range", time_range_property())
                .property(
                    "max_series",
                    Property::integer(format!(
                        "Maximum number of time series to return (default: {TIME_SERIES_DEFAULT_LIMIT}, max: {})",
                        limits.max_time_series
                    ))
                    .with_default(TIME_SERIES_DEFAULT_LIMIT as u64),
                )
                .required(&["project_id", "metric_type"]),
        }
    }
}

#[async_trait]
impl Tool for QueryTimeSeriesTool {
    type Args = QueryTimeSeriesArgs;

    async fn call(&self, args: QueryTimeSeriesArgs) -> Result<ToolOutput> {
        let project_id = require("project_id", &args.project_id)?;
        let metric_type = require("metric_type", &args.metric_type)?;
        self.validator.check_project(project_id)?;
        let range = resolve_window(self.validator.as_ref(), args.time_range.as_ref())?;

        let alignment_period_sec = args
            .alignment_period_sec
            .filter(|p| *p > 0)
            .unwrap_or(DEFAULT_ALIGNMENT_PERIOD_SEC);
        let max = as_bound(self.validator.limits().max_time_series);
        let max_series = self.validator.clamp_limit(
            args.max_series.unwrap_or(0),
            TIME_SERIES_DEFAULT_LIMIT.min(max),
            max,
        );

        let request = TimeSeriesRequest {
            project_id: project_id.to_string(),
            filter: metric_filter(
                metric_type,
                args.resource_type.as_deref().unwrap_or_default(),
                &args.filters.unwrap_or_default(),
            ),
            start: range.start,
            end: range.end,
            alignment_period_sec,
            aligner: ALIGNER.to_string(),
        };
        let series: Vec<TimeSeries> = self
            .source
            .list_time_series(request)
            .take(max_series)
            .try_collect()
            .await?;
        let point_count_total = series.iter().map(|s| s.points.len()).sum();

        info!(
            project_id,
            metric_type,
            series = series.len(),
            points = point_count_total,
            "monitoring.query_time_series done"
        );
        Ok(ToolOutput::TimeSeries(TimeSeriesResult {
            query_meta: TimeSeriesMeta {
                project_id: project_id.to_string(),
                metric_type: metric_type.to_string(),
                start: range.start,
                end: range.end,
            },
            stats: TimeSeriesStats {
                series_count: series.len(),
                point_count_total,
            },
            series,
        }))
    }
}

#[derive(Debug, Deserialize)]
pub struct ListMetricDescriptorsArgs {
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
}

/// `monitoring.list_metric_descriptors`: metric discovery.
pub struct ListMetricDescriptorsTool {
    validator: Arc<dyn Validator>,
    source: Arc<dyn MetricSource>,
}

impl ListMetricDescriptorsTool {
    pub fn new(validator: Arc<dyn Validator>, source: Arc<dyn MetricSource>) -> Self {
        Self { validator, source }
    }

    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor {
            name: "monitoring.list_metric_descriptors".to_string(),
            description: "List available metric descriptors in a project. Useful for discovering what metrics are available.".to_string(),
            input_schema: InputSchema::object()
                .property("project_id", Property::string("GCP project ID"))
                .property(
                    "filter",
                    Property::string(
                        "Optional filter (e.g., 'metric.type = starts_with(\"run.googleapis.com\")')",
                    ),
                )
                .property(
                    "limit",
                    Property::integer(format!(
                        "Maximum number of descriptors to return (default: {DESCRIPTORS_DEFAULT_LIMIT}, max: {DESCRIPTORS_MAX_LIMIT})"
                    ))
                    .with_default(DESCRIPTORS_DEFAULT_LIMIT as u64),
                )
                .required(&["project_id"]),
        }
    }
}

#[async_trait]
impl Tool for ListMetricDescriptorsTool {
    type Args = ListMetricDescriptorsArgs;

    async fn call(&self, args: ListMetricDescriptorsArgs) -> Result<ToolOutput> {
        let project_id = require("project_id", &args.project_id)?;
        self.validator.check_project(project_id)?;
        let limit = self.validator.clamp_limit(
            args.limit.unwrap_or(0),
            DESCRIPTORS_DEFAULT_LIMIT,
            DESCRIPTORS_MAX_LIMIT,
        );

        let filter = args.filter.unwrap_or_default();
        let request = DescriptorListRequest {
            project_id: project_id.to_string(),
            filter: filter.clone(),
        };
        // one extra record tells us whether the listing was cut short
        let mut descriptors: Vec<MetricDescriptor> = self
            .source
            .list_metric_descriptors(request)
            .take(limit + 1)
            .try_collect()
            .await?;
        let truncated = descriptors.len() > limit;
        descriptors.truncate(limit);

        info!(project_id, returned = descriptors.len(), truncated, "monitoring.list_metric_descriptors done");
        Ok(ToolOutput::MetricDescriptors(DescriptorListResult {
            query_meta: DescriptorsMeta {
                project_id: project_id.to_string(),
                filter,
            },
            stats: DescriptorsStats {
                returned_count: descriptors.len(),
                truncated,
            },
            descriptors,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::OpsError;
    use crate::guardrail::Guardrail;
    use crate::model::{DataPoint, MetricLabels, MonitoredResource};
    use crate::source::MemorySource;
    use chrono::Utc;

    fn guard() -> Arc<dyn Validator> {
        let mut cfg = Config::default();
        cfg.limits.max_time_series = 2;
        Arc::new(Guardrail::new(&cfg))
    }

    fn series(n_points: usize) -> TimeSeries {
        TimeSeries {
            metric: MetricLabels {
                kind: "run.googleapis.com/request_count".into(),
                labels: Default::default(),
            },
            resource: MonitoredResource::default(),
            points: (0..n_points)
                .map(|i| DataPoint {
                    time: Utc::now(),
                    value: i as f64,
                })
                .collect(),
        }
    }

    fn descriptor(i: usize) -> MetricDescriptor {
        MetricDescriptor {
            kind: format!("custom.googleapis.com/m{i}"),
            display_name: format!("m{i}"),
            description: String::new(),
            metric_kind: "GAUGE".into(),
            value_type: "INT64".into(),
            unit: String::new(),
            labels: vec![],
        }
    }

    #[tokio::test]
    async fn time_series_are_capped_and_counted() {
        let src = MemorySource::new().with_series(vec![series(3), series(2), series(5)]);
        let tool = QueryTimeSeriesTool::new(guard(), Arc::new(src.clone()));
        let mut filters = BTreeMap::new();
        filters.insert("metric.labels.response_code_class".to_string(), "5xx".to_string());

        let out = tool
            .call(QueryTimeSeriesArgs {
                project_id: "p".into(),
                metric_type: "run.googleapis.com/request_count".into(),
                resource_type: Some("cloud_run_revision".into()),
                filters: Some(filters),
                alignment_period_sec: Some(0),
                time_range: Some(TimeRangeSpec::new("-6h", "now")),
                max_series: None,
            })
            .await
            .unwrap();

        let ToolOutput::TimeSeries(res) = out else { panic!("wrong output") };
        assert_eq!(res.stats.series_count, 2);
        assert_eq!(res.stats.point_count_total, 5);

        let req = &src.requests().time_series[0];
        assert_eq!(req.alignment_period_sec, 60);
        assert_eq!(req.aligner, "ALIGN_MEAN");
        assert!(req.filter.contains(r#"resource.type = "cloud_run_revision""#));
        assert!(req.filter.ends_with(r#"metric.labels.response_code_class = "5xx""#));
    }

    #[tokio::test]
    async fn metric_type_is_required() {
        let tool = QueryTimeSeriesTool::new(guard(), Arc::new(MemorySource::new()));
        let err = tool
            .call(QueryTimeSeriesArgs {
                project_id: "p".into(),
                metric_type: String::new(),
                resource_type: None,
                filters: None,
                alignment_period_sec: None,
                time_range: None,
                max_series: None,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, OpsError::MissingArgument("metric_type")));
    }

    #[tokio::test]
    async fn descriptor_listing_reports_truncation() {
        let src = MemorySource::new().with_descriptors((0..5).map(descriptor).collect());
        let tool = ListMetricDescriptorsTool::new(guard(), Arc::new(src));

        let out = tool
            .call(ListMetricDescriptorsArgs {
                project_id: "p".into(),
                filter: None,
                limit: Some(3),
            })
            .await
            .unwrap();
        let ToolOutput::MetricDescriptors(res) = out else { panic!("wrong output") };
        assert_eq!(res.stats.returned_count, 3);
        assert!(res.stats.truncated);

        let out = tool
            .call(ListMetricDescriptorsArgs {
                project_id: "p".into(),
                filter: Some("metric.type = starts_with(\"custom\")".into()),
                limit: Some(5),
            })
            .await
            .unwrap();
        let ToolOutput::MetricDescriptors(res) = out else { panic!("wrong output") };
        assert_eq!(res.stats.returned_count, 5);
        assert!(!res.stats.truncated);
        assert_eq!(res.query_meta.filter, "metric.type = starts_with(\"custom\")");
    }
}
