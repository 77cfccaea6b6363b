use std::sync::Arc;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use serde::Deserialize;
use tracing::info;

use crate::aggregate::{
    aggregate_stream, GroupBy, TOP_ERRORS_DEFAULT_GROUPS, TOP_ERRORS_MAX_GROUPS,
    TOP_ERRORS_SCAN_CAP,
};
use crate::config::Limits;
use crate::error::Result;
use crate::guardrail::Validator;
use crate::model::{
    LogEntry, LogQueryMeta, LogQueryResult, LogQueryStats, TopErrorsMeta, TopErrorsResult,
};
use crate::registry::{InputSchema, Property, Tool, ToolDescriptor, ToolOutput};
use crate::source::{log_filter, LogListRequest, LogSource, Order};
use crate::timerange::TimeRangeSpec;
use crate::tools::{as_bound, require, resolve_window, time_range_property};

pub const LOG_QUERY_DEFAULT_LIMIT: usize = 200;

#[derive(Debug, Deserialize)]
pub struct LogQueryArgs {
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub time_range: Option<TimeRangeSpec>,
    #[serde(default)]
    pub limit: Option<i64>,
}

/// `logging.query`: newest-first log entries matching a filter.
pub struct LogQueryTool {
    validator: Arc<dyn Validator>,
    source: Arc<dyn LogSource>,
}

impl LogQueryTool {
    pub fn new(validator: Arc<dyn Validator>, source: Arc<dyn LogSource>) -> Self {
        Self { validator, source }
    }

    pub fn descriptor(limits: &Limits) -> ToolDescriptor {
        ToolDescriptor {
            name: "logging.query".to_string(),
            description: "Search Cloud Logging logs. Equivalent to Logs Explorer.".to_string(),
            input_schema: InputSchema::object()
                .property("project_id", Property::string("GCP project ID"))
                .property(
                    "filter",
                    Property::string("Logging Query Language filter (e.g., 'severity>=ERROR')"),
                )
                .property("time_range", time_range_property())
                .property(
                    "limit",
                    Property::integer(format!(
                        "Maximum number of entries to return (default: {LOG_QUERY_DEFAULT_LIMIT}, max: {})",
                        limits.max_log_entries
                    ))
                    .with_default(LOG_QUERY_DEFAULT_LIMIT as u64),
                )
                .required(&["project_id"]),
        }
    }
}

#[async_trait]
impl Tool for LogQueryTool {
    type Args = LogQueryArgs;

    async fn call(&self, args: LogQueryArgs) -> Result<ToolOutput> {
        let project_id = require("project_id", &args.project_id)?;
        self.validator.check_project(project_id)?;
        let range = resolve_window(self.validator.as_ref(), args.time_range.as_ref())?;

        let max = as_bound(self.validator.limits().max_log_entries);
        let limit = self.validator.clamp_limit(
            args.limit.unwrap_or(0),
            LOG_QUERY_DEFAULT_LIMIT.min(max),
            max,
        );

        let user_filter = args.filter.unwrap_or_default();
        let request = LogListRequest {
            project_id: project_id.to_string(),
            filter: log_filter(&user_filter, range.start, range.end),
            order: Order::TimestampDesc,
            page_size: limit,
        };
        let entries: Vec<LogEntry> = self
            .source
            .list_entries(request)
            .take(limit)
            .try_collect()
            .await?;

        info!(project_id, returned = entries.len(), limit, "logging.query done");
        Ok(ToolOutput::LogQuery(LogQueryResult {
            query_meta: LogQueryMeta {
                project_id: project_id.to_string(),
                start: range.start,
                end: range.end,
                filter: user_filter,
                limit,
            },
            stats: LogQueryStats {
                returned_count: entries.len(),
                sampled: false,
            },
            entries,
        }))
    }
}

#[derive(Debug, Deserialize)]
pub struct TopErrorsArgs {
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub time_range: Option<TimeRangeSpec>,
    #[serde(default)]
    pub group_by: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
}

/// `logging.top_errors`: ranks ERROR-and-above entries in the window.
pub struct TopErrorsTool {
    validator: Arc<dyn Validator>,
    source: Arc<dyn LogSource>,
}

impl TopErrorsTool {
    pub fn new(validator: Arc<dyn Validator>, source: Arc<dyn LogSource>) -> Self {
        Self { validator, source }
    }

    pub fn descriptor() -> ToolDescriptor {
        ToolDescriptor {
            name: "logging.top_errors".to_string(),
            description: "Aggregate error logs and return top N most frequent errors. Useful for identifying common issues.".to_string(),
            input_schema: InputSchema::object()
                .property("project_id", Property::string("GCP project ID"))
                .property("time_range", time_range_property())
                .property(
                    "group_by",
                    Property::string(
                        "How to group errors: 'log_name', 'resource_type', or 'message' (default: 'log_name')",
                    )
                    .with_default("log_name"),
                )
                .property(
                    "limit",
                    Property::integer(format!(
                        "Number of top error groups to return (default: {TOP_ERRORS_DEFAULT_GROUPS}, max: {TOP_ERRORS_MAX_GROUPS})"
                    ))
                    .with_default(TOP_ERRORS_DEFAULT_GROUPS as u64),
                )
                .required(&["project_id"]),
        }
    }
}

#[async_trait]
impl Tool for TopErrorsTool {
    type Args = TopErrorsArgs;

    async fn call(&self, args: TopErrorsArgs) -> Result<ToolOutput> {
        let project_id = require("project_id", &args.project_id)?;
        self.validator.check_project(project_id)?;
        let range = resolve_window(self.validator.as_ref(), args.time_range.as_ref())?;
        let group_by = GroupBy::parse(args.group_by.as_deref().unwrap_or_default())?;
        let top_n = self.validator.clamp_limit(
            args.limit.unwrap_or(0),
            TOP_ERRORS_DEFAULT_GROUPS,
            TOP_ERRORS_MAX_GROUPS,
        );

        let request = LogListRequest {
            project_id: project_id.to_string(),
            filter: log_filter("severity >= ERROR", range.start, range.end),
            order: Order::TimestampDesc,
            page_size: TOP_ERRORS_SCAN_CAP,
        };
        let summary = aggregate_stream(
            self.source.list_entries(request),
            group_by,
            top_n,
            TOP_ERRORS_SCAN_CAP,
        )
        .await?;

        info!(
            project_id,
            group_by = group_by.as_str(),
            scanned = summary.stats.scanned_logs,
            groups = summary.stats.unique_groups,
            truncated = summary.stats.truncated,
            "logging.top_errors done"
        );
        Ok(ToolOutput::TopErrors(TopErrorsResult {
            query_meta: TopErrorsMeta {
                project_id: project_id.to_string(),
                start: range.start,
                end: range.end,
                group_by: group_by.as_str().to_string(),
            },
            error_groups: summary.groups,
            stats: summary.stats,
        }))
    }
}
