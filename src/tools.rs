//! 工具装配：把四个只读工具注册进 registry，并提供共用的参数处理。

use std::sync::Arc;

use chrono::Utc;

use crate::error::{OpsError, Result};
use crate::guardrail::Validator;
use crate::logging::{LogQueryTool, TopErrorsTool};
use crate::monitoring::{ListMetricDescriptorsTool, QueryTimeSeriesTool};
use crate::registry::{Property, ToolRegistry};
use crate::source::{LogSource, MetricSource};
use crate::timerange::{ResolvedRange, TimeRangeSpec};

pub fn build_registry(
    validator: Arc<dyn Validator>,
    logs: Arc<dyn LogSource>,
    metrics: Arc<dyn MetricSource>,
) -> ToolRegistry {
    let limits = validator.limits().clone();
    let mut registry = ToolRegistry::new();
    registry.register(
        LogQueryTool::descriptor(&limits),
        LogQueryTool::new(validator.clone(), logs.clone()),
    );
    registry.register(
        QueryTimeSeriesTool::descriptor(&limits),
        QueryTimeSeriesTool::new(validator.clone(), metrics.clone()),
    );
    registry.register(
        TopErrorsTool::descriptor(),
        TopErrorsTool::new(validator.clone(), logs),
    );
    registry.register(
        ListMetricDescriptorsTool::descriptor(),
        ListMetricDescriptorsTool::new(validator, metrics),
    );
    registry
}

pub(crate) fn time_range_property() -> Property {
    Property::object("Time range for the query")
        .with_property(
            "start",
            Property::string("Start time (RFC3339 or relative like '-1h', '-30m')"),
        )
        .with_property(
            "end",
            Property::string("End time (RFC3339 or 'now')").with_default("now"),
        )
}

pub(crate) fn require<'a>(field: &'static str, value: &'a str) -> Result<&'a str> {
    if value.trim().is_empty() {
        return Err(OpsError::MissingArgument(field));
    }
    Ok(value)
}

/// Resolve against the current clock, then apply the range policy.
pub(crate) fn resolve_window(
    validator: &dyn Validator,
    spec: Option<&TimeRangeSpec>,
) -> Result<ResolvedRange> {
    let range = spec.cloned().unwrap_or_default().resolve(Utc::now())?;
    validator.validate_time_range(&range)?;
    Ok(range)
}

/// Configured maxima are normalised to positive values on load.
pub(crate) fn as_bound(limit: i64) -> usize {
    usize::try_from(limit).unwrap_or(1).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::guardrail::Guardrail;
    use crate::source::MemorySource;

    #[test]
    fn registers_four_tools_in_order() {
        let src = Arc::new(MemorySource::new());
        let reg = build_registry(
            Arc::new(Guardrail::new(&Config::default())),
            src.clone(),
            src,
        );
        let names: Vec<_> = reg.list().iter().map(|d| d.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "logging.query",
                "monitoring.query_time_series",
                "logging.top_errors",
                "monitoring.list_metric_descriptors",
            ]
        );
        for d in reg.list() {
            assert_eq!(d.input_schema.required.first().map(String::as_str), Some("project_id"));
        }
    }

    #[test]
    fn require_rejects_blank() {
        assert!(require("project_id", "  ").is_err());
        assert_eq!(require("project_id", "p").unwrap(), "p");
    }
}
