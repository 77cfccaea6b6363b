//! 查询护栏：项目白名单、时间范围上限与数量截断。

use chrono::Duration;

use crate::config::{Config, Limits};
use crate::error::{OpsError, Result};
use crate::timerange::ResolvedRange;

/// Policy checks every tool runs before it talks to an upstream source.
pub trait Validator: Send + Sync {
    fn is_project_allowed(&self, project_id: &str) -> bool;

    fn validate_time_range(&self, range: &ResolvedRange) -> Result<()>;

    /// `requested <= 0` yields `default`, anything above `max` yields `max`.
    fn clamp_limit(&self, requested: i64, default: usize, max: usize) -> usize;

    fn limits(&self) -> &Limits;

    fn check_project(&self, project_id: &str) -> Result<()> {
        if self.is_project_allowed(project_id) {
            Ok(())
        } else {
            Err(OpsError::ProjectNotAllowed(project_id.to_string()))
        }
    }
}

/// Config-backed validator.
#[derive(Debug, Clone)]
pub struct Guardrail {
    allowed_project_ids: Vec<String>,
    limits: Limits,
}

impl Guardrail {
    pub fn new(config: &Config) -> Self {
        Self {
            allowed_project_ids: config.allowed_project_ids.clone(),
            limits: config.limits.clone(),
        }
    }
}

impl Validator for Guardrail {
    fn is_project_allowed(&self, project_id: &str) -> bool {
        self.allowed_project_ids.is_empty()
            || self.allowed_project_ids.iter().any(|p| p == project_id)
    }

    fn validate_time_range(&self, range: &ResolvedRange) -> Result<()> {
        let span = range.duration();
        if span < Duration::zero() {
            return Err(OpsError::InvertedRange);
        }
        let exceeds = Duration::try_hours(self.limits.max_range_hours).is_some_and(|max| span > max);
        if exceeds {
            return Err(OpsError::RangeTooLarge {
                requested_hours: range.hours(),
                max_hours: self.limits.max_range_hours,
            });
        }
        Ok(())
    }

    fn clamp_limit(&self, requested: i64, default: usize, max: usize) -> usize {
        clamp_limit(requested, default, max)
    }

    fn limits(&self) -> &Limits {
        &self.limits
    }
}

pub fn clamp_limit(requested: i64, default: usize, max: usize) -> usize {
    if requested <= 0 {
        return default;
    }
    match usize::try_from(requested) {
        Ok(n) if n <= max => n,
        _ => max,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn guard(allowed: &[&str], max_range_hours: i64) -> Guardrail {
        let mut cfg = Config::default();
        cfg.allowed_project_ids = allowed.iter().map(|s| s.to_string()).collect();
        cfg.limits.max_range_hours = max_range_hours;
        Guardrail::new(&cfg)
    }

    fn range(hours: i64) -> ResolvedRange {
        let end = Utc.with_ymd_and_hms(2025, 1, 10, 0, 0, 0).single().unwrap();
        ResolvedRange {
            start: end - Duration::hours(hours),
            end,
        }
    }

    #[test]
    fn empty_allowlist_allows_everything() {
        let g = guard(&[], 72);
        assert!(g.is_project_allowed("anything"));
        assert!(g.is_project_allowed(""));
        assert!(g.check_project("prod").is_ok());
    }

    #[test]
    fn allowlist_requires_exact_match() {
        let g = guard(&["prod-app"], 72);
        assert!(g.is_project_allowed("prod-app"));
        assert!(!g.is_project_allowed("prod"));
        assert!(!g.is_project_allowed("prod-app-2"));
        assert!(!g.is_project_allowed("PROD-APP"));
        let err = g.check_project("staging").unwrap_err();
        assert_eq!(err.to_string(), "project_id 'staging' is not in the allowed list");
    }

    #[test]
    fn time_range_bounds() {
        let g = guard(&[], 24);
        assert!(g.validate_time_range(&range(0)).is_ok());
        assert!(g.validate_time_range(&range(24)).is_ok());

        let err = g.validate_time_range(&range(30)).unwrap_err();
        assert!(matches!(err, OpsError::RangeTooLarge { .. }));
        let msg = err.to_string();
        assert!(msg.contains("30.0"), "{msg}");
        assert!(msg.contains("24"), "{msg}");

        let err = g.validate_time_range(&range(-1)).unwrap_err();
        assert!(matches!(err, OpsError::InvertedRange));
    }

    #[test]
    fn clamp_limit_properties() {
        for requested in [-100, -1, 0] {
            assert_eq!(clamp_limit(requested, 200, 500), 200);
        }
        for requested in [501, 10_000, i64::MAX] {
            assert_eq!(clamp_limit(requested, 200, 500), 500);
        }
        for requested in [1, 200, 499, 500] {
            assert_eq!(clamp_limit(requested, 200, 500), requested as usize);
        }
        assert_eq!(guard(&[], 72).clamp_limit(7, 10, 50), 7);
    }
}
