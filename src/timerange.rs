use std::sync::OnceLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{OpsError, Result};

/// Lookback applied when a request leaves `start` empty.
pub fn default_lookback() -> Duration {
    Duration::minutes(30)
}

/// Request-level time range. `start` is RFC3339, a negative offset such as
/// `-1h30m`, or empty; `end` is RFC3339, `now`, or empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRangeSpec {
    #[serde(default)]
    pub start: String,
    #[serde(default)]
    pub end: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ResolvedRange {
    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn hours(&self) -> f64 {
        self.duration().num_milliseconds() as f64 / 3_600_000.0
    }
}

impl TimeRangeSpec {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// Resolve against `now`. Parsing only; inverted or oversized ranges are
    /// left for the guardrail to reject.
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<ResolvedRange> {
        let end = match self.end.as_str() {
            "" | "now" => now,
            raw => parse_instant(raw).map_err(|reason| OpsError::InvalidEndTime {
                input: raw.to_string(),
                reason,
            })?,
        };

        let start = if self.start.is_empty() {
            now - default_lookback()
        } else if let Some(offset) = self.start.strip_prefix('-') {
            let d = parse_duration(offset).map_err(|reason| OpsError::InvalidRelativeStart {
                input: self.start.clone(),
                reason,
            })?;
            now - d
        } else {
            parse_instant(&self.start).map_err(|reason| OpsError::InvalidStartTime {
                input: self.start.clone(),
                reason,
            })?
        };

        Ok(ResolvedRange { start, end })
    }
}

fn parse_instant(raw: &str) -> std::result::Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| e.to_string())
}

fn duration_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+(?:\.\d*)?|\.\d+)(ns|us|µs|ms|s|m|h|d)").expect("duration regex"))
}

/// Parse a sequence of `<number><unit>` terms, e.g. `1h30m`, `1.5h`, `250ms`.
/// Units: ns, us/µs, ms, s, m, h, d.
pub fn parse_duration(raw: &str) -> std::result::Result<Duration, String> {
    if raw.is_empty() {
        return Err("empty duration".to_string());
    }

    let mut consumed = 0usize;
    let mut total_ns: f64 = 0.0;
    for caps in duration_re().captures_iter(raw) {
        let whole = caps.get(0).map(|m| (m.start(), m.end())).unwrap_or((0, 0));
        if whole.0 != consumed {
            return Err(format!("unexpected input in duration {raw:?}"));
        }
        consumed = whole.1;

        let value: f64 = caps[1]
            .parse()
            .map_err(|_| format!("invalid number in duration {raw:?}"))?;
        let unit_ns: f64 = match &caps[2] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60.0 * 1e9,
            "h" => 3600.0 * 1e9,
            "d" => 86_400.0 * 1e9,
            other => return Err(format!("unknown unit {other:?} in duration {raw:?}")),
        };
        total_ns += value * unit_ns;
    }

    if consumed != raw.len() {
        return Err(format!("invalid duration {raw:?}"));
    }
    if !total_ns.is_finite() || total_ns > i64::MAX as f64 {
        return Err(format!("duration {raw:?} out of range"));
    }
    Ok(Duration::nanoseconds(total_ns as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reference() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).single().unwrap()
    }

    #[test]
    fn relative_start_and_now_end() {
        let t = reference();
        let r = TimeRangeSpec::new("-1h", "now").resolve(t).unwrap();
        assert_eq!(r.start, t - Duration::hours(1));
        assert_eq!(r.end, t);
    }

    #[test]
    fn empty_fields_use_default_lookback() {
        let t = reference();
        let r = TimeRangeSpec::default().resolve(t).unwrap();
        assert_eq!(r.start, t - Duration::minutes(30));
        assert_eq!(r.end, t);
        assert!((r.hours() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn absolute_bounds_are_parsed_in_any_offset() {
        let r = TimeRangeSpec::new("2025-03-10T09:00:00+09:00", "2025-03-10T01:00:00Z")
            .resolve(reference())
            .unwrap();
        assert_eq!(r.start, Utc.with_ymd_and_hms(2025, 3, 10, 0, 0, 0).single().unwrap());
        assert_eq!(r.duration(), Duration::hours(1));
    }

    #[test]
    fn bad_inputs_report_which_bound_failed() {
        let t = reference();
        let err = TimeRangeSpec::new("not-a-time", "").resolve(t).unwrap_err();
        assert!(matches!(err, OpsError::InvalidStartTime { .. }), "{err}");

        let err = TimeRangeSpec::new("-soon", "").resolve(t).unwrap_err();
        assert!(matches!(err, OpsError::InvalidRelativeStart { .. }), "{err}");

        let err = TimeRangeSpec::new("", "tomorrow").resolve(t).unwrap_err();
        assert!(matches!(err, OpsError::InvalidEndTime { .. }), "{err}");
    }

    #[test]
    fn inverted_range_is_not_rejected_here() {
        let r = TimeRangeSpec::new("2025-03-11T00:00:00Z", "2025-03-10T00:00:00Z")
            .resolve(reference())
            .unwrap();
        assert!(r.start > r.end);
    }

    #[test]
    fn duration_grammar() {
        assert_eq!(parse_duration("30m").unwrap(), Duration::minutes(30));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::minutes(90));
        assert_eq!(parse_duration("1.5h").unwrap(), Duration::minutes(90));
        assert_eq!(parse_duration("250ms").unwrap(), Duration::milliseconds(250));
        assert_eq!(parse_duration("2d").unwrap(), Duration::hours(48));
        assert!(parse_duration("").is_err());
        assert!(parse_duration("h").is_err());
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("1h 30m").is_err());
    }
}
