use std::collections::HashMap;

use futures::{Stream, StreamExt};
use tracing::debug;

use crate::error::{OpsError, Result};
use crate::model::{ErrorGroup, LogEntry, TopErrorsStats};

/// Hard bound on records examined per aggregation, independent of the
/// requested group count. Also used as the upstream page size.
pub const TOP_ERRORS_SCAN_CAP: usize = 1000;
pub const TOP_ERRORS_DEFAULT_GROUPS: usize = 10;
pub const TOP_ERRORS_MAX_GROUPS: usize = 50;

const MESSAGE_KEY_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupBy {
    #[default]
    LogName,
    ResourceType,
    Message,
}

impl GroupBy {
    /// Empty input selects the default (`log_name`).
    pub fn parse(raw: &str) -> Result<Self> {
        match raw {
            "" | "log_name" => Ok(GroupBy::LogName),
            "resource_type" => Ok(GroupBy::ResourceType),
            "message" => Ok(GroupBy::Message),
            other => Err(OpsError::InvalidArgument(format!(
                "unsupported group_by '{other}' (expected log_name, resource_type or message)"
            ))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GroupBy::LogName => "log_name",
            GroupBy::ResourceType => "resource_type",
            GroupBy::Message => "message",
        }
    }

    pub fn key_for(&self, entry: &LogEntry) -> String {
        match self {
            GroupBy::LogName => entry.log_name.clone(),
            GroupBy::ResourceType => entry.resource.kind.clone(),
            GroupBy::Message => entry
                .message()
                .map(|m| m.chars().take(MESSAGE_KEY_CHARS).collect())
                .unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ErrorSummary {
    pub groups: Vec<ErrorGroup>,
    pub stats: TopErrorsStats,
}

#[derive(Debug)]
struct Accumulator {
    key: String,
    count: usize,
    first_seen: chrono::DateTime<chrono::Utc>,
    last_seen: chrono::DateTime<chrono::Utc>,
    sample: LogEntry,
}

/// Single-pass grouping of error records. Groups keep the order in which
/// their key was first seen.
#[derive(Debug)]
pub struct ErrorAggregator {
    group_by: GroupBy,
    index: HashMap<String, usize>,
    groups: Vec<Accumulator>,
    scanned: usize,
}

impl ErrorAggregator {
    pub fn new(group_by: GroupBy) -> Self {
        Self {
            group_by,
            index: HashMap::new(),
            groups: Vec::new(),
            scanned: 0,
        }
    }

    pub fn scanned(&self) -> usize {
        self.scanned
    }

    pub fn observe(&mut self, entry: LogEntry) {
        self.scanned += 1;
        let key = self.group_by.key_for(&entry);
        match self.index.get(&key) {
            Some(&idx) => {
                let group = &mut self.groups[idx];
                group.count += 1;
                if entry.timestamp < group.first_seen {
                    group.first_seen = entry.timestamp;
                }
                if entry.timestamp > group.last_seen {
                    group.last_seen = entry.timestamp;
                }
            }
            None => {
                self.index.insert(key.clone(), self.groups.len());
                self.groups.push(Accumulator {
                    key,
                    count: 1,
                    first_seen: entry.timestamp,
                    last_seen: entry.timestamp,
                    sample: entry,
                });
            }
        }
    }

    /// Rank by count (ties keep scan order) and keep the first `top_n`.
    /// Percentages are taken over every scanned record, not just the kept groups.
    pub fn finish(self, top_n: usize, truncated: bool) -> ErrorSummary {
        let total_errors: usize = self.groups.iter().map(|g| g.count).sum();
        let unique_groups = self.groups.len();

        let mut ranked = self.groups;
        ranked.sort_by(|a, b| b.count.cmp(&a.count));
        ranked.truncate(top_n);

        let groups = ranked
            .into_iter()
            .map(|g| ErrorGroup {
                percentage: if total_errors == 0 {
                    0.0
                } else {
                    g.count as f64 * 100.0 / total_errors as f64
                },
                key: g.key,
                count: g.count,
                first_seen: g.first_seen,
                last_seen: g.last_seen,
                sample_entry: g.sample,
            })
            .collect();

        ErrorSummary {
            groups,
            stats: TopErrorsStats {
                total_errors,
                unique_groups,
                scanned_logs: self.scanned,
                truncated,
            },
        }
    }
}

/// Drain at most `scan_cap` records from `records` and summarise them.
/// An upstream error aborts the scan.
pub async fn aggregate_stream<S>(
    mut records: S,
    group_by: GroupBy,
    top_n: usize,
    scan_cap: usize,
) -> Result<ErrorSummary>
where
    S: Stream<Item = Result<LogEntry>> + Unpin,
{
    let mut agg = ErrorAggregator::new(group_by);
    while agg.scanned() < scan_cap {
        match records.next().await {
            Some(entry) => agg.observe(entry?),
            None => return Ok(agg.finish(top_n, false)),
        }
    }
    debug!(scan_cap, "error scan stopped at cap");
    Ok(agg.finish(top_n, true))
}
