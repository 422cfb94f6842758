//! Data model for per-tool statistics and global snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use toolwright_core::ToolErrorKind;

// ── Per-tool ──────────────────────────────────────────────────────────────

/// Aggregated statistics for one tool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolStats {
    /// Total `execute_tool` calls, including rejected ones.
    pub calls: u64,
    pub successes: u64,
    pub failures: u64,
    /// Calls served from the result cache.
    pub cache_hits: u64,
    /// Retries performed beyond the first attempt.
    pub retries: u64,
    pub total_duration_ms: u64,
    /// Shortest recorded execution (None until the first call).
    pub min_duration_ms: Option<u64>,
    pub max_duration_ms: u64,
    /// Failure count per condition code.
    pub failures_by_kind: BTreeMap<ToolErrorKind, u64>,
    pub last_error: Option<String>,
    pub last_called_at: Option<DateTime<Utc>>,
}

impl ToolStats {
    pub fn average_duration_ms(&self) -> f64 {
        if self.calls == 0 {
            0.0
        } else {
            self.total_duration_ms as f64 / self.calls as f64
        }
    }

    pub fn success_rate(&self) -> f64 {
        ratio(self.successes, self.calls)
    }
}

// ── Global ────────────────────────────────────────────────────────────────

/// Point-in-time view of everything the collector knows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_calls: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub total_cache_hits: u64,
    pub total_retries: u64,
    pub total_duration_ms: u64,
    pub success_rate: f64,
    pub cache_hit_rate: f64,
    pub average_duration_ms: f64,
    /// Calls rejected before the tool function ran (rate limit, circuit, bulkhead...).
    pub rejected_calls: u64,
    pub tools: BTreeMap<String, ToolStats>,
    pub collected_since: DateTime<Utc>,
}

impl MetricsSnapshot {
    /// The `n` tools with the most failures, busiest first.
    pub fn most_failing(&self, n: usize) -> Vec<(&str, u64)> {
        let mut failing: Vec<(&str, u64)> = self
            .tools
            .iter()
            .filter(|(_, s)| s.failures > 0)
            .map(|(name, s)| (name.as_str(), s.failures))
            .collect();
        failing.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
        failing.truncate(n);
        failing
    }
}

pub(crate) fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_stats_have_zero_rates() {
        let stats = ToolStats::default();
        assert_eq!(stats.average_duration_ms(), 0.0);
        assert_eq!(stats.success_rate(), 0.0);
    }

    #[test]
    fn most_failing_orders_by_count() {
        let mut tools = BTreeMap::new();
        for (name, failures) in [("a", 1), ("b", 5), ("c", 0), ("d", 5)] {
            tools.insert(
                name.to_string(),
                ToolStats {
                    calls: 10,
                    failures,
                    ..Default::default()
                },
            );
        }
        let snapshot = MetricsSnapshot {
            total_calls: 40,
            total_successes: 29,
            total_failures: 11,
            total_cache_hits: 0,
            total_retries: 0,
            total_duration_ms: 0,
            success_rate: 0.725,
            cache_hit_rate: 0.0,
            average_duration_ms: 0.0,
            rejected_calls: 0,
            tools,
            collected_since: Utc::now(),
        };
        assert_eq!(snapshot.most_failing(2), vec![("b", 5), ("d", 5)]);
    }
}
