//! Thread-safe metrics collector. Aggregates every tool execution the
//! registry performs, including calls rejected before the tool ran.

use crate::model::{MetricsSnapshot, ToolStats, ratio};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::RwLock;
use toolwright_core::{ToolErrorKind, ToolResult};

/// Kinds that mean the tool function never ran.
const REJECTION_KINDS: [ToolErrorKind; 7] = [
    ToolErrorKind::NotFound,
    ToolErrorKind::Disabled,
    ToolErrorKind::InvalidParameters,
    ToolErrorKind::ConfirmationRequired,
    ToolErrorKind::RateLimited,
    ToolErrorKind::CircuitOpen,
    ToolErrorKind::BulkheadTimeout,
];

/// The metrics collector.
///
/// Thread-safe via `RwLock`; one instance is shared by the whole process
/// through the tool context.
pub struct MetricsCollector {
    tools: RwLock<BTreeMap<String, ToolStats>>,
    since: RwLock<DateTime<Utc>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(BTreeMap::new()),
            since: RwLock::new(Utc::now()),
        }
    }

    /// Record one `execute_tool` outcome.
    pub fn record(&self, tool_name: &str, result: &ToolResult) {
        let mut tools = self.tools.write().unwrap_or_else(|e| e.into_inner());
        let stats = tools.entry(tool_name.to_string()).or_default();

        stats.calls += 1;
        stats.retries += u64::from(result.retry_count);
        stats.total_duration_ms += result.execution_time_ms;
        stats.max_duration_ms = stats.max_duration_ms.max(result.execution_time_ms);
        stats.min_duration_ms = Some(
            stats
                .min_duration_ms
                .map_or(result.execution_time_ms, |m| m.min(result.execution_time_ms)),
        );
        stats.last_called_at = Some(Utc::now());

        if result.cache_hit {
            stats.cache_hits += 1;
        }

        if result.success {
            stats.successes += 1;
        } else {
            stats.failures += 1;
            let kind = result.error_kind.unwrap_or(ToolErrorKind::ExecutionFailed);
            *stats.failures_by_kind.entry(kind).or_insert(0) += 1;
            stats.last_error = result.error.clone();
            tracing::debug!(tool = %tool_name, kind = %kind, "Recorded tool failure");
        }
    }

    /// Statistics for a single tool.
    pub fn tool_stats(&self, tool_name: &str) -> Option<ToolStats> {
        self.tools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(tool_name)
            .cloned()
    }

    /// Aggregate view across all tools.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let tools = self.tools.read().unwrap_or_else(|e| e.into_inner()).clone();
        let since = *self.since.read().unwrap_or_else(|e| e.into_inner());

        let mut snapshot = MetricsSnapshot {
            total_calls: 0,
            total_successes: 0,
            total_failures: 0,
            total_cache_hits: 0,
            total_retries: 0,
            total_duration_ms: 0,
            success_rate: 0.0,
            cache_hit_rate: 0.0,
            average_duration_ms: 0.0,
            rejected_calls: 0,
            tools: BTreeMap::new(),
            collected_since: since,
        };

        for stats in tools.values() {
            snapshot.total_calls += stats.calls;
            snapshot.total_successes += stats.successes;
            snapshot.total_failures += stats.failures;
            snapshot.total_cache_hits += stats.cache_hits;
            snapshot.total_retries += stats.retries;
            snapshot.total_duration_ms += stats.total_duration_ms;
            snapshot.rejected_calls += REJECTION_KINDS
                .iter()
                .filter_map(|k| stats.failures_by_kind.get(k))
                .sum::<u64>();
        }

        snapshot.success_rate = ratio(snapshot.total_successes, snapshot.total_calls);
        snapshot.cache_hit_rate = ratio(snapshot.total_cache_hits, snapshot.total_calls);
        if snapshot.total_calls > 0 {
            snapshot.average_duration_ms =
                snapshot.total_duration_ms as f64 / snapshot.total_calls as f64;
        }
        snapshot.tools = tools;
        snapshot
    }

    /// Forget everything recorded so far.
    pub fn reset(&self) {
        self.tools
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        *self.since.write().unwrap_or_else(|e| e.into_inner()) = Utc::now();
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
