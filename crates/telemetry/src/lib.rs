//! Execution metrics for Toolwright.
//!
//! Aggregates per-tool and global statistics (call counts, outcomes by
//! condition code, durations, retries, cache hits) for observability.

pub mod engine;
pub mod model;

pub use engine::MetricsCollector;
pub use model::{MetricsSnapshot, ToolStats};
