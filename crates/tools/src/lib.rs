//! Tool execution for Toolwright.
//!
//! The [`ToolRegistry`] is the only way a tool runs. Each call passes
//! through a per-tool resilience pipeline built from the pieces in this
//! crate: a sliding-window [`RateLimiter`], a [`CircuitBreaker`], a
//! [`Bulkhead`] and the LRU + TTL [`ResultCache`]. Shared state lives in a
//! [`ToolContext`] built once per process.

pub mod bulkhead;
pub mod cache;
pub mod circuit_breaker;
pub mod context;
pub mod rate_limit;
pub mod registry;

pub use bulkhead::{Bulkhead, BulkheadStats};
pub use cache::{CacheStats, ResultCache};
pub use circuit_breaker::{Admission, BreakerSnapshot, CircuitBreaker};
pub use context::ToolContext;
pub use rate_limit::RateLimiter;
pub use registry::{ToolInfo, ToolRegistry};
