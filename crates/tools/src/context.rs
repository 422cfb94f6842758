//! Shared per-process state handed to every component that needs it.

use crate::cache::ResultCache;
use std::sync::Arc;
use std::time::Duration;
use toolwright_config::AppConfig;
use toolwright_telemetry::MetricsCollector;

/// Configuration, result cache and metrics collector, built once at startup.
///
/// Cloning is cheap; clones share the same cache and collector.
#[derive(Clone)]
pub struct ToolContext {
    pub config: Arc<AppConfig>,
    pub cache: Arc<ResultCache>,
    pub metrics: Arc<MetricsCollector>,
}

impl ToolContext {
    pub fn new(config: AppConfig) -> Self {
        let cache = ResultCache::new(
            config.cache.max_size,
            Duration::from_secs(config.cache.default_ttl_secs),
        );
        Self {
            config: Arc::new(config),
            cache: Arc::new(cache),
            metrics: Arc::new(MetricsCollector::new()),
        }
    }
}

impl Default for ToolContext {
    fn default() -> Self {
        Self::new(AppConfig::default())
    }
}

impl std::fmt::Debug for ToolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolContext")
            .field("cache_size", &self.cache.len())
            .finish_non_exhaustive()
    }
}
