//! The tool registry: owns tool definitions and is the single path by
//! which a tool runs.
//!
//! `execute_tool` composes, in order: existence/enabled check, parameter
//! validation, confirmation gate, cache fast path (read-only tools), rate
//! limit, circuit breaker, bulkhead, execution with retry, then
//! post-processing (breaker outcome, cache store, write invalidation,
//! metrics). Every path returns a populated [`ToolResult`].

use crate::bulkhead::{BulkheadStats, Bulkheads};
use crate::cache::ResultCache;
use crate::circuit_breaker::CircuitBreakers;
use crate::context::ToolContext;
use crate::rate_limit::RateLimiter;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use toolwright_config::{InvalidationPolicy, ResiliencePolicy};
use toolwright_core::{
    CircuitState, Tool, ToolAccess, ToolDefinition, ToolError, ToolErrorKind, ToolParameter,
    ToolParams, ToolResult, validate_parameters,
};
use tracing::{debug, info, warn};

struct RegisteredTool {
    tool: Arc<dyn Tool>,
    enabled: bool,
}

/// Descriptive view of a registered tool.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
    pub access: ToolAccess,
    pub category: String,
    pub requires_confirmation: bool,
    pub enabled: bool,
}

pub struct ToolRegistry {
    tools: RwLock<BTreeMap<String, RegisteredTool>>,
    context: ToolContext,
    rate_limiter: RateLimiter,
    breakers: CircuitBreakers,
    bulkheads: Bulkheads,
}

impl ToolRegistry {
    pub fn new(context: ToolContext) -> Self {
        let rate_limiter = RateLimiter::new(context.config.rate_limit.clone());
        Self {
            tools: RwLock::new(BTreeMap::new()),
            context,
            rate_limiter,
            breakers: CircuitBreakers::new(),
            bulkheads: Bulkheads::new(),
        }
    }

    pub fn context(&self) -> &ToolContext {
        &self.context
    }

    // ── Management ────────────────────────────────────────────────────────

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&self, tool: impl Tool + 'static) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        // a replacement may carry a different access class
        self.breakers.remove(&name);
        self.bulkheads.remove(&name);
        debug!(tool = %name, access = ?tool.access(), "Registered tool");
        self.tools
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name, RegisteredTool { tool, enabled: true });
    }

    /// Remove a tool along with its breaker, bulkhead and cached results.
    pub fn unregister(&self, name: &str) -> bool {
        let removed = self
            .tools
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
            .is_some();
        if removed {
            self.breakers.remove(name);
            self.bulkheads.remove(name);
            self.context.cache.invalidate_tools(&[name]);
            debug!(tool = %name, "Unregistered tool");
        }
        removed
    }

    /// Returns `false` if no such tool is registered.
    pub fn set_enabled(&self, name: &str, enabled: bool) -> bool {
        let mut tools = self.tools.write().unwrap_or_else(|e| e.into_inner());
        match tools.get_mut(name) {
            Some(entry) => {
                entry.enabled = enabled;
                info!(tool = %name, enabled, "Tool availability changed");
                true
            }
            None => false,
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .map(|entry| entry.tool.clone())
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.tools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .is_some_and(|entry| entry.enabled)
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.tools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn list(&self) -> Vec<ToolInfo> {
        self.tools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|entry| ToolInfo {
                name: entry.tool.name().to_string(),
                description: entry.tool.description().to_string(),
                parameters: entry.tool.parameters(),
                access: entry.tool.access(),
                category: entry.tool.category().to_string(),
                requires_confirmation: entry.tool.requires_confirmation(),
                enabled: entry.enabled,
            })
            .collect()
    }

    /// Definitions of enabled tools, for native function calling.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|entry| entry.enabled)
            .map(|entry| entry.tool.to_definition())
            .collect()
    }

    /// Text rendering of the enabled tools for a system prompt.
    pub fn catalogue(&self) -> String {
        let mut out = String::new();
        for info in self.list().into_iter().filter(|t| t.enabled) {
            let _ = writeln!(out, "- {}: {}", info.name, info.description);
            if info.parameters.is_empty() {
                let _ = writeln!(out, "  Parameters: none");
                continue;
            }
            let _ = writeln!(out, "  Parameters:");
            for param in &info.parameters {
                let mut line = format!(
                    "    - {} ({}, {}",
                    param.name,
                    param.param_type.as_str(),
                    if param.required { "required" } else { "optional" }
                );
                if let Some(values) = &param.enum_values {
                    let rendered: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                    let _ = write!(line, ", one of: {}", rendered.join(", "));
                }
                if let Some(default) = &param.default {
                    let _ = write!(line, ", default: {default}");
                }
                line.push(')');
                if !param.description.is_empty() {
                    let _ = write!(line, ": {}", param.description);
                }
                let _ = writeln!(out, "{line}");
            }
        }
        out
    }

    // ── Resilience state ──────────────────────────────────────────────────

    /// `None` until the tool has been called at least once past the cache.
    pub fn circuit_state(&self, name: &str) -> Option<CircuitState> {
        self.breakers.get(name).map(|b| b.state())
    }

    pub fn reset_circuit(&self, name: &str) -> bool {
        match self.breakers.get(name) {
            Some(breaker) => {
                breaker.reset();
                info!(tool = %name, "Circuit manually reset");
                true
            }
            None => false,
        }
    }

    /// Calls still admissible in the tool's current rate-limit window.
    pub fn rate_limit_remaining(&self, name: &str) -> usize {
        self.rate_limiter.remaining(name)
    }

    pub fn reset_rate_limit(&self, name: &str) {
        self.rate_limiter.reset(name);
        info!(tool = %name, "Rate limit window manually reset");
    }

    pub fn bulkhead_stats(&self, name: &str) -> Option<BulkheadStats> {
        self.bulkheads.get(name).map(|b| b.stats())
    }

    /// Drop every cached result of one tool.
    pub fn invalidate_tool(&self, name: &str) -> usize {
        self.context.cache.invalidate_tools(&[name])
    }

    pub fn policy_for(&self, access: ToolAccess) -> ResiliencePolicy {
        let resilience = &self.context.config.resilience;
        match access {
            ToolAccess::ReadOnly => resilience.read,
            ToolAccess::Write => resilience.write,
            ToolAccess::Unclassified => resilience.default,
        }
    }

    // ── Execution ─────────────────────────────────────────────────────────

    /// Run a tool through the full pipeline. Never fails; failures are
    /// reported in the returned result and recorded in the metrics.
    pub async fn execute_tool(&self, name: &str, params: ToolParams, confirm: bool) -> ToolResult {
        let started = Instant::now();
        let mut result = self.run_pipeline(name, params, confirm).await;
        result.execution_time_ms = started.elapsed().as_millis() as u64;
        self.context.metrics.record(name, &result);
        result
    }

    async fn run_pipeline(&self, name: &str, mut params: ToolParams, confirm: bool) -> ToolResult {
        let (tool, enabled) = {
            let tools = self.tools.read().unwrap_or_else(|e| e.into_inner());
            match tools.get(name) {
                Some(entry) => (entry.tool.clone(), entry.enabled),
                None => {
                    debug!(tool = %name, "Unknown tool requested");
                    return ToolResult::failure(
                        name,
                        ToolErrorKind::NotFound,
                        format!("Tool '{name}' not found"),
                    );
                }
            }
        };
        if !enabled {
            return ToolResult::failure(
                name,
                ToolErrorKind::Disabled,
                format!("Tool '{name}' is disabled"),
            );
        }

        if let Err(e) = validate_parameters(&tool.parameters(), &mut params) {
            debug!(tool = %name, error = %e, "Rejected parameters");
            return ToolResult::failure(name, ToolErrorKind::InvalidParameters, e.to_string());
        }

        if tool.requires_confirmation() && !confirm {
            return ToolResult::failure(
                name,
                ToolErrorKind::ConfirmationRequired,
                format!("Tool '{name}' requires confirmation before it can run"),
            );
        }

        let access = tool.access();
        let cache_key = (access == ToolAccess::ReadOnly && self.context.config.cache.enabled)
            .then(|| ResultCache::key_for(name, &params));

        if let Some(key) = &cache_key
            && let Some(mut hit) = self.context.cache.get(key)
        {
            debug!(tool = %name, "Cache hit");
            hit.retry_count = 0;
            hit.circuit_state = self.circuit_state(name);
            hit.bulkhead_queue_depth = self.bulkheads.get(name).map_or(0, |b| b.queue_depth());
            return hit;
        }
        // results computed across an invalidation are not cached
        let generation = self.context.cache.generation();

        if let Err(limit) = self.rate_limiter.check(name) {
            warn!(tool = %name, max_calls = limit.max_calls, "Rate limit exceeded");
            return ToolResult::failure(
                name,
                ToolErrorKind::RateLimited,
                format!(
                    "Rate limit exceeded for tool '{name}': at most {} calls per {}s, retry in {}s",
                    limit.max_calls,
                    limit.window.as_secs(),
                    limit.retry_after.as_secs().max(1)
                ),
            );
        }

        let policy = self.policy_for(access);
        let breaker = self.breakers.get_or_create(name, policy.circuit_breaker);
        let Some(admission) = breaker.try_acquire() else {
            warn!(tool = %name, "Circuit open, call rejected");
            let mut rejected = ToolResult::failure(
                name,
                ToolErrorKind::CircuitOpen,
                format!(
                    "Tool '{name}' is temporarily unavailable (circuit open), retry in {}s",
                    breaker.retry_after().as_secs().max(1)
                ),
            );
            rejected.circuit_state = Some(breaker.state());
            return rejected;
        };

        let bulkhead = self.bulkheads.get_or_create(name, policy.bulkhead);
        let permit = match bulkhead.acquire().await {
            Ok(permit) => permit,
            Err(full) => {
                breaker.release(admission);
                let mut rejected = ToolResult::failure(
                    name,
                    ToolErrorKind::BulkheadTimeout,
                    format!(
                        "Tool '{name}' is at capacity: no execution slot within {}s",
                        full.waited.as_secs()
                    ),
                );
                rejected.circuit_state = Some(breaker.state());
                rejected.bulkhead_queue_depth = full.queued;
                return rejected;
            }
        };

        let (outcome, retries) = self.execute_with_retry(&tool, params).await;
        drop(permit);

        let mut result = match outcome {
            Ok(data) => {
                breaker.record_success(admission);
                ToolResult::ok(name, data)
            }
            Err(e @ ToolError::Cancelled { .. }) => {
                // says nothing about the tool's health
                breaker.release(admission);
                info!(tool = %name, retries, "Tool execution cancelled");
                ToolResult::failure(name, e.kind(), e.to_string())
            }
            Err(e) => {
                breaker.record_failure(admission);
                warn!(tool = %name, error = %e, retries, "Tool failed");
                ToolResult::failure(name, e.kind(), e.to_string())
            }
        };
        result.retry_count = retries;
        result.circuit_state = Some(breaker.state());
        result.bulkhead_queue_depth = bulkhead.queue_depth();

        if let Some(key) = cache_key {
            if result.success {
                self.context.cache.set_if_current(&key, &result, None, generation);
            }
            result.cache_key = Some(key);
        }

        if access == ToolAccess::Write {
            self.invalidate_after_write(tool.as_ref());
        }

        result
    }

    /// Invoke the tool, retrying any failure other than cancellation with
    /// exponential backoff until `max_attempts` is reached. Returns the final outcome and the number of
    /// retries performed.
    async fn execute_with_retry(
        &self,
        tool: &Arc<dyn Tool>,
        params: ToolParams,
    ) -> (Result<serde_json::Value, ToolError>, u32) {
        let retry = self.context.config.retry;
        let max_attempts = retry.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let delay = retry.backoff_ms(attempt);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            match invoke(tool.clone(), params.clone()).await {
                Ok(data) => return (Ok(data), attempt - 1),
                Err(e) if attempt < max_attempts && !matches!(e, ToolError::Cancelled { .. }) => {
                    warn!(tool = %tool.name(), attempt, error = %e, "Attempt failed, retrying");
                    attempt += 1;
                }
                Err(e) => return (Err(e), attempt - 1),
            }
        }
    }

    fn invalidate_after_write(&self, writer: &dyn Tool) {
        match self.context.config.cache.invalidation {
            InvalidationPolicy::All => {
                self.context.cache.clear();
                debug!(tool = %writer.name(), "Write tool ran, result cache flushed");
            }
            InvalidationPolicy::Category => {
                let readers: Vec<String> = self
                    .tools
                    .read()
                    .unwrap_or_else(|e| e.into_inner())
                    .values()
                    .filter(|entry| {
                        entry.tool.access() == ToolAccess::ReadOnly
                            && entry.tool.category() == writer.category()
                    })
                    .map(|entry| entry.tool.name().to_string())
                    .collect();
                let readers: Vec<&str> = readers.iter().map(String::as_str).collect();
                let dropped = self.context.cache.invalidate_tools(&readers);
                debug!(
                    tool = %writer.name(),
                    category = %writer.category(),
                    dropped,
                    "Write tool ran, category cache entries dropped"
                );
            }
        }
    }
}

/// Run the tool on its own task so a panic surfaces as a failure.
async fn invoke(tool: Arc<dyn Tool>, params: ToolParams) -> Result<serde_json::Value, ToolError> {
    let tool_name = tool.name().to_string();
    match tokio::spawn(async move { tool.execute(params).await }).await {
        Ok(outcome) => outcome,
        Err(join) if join.is_panic() => Err(ToolError::ExecutionFailed {
            tool_name,
            reason: "tool panicked".into(),
        }),
        Err(_) => Err(ToolError::Cancelled { tool_name }),
    }
}
