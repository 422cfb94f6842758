//! Configuration loading, validation, and management for Toolwright.
//!
//! Loads configuration from `~/.toolwright/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.toolwright/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// ReAct loop settings
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,

    /// Result cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Per-tool rate limiting
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Retry policy for failing tool functions
    #[serde(default)]
    pub retry: RetryConfig,

    /// Circuit breaker + bulkhead policies per tool class
    #[serde(default)]
    pub resilience: ResilienceConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Follow-up rounds allowed when streaming native tool calls
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: u32,

    /// Temperature used while selecting tools
    #[serde(default)]
    pub temperature: f32,
}

fn default_max_iterations() -> u32 {
    10
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_max_tool_rounds() -> u32 {
    5
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            max_tokens: default_max_tokens(),
            max_tool_rounds: default_max_tool_rounds(),
            temperature: 0.0,
        }
    }
}

/// How a write-tool execution invalidates cached reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationPolicy {
    /// Flush the whole cache.
    #[default]
    All,
    /// Drop only entries of tools sharing the write tool's category.
    Category,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_cache_max_size")]
    pub max_size: usize,

    #[serde(default = "default_cache_ttl_secs")]
    pub default_ttl_secs: u64,

    #[serde(default)]
    pub invalidation: InvalidationPolicy,
}

fn default_true() -> bool {
    true
}
fn default_cache_max_size() -> usize {
    1000
}
fn default_cache_ttl_secs() -> u64 {
    300
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: default_cache_max_size(),
            default_ttl_secs: default_cache_ttl_secs(),
            invalidation: InvalidationPolicy::All,
        }
    }
}

/// A call budget over a sliding window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    #[serde(default = "default_rate_max_calls")]
    pub max_calls: usize,
    #[serde(default = "default_rate_window_secs")]
    pub window_secs: u64,
}

fn default_rate_max_calls() -> usize {
    10
}
fn default_rate_window_secs() -> u64 {
    60
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_calls: default_rate_max_calls(),
            window_secs: default_rate_window_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(flatten)]
    pub default: RateLimitPolicy,

    /// Tool name → policy
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub overrides: HashMap<String, RateLimitPolicy>,
}

impl RateLimitConfig {
    pub fn policy_for(&self, tool_name: &str) -> RateLimitPolicy {
        self.overrides
            .get(tool_name)
            .copied()
            .unwrap_or(self.default)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    5000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// Delay before attempt number `attempt` (1-based; the first attempt has none).
    pub fn backoff_ms(&self, attempt: u32) -> u64 {
        if attempt <= 1 {
            return 0;
        }
        let exp = (attempt - 2).min(32);
        self.base_delay_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_delay_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerPolicy {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout_secs: u64,
    pub half_open_max_calls: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkheadPolicy {
    pub max_concurrent: usize,
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResiliencePolicy {
    pub circuit_breaker: CircuitBreakerPolicy,
    pub bulkhead: BulkheadPolicy,
}

impl ResiliencePolicy {
    /// Read tools tolerate more failures and recover quickly.
    pub fn read() -> Self {
        Self {
            circuit_breaker: CircuitBreakerPolicy {
                failure_threshold: 10,
                success_threshold: 3,
                timeout_secs: 30,
                half_open_max_calls: 5,
            },
            bulkhead: BulkheadPolicy {
                max_concurrent: 10,
                acquire_timeout_secs: 15,
            },
        }
    }

    /// Write tools trip early and stay open longer.
    pub fn write() -> Self {
        Self {
            circuit_breaker: CircuitBreakerPolicy {
                failure_threshold: 3,
                success_threshold: 1,
                timeout_secs: 120,
                half_open_max_calls: 2,
            },
            bulkhead: BulkheadPolicy {
                max_concurrent: 2,
                acquire_timeout_secs: 5,
            },
        }
    }

    pub fn conservative() -> Self {
        Self {
            circuit_breaker: CircuitBreakerPolicy {
                failure_threshold: 5,
                success_threshold: 2,
                timeout_secs: 60,
                half_open_max_calls: 3,
            },
            bulkhead: BulkheadPolicy {
                max_concurrent: 5,
                acquire_timeout_secs: 10,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    #[serde(default = "ResiliencePolicy::read")]
    pub read: ResiliencePolicy,

    #[serde(default = "ResiliencePolicy::write")]
    pub write: ResiliencePolicy,

    #[serde(default = "ResiliencePolicy::conservative")]
    pub default: ResiliencePolicy,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            read: ResiliencePolicy::read(),
            write: ResiliencePolicy::write(),
            default: ResiliencePolicy::conservative(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.toolwright/config.toml).
    ///
    /// Environment overrides:
    /// - `TOOLWRIGHT_MAX_ITERATIONS`
    /// - `TOOLWRIGHT_CACHE_TTL_SECS`
    /// - `TOOLWRIGHT_CACHE_MAX_SIZE`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        fn parse<T: std::str::FromStr>(key: &str, raw: String) -> Result<T, ConfigError> {
            raw.trim()
                .parse()
                .map_err(|_| ConfigError::ValidationError(format!("{key} is not a valid number: {raw}")))
        }

        if let Some(raw) = lookup("TOOLWRIGHT_MAX_ITERATIONS") {
            self.orchestrator.max_iterations = parse("TOOLWRIGHT_MAX_ITERATIONS", raw)?;
        }
        if let Some(raw) = lookup("TOOLWRIGHT_CACHE_TTL_SECS") {
            self.cache.default_ttl_secs = parse("TOOLWRIGHT_CACHE_TTL_SECS", raw)?;
        }
        if let Some(raw) = lookup("TOOLWRIGHT_CACHE_MAX_SIZE") {
            self.cache.max_size = parse("TOOLWRIGHT_CACHE_MAX_SIZE", raw)?;
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".toolwright")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.orchestrator.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "orchestrator.max_iterations must be at least 1".into(),
            ));
        }

        if !(0.0..=2.0).contains(&self.orchestrator.temperature) {
            return Err(ConfigError::ValidationError(
                "orchestrator.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.cache.max_size == 0 {
            return Err(ConfigError::ValidationError(
                "cache.max_size must be at least 1".into(),
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be at least 1".into(),
            ));
        }

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::ValidationError(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".into(),
            ));
        }

        let limits = std::iter::once(("default", &self.rate_limit.default)).chain(
            self.rate_limit
                .overrides
                .iter()
                .map(|(name, policy)| (name.as_str(), policy)),
        );
        for (name, policy) in limits {
            if policy.max_calls == 0 || policy.window_secs == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "rate_limit for '{name}' needs max_calls and window_secs >= 1"
                )));
            }
        }

        for (class, policy) in [
            ("read", &self.resilience.read),
            ("write", &self.resilience.write),
            ("default", &self.resilience.default),
        ] {
            let cb = &policy.circuit_breaker;
            if cb.failure_threshold == 0 || cb.success_threshold == 0 || cb.half_open_max_calls == 0
            {
                return Err(ConfigError::ValidationError(format!(
                    "resilience.{class}.circuit_breaker thresholds must be at least 1"
                )));
            }
            if policy.bulkhead.max_concurrent == 0 {
                return Err(ConfigError::ValidationError(format!(
                    "resilience.{class}.bulkhead.max_concurrent must be at least 1"
                )));
            }
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `config init`).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
