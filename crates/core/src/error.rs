//! Error types for the Toolwright domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error type.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

/// Failure raised by a tool implementation.
#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Permission denied: {tool_name}: {reason}")]
    PermissionDenied { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    /// The call was stopped before the tool finished. Never retried.
    #[error("Tool execution cancelled: {tool_name}")]
    Cancelled { tool_name: String },
}

impl ToolError {
    /// The stable condition code for this failure.
    pub fn kind(&self) -> ToolErrorKind {
        match self {
            Self::NotFound(_) => ToolErrorKind::NotFound,
            Self::ExecutionFailed { .. } => ToolErrorKind::ExecutionFailed,
            Self::Timeout { .. } => ToolErrorKind::Timeout,
            Self::PermissionDenied { .. } => ToolErrorKind::PermissionDenied,
            Self::InvalidArguments(_) => ToolErrorKind::InvalidParameters,
            Self::Cancelled { .. } => ToolErrorKind::Cancelled,
        }
    }
}

/// Stable condition codes attached to failed [`ToolResult`](crate::tool::ToolResult)s.
///
/// Messages may be localized by callers; these codes never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// Unknown tool name.
    NotFound,
    /// The tool is registered but disabled.
    Disabled,
    /// A required parameter is missing or a value is outside its enum.
    InvalidParameters,
    /// The tool needs explicit confirmation and none was given.
    ConfirmationRequired,
    /// The per-tool rate limit is exhausted.
    RateLimited,
    /// The circuit breaker rejected the call.
    CircuitOpen,
    /// No bulkhead slot became free within the acquisition timeout.
    BulkheadTimeout,
    /// The tool function itself failed.
    ExecutionFailed,
    /// The tool function timed out.
    Timeout,
    /// The tool refused the operation.
    PermissionDenied,
    /// The execution was stopped before the tool finished.
    Cancelled,
}

impl ToolErrorKind {
    /// Rate and capacity failures; the caller may retry after a delay.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::CircuitOpen | Self::BulkheadTimeout
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::Disabled => "disabled",
            Self::InvalidParameters => "invalid_parameters",
            Self::ConfirmationRequired => "confirmation_required",
            Self::RateLimited => "rate_limited",
            Self::CircuitOpen => "circuit_open",
            Self::BulkheadTimeout => "bulkhead_timeout",
            Self::ExecutionFailed => "execution_failed",
            Self::Timeout => "timeout",
            Self::PermissionDenied => "permission_denied",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
