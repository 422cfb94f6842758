//! Streaming events.
//!
//! One envelope for everything a streaming consumer sees. Events are
//! ordered; consumers must not assume a fixed number of tool events per
//! request.

use serde::{Deserialize, Serialize};
use toolwright_core::{ToolErrorKind, ToolResult, Usage};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Partial answer text.
    Content { text: String },

    /// A tool is about to run.
    ToolStart {
        name: String,
        parameters: serde_json::Value,
    },

    /// A tool finished successfully.
    ToolResult {
        name: String,
        result: serde_json::Value,
        execution_time_ms: u64,
        #[serde(default)]
        cache_hit: bool,
    },

    /// A tool failed or was rejected.
    ToolError {
        name: String,
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_kind: Option<ToolErrorKind>,
    },

    /// Totals for one batch of tool calls. `usage` holds the model tokens
    /// spent since the previous metrics event, when the provider reports them.
    Metrics {
        successful_tools: u32,
        failed_tools: u32,
        total_execution_time_ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },

    /// The stream ended early.
    Error { message: String },
}

impl StreamEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Content { .. } => "content",
            Self::ToolStart { .. } => "tool_start",
            Self::ToolResult { .. } => "tool_result",
            Self::ToolError { .. } => "tool_error",
            Self::Metrics { .. } => "metrics",
            Self::Error { .. } => "error",
        }
    }

    /// `ToolResult` or `ToolError` for a finished execution.
    pub fn from_tool_result(result: &ToolResult) -> Self {
        if result.success {
            Self::ToolResult {
                name: result.tool_name.clone(),
                result: result.data.clone().unwrap_or(serde_json::Value::Null),
                execution_time_ms: result.execution_time_ms,
                cache_hit: result.cache_hit,
            }
        } else {
            Self::ToolError {
                name: result.tool_name.clone(),
                error: result.error.clone().unwrap_or_default(),
                error_kind: result.error_kind,
            }
        }
    }
}

/// Running totals for a `Metrics` event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ToolBatch {
    pub successful: u32,
    pub failed: u32,
    pub execution_time_ms: u64,
    pub usage: Option<Usage>,
}

impl ToolBatch {
    pub fn record(&mut self, result: &ToolResult) {
        if result.success {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
        self.execution_time_ms += result.execution_time_ms;
    }

    pub fn record_usage(&mut self, usage: &Usage) {
        self.usage.get_or_insert_with(Usage::default).add(usage);
    }

    /// No tool ran and no usage was reported.
    pub fn is_empty(&self) -> bool {
        self.successful + self.failed == 0 && self.usage.is_none()
    }

    pub fn to_event(self) -> StreamEvent {
        StreamEvent::Metrics {
            successful_tools: self.successful,
            failed_tools: self.failed,
            total_execution_time_ms: self.execution_time_ms,
            usage: self.usage,
        }
    }
}

/// Split answer text into word-sized fragments that concatenate back to it.
pub(crate) fn fragments(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for c in text.chars() {
        current.push(c);
        if c.is_whitespace() {
            out.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}
