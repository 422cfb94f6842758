//! Tool trait and the parameter model it is described by.
//!
//! Tools are what the model is allowed to invoke. Each one declares its
//! parameters, whether it only reads data or mutates it, and whether it needs
//! an explicit confirmation before it may run.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::{ToolError, ToolErrorKind};
use crate::provider::ToolDefinition;

/// Named parameters passed to a tool.
pub type ToolParams = serde_json::Map<String, serde_json::Value>;

/// JSON type tag of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ParameterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

/// Declaration of one tool parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParameterType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub enum_values: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    /// JSON Schema for array items.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<serde_json::Value>,
}

impl ToolParameter {
    pub fn new(name: impl Into<String>, param_type: ParameterType) -> Self {
        Self {
            name: name.into(),
            param_type,
            description: String::new(),
            required: false,
            enum_values: None,
            default: None,
            items: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn one_of(mut self, values: Vec<serde_json::Value>) -> Self {
        self.enum_values = Some(values);
        self
    }

    pub fn with_default(mut self, value: serde_json::Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_items(mut self, schema: serde_json::Value) -> Self {
        self.items = Some(schema);
        self
    }

    fn schema(&self) -> serde_json::Value {
        let mut schema = serde_json::Map::new();
        schema.insert("type".into(), self.param_type.as_str().into());
        if !self.description.is_empty() {
            schema.insert("description".into(), self.description.clone().into());
        }
        if let Some(values) = &self.enum_values {
            schema.insert("enum".into(), serde_json::Value::Array(values.clone()));
        }
        if let Some(default) = &self.default {
            schema.insert("default".into(), default.clone());
        }
        if let Some(items) = &self.items {
            schema.insert("items".into(), items.clone());
        }
        serde_json::Value::Object(schema)
    }
}

/// Whether a tool only reads state, mutates it, or is unclassified.
///
/// Read-only tools are cacheable; write tools invalidate the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolAccess {
    ReadOnly,
    Write,
    #[default]
    Unclassified,
}

/// Snapshot of a circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// The outcome of one `execute_tool` call.
///
/// Every failure path produces a fully-populated result; nothing is thrown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_name: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ToolErrorKind>,
    pub execution_time_ms: u64,
    pub retry_count: u32,
    pub cache_hit: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub circuit_state: Option<CircuitState>,
    pub bulkhead_queue_depth: usize,
}

impl ToolResult {
    pub fn ok(tool_name: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: true,
            data: Some(data),
            error: None,
            error_kind: None,
            execution_time_ms: 0,
            retry_count: 0,
            cache_hit: false,
            cache_key: None,
            circuit_state: None,
            bulkhead_queue_depth: 0,
        }
    }

    pub fn failure(
        tool_name: impl Into<String>,
        kind: ToolErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            success: false,
            data: None,
            error: Some(message.into()),
            error_kind: Some(kind),
            execution_time_ms: 0,
            retry_count: 0,
            cache_hit: false,
            cache_key: None,
            circuit_state: None,
            bulkhead_queue_depth: 0,
        }
    }

    /// Render the result as the text the model sees.
    pub fn observation_text(&self) -> String {
        if self.success {
            match &self.data {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(value) => value.to_string(),
                None => "null".to_string(),
            }
        } else {
            let kind = self.error_kind.map(|k| k.as_str()).unwrap_or("unknown");
            format!(
                "Error ({kind}): {}",
                self.error.as_deref().unwrap_or("tool failed")
            )
        }
    }
}

/// The core Tool trait.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool (e.g., "get_invoice", "create_payment").
    fn name(&self) -> &str;

    /// A description of what this tool does (sent to the LLM).
    fn description(&self) -> &str;

    /// Ordered parameter declarations.
    fn parameters(&self) -> Vec<ToolParameter> {
        Vec::new()
    }

    fn access(&self) -> ToolAccess {
        ToolAccess::Unclassified
    }

    /// Free-form grouping label (e.g. "invoices").
    fn category(&self) -> &str {
        "general"
    }

    fn requires_confirmation(&self) -> bool {
        false
    }

    /// Execute the tool with already-validated parameters.
    async fn execute(&self, params: ToolParams) -> std::result::Result<serde_json::Value, ToolError>;

    /// JSON Schema describing this tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value {
        let params = self.parameters();
        let properties: serde_json::Map<String, serde_json::Value> = params
            .iter()
            .map(|p| (p.name.clone(), p.schema()))
            .collect();
        let required: Vec<serde_json::Value> = params
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.clone().into())
            .collect();
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    /// Convert this tool into a ToolDefinition for sending to the LLM.
    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// Check `params` against the declarations, filling in defaults.
///
/// Missing required parameters (or explicit nulls) and values outside a
/// declared enum are rejected.
pub fn validate_parameters(
    declared: &[ToolParameter],
    params: &mut ToolParams,
) -> std::result::Result<(), ToolError> {
    let mut missing = Vec::new();

    for decl in declared {
        match params.get(&decl.name) {
            None | Some(serde_json::Value::Null) => {
                if let Some(default) = &decl.default {
                    params.insert(decl.name.clone(), default.clone());
                } else if decl.required {
                    missing.push(decl.name.as_str());
                }
            }
            Some(value) => {
                if let Some(allowed) = &decl.enum_values
                    && !allowed.contains(value)
                {
                    return Err(ToolError::InvalidArguments(format!(
                        "parameter '{}' must be one of {}",
                        decl.name,
                        serde_json::Value::Array(allowed.clone())
                    )));
                }
            }
        }
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ToolError::InvalidArguments(format!(
            "missing required parameter(s): {}",
            missing.join(", ")
        )))
    }
}

type ToolFuture = Pin<Box<dyn Future<Output = std::result::Result<serde_json::Value, ToolError>> + Send>>;
type ToolFn = dyn Fn(ToolParams) -> ToolFuture + Send + Sync;

/// A tool backed by an async closure.
#[derive(Clone)]
pub struct FnTool {
    name: String,
    description: String,
    parameters: Vec<ToolParameter>,
    access: ToolAccess,
    category: String,
    requires_confirmation: bool,
    func: Arc<ToolFn>,
}

impl FnTool {
    pub fn new<F, Fut>(name: impl Into<String>, description: impl Into<String>, func: F) -> Self
    where
        F: Fn(ToolParams) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<serde_json::Value, ToolError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            access: ToolAccess::Unclassified,
            category: "general".into(),
            requires_confirmation: false,
            func: Arc::new(move |params| Box::pin(func(params))),
        }
    }

    pub fn with_parameter(mut self, parameter: ToolParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_access(mut self, access: ToolAccess) -> Self {
        self.access = access;
        self
    }

    pub fn read_only(self) -> Self {
        self.with_access(ToolAccess::ReadOnly)
    }

    pub fn write(self) -> Self {
        self.with_access(ToolAccess::Write)
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn requiring_confirmation(mut self) -> Self {
        self.requires_confirmation = true;
        self
    }
}

impl std::fmt::Debug for FnTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnTool")
            .field("name", &self.name)
            .field("access", &self.access)
            .field("category", &self.category)
            .finish()
    }
}

#[async_trait]
impl Tool for FnTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Vec<ToolParameter> {
        self.parameters.clone()
    }

    fn access(&self) -> ToolAccess {
        self.access
    }

    fn category(&self) -> &str {
        &self.category
    }

    fn requires_confirmation(&self) -> bool {
        self.requires_confirmation
    }

    async fn execute(&self, params: ToolParams) -> std::result::Result<serde_json::Value, ToolError> {
        (self.func)(params).await
    }
}
