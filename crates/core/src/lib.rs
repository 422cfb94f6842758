//! # Toolwright Core
//!
//! Domain types, traits, and error definitions for the Toolwright tool-calling
//! runtime. This crate has **no framework dependencies**: it defines the
//! domain model that every other crate implements against.
//!
//! ## Design Philosophy
//!
//! Every collaborator is a trait here. Implementations live in their
//! respective crates (or in the embedding application). This enables:
//! - Swapping model providers without touching the orchestration loop
//! - Easy testing with scripted/stub implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod error;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use error::{ProviderError, ToolError, ToolErrorKind};
pub use message::{Message, MessageToolCall, Role};
pub use provider::{
    GenerateRequest, ModelProvider, ProviderResponse, StructuredDelta, StructuredStream,
    TextStream, ToolCallDelta, ToolDefinition, Usage,
};
pub use tool::{
    CircuitState, FnTool, ParameterType, Tool, ToolAccess, ToolParameter, ToolParams, ToolResult,
    validate_parameters,
};
