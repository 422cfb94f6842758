//! The orchestration layer of Toolwright.
//!
//! Two ways to drive tools from a model:
//!
//! - **ReAct** ([`ReactOrchestrator`]) for models without native tool calling:
//!   the model writes `<thought>/<action>/<action_input>` (or the line-oriented
//!   `Action:` form), the [`ResponseParser`] extracts the call, the registry
//!   runs it, and the result goes back as an observation until the model
//!   gives a final answer or the iteration cap is hit.
//! - **Native streaming** ([`ToolCallStreamer`]) for models that emit
//!   structured tool-call deltas.
//!
//! Both report progress through the same [`StreamEvent`] envelope.

pub mod parser;
pub mod prompt;
pub mod react;
pub mod stream_event;
pub mod streaming;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use parser::{ParsedResponse, ParsedToolCall, ParserStats, ResponseFormat, ResponseParser};
pub use react::{LoopOutcome, OrchestratorMetrics, ReactOrchestrator, ReactResult, ReactStep};
pub use stream_event::{StreamEvent, ToolBatch};
pub use streaming::ToolCallStreamer;
