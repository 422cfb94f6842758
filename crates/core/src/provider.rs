//! Model provider trait: the capability interface over LLM backends.
//!
//! A provider knows how to send a list of messages to a model and get text
//! back: as one response, as a stream of text fragments, or as a stream of
//! structured deltas (content + incremental native tool calls).
//!
//! Vendor integrations implement this trait; the orchestration core never
//! depends on a concrete vendor.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::message::{Message, MessageToolCall};

/// A request to a model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// The conversation messages
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic)
    #[serde(default)]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Tools the model may call natively (empty for text-protocol models)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

impl GenerateRequest {
    pub fn new(messages: Vec<Message>, temperature: f32, max_tokens: Option<u32>) -> Self {
        Self {
            messages,
            temperature,
            max_tokens,
            tools: Vec::new(),
        }
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

/// A tool definition sent to the LLM so it knows what tools it can call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// The tool name
    pub name: String,

    /// Description of what the tool does
    pub description: String,

    /// JSON Schema describing the tool's parameters
    pub parameters: serde_json::Value,
}

/// A complete (non-streaming) response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The generated message (content plus optional native tool calls)
    pub message: Message,

    /// Token usage statistics
    pub usage: Option<Usage>,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    /// Accumulate another usage report into this one.
    pub fn add(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// A fragment of a native tool call.
///
/// Fragments sharing an `index` belong to the same call. `id` and `name`
/// usually arrive on the first fragment only; `arguments` is a piece of a
/// JSON string that must be concatenated in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: String,
}

/// One item of a structured stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StructuredDelta {
    /// Partial text content.
    Content { text: String },
    /// Partial native tool call.
    ToolCall(ToolCallDelta),
    /// The model finished this turn.
    Final {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
}

/// Receiver half of a text stream.
pub type TextStream = mpsc::Receiver<std::result::Result<String, ProviderError>>;

/// Receiver half of a structured stream.
pub type StructuredStream = mpsc::Receiver<std::result::Result<StructuredDelta, ProviderError>>;

/// The model capability interface.
///
/// All three operations may suspend. Streams are finite and not restartable.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// A human-readable name for this provider.
    fn name(&self) -> &str;

    /// Send a request and get a complete response.
    async fn generate(
        &self,
        request: GenerateRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Send a request and get a stream of text fragments.
    ///
    /// Default implementation calls `generate()` and yields its content as a
    /// single fragment.
    async fn stream(
        &self,
        request: GenerateRequest,
    ) -> std::result::Result<TextStream, ProviderError> {
        let response = self.generate(request).await?;
        let (tx, rx) = mpsc::channel(1);
        let _ = tx.send(Ok(response.message.content)).await;
        Ok(rx)
    }

    /// Send a request and get a stream of structured deltas.
    ///
    /// Default implementation calls `generate()` and replays the response as
    /// one content delta, one complete delta per tool call and a final marker.
    async fn stream_structured(
        &self,
        request: GenerateRequest,
    ) -> std::result::Result<StructuredStream, ProviderError> {
        let response = self.generate(request).await?;
        let ProviderResponse { message, usage } = response;
        let (tx, rx) = mpsc::channel(message.tool_calls.len() + 2);

        if !message.content.is_empty() {
            let _ = tx
                .send(Ok(StructuredDelta::Content {
                    text: message.content,
                }))
                .await;
        }
        for (index, MessageToolCall { id, name, arguments }) in
            message.tool_calls.into_iter().enumerate()
        {
            let _ = tx
                .send(Ok(StructuredDelta::ToolCall(ToolCallDelta {
                    index,
                    id: Some(id),
                    name: Some(name),
                    arguments,
                })))
                .await;
        }
        let _ = tx.send(Ok(StructuredDelta::Final { usage })).await;
        Ok(rx)
    }
}
