//! Tool-call streaming for models with native function calling.
//!
//! Content deltas are forwarded as they arrive. Tool-call fragments are
//! accumulated by index; when the model finishes a turn with pending calls,
//! each call runs through the registry, its events are emitted, one metrics
//! event closes the batch, and a follow-up round begins with the results
//! appended to the conversation. Token usage reported at the end of a turn
//! rides on the next metrics event; a final turn with usage gets a metrics
//! event of its own.

use crate::parser::decode_parameters;
use crate::stream_event::{StreamEvent, ToolBatch};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use toolwright_core::{
    GenerateRequest, Message, MessageToolCall, ModelProvider, StructuredDelta, ToolErrorKind,
    ToolParams, Usage,
};
use toolwright_tools::ToolRegistry;
use tracing::{debug, info, warn};

/// A tool call being assembled from fragments.
#[derive(Debug, Default)]
struct CallAccumulator {
    id: String,
    name: String,
    arguments: String,
}

impl CallAccumulator {
    fn to_tool_call(&self) -> MessageToolCall {
        let id = if self.id.is_empty() {
            format!("call_{}", uuid::Uuid::new_v4().simple())
        } else {
            self.id.clone()
        };
        MessageToolCall {
            id,
            name: self.name.clone(),
            arguments: self.arguments.clone(),
        }
    }
}

/// What one model turn produced.
#[derive(Debug, Default)]
struct Turn {
    content: String,
    calls: Vec<MessageToolCall>,
    usage: Option<Usage>,
}

#[derive(Clone)]
pub struct ToolCallStreamer {
    provider: Arc<dyn ModelProvider>,
    registry: Arc<ToolRegistry>,
    max_tool_rounds: u32,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl ToolCallStreamer {
    pub fn new(provider: Arc<dyn ModelProvider>, registry: Arc<ToolRegistry>) -> Self {
        let config = registry.context().config.orchestrator.clone();
        Self {
            provider,
            registry,
            max_tool_rounds: config.max_tool_rounds,
            temperature: config.temperature,
            max_tokens: Some(config.max_tokens),
        }
    }

    pub fn with_max_tool_rounds(mut self, rounds: u32) -> Self {
        self.max_tool_rounds = rounds;
        self
    }

    /// Stream a conversation. The receiver closes when the model answers
    /// without tool calls, the round limit is hit, or the provider fails.
    pub fn stream(&self, messages: Vec<Message>) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(128);
        let this = self.clone();
        tokio::spawn(async move {
            this.drive(messages, tx).await;
        });
        rx
    }

    async fn drive(&self, mut messages: Vec<Message>, tx: mpsc::Sender<StreamEvent>) {
        let tools = self.registry.definitions();
        let mut rounds = 0u32;

        loop {
            let request = GenerateRequest::new(messages.clone(), self.temperature, self.max_tokens)
                .with_tools(tools.clone());

            let turn = match self.read_turn(request, &tx).await {
                Ok(turn) => turn,
                Err(message) => {
                    warn!(error = %message, "Structured stream failed");
                    let _ = tx.send(StreamEvent::Error { message }).await;
                    return;
                }
            };

            let mut batch = ToolBatch::default();
            if let Some(usage) = &turn.usage {
                batch.record_usage(usage);
            }

            if turn.calls.is_empty() {
                debug!(rounds, "Stream finished without further tool calls");
                if !batch.is_empty() {
                    let _ = tx.send(batch.to_event()).await;
                }
                return;
            }

            if rounds >= self.max_tool_rounds {
                if !batch.is_empty() && tx.send(batch.to_event()).await.is_err() {
                    return;
                }
                warn!(max_tool_rounds = self.max_tool_rounds, "Tool round limit reached");
                let _ = tx
                    .send(StreamEvent::Error {
                        message: format!(
                            "Stopped after reaching the maximum of {} tool rounds",
                            self.max_tool_rounds
                        ),
                    })
                    .await;
                return;
            }
            rounds += 1;

            info!(round = rounds, calls = turn.calls.len(), "Executing streamed tool calls");
            let mut assistant = Message::assistant(turn.content);
            assistant.tool_calls = turn.calls.clone();
            messages.push(assistant);

            for call in &turn.calls {
                let observation = match self.run_call(call, &mut batch, &tx).await {
                    Some(observation) => observation,
                    None => return,
                };
                messages.push(Message::tool_result(&call.id, observation));
            }

            if tx.send(batch.to_event()).await.is_err() {
                return;
            }
        }
    }

    /// Forward content and collect the turn's completed tool calls.
    async fn read_turn(
        &self,
        request: GenerateRequest,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Result<Turn, String> {
        let mut stream = self
            .provider
            .stream_structured(request)
            .await
            .map_err(|e| e.to_string())?;

        let mut turn = Turn::default();
        let mut accumulators: BTreeMap<usize, CallAccumulator> = BTreeMap::new();

        while let Some(delta) = stream.recv().await {
            match delta.map_err(|e| e.to_string())? {
                StructuredDelta::Content { text } => {
                    if text.is_empty() {
                        continue;
                    }
                    turn.content.push_str(&text);
                    if tx.send(StreamEvent::Content { text }).await.is_err() {
                        return Ok(Turn::default());
                    }
                }
                StructuredDelta::ToolCall(fragment) => {
                    let acc = accumulators.entry(fragment.index).or_default();
                    if let Some(id) = fragment.id {
                        acc.id = id;
                    }
                    if let Some(name) = fragment.name {
                        acc.name = name;
                    }
                    acc.arguments.push_str(&fragment.arguments);
                }
                StructuredDelta::Final { usage } => {
                    turn.usage = usage;
                    break;
                }
            }
        }

        turn.calls = accumulators.values().map(CallAccumulator::to_tool_call).collect();
        Ok(turn)
    }

    /// Run one accumulated call, emitting its events. Returns the
    /// observation for the conversation, or `None` once the receiver is gone.
    async fn run_call(
        &self,
        call: &MessageToolCall,
        batch: &mut ToolBatch,
        tx: &mpsc::Sender<StreamEvent>,
    ) -> Option<String> {
        if call.name.is_empty() {
            let result = toolwright_core::ToolResult::failure(
                "",
                ToolErrorKind::InvalidParameters,
                "tool call arrived without a name",
            );
            batch.record(&result);
            tx.send(StreamEvent::from_tool_result(&result)).await.ok()?;
            return Some(result.observation_text());
        }

        let parameters = decode_parameters(&call.arguments).unwrap_or_else(|| {
            warn!(tool = %call.name, "Unparseable tool-call arguments, using none");
            ToolParams::new()
        });

        tx.send(StreamEvent::ToolStart {
            name: call.name.clone(),
            parameters: serde_json::Value::Object(parameters.clone()),
        })
        .await
        .ok()?;

        let result = self.registry.execute_tool(&call.name, parameters, false).await;
        batch.record(&result);
        tx.send(StreamEvent::from_tool_result(&result)).await.ok()?;
        Some(result.observation_text())
    }
}
