//! Shared test helpers.

use std::collections::VecDeque;
use std::sync::Mutex;
use toolwright_core::{
    GenerateRequest, Message, MessageToolCall, ModelProvider, ProviderError, ProviderResponse,
    StructuredDelta, StructuredStream, Usage,
};

/// A mock provider that returns a sequence of scripted responses.
///
/// Each call to `generate` returns the next response. Once the script runs
/// out, the last response repeats when `repeat_last` is set; otherwise the
/// call fails with a network error.
pub struct SequentialMockProvider {
    responses: Vec<ProviderResponse>,
    repeat_last: bool,
    call_count: Mutex<usize>,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses,
            repeat_last: false,
            call_count: Mutex::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Reply with the given texts in order.
    pub fn texts(texts: &[&str]) -> Self {
        Self::new(texts.iter().map(|t| make_text_response(t)).collect())
    }

    /// Reply with the same text forever.
    pub fn repeating(text: &str) -> Self {
        let mut provider = Self::new(vec![make_text_response(text)]);
        provider.repeat_last = true;
        provider
    }

    pub fn call_count(&self) -> usize {
        *self.call_count.lock().unwrap()
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ModelProvider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn generate(&self, request: GenerateRequest) -> Result<ProviderResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let mut count = self.call_count.lock().unwrap();
        let index = *count;
        *count += 1;

        match self.responses.get(index) {
            Some(response) => Ok(response.clone()),
            None if self.repeat_last && !self.responses.is_empty() => {
                Ok(self.responses[self.responses.len() - 1].clone())
            }
            None => Err(ProviderError::Network(format!(
                "SequentialMockProvider: no more responses (call #{index}, have {})",
                self.responses.len()
            ))),
        }
    }
}

/// A provider whose structured stream replays scripted delta rounds.
pub struct ScriptedStreamProvider {
    rounds: Mutex<VecDeque<Vec<StructuredDelta>>>,
    requests: Mutex<Vec<GenerateRequest>>,
}

impl ScriptedStreamProvider {
    pub fn new(rounds: Vec<Vec<StructuredDelta>>) -> Self {
        Self {
            rounds: Mutex::new(rounds.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ModelProvider for ScriptedStreamProvider {
    fn name(&self) -> &str {
        "scripted_stream"
    }

    async fn generate(&self, _request: GenerateRequest) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::NotConfigured("streaming only".into()))
    }

    async fn stream_structured(
        &self,
        request: GenerateRequest,
    ) -> Result<StructuredStream, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let round = self
            .rounds
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ProviderError::StreamInterrupted("script exhausted".into()))?;

        let (tx, rx) = tokio::sync::mpsc::channel(round.len().max(1));
        for delta in round {
            tx.send(Ok(delta)).await.unwrap();
        }
        Ok(rx)
    }
}

/// Create a simple text response (no tool calls).
pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        message: Message::assistant(text),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
    }
}

/// Create a response with native tool calls and optional content.
pub fn make_tool_call_response(tool_calls: Vec<MessageToolCall>, content: &str) -> ProviderResponse {
    let mut response = make_text_response(content);
    response.message.tool_calls = tool_calls;
    response
}

/// Helper to create a native tool call.
pub fn make_tool_call(name: &str, args: serde_json::Value) -> MessageToolCall {
    MessageToolCall {
        id: format!("call_{name}"),
        name: name.to_string(),
        arguments: serde_json::to_string(&args).unwrap(),
    }
}

/// A tagged tool-call reply.
pub fn tagged_action(tool: &str, input: serde_json::Value) -> String {
    format!("<thought>Calling {tool}.</thought>\n<action>{tool}</action>\n<action_input>{input}</action_input>")
}
