//! ReAct orchestrator: Thought → Action → Observation until a final answer.
//!
//! Each iteration sends the conversation to the model, parses the reply and,
//! for a tool call, runs the tool through the registry (never confirming on
//! the user's behalf) and feeds the result back as an observation.
//! Iterations are strictly sequential. Hitting the iteration cap, a provider
//! failure or cancellation is reported in the answer text; nothing escapes
//! as an error.

use crate::parser::{ParsedResponse, ResponseParser};
use crate::prompt;
use crate::stream_event::{StreamEvent, ToolBatch, fragments};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use toolwright_core::{GenerateRequest, Message, ModelProvider, ToolParams, ToolResult, Usage};
use toolwright_tools::ToolRegistry;
use tracing::{debug, info, warn};

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopOutcome {
    FinalAnswer,
    IterationLimit,
    Cancelled,
    ProviderFailed,
}

/// One tool call made during a run.
#[derive(Debug, Clone, Serialize)]
pub struct ReactStep {
    pub iteration: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thought: Option<String>,
    pub tool_name: String,
    pub parameters: ToolParams,
    pub result: ToolResult,
}

/// The result of a ReAct execution.
#[derive(Debug, Clone, Serialize)]
pub struct ReactResult {
    pub answer: String,
    pub outcome: LoopOutcome,
    /// Model calls made.
    pub iterations: u32,
    pub steps: Vec<ReactStep>,
    /// Tokens over every model call, if the provider reported any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ReactResult {
    pub fn tool_batch(&self) -> ToolBatch {
        let mut batch = ToolBatch::default();
        for step in &self.steps {
            batch.record(&step.result);
        }
        batch.usage = self.usage;
        batch
    }
}

/// Lifetime counters for an orchestrator and its clones.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct OrchestratorMetrics {
    pub executions: u64,
    pub tool_calls: u64,
    pub tool_successes: u64,
    pub tool_failures: u64,
    pub iteration_limit_hits: u64,
    pub cancellations: u64,
    pub provider_failures: u64,
    pub total_iterations: u64,
    pub average_iterations: f64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Default)]
struct Counters {
    executions: AtomicU64,
    tool_calls: AtomicU64,
    tool_successes: AtomicU64,
    tool_failures: AtomicU64,
    iteration_limit_hits: AtomicU64,
    cancellations: AtomicU64,
    provider_failures: AtomicU64,
    total_iterations: AtomicU64,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    total_tokens: AtomicU64,
}

const CANCELLED_ANSWER: &str = "The request was cancelled before a final answer was produced.";

#[derive(Clone)]
pub struct ReactOrchestrator {
    provider: Arc<dyn ModelProvider>,
    registry: Arc<ToolRegistry>,
    parser: Arc<ResponseParser>,
    counters: Arc<Counters>,
    max_iterations: u32,
    temperature: f32,
    max_tokens: Option<u32>,
}

impl ReactOrchestrator {
    /// Limits come from the registry's configuration.
    pub fn new(provider: Arc<dyn ModelProvider>, registry: Arc<ToolRegistry>) -> Self {
        let config = registry.context().config.orchestrator.clone();
        Self {
            provider,
            registry,
            parser: Arc::new(ResponseParser::new()),
            counters: Arc::new(Counters::default()),
            max_iterations: config.max_iterations.max(1),
            temperature: config.temperature,
            max_tokens: Some(config.max_tokens),
        }
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max.max(1);
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn parser(&self) -> &ResponseParser {
        &self.parser
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    /// Run a request and return the answer text.
    pub async fn execute(&self, request: &str) -> String {
        self.run(request, &[], None, None).await.answer
    }

    /// Run a request after prior conversation turns.
    pub async fn execute_with_history(&self, request: &str, history: &[Message]) -> String {
        self.run(request, history, None, None).await.answer
    }

    /// Run a request and return the full trace.
    pub async fn execute_detailed(&self, request: &str, history: &[Message]) -> ReactResult {
        self.run(request, history, None, None).await
    }

    /// Like [`execute_detailed`](Self::execute_detailed), stopping early when
    /// `cancel` fires. Cancellation is observed between iterations and while
    /// waiting on the model; a tool already running is allowed to finish.
    pub async fn execute_cancellable(
        &self,
        request: &str,
        history: &[Message],
        cancel: &CancellationToken,
    ) -> ReactResult {
        self.run(request, history, Some(cancel), None).await
    }

    /// Stream the final answer as text fragments.
    ///
    /// Tool iterations run to completion before the first fragment is sent.
    pub fn stream(&self, request: &str) -> mpsc::Receiver<String> {
        let (tx, rx) = mpsc::channel(64);
        let this = self.clone();
        let request = request.to_string();

        tokio::spawn(async move {
            let result = this.run(&request, &[], None, None).await;
            for fragment in fragments(&result.answer) {
                if tx.send(fragment).await.is_err() {
                    break;
                }
            }
        });

        rx
    }

    /// Stream tool events as they happen, one metrics event for the tool
    /// calls made and tokens used, then the answer as content fragments.
    pub fn stream_events(&self, request: &str, history: Vec<Message>) -> mpsc::Receiver<StreamEvent> {
        let (tx, rx) = mpsc::channel(128);
        let this = self.clone();
        let request = request.to_string();

        tokio::spawn(async move {
            let result = this.run(&request, &history, None, Some(&tx)).await;

            let batch = result.tool_batch();
            if !batch.is_empty() && tx.send(batch.to_event()).await.is_err() {
                return;
            }

            if result.outcome == LoopOutcome::ProviderFailed {
                let _ = tx
                    .send(StreamEvent::Error {
                        message: result.answer,
                    })
                    .await;
                return;
            }

            for text in fragments(&result.answer) {
                if tx.send(StreamEvent::Content { text }).await.is_err() {
                    break;
                }
            }
        });

        rx
    }

    pub fn metrics(&self) -> OrchestratorMetrics {
        let c = &self.counters;
        let executions = c.executions.load(Ordering::Relaxed);
        let total_iterations = c.total_iterations.load(Ordering::Relaxed);
        OrchestratorMetrics {
            executions,
            tool_calls: c.tool_calls.load(Ordering::Relaxed),
            tool_successes: c.tool_successes.load(Ordering::Relaxed),
            tool_failures: c.tool_failures.load(Ordering::Relaxed),
            iteration_limit_hits: c.iteration_limit_hits.load(Ordering::Relaxed),
            cancellations: c.cancellations.load(Ordering::Relaxed),
            provider_failures: c.provider_failures.load(Ordering::Relaxed),
            total_iterations,
            average_iterations: if executions == 0 {
                0.0
            } else {
                total_iterations as f64 / executions as f64
            },
            prompt_tokens: c.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: c.completion_tokens.load(Ordering::Relaxed),
            total_tokens: c.total_tokens.load(Ordering::Relaxed),
        }
    }

    // ── Loop ──────────────────────────────────────────────────────────────

    async fn run(
        &self,
        request: &str,
        history: &[Message],
        cancel: Option<&CancellationToken>,
        events: Option<&mpsc::Sender<StreamEvent>>,
    ) -> ReactResult {
        self.counters.executions.fetch_add(1, Ordering::Relaxed);

        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(Message::system(prompt::system_prompt(
            &self.registry.catalogue(),
        )));
        messages.extend(history.iter().cloned());
        messages.push(Message::user(request));

        let mut steps = Vec::new();
        let mut usage: Option<Usage> = None;
        let mut last_content = String::new();

        info!(
            provider = %self.provider.name(),
            max_iterations = self.max_iterations,
            "ReAct loop starting"
        );

        for iteration in 1..=self.max_iterations {
            if cancel.is_some_and(|c| c.is_cancelled()) {
                return self.finish(LoopOutcome::Cancelled, CANCELLED_ANSWER.into(), iteration - 1, steps, usage);
            }

            let request = GenerateRequest::new(messages.clone(), self.temperature, self.max_tokens);
            let response = match cancel {
                Some(token) => tokio::select! {
                    _ = token.cancelled() => {
                        return self.finish(LoopOutcome::Cancelled, CANCELLED_ANSWER.into(), iteration, steps, usage);
                    }
                    response = self.provider.generate(request) => response,
                },
                None => self.provider.generate(request).await,
            };

            let content = match response {
                Ok(response) => {
                    if let Some(reported) = &response.usage {
                        usage.get_or_insert_with(Usage::default).add(reported);
                    }
                    response.message.content
                }
                Err(e) => {
                    warn!(iteration, error = %e, "Model call failed");
                    return self.finish(
                        LoopOutcome::ProviderFailed,
                        format!("The model provider failed: {e}"),
                        iteration,
                        steps,
                        usage,
                    );
                }
            };

            let call = match self.parser.parse(&content) {
                ParsedResponse::FinalAnswer { content: answer, .. } => {
                    return self.finish(LoopOutcome::FinalAnswer, answer, iteration, steps, usage);
                }
                ParsedResponse::ToolCall(call) => call,
            };

            debug!(iteration, tool = %call.tool_name, "Model requested tool");
            emit(
                events,
                StreamEvent::ToolStart {
                    name: call.tool_name.clone(),
                    parameters: serde_json::Value::Object(call.parameters.clone()),
                },
            )
            .await;

            let result = self
                .registry
                .execute_tool(&call.tool_name, call.parameters.clone(), false)
                .await;

            self.counters.tool_calls.fetch_add(1, Ordering::Relaxed);
            if result.success {
                self.counters.tool_successes.fetch_add(1, Ordering::Relaxed);
            } else {
                self.counters.tool_failures.fetch_add(1, Ordering::Relaxed);
            }
            emit(events, StreamEvent::from_tool_result(&result)).await;

            messages.push(Message::assistant(content.clone()));
            messages.push(Message::user(prompt::observation(&result)));
            steps.push(ReactStep {
                iteration,
                thought: call.thought,
                tool_name: call.tool_name,
                parameters: call.parameters,
                result,
            });
            last_content = content;
        }

        warn!(max_iterations = self.max_iterations, "ReAct loop hit the iteration limit");
        let answer = format!(
            "Stopped after reaching the maximum of {} iterations without a final answer. \
             Last response: {}",
            self.max_iterations,
            last_content.trim()
        );
        self.finish(LoopOutcome::IterationLimit, answer, self.max_iterations, steps, usage)
    }

    fn finish(
        &self,
        outcome: LoopOutcome,
        answer: String,
        iterations: u32,
        steps: Vec<ReactStep>,
        usage: Option<Usage>,
    ) -> ReactResult {
        let c = &self.counters;
        c.total_iterations
            .fetch_add(u64::from(iterations), Ordering::Relaxed);
        if let Some(usage) = &usage {
            c.prompt_tokens
                .fetch_add(u64::from(usage.prompt_tokens), Ordering::Relaxed);
            c.completion_tokens
                .fetch_add(u64::from(usage.completion_tokens), Ordering::Relaxed);
            c.total_tokens
                .fetch_add(u64::from(usage.total_tokens), Ordering::Relaxed);
        }
        match outcome {
            LoopOutcome::FinalAnswer => {}
            LoopOutcome::IterationLimit => {
                c.iteration_limit_hits.fetch_add(1, Ordering::Relaxed);
            }
            LoopOutcome::Cancelled => {
                c.cancellations.fetch_add(1, Ordering::Relaxed);
            }
            LoopOutcome::ProviderFailed => {
                c.provider_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
        info!(
            ?outcome,
            iterations,
            tool_calls = steps.len(),
            total_tokens = usage.map_or(0, |u| u.total_tokens),
            "ReAct loop finished"
        );
        ReactResult {
            answer,
            outcome,
            iterations,
            steps,
            usage,
        }
    }
}

async fn emit(events: Option<&mpsc::Sender<StreamEvent>>, event: StreamEvent) {
    if let Some(tx) = events {
        let _ = tx.send(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{SequentialMockProvider, tagged_action};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;
    use toolwright_config::AppConfig;
    use toolwright_core::{FnTool, Role, ToolErrorKind};
    use toolwright_tools::ToolContext;

    fn registry_with_counter(calls: Arc<AtomicUsize>) -> Arc<ToolRegistry> {
        let registry = ToolRegistry::new(ToolContext::new(AppConfig::default()));
        registry.register(
            FnTool::new("get_count", "Count the user's items", move |_| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({"count": 42}))
                }
            })
            .read_only(),
        );
        Arc::new(registry)
    }

    fn orchestrator(provider: Arc<SequentialMockProvider>, registry: Arc<ToolRegistry>) -> ReactOrchestrator {
        ReactOrchestrator::new(provider, registry)
    }

    #[tokio::test]
    async fn tool_call_then_final_answer() {
        let calls = Arc::new(AtomicUsize::new(0));
        let provider = Arc::new(SequentialMockProvider::texts(&[
            &tagged_action("get_count", json!({})),
            "<final_answer>You have 42 items</final_answer>",
        ]));
        let agent = orchestrator(provider.clone(), registry_with_counter(calls.clone()));

        let result = agent.execute_detailed("How many items do I have?", &[]).await;
        assert_eq!(result.answer, "You have 42 items");
        assert_eq!(result.outcome, LoopOutcome::FinalAnswer);
        assert_eq!(result.iterations, 2);
        assert_eq!(result.steps.len(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // second request carries the observation
        let requests = provider.requests();
        let last = requests[1].messages.last().unwrap();
        assert_eq!(last.role, Role::User);
        assert_eq!(last.content, r#"Observation: {"count":42}"#);
        assert_eq!(requests[1].temperature, 0.0);
        assert!(requests[0].messages[0].content.contains("get_count"));
    }

    #[tokio::test]
    async fn token_usage_is_summed_over_model_calls() {
        let provider = Arc::new(SequentialMockProvider::texts(&[
            &tagged_action("get_count", json!({})),
            "<final_answer>42</final_answer>",
        ]));
        let agent = orchestrator(provider, registry_with_counter(Arc::new(AtomicUsize::new(0))));

        let result = agent.execute_detailed("How many?", &[]).await;
        assert_eq!(
            result.usage,
            Some(Usage {
                prompt_tokens: 20,
                completion_tokens: 10,
                total_tokens: 30,
            })
        );
        assert_eq!(result.tool_batch().usage, result.usage);

        agent.execute("again").await;
        let metrics = agent.metrics();
        assert_eq!(metrics.prompt_tokens, 30);
        assert_eq!(metrics.completion_tokens, 15);
        assert_eq!(metrics.total_tokens, 45);
    }

    #[tokio::test]
    async fn unreported_usage_stays_empty() {
        let mut silent = crate::test_helpers::make_text_response("Hi");
        silent.usage = None;
        let provider = Arc::new(SequentialMockProvider::new(vec![silent]));
        let agent = orchestrator(provider, registry_with_counter(Arc::new(AtomicUsize::new(0))));

        let result = agent.execute_detailed("hello", &[]).await;
        assert!(result.usage.is_none());
        assert!(result.tool_batch().is_empty());
        assert_eq!(agent.metrics().total_tokens, 0);
    }

    #[tokio::test]
    async fn plain_reply_is_the_answer() {
        let provider = Arc::new(SequentialMockProvider::texts(&["Hello!"]));
        let agent = orchestrator(provider, registry_with_counter(Arc::new(AtomicUsize::new(0))));
        assert_eq!(agent.execute("hi").await, "Hello!");
    }

    #[tokio::test]
    async fn iteration_limit_names_the_limit() {
        let provider = Arc::new(SequentialMockProvider::repeating(&tagged_action(
            "get_count",
            json!({}),
        )));
        let agent = orchestrator(provider.clone(), registry_with_counter(Arc::new(AtomicUsize::new(0))))
            .with_max_iterations(2);

        let result = agent.execute_detailed("loop forever", &[]).await;
        assert_eq!(result.outcome, LoopOutcome::IterationLimit);
        assert!(result.answer.contains("maximum of 2 iterations"));
        assert!(result.answer.contains("<action>get_count</action>"));
        assert_eq!(provider.call_count(), 2);

        let metrics = agent.metrics();
        assert_eq!(metrics.iteration_limit_hits, 1);
        assert_eq!(metrics.tool_calls, 2);
        // the second call is a cache hit
        assert_eq!(metrics.tool_successes, 2);
    }

    #[tokio::test]
    async fn tool_failures_become_observations() {
        let provider = Arc::new(SequentialMockProvider::texts(&[
            &tagged_action("missing_tool", json!({"x": 1})),
            "<final_answer>Sorry, I can't do that.</final_answer>",
        ]));
        let agent = orchestrator(provider.clone(), registry_with_counter(Arc::new(AtomicUsize::new(0))));

        let result = agent.execute_detailed("do it", &[]).await;
        assert_eq!(result.outcome, LoopOutcome::FinalAnswer);
        assert_eq!(result.steps[0].result.error_kind, Some(ToolErrorKind::NotFound));
        let requests = provider.requests();
        let observation = &requests[1].messages.last().unwrap().content;
        assert!(observation.starts_with("Observation: Error (not_found)"));
        assert_eq!(agent.metrics().tool_failures, 1);
    }

    #[tokio::test]
    async fn confirmation_tools_never_run() {
        let registry = ToolRegistry::new(ToolContext::default());
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = ran.clone();
        registry.register(
            FnTool::new("delete_invoice", "Delete an invoice", move |_| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(json!("deleted"))
                }
            })
            .requiring_confirmation(),
        );
        let provider = Arc::new(SequentialMockProvider::texts(&[
            &tagged_action("delete_invoice", json!({"id": "INV-1"})),
            "<final_answer>Please confirm the deletion.</final_answer>",
        ]));
        let agent = ReactOrchestrator::new(provider, Arc::new(registry));

        let result = agent.execute_detailed("delete INV-1", &[]).await;
        assert_eq!(
            result.steps[0].result.error_kind,
            Some(ToolErrorKind::ConfirmationRequired)
        );
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn provider_failure_is_reported() {
        let provider = Arc::new(SequentialMockProvider::texts(&[]));
        let agent = orchestrator(provider, registry_with_counter(Arc::new(AtomicUsize::new(0))));
        let result = agent.execute_detailed("hi", &[]).await;
        assert_eq!(result.outcome, LoopOutcome::ProviderFailed);
        assert!(result.answer.contains("model provider failed"));
        assert_eq!(agent.metrics().provider_failures, 1);
    }

    #[tokio::test]
    async fn history_precedes_request() {
        let provider = Arc::new(SequentialMockProvider::texts(&["<final_answer>Blue</final_answer>"]));
        let agent = orchestrator(provider.clone(), registry_with_counter(Arc::new(AtomicUsize::new(0))));
        let history = vec![
            Message::user("My favourite colour is blue."),
            Message::assistant("Noted."),
        ];

        let answer = agent.execute_with_history("What is my favourite colour?", &history).await;
        assert_eq!(answer, "Blue");

        let requests = provider.requests();
        let messages = &requests[0].messages;
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].content, "My favourite colour is blue.");
        assert_eq!(messages[3].content, "What is my favourite colour?");
    }

    #[tokio::test]
    async fn cancelled_token_stops_before_model_call() {
        let provider = Arc::new(SequentialMockProvider::texts(&["never used"]));
        let agent = orchestrator(provider.clone(), registry_with_counter(Arc::new(AtomicUsize::new(0))));
        let token = CancellationToken::new();
        token.cancel();

        let result = agent.execute_cancellable("hi", &[], &token).await;
        assert_eq!(result.outcome, LoopOutcome::Cancelled);
        assert_eq!(result.iterations, 0);
        assert_eq!(provider.call_count(), 0);
        assert_eq!(agent.metrics().cancellations, 1);
    }

    #[tokio::test]
    async fn stream_yields_answer_fragments() {
        let provider = Arc::new(SequentialMockProvider::texts(&[
            &tagged_action("get_count", json!({})),
            "<final_answer>You have 42 items</final_answer>",
        ]));
        let agent = orchestrator(provider, registry_with_counter(Arc::new(AtomicUsize::new(0))));

        let mut rx = agent.stream("How many?");
        let mut fragments = Vec::new();
        while let Some(fragment) = rx.recv().await {
            fragments.push(fragment);
        }
        assert!(fragments.len() > 1);
        assert_eq!(fragments.concat(), "You have 42 items");
    }

    #[tokio::test]
    async fn stream_events_surface_tool_activity() {
        let provider = Arc::new(SequentialMockProvider::texts(&[
            &tagged_action("get_count", json!({"folder": "inbox"})),
            "<final_answer>You have 42 items</final_answer>",
        ]));
        let agent = orchestrator(provider, registry_with_counter(Arc::new(AtomicUsize::new(0))));

        let mut rx = agent.stream_events("How many?", Vec::new());
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        let types: Vec<&str> = events.iter().map(|e| e.event_type()).collect();
        assert_eq!(&types[..3], &["tool_start", "tool_result", "metrics"]);
        assert!(types[3..].iter().all(|t| *t == "content"));

        match &events[0] {
            StreamEvent::ToolStart { name, parameters } => {
                assert_eq!(name, "get_count");
                assert_eq!(parameters, &json!({"folder": "inbox"}));
            }
            other => panic!("unexpected event {other:?}"),
        }
        match &events[2] {
            StreamEvent::Metrics { usage, .. } => {
                assert_eq!(usage.map(|u| u.total_tokens), Some(30));
            }
            other => panic!("unexpected event {other:?}"),
        }
        let text: String = events[3..]
            .iter()
            .filter_map(|e| match e {
                StreamEvent::Content { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "You have 42 items");
    }
}
