//! The turn loop shared by the router and every specialist
//!
//! One engine drives one agent: send the history to the backend, decode the
//! turn, then either finish with text, skip an empty turn, or run the
//! requested calls and go around again. The turn ceiling always ends in an
//! error event.

use async_trait::async_trait;
use mate_ai::{
    Context, Message, Model, NormalizedResponse, ToolCall, ToolDeclaration, Usage,
    collect_response, providers::LlmProvider,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::{
    conversation::Conversation,
    error::{Error, Result},
    events::{AgentEvent, EventSender, emit},
    normalize::normalize_arguments,
    registry::preview,
    retry::{RetryConfig, call_with_retry},
    tool::status_of,
    usage::{ModelRates, TokenAccountant},
};

/// Default turn ceiling
pub const DEFAULT_MAX_TURNS: u32 = 10;

/// Immutable description of one agent
#[derive(Debug, Clone)]
pub struct AgentSpec {
    pub name: String,
    pub model: Model,
    pub system_prompt: String,
    pub tools: Vec<ToolDeclaration>,
}

/// Loop limits
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_turns: u32,
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_turns: DEFAULT_MAX_TURNS,
            retry: RetryConfig::default(),
        }
    }
}

/// What a dispatcher hands back for one call
#[derive(Debug, Clone)]
pub struct Dispatched {
    pub payload: Value,
    /// Tokens spent producing the result, folded into the caller's accountant
    pub usage: Usage,
}

/// Executes the calls a model requests.
///
/// `Ok(None)` means the call was skipped and produces no result message.
#[async_trait]
pub trait Dispatcher: Send {
    async fn dispatch(
        &mut self,
        call: &ToolCall,
        args: Map<String, Value>,
        events: &EventSender,
    ) -> Result<Option<Dispatched>>;
}

/// One agent's conversation with its backend
pub struct ConversationEngine<D> {
    spec: AgentSpec,
    config: EngineConfig,
    provider: Arc<dyn LlmProvider>,
    dispatcher: D,
    conversation: Conversation,
    accountant: TokenAccountant,
}

impl<D: Dispatcher> ConversationEngine<D> {
    pub fn new(
        spec: AgentSpec,
        provider: Arc<dyn LlmProvider>,
        dispatcher: D,
        config: EngineConfig,
        rates: Option<ModelRates>,
    ) -> Self {
        Self {
            spec,
            config,
            provider,
            dispatcher,
            conversation: Conversation::new(),
            accountant: TokenAccountant::new(rates),
        }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &AgentSpec {
        &self.spec
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn accountant(&self) -> &TokenAccountant {
        &self.accountant
    }

    pub fn dispatcher(&self) -> &D {
        &self.dispatcher
    }

    pub fn dispatcher_mut(&mut self) -> &mut D {
        &mut self.dispatcher
    }

    /// Clear history and counters
    pub fn reset(&mut self) {
        self.conversation.clear();
        self.accountant.reset();
    }

    /// Run one user turn to completion.
    ///
    /// Returns the final text, or `None` when the run ended in an error event.
    /// Configuration and malformed-response errors are returned as `Err` after
    /// their error event.
    pub async fn run_turns(
        &mut self,
        input: impl Into<String>,
        events: &EventSender,
    ) -> Result<Option<String>> {
        self.accountant.prompt_reset();
        self.conversation.push(Message::user(input));

        for turn in 1..=self.config.max_turns {
            info!(agent = %self.spec.name, "Turn {}/{}", turn, self.config.max_turns);

            let response = match self.request_turn(events).await {
                Ok(response) => response,
                Err(e) => {
                    error!(agent = %self.spec.name, error = %e, "Backend call failed");
                    emit(events, AgentEvent::error(e.to_string()));
                    return if e.is_fatal() { Err(e) } else { Ok(None) };
                }
            };
            self.accountant.add_usage(response.usage);

            if response.tool_calls.is_empty() {
                match response.final_text() {
                    Some(text) => {
                        let text = text.to_string();
                        self.conversation.push(response.to_message());
                        return Ok(Some(text));
                    }
                    None => {
                        warn!(agent = %self.spec.name, turn, "Model returned neither text nor calls");
                        emit(events, AgentEvent::error("model returned empty response"));
                        continue;
                    }
                }
            }

            self.conversation.push(response.to_message());
            let executed = self.execute_tool_calls(&response.tool_calls, events).await?;
            if executed == 0 {
                error!(agent = %self.spec.name, "Tool calls requested but none executed");
                emit(
                    events,
                    AgentEvent::error("tool called but no execution occurred"),
                );
                return Ok(None);
            }
        }

        warn!(agent = %self.spec.name, "Max turns reached");
        emit(events, AgentEvent::error("max turns reached"));
        Ok(None)
    }

    /// Open the backend stream under retry, then drain it
    async fn request_turn(&self, events: &EventSender) -> Result<NormalizedResponse> {
        let context = Context {
            system_prompt: Some(self.spec.system_prompt.clone()),
            messages: self.conversation.messages().to_vec(),
            tools: self.spec.tools.clone(),
        };
        let provider = &self.provider;
        let model = &self.spec.model;
        let context = &context;

        let stream = call_with_retry(&self.spec.name, &self.config.retry, || async move {
            Ok::<_, Error>(provider.stream(model, context).await?)
        })
        .await?;

        let response = collect_response(stream, |delta| {
            emit(
                events,
                AgentEvent::Text {
                    delta: delta.to_string(),
                },
            )
        })
        .await?;
        Ok(response)
    }

    /// Run calls in model order, appending one result per executed call
    async fn execute_tool_calls(
        &mut self,
        calls: &[ToolCall],
        events: &EventSender,
    ) -> Result<usize> {
        let mut executed = 0;
        for call in calls {
            emit(
                events,
                AgentEvent::ToolCall {
                    name: call.name.clone(),
                },
            );
            let args = normalize_arguments(&call.arguments);
            debug!(agent = %self.spec.name, tool = %call.name, "Dispatching call {}", call.id);

            let Some(dispatched) = self.dispatcher.dispatch(call, args, events).await? else {
                continue;
            };
            self.accountant.add_usage(dispatched.usage);
            info!(
                agent = %self.spec.name,
                tool = %call.name,
                result = %preview(&dispatched.payload),
                "Tool result"
            );

            let status = status_of(&dispatched.payload);
            self.conversation.push(Message::tool_result(
                call.id.clone(),
                call.name.clone(),
                status,
                dispatched.payload,
            ));
            emit(
                events,
                AgentEvent::ToolResult {
                    name: call.name.clone(),
                },
            );
            executed += 1;
        }
        Ok(executed)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::registry::ToolRegistry;
    use crate::tool::{Tool, ToolError};
    use mate_ai::{
        Backend, FinishReason, MessageEvent, MessageEventStream, Result as AiResult,
    };
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::mpsc;

    /// Scripted backend: each `stream` call pops the next response
    pub(crate) struct MockProvider {
        responses: Arc<Mutex<Vec<AiResult<NormalizedResponse>>>>,
        pub(crate) requests: Arc<Mutex<Vec<Context>>>,
    }

    impl MockProvider {
        pub(crate) fn new(responses: Vec<AiResult<NormalizedResponse>>) -> Self {
            Self {
                responses: Arc::new(Mutex::new(responses)),
                requests: Arc::new(Mutex::new(vec![])),
            }
        }
    }

    #[async_trait]
    impl LlmProvider for MockProvider {
        async fn stream(&self, _model: &Model, context: &Context) -> AiResult<MessageEventStream> {
            self.requests.lock().push(context.clone());
            let next = {
                let mut responses = self.responses.lock();
                if responses.is_empty() {
                    Ok(text("done"))
                } else {
                    responses.remove(0)
                }
            };
            let response = next?;
            let mut items = vec![];
            if !response.text.is_empty() {
                items.push(Ok(MessageEvent::TextDelta {
                    delta: response.text.clone(),
                }));
            }
            items.push(Ok(MessageEvent::Done { response }));
            Ok(Box::pin(futures::stream::iter(items)))
        }
    }

    pub(crate) fn text(s: &str) -> NormalizedResponse {
        NormalizedResponse {
            text: s.into(),
            tool_calls: vec![],
            usage: Usage::new(10, 5),
            finish: Some(FinishReason::Stop),
        }
    }

    pub(crate) fn calls(calls: Vec<ToolCall>) -> NormalizedResponse {
        NormalizedResponse {
            text: String::new(),
            tool_calls: calls,
            usage: Usage::new(20, 3),
            finish: Some(FinishReason::ToolCalls),
        }
    }

    pub(crate) fn drain(rx: &mut mpsc::UnboundedReceiver<AgentEvent>) -> Vec<AgentEvent> {
        let mut out = vec![];
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    struct CountingTool {
        count: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &str {
            "get_trail_count"
        }
        async fn call(&self, args: Map<String, Value>) -> std::result::Result<Value, ToolError> {
            self.count.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"status": "ok", "count": 3, "where": args.get("where").cloned()}))
        }
    }

    fn engine(
        responses: Vec<AiResult<NormalizedResponse>>,
        max_turns: u32,
    ) -> (ConversationEngine<ToolRegistry>, Arc<AtomicU32>, Arc<Mutex<Vec<Context>>>) {
        let count = Arc::new(AtomicU32::new(0));
        let registry = ToolRegistry::new().register(Arc::new(CountingTool {
            count: count.clone(),
        }));
        let provider = MockProvider::new(responses);
        let requests = provider.requests.clone();
        let spec = AgentSpec {
            name: "TrailAgent".into(),
            model: Model::new(Backend::Gemini, "test-model"),
            system_prompt: "test".into(),
            tools: vec![ToolDeclaration::new(
                "get_trail_count",
                "count",
                json!({"type": "object"}),
            )],
        };
        let config = EngineConfig {
            max_turns,
            retry: RetryConfig::default(),
        };
        let engine = ConversationEngine::new(
            spec,
            Arc::new(provider),
            registry,
            config,
            Some(ModelRates::flat(1.0, 1.0)),
        );
        (engine, count, requests)
    }

    #[tokio::test]
    async fn test_final_answer_ends_on_that_turn() {
        let (mut engine, count, requests) = engine(vec![Ok(text("Three loops."))], 10);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let out = engine.run_turns("find loops", &tx).await.unwrap();

        assert_eq!(out.as_deref(), Some("Three loops."));
        assert_eq!(requests.lock().len(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(
            engine.conversation().last(),
            Some(&Message::assistant("Three loops."))
        );
        assert_eq!(
            drain(&mut rx),
            vec![AgentEvent::Text {
                delta: "Three loops.".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_tool_turn_then_answer() {
        let call = ToolCall::new(
            "call_0",
            "get_trail_count",
            json!("```json\n{\"where\": \"difficulty &lt;= ?\"}\n```"),
        );
        let (mut engine, count, requests) =
            engine(vec![Ok(calls(vec![call])), Ok(text("There are 3."))], 10);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let out = engine.run_turns("how many?", &tx).await.unwrap();
        assert_eq!(out.as_deref(), Some("There are 3."));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        let messages = engine.conversation().messages();
        assert_eq!(messages.len(), 4);
        match &messages[2] {
            Message::ToolResult {
                call_id, payload, ..
            } => {
                assert_eq!(call_id, "call_0");
                assert_eq!(payload["where"], "difficulty <= ?");
            }
            other => panic!("expected tool result, got {:?}", other),
        }
        // The second request replays the call and its result.
        assert_eq!(requests.lock()[1].messages.len(), 3);

        let events = drain(&mut rx);
        assert_eq!(
            events[..2],
            [
                AgentEvent::ToolCall {
                    name: "get_trail_count".into()
                },
                AgentEvent::ToolResult {
                    name: "get_trail_count".into()
                },
            ]
        );
        assert_eq!(engine.accountant().prompt_usage(), Usage::new(30, 8));
    }

    #[tokio::test]
    async fn test_empty_turn_continues() {
        let empty = NormalizedResponse::default();
        let (mut engine, _, requests) = engine(vec![Ok(empty), Ok(text("ok"))], 10);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let out = engine.run_turns("hi", &tx).await.unwrap();
        assert_eq!(out.as_deref(), Some("ok"));
        assert_eq!(requests.lock().len(), 2);
        // Nothing was appended for the empty turn.
        assert_eq!(engine.conversation().len(), 2);
        assert_eq!(
            drain(&mut rx)[0],
            AgentEvent::error("model returned empty response")
        );
    }

    #[tokio::test]
    async fn test_turn_ceiling() {
        let looping = (0..3)
            .map(|i| {
                Ok(calls(vec![ToolCall::new(
                    format!("call_{i}"),
                    "get_trail_count",
                    json!({}),
                )]))
            })
            .collect();
        let (mut engine, count, _) = engine(looping, 3);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let out = engine.run_turns("loop forever", &tx).await.unwrap();
        assert!(out.is_none());
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert_eq!(
            drain(&mut rx).last(),
            Some(&AgentEvent::error("max turns reached"))
        );
    }

    #[tokio::test]
    async fn test_malformed_response_is_fatal() {
        let (mut engine, _, requests) = engine(
            vec![Err(mate_ai::Error::UnknownFinishReason("length".into()))],
            10,
        );
        let (tx, mut rx) = mpsc::unbounded_channel();

        let err = engine.run_turns("hi", &tx).await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(requests.lock().len(), 1);
        assert!(matches!(drain(&mut rx).as_slice(), [AgentEvent::Error { .. }]));
    }

    #[tokio::test]
    async fn test_non_transient_backend_error_is_an_event() {
        let (mut engine, _, _) = engine(
            vec![Err(mate_ai::Error::from_status(401, "bad key"))],
            10,
        );
        let (tx, mut rx) = mpsc::unbounded_channel();

        let out = engine.run_turns("hi", &tx).await.unwrap();
        assert!(out.is_none());
        match drain(&mut rx).as_slice() {
            [AgentEvent::Error { message }] => assert!(message.contains("401")),
            other => panic!("unexpected events {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried() {
        let (mut engine, _, requests) = engine(
            vec![
                Err(mate_ai::Error::RateLimited("slow down".into())),
                Ok(text("made it")),
            ],
            10,
        );
        let (tx, _rx) = mpsc::unbounded_channel();

        let out = engine.run_turns("hi", &tx).await.unwrap();
        assert_eq!(out.as_deref(), Some("made it"));
        assert_eq!(requests.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_reset_clears_history_and_usage() {
        let (mut engine, _, _) = engine(vec![Ok(text("a"))], 10);
        let (tx, _rx) = mpsc::unbounded_channel();
        engine.run_turns("hi", &tx).await.unwrap();
        assert!(!engine.conversation().is_empty());

        engine.reset();
        assert!(engine.conversation().is_empty());
        assert_eq!(engine.accountant().total_usage(), Usage::default());
    }
}
