//! OpenAI-compatible Chat Completions provider (OpenRouter and friends)

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{
    error::{Error, Result},
    providers::{LlmProvider, connect, with_model_headers},
    stream::{MessageEvent, MessageEventStream},
    types::{Context, FinishReason, Message, Model, NormalizedResponse, ToolCall, Usage},
};

/// OpenAI-compatible API client
pub struct OpenAICompatProvider {
    client: reqwest::Client,
    api_key: String,
}

impl OpenAICompatProvider {
    /// Create a new provider with an API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
        }
    }

    /// Create from environment variable
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENROUTER_API_KEY").map_err(|_| Error::InvalidApiKey)?;
        Ok(Self::new(api_key))
    }
}

#[async_trait]
impl LlmProvider for OpenAICompatProvider {
    async fn stream(&self, model: &Model, context: &Context) -> Result<MessageEventStream> {
        let request = build_request(model, context);
        let url = format!("{}/chat/completions", model.base_url);

        let builder = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request);
        let event_source = connect(with_model_headers(builder, model)).await?;

        Ok(Box::pin(create_stream(event_source)))
    }
}

fn build_request(model: &Model, context: &Context) -> OpenAIRequest {
    let mut messages = Vec::new();

    if let Some(ref system_prompt) = context.system_prompt {
        messages.push(OpenAIMessage {
            role: "system".to_string(),
            content: Some(system_prompt.clone()),
            tool_calls: None,
            tool_call_id: None,
        });
    }

    for msg in &context.messages {
        messages.push(convert_message(msg));
    }

    let tools = if context.tools.is_empty() {
        None
    } else {
        Some(
            context
                .tools
                .iter()
                .map(|t| OpenAITool {
                    tool_type: "function".to_string(),
                    function: OpenAIFunction {
                        name: t.name.clone(),
                        description: Some(t.description.clone()),
                        parameters: Some(t.parameters.clone()),
                    },
                })
                .collect(),
        )
    };

    let has_tools = tools.is_some();
    OpenAIRequest {
        model: model.id.clone(),
        messages,
        stream: true,
        stream_options: StreamOptions {
            include_usage: true,
        },
        temperature: model.temperature,
        tools,
        parallel_tool_calls: has_tools.then_some(true),
    }
}

fn convert_message(msg: &Message) -> OpenAIMessage {
    match msg {
        Message::User { text } => OpenAIMessage {
            role: "user".to_string(),
            content: Some(text.clone()),
            tool_calls: None,
            tool_call_id: None,
        },
        Message::Assistant { text, tool_calls } => {
            let tool_calls: Vec<OpenAIToolCall> = tool_calls
                .iter()
                .map(|call| OpenAIToolCall {
                    id: call.id.clone(),
                    call_type: "function".to_string(),
                    function: OpenAIFunctionCall {
                        name: call.name.clone(),
                        arguments: match &call.arguments {
                            serde_json::Value::String(s) => s.clone(),
                            other => other.to_string(),
                        },
                    },
                })
                .collect();

            OpenAIMessage {
                role: "assistant".to_string(),
                content: text.clone(),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
                tool_call_id: None,
            }
        }
        Message::ToolResult {
            call_id, payload, ..
        } => OpenAIMessage {
            role: "tool".to_string(),
            content: Some(payload.to_string()),
            tool_calls: None,
            tool_call_id: Some(call_id.clone()),
        },
    }
}

#[derive(Debug)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// Reassembles tool calls streamed as index-keyed fragments.
///
/// The first fragment seen for an index fixes its id and name; later
/// fragments only grow the argument string.
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    calls: BTreeMap<u32, PartialCall>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        index: u32,
        id: Option<&str>,
        name: Option<&str>,
        arguments: Option<&str>,
    ) {
        match self.calls.get_mut(&index) {
            Some(call) => {
                if let Some(fragment) = arguments {
                    call.arguments.push_str(fragment);
                }
                // Some gateways send the name a fragment late.
                if call.name.is_empty() {
                    if let Some(name) = name {
                        call.name = name.to_string();
                    }
                }
                if call.id.is_empty() {
                    if let Some(id) = id {
                        call.id = id.to_string();
                    }
                }
            }
            None => {
                self.calls.insert(
                    index,
                    PartialCall {
                        id: id.unwrap_or_default().to_string(),
                        name: name.unwrap_or_default().to_string(),
                        arguments: arguments.unwrap_or_default().to_string(),
                    },
                );
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Completed calls in index order, arguments kept as the raw string
    pub fn finish(self) -> Vec<ToolCall> {
        self.calls
            .into_iter()
            .map(|(index, call)| {
                let id = if call.id.is_empty() {
                    format!("call_{}", index)
                } else {
                    call.id
                };
                ToolCall::new(id, call.name, serde_json::Value::String(call.arguments))
            })
            .collect()
    }
}

/// Incremental decoder for OpenAI-compatible stream chunks
#[derive(Debug, Default)]
pub struct OpenAIDecoder {
    text: String,
    calls: ToolCallAccumulator,
    usage: Usage,
    finish: Option<FinishReason>,
    chunks: usize,
}

impl OpenAIDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one SSE data payload, returning the text deltas it carried
    pub fn push_chunk(&mut self, data: &str) -> Result<Vec<String>> {
        let chunk: StreamChunk = match serde_json::from_str(data) {
            Ok(c) => c,
            Err(e) => {
                if let Ok(err) = serde_json::from_str::<OpenAIErrorResponse>(data) {
                    return Err(Error::from_status(
                        err.error.code.unwrap_or_default(),
                        err.error.message,
                    ));
                }
                return Err(Error::MalformedResponse(format!(
                    "unparseable chat completion chunk: {}",
                    e
                )));
            }
        };
        self.chunks += 1;

        if let Some(usage) = chunk.usage {
            self.usage = Usage::new(usage.prompt_tokens, usage.completion_tokens);
        }

        let Some(choice) = chunk.choices.into_iter().next() else {
            // The usage chunk is allowed to carry no choices; anything else is not.
            if self.usage == Usage::default() {
                return Err(Error::MalformedResponse("chunk has no choices".into()));
            }
            return Ok(vec![]);
        };

        let mut deltas = Vec::new();
        if let Some(delta) = choice.delta {
            if let Some(content) = delta.content.filter(|c| !c.is_empty()) {
                self.text.push_str(&content);
                deltas.push(content);
            }
            for tc in delta.tool_calls.unwrap_or_default() {
                let function = tc.function.unwrap_or_default();
                self.calls.push(
                    tc.index,
                    tc.id.as_deref(),
                    function.name.as_deref(),
                    function.arguments.as_deref(),
                );
            }
        }

        if let Some(reason) = choice.finish_reason {
            self.finish = Some(match reason.as_str() {
                "stop" => FinishReason::Stop,
                "tool_calls" => FinishReason::ToolCalls,
                other => return Err(Error::UnknownFinishReason(other.to_string())),
            });
        }

        Ok(deltas)
    }

    /// Close the turn. Without a finish marker the outcome follows the content.
    pub fn finish(self) -> Result<NormalizedResponse> {
        if self.chunks == 0 {
            return Err(Error::MalformedResponse(
                "stream ended without any completion chunk".into(),
            ));
        }
        let finish = self.finish.or_else(|| {
            if !self.calls.is_empty() {
                Some(FinishReason::ToolCalls)
            } else if !self.text.trim().is_empty() {
                Some(FinishReason::Stop)
            } else {
                None
            }
        });
        Ok(NormalizedResponse {
            text: self.text,
            tool_calls: self.calls.finish(),
            usage: self.usage,
            finish,
        })
    }
}

fn create_stream(
    mut event_source: EventSource,
) -> impl futures::Stream<Item = Result<MessageEvent>> {
    stream! {
        let mut decoder = OpenAIDecoder::new();

        while let Some(event) = event_source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => {
                    if msg.data == "[DONE]" {
                        break;
                    }
                    if msg.data.is_empty() {
                        continue;
                    }
                    match decoder.push_chunk(&msg.data) {
                        Ok(deltas) => {
                            for delta in deltas {
                                yield Ok(MessageEvent::TextDelta { delta });
                            }
                        }
                        Err(e) => {
                            event_source.close();
                            yield Err(e);
                            return;
                        }
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(e) => {
                    event_source.close();
                    yield Err(Error::Sse(e.to_string()));
                    return;
                }
            }
        }
        event_source.close();

        yield decoder.finish().map(|response| MessageEvent::Done { response });
    }
}

// Request types

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    stream: bool,
    stream_options: StreamOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAITool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parallel_tool_calls: Option<bool>,
}

#[derive(Debug, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAIToolCall>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct OpenAITool {
    #[serde(rename = "type")]
    tool_type: String,
    function: OpenAIFunction,
}

#[derive(Debug, Serialize)]
struct OpenAIFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct OpenAIToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: OpenAIFunctionCall,
}

#[derive(Debug, Serialize)]
struct OpenAIFunctionCall {
    name: String,
    arguments: String,
}

// Streaming response types

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<StreamUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<StreamDelta>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCall {
    index: u32,
    id: Option<String>,
    function: Option<StreamFunction>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
}

#[derive(Debug, Deserialize)]
struct OpenAIErrorResponse {
    error: OpenAIError,
}

#[derive(Debug, Deserialize)]
struct OpenAIError {
    #[serde(default)]
    code: Option<u16>,
    message: String,
}
