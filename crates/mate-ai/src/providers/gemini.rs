//! Native Gemini `streamGenerateContent` provider

use crate::{
    error::{Error, Result},
    providers::{LlmProvider, connect, with_model_headers},
    stream::{MessageEvent, MessageEventStream},
    types::{Context, FinishReason, Message, Model, NormalizedResponse, ToolCall, Usage},
};
use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};

/// Gemini client
pub struct GeminiProvider {
    client: reqwest::Client,
    api_key: String,
}

impl GeminiProvider {
    /// Create a new Gemini provider with an API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
        }
    }

    /// Create from environment variable
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("GOOGLE_GENAI_API_KEY")
            .or_else(|_| std::env::var("GEMINI_API_KEY"))
            .map_err(|_| Error::InvalidApiKey)?;
        Ok(Self::new(api_key))
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    async fn stream(&self, model: &Model, context: &Context) -> Result<MessageEventStream> {
        let request = build_request(model, context);
        let url = format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            model.base_url, model.id
        );

        let builder = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request);
        let event_source = connect(with_model_headers(builder, model)).await?;

        Ok(Box::pin(create_stream(event_source)))
    }
}

fn build_request(model: &Model, context: &Context) -> GeminiRequest {
    let mut contents: Vec<GeminiContent> = Vec::new();

    for msg in &context.messages {
        let content = convert_message(msg);
        // Results answering one turn travel together in a single user content.
        match contents.last_mut() {
            Some(last) if last.is_function_responses() && content.is_function_responses() => {
                last.parts.extend(content.parts);
            }
            _ => contents.push(content),
        }
    }

    let system_instruction = context.system_prompt.as_ref().map(|prompt| GeminiContent {
        role: None,
        parts: vec![GeminiPart::Text {
            text: prompt.clone(),
        }],
    });

    let tools = if context.tools.is_empty() {
        None
    } else {
        let function_declarations = context
            .tools
            .iter()
            .map(|t| GeminiFunctionDeclaration {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: Some(t.parameters.clone()),
            })
            .collect();
        Some(vec![GeminiTool {
            function_declarations,
        }])
    };

    GeminiRequest {
        contents,
        system_instruction,
        tools,
        generation_config: model.temperature.map(|temperature| GeminiGenerationConfig {
            temperature: Some(temperature),
        }),
    }
}

fn convert_message(msg: &Message) -> GeminiContent {
    match msg {
        Message::User { text } => GeminiContent {
            role: Some("user".to_string()),
            parts: vec![GeminiPart::Text { text: text.clone() }],
        },
        Message::Assistant { text, tool_calls } => {
            let mut parts = Vec::new();
            if let Some(text) = text {
                parts.push(GeminiPart::Text { text: text.clone() });
            }
            for call in tool_calls {
                parts.push(GeminiPart::FunctionCall {
                    function_call: GeminiFunctionCall {
                        name: call.name.clone(),
                        args: args_object(&call.arguments),
                    },
                });
            }
            GeminiContent {
                role: Some("model".to_string()),
                parts,
            }
        }
        Message::ToolResult { name, payload, .. } => GeminiContent {
            role: Some("user".to_string()),
            parts: vec![GeminiPart::FunctionResponse {
                function_response: GeminiFunctionResponse {
                    name: name.clone(),
                    response: serde_json::json!({ "result": payload.to_string() }),
                },
            }],
        },
    }
}

/// Gemini only accepts an object for `functionCall.args`
fn args_object(arguments: &serde_json::Value) -> serde_json::Value {
    match arguments {
        serde_json::Value::Object(_) => arguments.clone(),
        serde_json::Value::String(s) => serde_json::from_str::<serde_json::Value>(s)
            .ok()
            .filter(|v| v.is_object())
            .unwrap_or_else(|| serde_json::json!({})),
        _ => serde_json::json!({}),
    }
}

/// Incremental decoder for Gemini stream chunks.
///
/// Every chunk carries complete parts, so text and calls are taken as they
/// come. Usage is read from the chunk whose candidate reports a finish reason.
#[derive(Debug, Default)]
pub struct GeminiDecoder {
    text: String,
    tool_calls: Vec<ToolCall>,
    usage: Usage,
    finished: bool,
    chunks: usize,
}

impl GeminiDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one SSE data payload, returning the text deltas it carried
    pub fn push_chunk(&mut self, data: &str) -> Result<Vec<String>> {
        let response: GeminiStreamResponse = match serde_json::from_str(data) {
            Ok(r) => r,
            Err(e) => {
                if let Ok(err) = serde_json::from_str::<GeminiErrorResponse>(data) {
                    return Err(Error::from_status(err.error.code, err.error.message));
                }
                return Err(Error::MalformedResponse(format!(
                    "unparseable Gemini chunk: {}",
                    e
                )));
            }
        };
        self.chunks += 1;

        let candidate = response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| Error::MalformedResponse("chunk has no candidates".into()))?;

        let mut deltas = Vec::new();
        if let Some(content) = candidate.content {
            for part in content.parts {
                if let Some(call) = part.function_call {
                    let id = format!("call_{}", self.tool_calls.len());
                    self.tool_calls.push(ToolCall::new(id, call.name, call.args));
                } else if let Some(text) = part.text {
                    if part.thought.unwrap_or(false) || text.is_empty() {
                        continue;
                    }
                    self.text.push_str(&text);
                    deltas.push(text);
                }
            }
        }

        if candidate.finish_reason.is_some() {
            self.finished = true;
            if let Some(meta) = response.usage_metadata {
                self.usage = Usage::new(
                    meta.prompt_token_count.unwrap_or(0),
                    meta.candidates_token_count.unwrap_or(0),
                );
            }
        }

        Ok(deltas)
    }

    /// Close the turn
    pub fn finish(self) -> Result<NormalizedResponse> {
        if self.chunks == 0 {
            return Err(Error::MalformedResponse(
                "stream ended without any Gemini chunk".into(),
            ));
        }
        let finish = if !self.tool_calls.is_empty() {
            Some(FinishReason::ToolCalls)
        } else if self.finished {
            Some(FinishReason::Stop)
        } else {
            None
        };
        Ok(NormalizedResponse {
            text: self.text,
            tool_calls: self.tool_calls,
            usage: self.usage,
            finish,
        })
    }
}

fn create_stream(
    mut event_source: EventSource,
) -> impl futures::Stream<Item = Result<MessageEvent>> {
    stream! {
        let mut decoder = GeminiDecoder::new();

        while let Some(event) = event_source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => {
                    if msg.data.is_empty() || msg.data == "[DONE]" {
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
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<GeminiTool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GeminiGenerationConfig>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<GeminiPart>,
}

impl GeminiContent {
    fn is_function_responses(&self) -> bool {
        !self.parts.is_empty()
            && self
                .parts
                .iter()
                .all(|p| matches!(p, GeminiPart::FunctionResponse { .. }))
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
enum GeminiPart {
    Text {
        text: String,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: GeminiFunctionCall,
    },
    FunctionResponse {
        #[serde(rename = "functionResponse")]
        function_response: GeminiFunctionResponse,
    },
}

#[derive(Debug, Serialize)]
struct GeminiFunctionCall {
    name: String,
    args: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct GeminiFunctionResponse {
    name: String,
    response: serde_json::Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiTool {
    function_declarations: Vec<GeminiFunctionDeclaration>,
}

#[derive(Debug, Serialize)]
struct GeminiFunctionDeclaration {
    name: String,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

// Response types

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiStreamResponse {
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiResponseContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseContent {
    #[serde(default)]
    parts: Vec<GeminiResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponsePart {
    text: Option<String>,
    thought: Option<bool>,
    function_call: Option<GeminiResponseFunctionCall>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponseFunctionCall {
    name: String,
    #[serde(default)]
    args: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsageMetadata {
    prompt_token_count: Option<u64>,
    candidates_token_count: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorResponse {
    error: GeminiError,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    #[serde(default)]
    code: u16,
    message: String,
}
