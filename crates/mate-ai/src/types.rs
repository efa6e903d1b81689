//! Core types for LLM interactions

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Supported backend wire protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    /// Native Gemini `streamGenerateContent`
    Gemini,
    /// OpenAI-compatible `chat/completions` (OpenRouter and friends)
    #[serde(alias = "openrouter", alias = "openai")]
    OpenAICompat,
}

impl Backend {
    /// Get a human-readable name for this backend
    pub fn name(&self) -> &'static str {
        match self {
            Backend::Gemini => "gemini",
            Backend::OpenAICompat => "openrouter",
        }
    }

    /// Default base URL for API calls
    pub fn default_base_url(&self) -> &'static str {
        match self {
            Backend::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            Backend::OpenAICompat => "https://openrouter.ai/api/v1",
        }
    }

    /// Get the environment variable name for this backend's API key
    pub fn api_key_env_var(&self) -> &'static str {
        match self {
            Backend::Gemini => "GOOGLE_GENAI_API_KEY",
            Backend::OpenAICompat => "OPENROUTER_API_KEY",
        }
    }

    /// Parse a backend name as it appears in configuration
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "gemini" | "google" => Some(Backend::Gemini),
            "openrouter" | "openai" | "openai-compat" => Some(Backend::OpenAICompat),
            _ => None,
        }
    }
}

/// Model definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    /// Model identifier (e.g., "gemini-2.5-flash")
    pub id: String,
    /// Wire protocol to use
    pub backend: Backend,
    /// Base URL for API calls
    pub base_url: String,
    /// Sampling temperature
    #[serde(default)]
    pub temperature: Option<f32>,
    /// Additional headers for API calls
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl Model {
    /// Create a model on a backend's default endpoint
    pub fn new(backend: Backend, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            backend,
            base_url: backend.default_base_url().to_string(),
            temperature: None,
            headers: HashMap::new(),
        }
    }

    /// Set the sampling temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Point the model at a different endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Token usage information
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input: u64,
    pub output: u64,
}

impl Usage {
    pub fn new(input: u64, output: u64) -> Self {
        Self { input, output }
    }

    /// Add another usage record into this one
    pub fn add(&mut self, other: Usage) {
        self.input += other.input;
        self.output += other.output;
    }
}

/// How the backend ended a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// Natural end of response
    Stop,
    /// Tool use requested
    ToolCalls,
}

/// A tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Raw argument blob exactly as the backend produced it: an object for
    /// Gemini, a (possibly malformed) JSON string for OpenAI-compatible APIs.
    pub arguments: serde_json::Value,
}

impl ToolCall {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }
}

/// Status a collaborator attached to its result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ToolStatus {
    Ok,
    Success,
    Error,
    /// Any other status string, carried through verbatim
    Other(String),
}

impl ToolStatus {
    pub fn is_error(&self) -> bool {
        matches!(self, ToolStatus::Error)
    }

    pub fn as_str(&self) -> &str {
        match self {
            ToolStatus::Ok => "ok",
            ToolStatus::Success => "success",
            ToolStatus::Error => "error",
            ToolStatus::Other(s) => s,
        }
    }
}

impl From<String> for ToolStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "ok" => ToolStatus::Ok,
            "success" => ToolStatus::Success,
            "error" => ToolStatus::Error,
            _ => ToolStatus::Other(s),
        }
    }
}

impl From<ToolStatus> for String {
    fn from(status: ToolStatus) -> Self {
        status.as_str().to_string()
    }
}

/// Conversation messages
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Message {
    /// User message
    User { text: String },
    /// Assistant response: text and/or tool calls
    Assistant {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    /// Tool result, answering exactly one tool call
    ToolResult {
        call_id: String,
        name: String,
        status: ToolStatus,
        payload: serde_json::Value,
    },
}

impl Message {
    /// Create a user message
    pub fn user(text: impl Into<String>) -> Self {
        Self::User { text: text.into() }
    }

    /// Create an assistant message carrying only text
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::Assistant {
            text: Some(text.into()),
            tool_calls: vec![],
        }
    }

    /// Create a tool result message
    pub fn tool_result(
        call_id: impl Into<String>,
        name: impl Into<String>,
        status: ToolStatus,
        payload: serde_json::Value,
    ) -> Self {
        Self::ToolResult {
            call_id: call_id.into(),
            name: name.into(),
            status,
            payload,
        }
    }

    /// Get the role as a string
    pub fn role(&self) -> &'static str {
        match self {
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
            Self::ToolResult { .. } => "tool_result",
        }
    }

    /// Tool calls of an assistant message
    pub fn tool_calls(&self) -> &[ToolCall] {
        match self {
            Self::Assistant { tool_calls, .. } => tool_calls,
            _ => &[],
        }
    }

    /// Text of a user or assistant message
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::User { text } => Some(text),
            Self::Assistant { text, .. } => text.as_deref(),
            Self::ToolResult { .. } => None,
        }
    }
}

/// Tool declaration for function calling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDeclaration {
    /// Tool name (used in API calls)
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// JSON Schema for parameters
    pub parameters: serde_json::Value,
}

impl ToolDeclaration {
    /// Create a new tool declaration
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// Context for an LLM request
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// System prompt
    pub system_prompt: Option<String>,
    /// Conversation messages
    pub messages: Vec<Message>,
    /// Available tools
    pub tools: Vec<ToolDeclaration>,
}

impl Context {
    /// Create a new context with a system prompt
    pub fn with_system(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: Some(system_prompt.into()),
            messages: vec![],
            tools: vec![],
        }
    }

    /// Add a message to the context
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }
}

/// A backend turn decoded into the protocol-independent shape
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedResponse {
    /// Text fragments joined in arrival order
    pub text: String,
    /// Completed tool calls in the order the model issued them
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
    /// Finish marker, when the backend reported one
    pub finish: Option<FinishReason>,
}

impl NormalizedResponse {
    /// Non-whitespace text, if any
    pub fn final_text(&self) -> Option<&str> {
        if self.text.trim().is_empty() {
            None
        } else {
            Some(&self.text)
        }
    }

    /// Convert into the assistant message stored in history
    pub fn to_message(&self) -> Message {
        Message::Assistant {
            text: self.final_text().map(str::to_string),
            tool_calls: self.tool_calls.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_status_round_trips_known_and_custom_values() {
        let parsed: ToolStatus = serde_json::from_value(serde_json::json!("ok")).unwrap();
        assert_eq!(parsed, ToolStatus::Ok);
        let custom: ToolStatus = serde_json::from_value(serde_json::json!("ambiguous")).unwrap();
        assert_eq!(custom, ToolStatus::Other("ambiguous".into()));
        assert_eq!(serde_json::to_value(&custom).unwrap(), "ambiguous");
    }

    #[test]
    fn test_backend_parse() {
        assert_eq!(Backend::parse("Gemini"), Some(Backend::Gemini));
        assert_eq!(Backend::parse("openrouter"), Some(Backend::OpenAICompat));
        assert_eq!(Backend::parse("anthropic"), None);
    }

    #[test]
    fn test_whitespace_text_is_not_final() {
        let resp = NormalizedResponse {
            text: "  \n".into(),
            ..Default::default()
        };
        assert!(resp.final_text().is_none());
        assert_eq!(
            resp.to_message(),
            Message::Assistant {
                text: None,
                tool_calls: vec![]
            }
        );
    }

    #[test]
    fn test_message_accessors() {
        let call = ToolCall::new("call_0", "geocode", serde_json::json!({"location": "Rainier"}));
        let msg = Message::Assistant {
            text: None,
            tool_calls: vec![call.clone()],
        };
        assert_eq!(msg.role(), "assistant");
        assert_eq!(msg.tool_calls(), &[call]);
        assert_eq!(Message::user("hi").text(), Some("hi"));
    }
}
