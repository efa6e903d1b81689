//! Backend provider implementations

pub mod gemini;
pub mod openai;

use crate::{Backend, Context, Error, MessageEventStream, Model, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use std::sync::Arc;

pub use gemini::GeminiProvider;
pub use openai::OpenAICompatProvider;

/// Trait for model backends
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Stream one turn from the backend.
    ///
    /// An HTTP failure status is reported here, before any event is yielded,
    /// so callers can retry the whole call.
    async fn stream(&self, model: &Model, context: &Context) -> Result<MessageEventStream>;
}

/// Get an API key from a provided value or the environment
pub fn get_api_key(provided: Option<&str>, env_var: &str) -> Result<String> {
    if let Some(key) = provided.filter(|k| !k.is_empty()) {
        return Ok(key.to_string());
    }

    std::env::var(env_var)
        .ok()
        .filter(|k| !k.is_empty())
        .ok_or(Error::InvalidApiKey)
}

/// Build the provider matching a backend
pub fn provider_for(backend: Backend, api_key: impl Into<String>) -> Arc<dyn LlmProvider> {
    match backend {
        Backend::Gemini => Arc::new(GeminiProvider::new(api_key)),
        Backend::OpenAICompat => Arc::new(OpenAICompatProvider::new(api_key)),
    }
}

/// Attach model-specific headers to a request
pub(crate) fn with_model_headers(
    mut builder: reqwest::RequestBuilder,
    model: &Model,
) -> reqwest::RequestBuilder {
    for (key, value) in &model.headers {
        if let (Ok(name), Ok(val)) = (
            key.parse::<reqwest::header::HeaderName>(),
            value.parse::<reqwest::header::HeaderValue>(),
        ) {
            builder = builder.header(name, val);
        }
    }
    builder
}

/// Open an event source and wait for the connection to be accepted.
///
/// A rejected connection becomes a typed error carrying the status code and
/// the response body.
pub(crate) async fn connect(request: reqwest::RequestBuilder) -> Result<EventSource> {
    let mut event_source = EventSource::new(request)
        .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;

    match event_source.next().await {
        Some(Ok(Event::Open)) => Ok(event_source),
        Some(Ok(Event::Message(_))) => Err(Error::MalformedResponse(
            "message received before the stream opened".into(),
        )),
        Some(Err(reqwest_eventsource::Error::InvalidStatusCode(status, response))) => {
            event_source.close();
            let body = response.text().await.unwrap_or_default();
            Err(Error::from_status(status.as_u16(), body))
        }
        Some(Err(reqwest_eventsource::Error::Transport(e))) => {
            event_source.close();
            Err(Error::Http(e))
        }
        Some(Err(e)) => {
            event_source.close();
            Err(Error::Sse(e.to_string()))
        }
        None => Err(Error::Sse("event source closed before opening".into())),
    }
}
