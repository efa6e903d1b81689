//! Streaming event types

use crate::error::Result;
use crate::types::NormalizedResponse;
use futures::StreamExt;
use std::pin::Pin;
use tokio_stream::Stream;

/// Events emitted while a backend turn streams in
#[derive(Debug, Clone, PartialEq)]
pub enum MessageEvent {
    /// Text fragment, in arrival order
    TextDelta { delta: String },
    /// The turn is complete
    Done { response: NormalizedResponse },
}

impl MessageEvent {
    /// Check if this is the terminal event
    pub fn is_terminal(&self) -> bool {
        matches!(self, MessageEvent::Done { .. })
    }

    /// Get the response if this is a Done event
    pub fn into_response(self) -> Option<NormalizedResponse> {
        match self {
            MessageEvent::Done { response } => Some(response),
            _ => None,
        }
    }
}

/// A stream of message events
pub type MessageEventStream = Pin<Box<dyn Stream<Item = Result<MessageEvent>> + Send>>;

/// Drain a stream, handing every text delta to `on_text`, and return the final response.
///
/// A stream that ends without a `Done` event is malformed.
pub async fn collect_response<F>(
    mut stream: MessageEventStream,
    mut on_text: F,
) -> Result<NormalizedResponse>
where
    F: FnMut(&str),
{
    while let Some(event) = stream.next().await {
        match event? {
            MessageEvent::TextDelta { delta } => on_text(&delta),
            MessageEvent::Done { response } => return Ok(response),
        }
    }
    Err(crate::Error::MalformedResponse(
        "stream ended without a completed turn".into(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[tokio::test]
    async fn test_collect_forwards_text_and_returns_done() {
        let response = NormalizedResponse {
            text: "Hello world".into(),
            ..Default::default()
        };
        let events = vec![
            Ok(MessageEvent::TextDelta { delta: "Hello ".into() }),
            Ok(MessageEvent::TextDelta { delta: "world".into() }),
            Ok(MessageEvent::Done {
                response: response.clone(),
            }),
        ];
        let stream: MessageEventStream = Box::pin(futures::stream::iter(events));

        let mut seen = Vec::new();
        let got = collect_response(stream, |d| seen.push(d.to_string()))
            .await
            .unwrap();
        assert_eq!(got, response);
        assert_eq!(seen, vec!["Hello ", "world"]);
    }

    #[tokio::test]
    async fn test_collect_without_done_is_malformed() {
        let events = vec![Ok(MessageEvent::TextDelta { delta: "partial".into() })];
        let stream: MessageEventStream = Box::pin(futures::stream::iter(events));
        let err = collect_response(stream, |_| {}).await.unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_collect_surfaces_stream_error() {
        let events = vec![Err(Error::UnknownFinishReason("length".into()))];
        let stream: MessageEventStream = Box::pin(futures::stream::iter(events));
        let err = collect_response(stream, |_| {}).await.unwrap_err();
        assert!(err.is_malformed());
    }
}
