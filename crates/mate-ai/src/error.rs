//! Error types for mate-ai

use thiserror::Error;

/// Result type alias using mate-ai Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur when talking to a model backend
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Backend answered with a non-success status
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// HTTP 429
    #[error("Rate limited (429): {0}")]
    RateLimited(String),

    /// HTTP 503
    #[error("Service unavailable (503): {0}")]
    Unavailable(String),

    /// Invalid API key
    #[error("Invalid or missing API key")]
    InvalidApiKey,

    /// Server-sent events transport error
    #[error("SSE error: {0}")]
    Sse(String),

    /// Structurally invalid backend payload
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// Finish marker other than `stop` or `tool_calls`
    #[error("Unknown finish reason: {0}")]
    UnknownFinishReason(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Map a non-success HTTP status to the matching variant
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => Self::RateLimited(message),
            503 => Self::Unavailable(message),
            _ => Self::Api { status, message },
        }
    }

    /// Check if this error is a rate-limit or overload condition worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            Error::RateLimited(_) | Error::Unavailable(_) => true,
            Error::Api { status, .. } => matches!(status, 429 | 503),
            Error::Http(e) => e
                .status()
                .is_some_and(|s| matches!(s.as_u16(), 429 | 503)),
            _ => false,
        }
    }

    /// Check if the backend produced something the decoder cannot accept
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            Error::MalformedResponse(_) | Error::UnknownFinishReason(_) | Error::Json(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(Error::from_status(429, "slow down"), Error::RateLimited(_)));
        assert!(matches!(Error::from_status(503, "overloaded"), Error::Unavailable(_)));
        assert!(matches!(
            Error::from_status(400, "bad"),
            Error::Api { status: 400, .. }
        ));
    }

    #[test]
    fn test_transient_variants() {
        assert!(Error::RateLimited("quota".into()).is_transient());
        assert!(Error::Unavailable("model overloaded".into()).is_transient());
        assert!(!Error::from_status(401, "denied").is_transient());
        assert!(!Error::InvalidApiKey.is_transient());
        assert!(!Error::MalformedResponse("no choices".into()).is_transient());
    }

    #[test]
    fn test_malformed_variants() {
        assert!(Error::UnknownFinishReason("length".into()).is_malformed());
        assert!(Error::MalformedResponse("missing candidates".into()).is_malformed());
        assert!(!Error::Sse("reset".into()).is_malformed());
    }

    #[test]
    fn test_display_carries_status_code() {
        // Retry fallback matches on these digits when the error has been wrapped.
        assert!(Error::from_status(429, "x").to_string().contains("429"));
        assert!(Error::from_status(503, "x").to_string().contains("503"));
    }
}
