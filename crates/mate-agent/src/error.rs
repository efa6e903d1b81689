//! Error types for mate-agent

use thiserror::Error;

/// Result type alias using mate-agent Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running agents
#[derive(Error, Debug)]
pub enum Error {
    /// An error from the backend layer
    #[error(transparent)]
    Ai(#[from] mate_ai::Error),

    /// Wiring problem detected before any event is produced
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Transient failures outlasted the attempt budget
    #[error("[{agent}] failed after {attempts} attempts")]
    RetryExhausted { agent: String, attempts: u32 },
}

impl Error {
    /// Check if this error is a rate-limit or overload condition.
    ///
    /// Typed backend errors are classified structurally; anything else falls
    /// back to looking for the `429` / `503` status codes in its text.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Ai(e) if e.is_transient() => true,
            Error::RetryExhausted { .. } => false,
            other => {
                let text = other.to_string();
                text.contains("429") || text.contains("503")
            }
        }
    }

    /// Errors that abort an engine run instead of surfacing as an event
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Configuration(_) => true,
            Error::Ai(e) => e.is_malformed(),
            _ => false,
        }
    }
}
