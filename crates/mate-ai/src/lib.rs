//! mate-ai: backend protocol adapters
//!
//! One [`providers::LlmProvider`] interface over two wire protocols: native
//! Gemini `streamGenerateContent` and OpenAI-compatible `chat/completions`.
//! Both decode into the same [`NormalizedResponse`].

pub mod error;
pub mod providers;
pub mod stream;
pub mod types;

pub use error::{Error, Result};
pub use stream::{MessageEvent, MessageEventStream, collect_response};
pub use types::*;
