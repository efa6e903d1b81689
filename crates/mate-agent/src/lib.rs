//! mate-agent: Multi-agent orchestration runtime
//!
//! This crate provides the turn loop that drives one agent through repeated
//! model calls and tool executions, the router that delegates to stateless
//! specialists, and the per-chat session table.

pub mod conversation;
pub mod engine;
pub mod error;
pub mod events;
pub mod normalize;
pub mod registry;
pub mod retry;
pub mod router;
pub mod session;
pub mod specialist;
pub mod tool;
pub mod usage;

pub use conversation::Conversation;
pub use engine::{AgentSpec, ConversationEngine, Dispatched, Dispatcher, EngineConfig};
pub use error::{Error, Result};
pub use events::{AgentEvent, AgentEventStream, EventSender};
pub use normalize::normalize_arguments;
pub use registry::ToolRegistry;
pub use retry::{RetryConfig, call_with_retry};
pub use router::{ActiveResultSet, Handoff, NoHydrator, Request, ResultHydrator, Router};
pub use session::{
    Clock, InMemorySessionStore, RouterBuilder, SessionManager, SessionStore, SharedRouter,
    SystemClock,
};
pub use specialist::{CatalogFactory, Specialist, SpecialistFactory};
pub use tool::{ArgsExt, BoxedTool, Tool, ToolError};
pub use usage::{ModelRates, PricingTable, Rate, TokenAccountant, compute_cost};
