//! Router agent: delegates to specialists and closes each request with `End`

use async_trait::async_trait;
use chrono::NaiveDateTime;
use mate_ai::{Model, ToolCall, ToolDeclaration, Usage, providers::LlmProvider};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::{
    engine::{AgentSpec, ConversationEngine, Dispatched, Dispatcher, EngineConfig},
    error::{Error, Result},
    events::{AgentEvent, EventSender, emit},
    normalize::normalize_arguments,
    specialist::{SPECIALISTS, SpecialistFactory, TRAIL_AGENT},
    tool::{ArgsExt, ToolError, error_payload},
    usage::ModelRates,
};

pub const ROUTER_NAME: &str = "Router";

/// The router's only capability
pub const HANDOFF_TOOL: &str = "handoff_to_agent";

const ROUTER_PROMPT: &str = "You are the MATE router, a hiking assistant. You never answer \
from memory when a specialist can help. Delegate with handoff_to_agent: GeocodingAgent for \
places and coordinates, TrailAgent for trail search and statistics, MeteoAgent for weather \
and daylight, WebAgent for regulations, permits and gear. Give each specialist a complete, \
self-contained instruction. When you have what you need, answer the user in a short \
narrative. Do not list trails the interface already displays.";

/// Trails the interface should display, owned by the router across turns
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActiveResultSet {
    pub ids: Vec<String>,
    pub order_by: String,
}

impl ActiveResultSet {
    pub fn clear(&mut self) {
        self.ids.clear();
        self.order_by.clear();
    }
}

/// Turns result ids into full records for the `End` event
#[async_trait]
pub trait ResultHydrator: Send + Sync {
    /// Must return an empty list for empty `ids` and keep the given order
    async fn hydrate(&self, ids: &[String], order_by: &str) -> std::result::Result<Vec<Value>, ToolError>;
}

/// Hydrator for deployments without a trail store
#[derive(Debug, Clone, Copy, Default)]
pub struct NoHydrator;

#[async_trait]
impl ResultHydrator for NoHydrator {
    async fn hydrate(&self, _ids: &[String], _order_by: &str) -> std::result::Result<Vec<Value>, ToolError> {
        Ok(vec![])
    }
}

pub fn handoff_declaration() -> ToolDeclaration {
    ToolDeclaration::new(
        HANDOFF_TOOL,
        "Delegate a task to a specialist agent.",
        json!({
            "type": "object",
            "properties": {
                "agent_name": {
                    "type": "string",
                    "enum": SPECIALISTS,
                    "description": "The specialist that should handle the task."
                },
                "instruction": {
                    "type": "string",
                    "description": "Complete, self-contained instruction for the specialist."
                }
            },
            "required": ["agent_name", "instruction"]
        }),
    )
}

/// Dispatcher that runs each delegation on a fresh specialist
pub struct Handoff {
    factory: Arc<dyn SpecialistFactory>,
    results: ActiveResultSet,
}

impl Handoff {
    pub fn new(factory: Arc<dyn SpecialistFactory>) -> Self {
        Self {
            factory,
            results: ActiveResultSet::default(),
        }
    }

    pub fn results(&self) -> &ActiveResultSet {
        &self.results
    }

    pub fn reset(&mut self) {
        self.results.clear();
    }

    /// Adopt the search specialist's ids when it asks for them to be shown
    fn absorb_trail_answer(&mut self, answer: &str) {
        let parsed = normalize_arguments(&Value::String(answer.to_string()));
        if parsed.get("show_trails") != Some(&Value::Bool(true)) {
            return;
        }
        self.results = ActiveResultSet {
            ids: parsed.string_list("trail_ids"),
            order_by: parsed
                .get("order_by")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        };
        info!(
            trails = self.results.ids.len(),
            order_by = %self.results.order_by,
            "Active result set updated"
        );
    }
}

#[async_trait]
impl Dispatcher for Handoff {
    async fn dispatch(
        &mut self,
        call: &ToolCall,
        args: Map<String, Value>,
        events: &EventSender,
    ) -> Result<Option<Dispatched>> {
        if call.name != HANDOFF_TOOL {
            warn!(tool = %call.name, "Router asked for an unknown tool");
            return Ok(Some(Dispatched {
                payload: error_payload(format!("Tool '{}' not found in registry.", call.name)),
                usage: Usage::default(),
            }));
        }

        let agent = args.get("agent_name").and_then(Value::as_str).unwrap_or_default();
        let instruction = args
            .get("instruction")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let Some(mut specialist) = self.factory.create(agent)? else {
            warn!(agent, "Unknown agent requested");
            return Ok(None);
        };
        info!(agent, instruction = %instruction, "Handing off");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let run = async move {
            let outcome = specialist.run(&instruction, &tx).await;
            drop(tx);
            (specialist, outcome)
        };
        let forward = async move {
            let mut response = None;
            let mut last_error = None;
            while let Some(event) = rx.recv().await {
                match event {
                    AgentEvent::ToolCall { .. } | AgentEvent::ToolResult { .. } => emit(events, event),
                    AgentEvent::AgentResponse { .. } => response = Some(event),
                    AgentEvent::Error { message } => last_error = Some(message),
                    _ => {}
                }
            }
            (response, last_error)
        };
        let ((specialist, outcome), (response, last_error)) = tokio::join!(run, forward);
        let usage = specialist.usage();

        let payload = match outcome {
            Ok(Some(answer)) => {
                if agent == TRAIL_AGENT {
                    self.absorb_trail_answer(&answer);
                }
                match response {
                    Some(AgentEvent::AgentResponse {
                        agent,
                        message,
                        input_tokens,
                        output_tokens,
                    }) => json!({
                        "status": "success",
                        "agent": agent,
                        "message": message,
                        "input_tokens": input_tokens,
                        "output_tokens": output_tokens,
                    }),
                    _ => json!({
                        "status": "success",
                        "agent": agent,
                        "message": answer,
                        "input_tokens": usage.input,
                        "output_tokens": usage.output,
                    }),
                }
            }
            Ok(None) => error_payload(format!(
                "{} ended without an answer: {}",
                agent,
                last_error.as_deref().unwrap_or("no response")
            )),
            Err(e @ Error::Configuration(_)) => return Err(e),
            Err(e) => {
                warn!(agent, error = %e, "Specialist run failed");
                error_payload(format!("{} failed: {}", agent, e))
            }
        };

        Ok(Some(Dispatched { payload, usage }))
    }
}

/// One user request as it reaches the router
#[derive(Debug, Clone, Default)]
pub struct Request {
    pub query: String,
    /// Latitude, longitude
    pub location: Option<(f64, f64)>,
    pub user_id: String,
    pub user_name: Option<String>,
}

impl Request {
    pub fn new(query: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    pub fn with_location(mut self, latitude: f64, longitude: f64) -> Self {
        self.location = Some((latitude, longitude));
        self
    }

    pub fn with_user_name(mut self, name: impl Into<String>) -> Self {
        self.user_name = Some(name.into());
        self
    }
}

/// Wrap the query in the JSON context block the router model expects
pub fn build_context_prompt(request: &Request, now: NaiveDateTime) -> String {
    let (latitude, longitude) = request.location.unzip();
    let context = json!({
        "user_location": {"latitude": latitude, "longitude": longitude},
        "user_info": {
            "user_id": request.user_id,
            "name": request.user_name.as_deref().unwrap_or("Guest"),
        },
        "date_time": {
            "iso": now.format("%Y-%m-%dT%H:%M:%S").to_string(),
            "day_of_week": now.format("%A").to_string(),
        }
    });
    let context = serde_json::to_string_pretty(&context).unwrap_or_else(|_| context.to_string());
    format!("Context:\n{}\n\nUser Query:\n{}", context, request.query)
}

/// Top-level agent for one session
pub struct Router {
    engine: ConversationEngine<Handoff>,
    hydrator: Arc<dyn ResultHydrator>,
}

impl Router {
    pub fn new(
        model: Model,
        provider: Arc<dyn LlmProvider>,
        factory: Arc<dyn SpecialistFactory>,
        hydrator: Arc<dyn ResultHydrator>,
        config: EngineConfig,
        rates: Option<ModelRates>,
    ) -> Self {
        let spec = AgentSpec {
            name: ROUTER_NAME.to_string(),
            model,
            system_prompt: ROUTER_PROMPT.to_string(),
            tools: vec![handoff_declaration()],
        };
        let engine = ConversationEngine::new(spec, provider, Handoff::new(factory), config, rates);
        Self { engine, hydrator }
    }

    pub fn engine(&self) -> &ConversationEngine<Handoff> {
        &self.engine
    }

    pub fn results(&self) -> &ActiveResultSet {
        self.engine.dispatcher().results()
    }

    /// Clear history, usage and the active result set
    pub fn reset(&mut self) {
        self.engine.reset();
        self.engine.dispatcher_mut().reset();
        info!("Router conversation reset");
    }

    /// Handle one request, ending in `End` when the router reaches an answer
    pub async fn run(&mut self, request: &Request, events: &EventSender) -> Result<()> {
        let started = Instant::now();
        let prompt = build_context_prompt(request, chrono::Local::now().naive_local());

        let Some(answer) = self.engine.run_turns(prompt, events).await? else {
            return Ok(());
        };

        let results = self.results().clone();
        let trails = self.hydrate(&results).await;
        let accountant = self.engine.accountant();
        let usage = accountant.prompt_usage();
        let cost = accountant.prompt_cost();
        let duration = started.elapsed().as_secs_f64();
        info!(
            input_tokens = usage.input,
            output_tokens = usage.output,
            cost,
            duration,
            trails = trails.len(),
            "Request complete"
        );

        emit(
            events,
            AgentEvent::End {
                message: answer,
                trails,
                order_by: results.order_by,
                input_tokens: usage.input,
                output_tokens: usage.output,
                cost,
                duration,
            },
        );
        Ok(())
    }

    async fn hydrate(&self, results: &ActiveResultSet) -> Vec<Value> {
        if results.ids.is_empty() {
            return vec![];
        }
        match self.hydrator.hydrate(&results.ids, &results.order_by).await {
            Ok(items) => items,
            Err(e) => {
                warn!(error = %e, "Result hydration failed");
                vec![]
            }
        }
    }
}
