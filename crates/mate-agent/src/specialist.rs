//! Specialist agents and the factory the router delegates through

use mate_ai::{Model, ToolDeclaration, Usage, providers::LlmProvider};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

use crate::{
    engine::{AgentSpec, ConversationEngine, EngineConfig},
    error::Result,
    events::{AgentEvent, EventSender, emit},
    registry::ToolRegistry,
    usage::ModelRates,
};

pub const GEOCODING_AGENT: &str = "GeocodingAgent";
pub const TRAIL_AGENT: &str = "TrailAgent";
pub const METEO_AGENT: &str = "MeteoAgent";
pub const WEB_AGENT: &str = "WebAgent";

/// Every name the router may delegate to
pub const SPECIALISTS: [&str; 4] = [GEOCODING_AGENT, TRAIL_AGENT, METEO_AGENT, WEB_AGENT];

const GEOCODING_PROMPT: &str = "You are GeocodingAgent. Resolve place names to coordinates \
and coordinates to place names with your tools. Report ambiguity instead of guessing. \
Answer with a short factual summary.";

const TRAIL_PROMPT: &str = "You are TrailAgent. You never converse directly. Query the trail \
database with your tools, then answer strictly with JSON: {\"status\": \"success\", \
\"show_trails\": boolean, \"trail_ids\": [string], \"order_by\": string, \"text_result\": string}. \
Set show_trails to true when the user is browsing for trails and false for counts or analysis.";

const METEO_PROMPT: &str = "You are MeteoAgent. Fetch forecasts and daylight times for the \
given coordinates and dates. Summarize what matters for hiking: precipitation, wind, \
temperature range, sunrise and sunset.";

const WEB_PROMPT: &str = "You are WebAgent. Search the web for factual hiking information \
such as regulations, permits, closures and gear. Never invent trail routes. Cite sources briefly.";

fn number() -> serde_json::Value {
    json!({"type": "number"})
}

fn date() -> serde_json::Value {
    json!({"type": "string", "format": "date"})
}

fn trail_ids(purpose: &str) -> serde_json::Value {
    json!({
        "type": "array",
        "items": {"type": "string"},
        "description": format!("List of specific trail_ids to fetch {}.", purpose)
    })
}

fn forecast_window(extra: Option<(&str, serde_json::Value)>) -> serde_json::Value {
    let mut properties = json!({
        "latitude": number(),
        "longitude": number(),
        "start_date": date(),
        "end_date": date()
    });
    if let Some((key, schema)) = extra {
        properties[key] = schema;
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": ["latitude", "longitude", "start_date", "end_date"]
    })
}

/// Tool schemas a specialist exposes to its model
pub fn specialist_tools(name: &str) -> Option<Vec<ToolDeclaration>> {
    let tools = match name {
        GEOCODING_AGENT => vec![
            ToolDeclaration::new(
                "reverse_geocode",
                "Resolve GPS (lat, lon) to a descriptive place name/address.",
                json!({
                    "type": "object",
                    "properties": {"latitude": number(), "longitude": number()},
                    "required": ["latitude", "longitude"]
                }),
            ),
            ToolDeclaration::new(
                "geocode",
                "Resolve place name to GPS coordinates (lat, lon). Returns bounding box and ambiguity status.",
                json!({
                    "type": "object",
                    "properties": {
                        "location": {"type": "string", "description": "Place name (e.g. 'Mount Olympus')."}
                    },
                    "required": ["location"]
                }),
            ),
        ],
        TRAIL_AGENT => vec![
            ToolDeclaration::new(
                "execute_trail_query",
                "Primary search. Finds trails matching criteria and returns their ids for later analysis.",
                json!({
                    "type": "object",
                    "properties": {
                        "where": {"type": "string", "description": "SQL WHERE clause (no 'WHERE') using '?' placeholders."},
                        "sql_params": {"type": "array", "items": {}, "description": "Values for placeholders."},
                        "order_by": {"type": "string", "description": "SQL ORDER BY clause (no 'ORDER BY')."},
                        "limit": {"type": "integer", "default": 20}
                    },
                    "required": ["where", "sql_params"]
                }),
            ),
            ToolDeclaration::new(
                "get_trail_count",
                "Quick integer count of trails matching criteria.",
                json!({
                    "type": "object",
                    "properties": {
                        "where": {"type": "string"},
                        "sql_params": {"type": "array", "items": {}}
                    },
                    "required": ["where", "sql_params"]
                }),
            ),
            ToolDeclaration::new(
                "get_trail_details_by_id",
                "Fetches stats/columns for the given trails.",
                json!({
                    "type": "object",
                    "properties": {
                        "trail_ids": trail_ids("details"),
                        "fields": {"type": "array", "items": {"type": "string"}, "description": "Columns to fetch."}
                    },
                    "required": ["trail_ids", "fields"]
                }),
            ),
            ToolDeclaration::new(
                "get_comments",
                "Fetches user reviews/ratings for the given trails.",
                json!({
                    "type": "object",
                    "properties": {"trail_ids": trail_ids("comments")},
                    "required": ["trail_ids"]
                }),
            ),
            ToolDeclaration::new(
                "get_waypoints",
                "Fetches POIs (waterfalls, summits) for the given trails.",
                json!({
                    "type": "object",
                    "properties": {"trail_ids": trail_ids("waypoints")},
                    "required": ["trail_ids"]
                }),
            ),
        ],
        METEO_AGENT => vec![
            ToolDeclaration::new(
                "get_daily_forecast",
                "Daily summaries (Temp/Rain). Max 16 days.",
                forecast_window(Some((
                    "variables",
                    json!({"type": "array", "items": {"type": "string"}}),
                ))),
            ),
            ToolDeclaration::new(
                "get_hourly_forecast",
                "Granular hourly data. Use only for specific timing queries.",
                forecast_window(None),
            ),
            ToolDeclaration::new(
                "get_sunrise_sunset_times",
                "Get daylight hours.",
                forecast_window(None),
            ),
        ],
        WEB_AGENT => vec![ToolDeclaration::new(
            "search_web_for_hiking_info",
            "Search web for factual info, regulations, gear. NO TRAIL ROUTES.",
            json!({
                "type": "object",
                "properties": {
                    "query": {"type": "string", "description": "3-8 word factual query."},
                    "max_results": {"type": "integer", "default": 5}
                },
                "required": ["query"]
            }),
        )],
        _ => return None,
    };
    Some(tools)
}

fn system_prompt(name: &str) -> Option<&'static str> {
    match name {
        GEOCODING_AGENT => Some(GEOCODING_PROMPT),
        TRAIL_AGENT => Some(TRAIL_PROMPT),
        METEO_AGENT => Some(METEO_PROMPT),
        WEB_AGENT => Some(WEB_PROMPT),
        _ => None,
    }
}

/// A fresh sub-agent with no memory of earlier delegations
pub struct Specialist {
    engine: ConversationEngine<ToolRegistry>,
}

impl Specialist {
    pub fn new(engine: ConversationEngine<ToolRegistry>) -> Self {
        Self { engine }
    }

    pub fn name(&self) -> &str {
        self.engine.name()
    }

    /// Tokens spent so far on this delegation
    pub fn usage(&self) -> Usage {
        self.engine.accountant().prompt_usage()
    }

    /// Run the instruction to completion, ending in an `AgentResponse` on success
    pub async fn run(&mut self, instruction: &str, events: &EventSender) -> Result<Option<String>> {
        let Some(answer) = self.engine.run_turns(instruction, events).await? else {
            return Ok(None);
        };
        let usage = self.usage();
        info!(
            agent = %self.name(),
            input_tokens = usage.input,
            output_tokens = usage.output,
            "Specialist answered"
        );
        emit(
            events,
            AgentEvent::AgentResponse {
                agent: self.name().to_string(),
                message: answer.clone(),
                input_tokens: usage.input,
                output_tokens: usage.output,
            },
        );
        Ok(Some(answer))
    }
}

/// Builds specialists by name
pub trait SpecialistFactory: Send + Sync {
    /// A fresh specialist, or `None` for a name nobody answers to
    fn create(&self, name: &str) -> Result<Option<Specialist>>;
}

/// Factory over the built-in specialist catalog
pub struct CatalogFactory {
    provider: Arc<dyn LlmProvider>,
    model: Model,
    config: EngineConfig,
    tools: ToolRegistry,
    rates: Option<ModelRates>,
}

impl CatalogFactory {
    /// Fails when any specialist declares a tool missing from `tools`
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        model: Model,
        config: EngineConfig,
        tools: ToolRegistry,
        rates: Option<ModelRates>,
    ) -> Result<Self> {
        for name in SPECIALISTS {
            if let Some(decls) = specialist_tools(name) {
                tools.subset(&decls)?;
            }
        }
        Ok(Self {
            provider,
            model,
            config,
            tools,
            rates,
        })
    }
}

impl SpecialistFactory for CatalogFactory {
    fn create(&self, name: &str) -> Result<Option<Specialist>> {
        let (Some(decls), Some(prompt)) = (specialist_tools(name), system_prompt(name)) else {
            return Ok(None);
        };
        let registry = self.tools.subset(&decls)?;
        let spec = AgentSpec {
            name: name.to_string(),
            model: self.model.clone(),
            system_prompt: prompt.to_string(),
            tools: decls,
        };
        let engine = ConversationEngine::new(
            spec,
            self.provider.clone(),
            registry,
            self.config.clone(),
            self.rates.clone(),
        );
        Ok(Some(Specialist::new(engine)))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::engine::tests::{MockProvider, text};
    use crate::error::Error;
    use crate::tool::{Tool, ToolError};
    use async_trait::async_trait;
    use mate_ai::Backend;
    use serde_json::{Map, Value};
    use tokio::sync::mpsc;

    struct StubTool(String);

    #[async_trait]
    impl Tool for StubTool {
        fn name(&self) -> &str {
            &self.0
        }
        async fn call(&self, _args: Map<String, Value>) -> std::result::Result<Value, ToolError> {
            Ok(json!({"status": "ok"}))
        }
    }

    pub(crate) fn full_registry() -> ToolRegistry {
        ToolRegistry::with_tools(
            SPECIALISTS
                .iter()
                .flat_map(|name| specialist_tools(name).unwrap_or_default())
                .map(|decl| -> crate::tool::BoxedTool { Arc::new(StubTool(decl.name)) }),
        )
    }

    fn factory(tools: ToolRegistry) -> Result<CatalogFactory> {
        CatalogFactory::new(
            Arc::new(MockProvider::new(vec![Ok(text("Sunny."))])),
            Model::new(Backend::Gemini, "test"),
            EngineConfig::default(),
            tools,
            None,
        )
    }

    #[test]
    fn test_every_specialist_has_tools_and_prompt() {
        for name in SPECIALISTS {
            assert!(!specialist_tools(name).unwrap().is_empty(), "{name}");
            assert!(system_prompt(name).is_some(), "{name}");
        }
        assert!(specialist_tools("Router").is_none());
    }

    #[test]
    fn test_missing_implementation_is_configuration_error() {
        let err = factory(ToolRegistry::new()).err().unwrap();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_unknown_name_yields_none() {
        let factory = factory(full_registry()).unwrap();
        assert!(factory.create("PlannerAgent").unwrap().is_none());
        let meteo = factory.create(METEO_AGENT).unwrap().unwrap();
        assert_eq!(meteo.name(), METEO_AGENT);
    }

    #[tokio::test]
    async fn test_specialist_emits_agent_response() {
        let factory = factory(full_registry()).unwrap();
        let mut meteo = factory.create(METEO_AGENT).unwrap().unwrap();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let answer = meteo.run("forecast for Paradise", &tx).await.unwrap();
        assert_eq!(answer.as_deref(), Some("Sunny."));

        let events = crate::engine::tests::drain(&mut rx);
        assert_eq!(
            events.last(),
            Some(&AgentEvent::AgentResponse {
                agent: METEO_AGENT.into(),
                message: "Sunny.".into(),
                input_tokens: 10,
                output_tokens: 5,
            })
        );
    }
}
