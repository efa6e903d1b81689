//! Domain collaborators behind the specialists' tools

mod geocoding;
mod meteo;
mod trail;
mod web;

pub use geocoding::{GeocodeTool, ReverseGeocodeTool};
pub use meteo::{ForecastKind, ForecastTool};
pub use trail::UnconfiguredTrailTool;
pub use web::WebSearchTool;

use mate_agent::{BoxedTool, ToolError, ToolRegistry};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

const USER_AGENT: &str = "MATE-Framework/1.0";
const TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP client shared by every collaborator
pub fn http_client() -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(TIMEOUT)
        .build()
}

/// Every tool the specialist catalog declares
pub fn registry(client: reqwest::Client, serpapi_key: Option<String>) -> ToolRegistry {
    let mut tools: Vec<BoxedTool> = vec![
        Arc::new(GeocodeTool::new(client.clone())),
        Arc::new(ReverseGeocodeTool::new(client.clone())),
        Arc::new(ForecastTool::new(client.clone(), ForecastKind::Daily)),
        Arc::new(ForecastTool::new(client.clone(), ForecastKind::Hourly)),
        Arc::new(ForecastTool::new(client.clone(), ForecastKind::SunTimes)),
        Arc::new(WebSearchTool::new(client, serpapi_key)),
    ];
    tools.extend(
        trail::TRAIL_TOOLS
            .iter()
            .map(|&name| -> BoxedTool { Arc::new(UnconfiguredTrailTool::new(name)) }),
    );
    ToolRegistry::with_tools(tools)
}

/// GET a JSON document, treating HTTP failure statuses as tool failures
async fn get_json(request: reqwest::RequestBuilder) -> Result<Value, ToolError> {
    request
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(ToolError::failed)?
        .json()
        .await
        .map_err(ToolError::failed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mate_agent::specialist::{SPECIALISTS, specialist_tools};

    #[test]
    fn test_registry_covers_every_specialist() {
        let registry = registry(reqwest::Client::new(), None);
        for name in SPECIALISTS {
            let decls = specialist_tools(name).unwrap();
            assert!(registry.subset(&decls).is_ok(), "{name}");
        }
    }
}
