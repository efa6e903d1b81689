//! Web search through SerpAPI

use async_trait::async_trait;
use mate_agent::{ArgsExt, Tool, ToolError};
use serde_json::{Map, Value, json};

use super::get_json;

const SEARCH_URL: &str = "https://serpapi.com/search.json";

pub struct WebSearchTool {
    client: reqwest::Client,
    api_key: Option<String>,
}

impl WebSearchTool {
    pub fn new(client: reqwest::Client, api_key: Option<String>) -> Self {
        Self { client, api_key }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "search_web_for_hiking_info"
    }

    async fn call(&self, args: Map<String, Value>) -> Result<Value, ToolError> {
        let query = args.str_arg("query")?;
        let max_results = args.opt_u64("max_results").unwrap_or(5).clamp(1, 10) as usize;
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ToolError::NotConfigured("web search".into()))?;

        let body = get_json(self.client.get(SEARCH_URL).query(&[
            ("engine", "google"),
            ("q", query),
            ("num", &max_results.to_string()),
            ("api_key", api_key),
        ]))
        .await?;

        if let Some(error) = body.get("error").and_then(Value::as_str) {
            return Ok(json!({"status": "error", "message": error}));
        }
        Ok(json!({"status": "ok", "results": organic_results(&body, max_results)}))
    }
}

fn organic_results(body: &Value, max_results: usize) -> Vec<Value> {
    body.get("organic_results")
        .and_then(Value::as_array)
        .map(|results| {
            results
                .iter()
                .take(max_results)
                .map(|r| {
                    json!({
                        "title": r.get("title"),
                        "link": r.get("link"),
                        "snippet": r.get("snippet"),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_organic_results_are_trimmed() {
        let body = json!({
            "organic_results": [
                {"title": "Permits", "link": "https://nps.gov/permits", "snippet": "Wilderness permits...", "position": 1},
                {"title": "Closures", "link": "https://nps.gov/closures", "snippet": "Road closures..."}
            ]
        });
        let results = organic_results(&body, 1);
        assert_eq!(
            results,
            vec![json!({"title": "Permits", "link": "https://nps.gov/permits", "snippet": "Wilderness permits..."})]
        );
        assert!(organic_results(&json!({}), 5).is_empty());
    }

    #[tokio::test]
    async fn test_without_key_is_not_configured() {
        let tool = WebSearchTool::new(reqwest::Client::new(), None);
        let mut args = Map::new();
        args.insert("query".into(), json!("Rainier wilderness permit"));
        let err = tool.call(args).await.unwrap_err();
        assert_eq!(err.to_string(), "web search is not configured");
    }
}
