//! Place name and coordinate resolution

use async_trait::async_trait;
use mate_agent::{ArgsExt, Tool, ToolError};
use serde_json::{Map, Value, json};

use super::get_json;

const SEARCH_URL: &str = "https://geocoding-api.open-meteo.com/v1/search";
const REVERSE_URL: &str = "https://nominatim.openstreetmap.org/reverse";

/// Place name to coordinates via the Open-Meteo geocoding API
pub struct GeocodeTool {
    client: reqwest::Client,
}

impl GeocodeTool {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for GeocodeTool {
    fn name(&self) -> &str {
        "geocode"
    }

    async fn call(&self, args: Map<String, Value>) -> Result<Value, ToolError> {
        let location = args.str_arg("location")?;
        let count = args.opt_u64("max_results").unwrap_or(3).clamp(1, 10);

        let body = get_json(self.client.get(SEARCH_URL).query(&[
            ("name", location.to_string()),
            ("count", count.to_string()),
            ("format", "json".to_string()),
        ]))
        .await?;

        let results = body
            .get("results")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();
        Ok(candidates_payload(location, results))
    }
}

/// `found` for one match, `ambiguous` for several, `not_found` for none
fn candidates_payload(location: &str, results: &[Value]) -> Value {
    let candidates: Vec<Value> = results
        .iter()
        .map(|r| {
            json!({
                "name": r.get("name"),
                "region": r.get("admin1"),
                "country": r.get("country"),
                "latitude": r.get("latitude"),
                "longitude": r.get("longitude"),
            })
        })
        .collect();

    match candidates.len() {
        0 => json!({
            "status": "not_found",
            "message": format!("No place matches '{}'.", location),
            "candidates": []
        }),
        1 => json!({"status": "found", "candidates": candidates}),
        _ => json!({"status": "ambiguous", "candidates": candidates}),
    }
}

/// Coordinates to a place name via Nominatim
pub struct ReverseGeocodeTool {
    client: reqwest::Client,
}

impl ReverseGeocodeTool {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Tool for ReverseGeocodeTool {
    fn name(&self) -> &str {
        "reverse_geocode"
    }

    async fn call(&self, args: Map<String, Value>) -> Result<Value, ToolError> {
        let latitude = args.f64_arg("latitude")?;
        let longitude = args.f64_arg("longitude")?;

        let body = get_json(self.client.get(REVERSE_URL).query(&[
            ("format", "jsonv2".to_string()),
            ("lat", latitude.to_string()),
            ("lon", longitude.to_string()),
        ]))
        .await?;

        Ok(match body.get("display_name").and_then(Value::as_str) {
            Some(name) => json!({
                "status": "found",
                "candidates": [name],
                "address": body.get("address").cloned().unwrap_or(Value::Null),
            }),
            None => json!({
                "status": "not_found",
                "message": body.get("error").and_then(Value::as_str).unwrap_or("No address found."),
            }),
        })
    }
}
