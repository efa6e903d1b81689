//! Forecasts from the Open-Meteo API

use async_trait::async_trait;
use mate_agent::{ArgsExt, Tool, ToolError};
use serde_json::{Map, Value, json};

use super::get_json;

const FORECAST_URL: &str = "https://api.open-meteo.com/v1/forecast";

const DAILY_VARIABLES: &[&str] = &[
    "temperature_2m_max",
    "temperature_2m_min",
    "precipitation_sum",
    "precipitation_probability_max",
    "wind_speed_10m_max",
    "weather_code",
];
const HOURLY_VARIABLES: &[&str] = &[
    "temperature_2m",
    "precipitation_probability",
    "precipitation",
    "wind_speed_10m",
    "weather_code",
];
const SUN_VARIABLES: &[&str] = &["sunrise", "sunset", "daylight_duration"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForecastKind {
    Daily,
    Hourly,
    SunTimes,
}

impl ForecastKind {
    fn tool_name(self) -> &'static str {
        match self {
            ForecastKind::Daily => "get_daily_forecast",
            ForecastKind::Hourly => "get_hourly_forecast",
            ForecastKind::SunTimes => "get_sunrise_sunset_times",
        }
    }

    /// Query key and section of the response holding the series
    fn section(self) -> &'static str {
        match self {
            ForecastKind::Hourly => "hourly",
            ForecastKind::Daily | ForecastKind::SunTimes => "daily",
        }
    }

    fn variables(self, requested: Vec<String>) -> String {
        let defaults = match self {
            ForecastKind::Daily => DAILY_VARIABLES,
            ForecastKind::Hourly => HOURLY_VARIABLES,
            ForecastKind::SunTimes => SUN_VARIABLES,
        };
        if self == ForecastKind::Daily && !requested.is_empty() {
            return requested.join(",");
        }
        defaults.join(",")
    }
}

/// One of the three forecast tools the weather specialist uses
pub struct ForecastTool {
    client: reqwest::Client,
    kind: ForecastKind,
}

impl ForecastTool {
    pub fn new(client: reqwest::Client, kind: ForecastKind) -> Self {
        Self { client, kind }
    }

    fn query(&self, args: &Map<String, Value>) -> Result<Vec<(&'static str, String)>, ToolError> {
        Ok(vec![
            ("latitude", args.f64_arg("latitude")?.to_string()),
            ("longitude", args.f64_arg("longitude")?.to_string()),
            ("start_date", args.str_arg("start_date")?.to_string()),
            ("end_date", args.str_arg("end_date")?.to_string()),
            (self.kind.section(), self.kind.variables(args.string_list("variables"))),
            ("timezone", "auto".to_string()),
        ])
    }
}

#[async_trait]
impl Tool for ForecastTool {
    fn name(&self) -> &str {
        self.kind.tool_name()
    }

    async fn call(&self, args: Map<String, Value>) -> Result<Value, ToolError> {
        let query = self.query(&args)?;
        let body = get_json(self.client.get(FORECAST_URL).query(&query)).await?;

        if body.get("error").and_then(Value::as_bool) == Some(true) {
            let reason = body.get("reason").and_then(Value::as_str).unwrap_or("forecast unavailable");
            return Ok(json!({"status": "error", "message": reason}));
        }

        let section = self.kind.section();
        Ok(json!({
            "status": "ok",
            "timezone": body.get("timezone"),
            "units": body.get(format!("{}_units", section)),
            "data": body.get(section),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_daily_query_uses_requested_variables() {
        let tool = ForecastTool::new(reqwest::Client::new(), ForecastKind::Daily);
        let query = tool
            .query(&args(json!({
                "latitude": "46.85",
                "longitude": -121.76,
                "start_date": "2025-06-07",
                "end_date": "2025-06-09",
                "variables": ["precipitation_sum"]
            })))
            .unwrap();
        assert_eq!(query[0], ("latitude", "46.85".to_string()));
        assert_eq!(query[4], ("daily", "precipitation_sum".to_string()));
    }

    #[test]
    fn test_sun_times_use_fixed_variables() {
        let tool = ForecastTool::new(reqwest::Client::new(), ForecastKind::SunTimes);
        assert_eq!(tool.name(), "get_sunrise_sunset_times");
        let query = tool
            .query(&args(json!({
                "latitude": 46.85,
                "longitude": -121.76,
                "start_date": "2025-06-07",
                "end_date": "2025-06-07",
                "variables": ["temperature_2m_max"]
            })))
            .unwrap();
        assert_eq!(query[4], ("daily", "sunrise,sunset,daylight_duration".to_string()));
    }

    #[test]
    fn test_missing_dates_rejected() {
        let tool = ForecastTool::new(reqwest::Client::new(), ForecastKind::Hourly);
        let err = tool
            .query(&args(json!({"latitude": 1.0, "longitude": 2.0})))
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
