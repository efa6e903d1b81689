//! Tool trait and result payload helpers

use async_trait::async_trait;
use mate_ai::ToolStatus;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use thiserror::Error;

/// Failure reported by a domain collaborator
#[derive(Error, Debug)]
pub enum ToolError {
    /// The arguments did not match what the tool needs
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// The collaborator is not wired to a backing service
    #[error("{0} is not configured")]
    NotConfigured(String),

    /// The call itself failed
    #[error("{0}")]
    Failed(String),
}

impl ToolError {
    pub fn failed(err: impl std::fmt::Display) -> Self {
        ToolError::Failed(err.to_string())
    }
}

/// An external capability a specialist can call
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the model uses to call this tool
    fn name(&self) -> &str;

    /// Run the tool. The returned mapping carries a `status` field.
    async fn call(&self, args: Map<String, Value>) -> Result<Value, ToolError>;
}

/// Type alias for a shared tool
pub type BoxedTool = Arc<dyn Tool>;

/// Structured error payload handed back to the model
pub fn error_payload(message: impl Into<String>) -> Value {
    json!({ "status": "error", "message": message.into() })
}

/// Read the `status` field of a payload. A payload without one counts as `ok`.
pub fn status_of(payload: &Value) -> ToolStatus {
    payload
        .get("status")
        .and_then(Value::as_str)
        .map(|s| ToolStatus::from(s.to_string()))
        .unwrap_or(ToolStatus::Ok)
}

/// Typed view over normalized arguments
pub trait ArgsExt {
    fn str_arg(&self, key: &str) -> Result<&str, ToolError>;
    fn f64_arg(&self, key: &str) -> Result<f64, ToolError>;
    fn opt_u64(&self, key: &str) -> Option<u64>;
    fn string_list(&self, key: &str) -> Vec<String>;
}

impl ArgsExt for Map<String, Value> {
    fn str_arg(&self, key: &str) -> Result<&str, ToolError> {
        self.get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::InvalidArguments(format!("missing string '{}'", key)))
    }

    fn f64_arg(&self, key: &str) -> Result<f64, ToolError> {
        match self.get(key) {
            Some(Value::Number(n)) => n.as_f64(),
            // Some models quote numbers.
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing number '{}'", key)))
    }

    fn opt_u64(&self, key: &str) -> Option<u64> {
        match self.get(key) {
            Some(Value::Number(n)) => n.as_u64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn string_list(&self, key: &str) -> Vec<String> {
        match self.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| match v {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect(),
            _ => vec![],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_payload_shape() {
        assert_eq!(
            error_payload("boom"),
            json!({"status": "error", "message": "boom"})
        );
    }

    #[test]
    fn test_status_of() {
        assert_eq!(status_of(&json!({"status": "found"})), ToolStatus::Other("found".into()));
        assert_eq!(status_of(&json!({"status": "error"})), ToolStatus::Error);
        assert_eq!(status_of(&json!({"data": []})), ToolStatus::Ok);
    }

    #[test]
    fn test_args_ext() {
        let args = json!({
            "latitude": "46.85",
            "longitude": -121.76,
            "trail_ids": ["t1", 2, null],
            "limit": 20
        })
        .as_object()
        .cloned()
        .unwrap();
        assert_eq!(args.f64_arg("latitude").unwrap(), 46.85);
        assert_eq!(args.f64_arg("longitude").unwrap(), -121.76);
        assert_eq!(args.string_list("trail_ids"), vec!["t1", "2"]);
        assert_eq!(args.opt_u64("limit"), Some(20));
        assert!(matches!(
            args.str_arg("location"),
            Err(ToolError::InvalidArguments(_))
        ));
    }
}
