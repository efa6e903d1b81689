//! Trail database tools

use async_trait::async_trait;
use mate_agent::{Tool, ToolError};
use serde_json::{Map, Value};
use tracing::warn;

/// Tools the trail specialist declares
pub const TRAIL_TOOLS: &[&str] = &[
    "execute_trail_query",
    "get_trail_count",
    "get_trail_details_by_id",
    "get_comments",
    "get_waypoints",
];

/// Stand-in for a trail store that has not been wired in.
///
/// The specialist sees a structured error and can tell the user.
pub struct UnconfiguredTrailTool {
    name: &'static str,
}

impl UnconfiguredTrailTool {
    pub fn new(name: &'static str) -> Self {
        Self { name }
    }
}

#[async_trait]
impl Tool for UnconfiguredTrailTool {
    fn name(&self) -> &str {
        self.name
    }

    async fn call(&self, _args: Map<String, Value>) -> Result<Value, ToolError> {
        warn!(tool = self.name, "Trail store is not configured");
        Err(ToolError::NotConfigured("trail store".into()))
    }
}
