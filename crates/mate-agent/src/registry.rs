//! Name-to-tool dispatch with failure containment

use async_trait::async_trait;
use futures::FutureExt;
use mate_ai::{ToolCall, ToolDeclaration, Usage};
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use tracing::{debug, error, info};

use crate::{
    engine::{Dispatched, Dispatcher},
    error::{Error, Result},
    events::EventSender,
    tool::{BoxedTool, error_payload},
};

/// Fixed mapping from tool name to implementation
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, BoxedTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool under its own name
    pub fn register(mut self, tool: BoxedTool) -> Self {
        self.tools.insert(tool.name().to_string(), tool);
        self
    }

    pub fn with_tools(tools: impl IntoIterator<Item = BoxedTool>) -> Self {
        tools.into_iter().fold(Self::new(), Self::register)
    }

    pub fn get(&self, name: &str) -> Option<&BoxedTool> {
        self.tools.get(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Registry holding exactly the declared tools.
    ///
    /// A declaration without an implementation is a wiring bug and fails here,
    /// before any model call is made.
    pub fn subset(&self, declarations: &[ToolDeclaration]) -> Result<Self> {
        let mut tools = HashMap::new();
        for decl in declarations {
            let tool = self.tools.get(&decl.name).ok_or_else(|| {
                Error::Configuration(format!("no implementation registered for tool '{}'", decl.name))
            })?;
            tools.insert(decl.name.clone(), tool.clone());
        }
        Ok(Self { tools })
    }

    /// Invoke a tool by name. Always produces a payload.
    pub async fn invoke(&self, name: &str, args: Map<String, Value>) -> Value {
        let Some(tool) = self.tools.get(name) else {
            error!(tool = name, "Tool not found in registry");
            return error_payload(format!("Tool '{}' not found in registry.", name));
        };

        let shown = Value::Object(args.clone());
        info!(tool = name, args = %shown, "Executing tool");
        let payload = match AssertUnwindSafe(tool.call(args)).catch_unwind().await {
            Ok(Ok(Value::Object(map))) => Value::Object(map),
            Ok(Ok(other)) => json!({ "status": "ok", "result": other }),
            Ok(Err(e)) => {
                error!(tool = name, error = %e, "Tool execution error");
                error_payload(e.to_string())
            }
            Err(panic) => {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "tool panicked".to_string());
                error!(tool = name, panic = %message, "Tool panicked");
                error_payload(message)
            }
        };
        debug!(tool = name, result = %preview(&payload), "Tool result");
        payload
    }
}

#[async_trait]
impl Dispatcher for ToolRegistry {
    async fn dispatch(
        &mut self,
        call: &ToolCall,
        args: Map<String, Value>,
        _events: &EventSender,
    ) -> Result<Option<Dispatched>> {
        let payload = self.invoke(&call.name, args).await;
        Ok(Some(Dispatched {
            payload,
            usage: Usage::default(),
        }))
    }
}

/// Log-friendly payload text, cut at 500 characters
pub(crate) fn preview(payload: &Value) -> String {
    let text = payload.to_string();
    match text.char_indices().nth(500) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{Tool, ToolError};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct EchoTool {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "geocode"
        }
        async fn call(&self, args: Map<String, Value>) -> std::result::Result<Value, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"status": "found", "echo": Value::Object(args)}))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &str {
            "get_comments"
        }
        async fn call(&self, _args: Map<String, Value>) -> std::result::Result<Value, ToolError> {
            Err(ToolError::Failed("database locked".into()))
        }
    }

    struct PanickingTool;

    #[async_trait]
    impl Tool for PanickingTool {
        fn name(&self) -> &str {
            "get_waypoints"
        }
        async fn call(&self, _args: Map<String, Value>) -> std::result::Result<Value, ToolError> {
            panic!("index out of bounds");
        }
    }

    fn registry() -> (ToolRegistry, Arc<AtomicU32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let registry = ToolRegistry::new()
            .register(Arc::new(EchoTool {
                calls: calls.clone(),
            }))
            .register(Arc::new(FailingTool))
            .register(Arc::new(PanickingTool));
        (registry, calls)
    }

    fn decl(name: &str) -> ToolDeclaration {
        ToolDeclaration::new(name, "", json!({"type": "object"}))
    }

    #[tokio::test]
    async fn test_invoke_known_tool() {
        let (registry, calls) = registry();
        let mut args = Map::new();
        args.insert("location".into(), json!("Paradise"));
        let payload = registry.invoke("geocode", args).await;
        assert_eq!(payload["status"], "found");
        assert_eq!(payload["echo"]["location"], "Paradise");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_tool_payload() {
        let (registry, _) = registry();
        let payload = registry.invoke("teleport", Map::new()).await;
        assert_eq!(
            payload,
            json!({"status": "error", "message": "Tool 'teleport' not found in registry."})
        );
    }

    #[tokio::test]
    async fn test_tool_error_is_contained() {
        let (registry, _) = registry();
        let payload = registry.invoke("get_comments", Map::new()).await;
        assert_eq!(payload, json!({"status": "error", "message": "database locked"}));
    }

    #[tokio::test]
    async fn test_tool_panic_is_contained() {
        let (registry, _) = registry();
        let payload = registry.invoke("get_waypoints", Map::new()).await;
        assert_eq!(payload["status"], "error");
        assert_eq!(payload["message"], "index out of bounds");
    }

    #[test]
    fn test_subset_requires_every_declaration() {
        let (registry, _) = registry();
        let sub = registry.subset(&[decl("geocode")]).unwrap();
        assert_eq!(sub.len(), 1);
        assert!(sub.get("get_comments").is_none());

        let err = registry
            .subset(&[decl("geocode"), decl("reverse_geocode")])
            .err()
            .unwrap();
        assert!(matches!(err, Error::Configuration(ref m) if m.contains("reverse_geocode")));
    }

    #[test]
    fn test_preview_truncates() {
        let long = json!({"text": "x".repeat(800)});
        let p = preview(&long);
        assert!(p.ends_with("..."));
        assert_eq!(p.chars().count(), 503);
    }
}
