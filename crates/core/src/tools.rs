// Tool abstraction for the chat agent
//
// Tools are defined via the `Tool` trait and registered with a `ToolRegistry`.
// Each execution ends in a ToolOutcome, which the agent turns into either a
// tool-output-available or a tool-output-error chunk.
//
// Design decisions:
// - Error handling distinguishes between user-visible errors and internal errors
// - Internal errors are logged but not exposed to the model or the client
// - Unknown tool names are a tool-level error so the model can recover

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use tracing::error;

use crate::model::{ToolCall, ToolDefinition};

/// Message substituted for internal tool errors
pub const INTERNAL_TOOL_ERROR: &str = "An internal error occurred while executing the tool";

// ============================================================================
// Tool Execution Result
// ============================================================================

/// Result of a tool execution
#[derive(Debug)]
pub enum ToolExecutionResult {
    /// Successful execution with a JSON result
    Success(Value),

    /// Tool-level error that is safe to show to the model and client
    ToolError(String),

    /// Internal error; details are logged and replaced with a generic message
    InternalError(String),
}

impl ToolExecutionResult {
    pub fn success(value: impl Into<Value>) -> Self {
        ToolExecutionResult::Success(value.into())
    }

    pub fn tool_error(message: impl Into<String>) -> Self {
        ToolExecutionResult::ToolError(message.into())
    }

    pub fn internal_error(error: impl std::fmt::Display) -> Self {
        ToolExecutionResult::InternalError(error.to_string())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ToolExecutionResult::Success(_))
    }

    /// Resolve into what the model and client get to see
    pub fn into_outcome(self, tool_call_id: &str, tool_name: &str) -> ToolOutcome {
        match self {
            ToolExecutionResult::Success(value) => ToolOutcome::Output(value),
            ToolExecutionResult::ToolError(message) => ToolOutcome::Error(message),
            ToolExecutionResult::InternalError(message) => {
                error!(
                    tool_name = %tool_name,
                    tool_call_id = %tool_call_id,
                    error = %message,
                    "Tool internal error (details hidden from model)"
                );
                ToolOutcome::Error(INTERNAL_TOOL_ERROR.to_string())
            }
        }
    }
}

/// Visible outcome of one tool call
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Output(Value),
    Error(String),
}

impl ToolOutcome {
    /// Content of the tool message sent back to the model
    pub fn to_model_content(&self) -> String {
        match self {
            ToolOutcome::Output(value) => serde_json::to_string(value).unwrap_or_default(),
            ToolOutcome::Error(message) => json!({ "error": message }).to_string(),
        }
    }
}

// ============================================================================
// Tool Trait
// ============================================================================

/// A function-style tool the model can call
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name the model calls the tool by
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema of the arguments
    fn parameters_schema(&self) -> Value;

    async fn execute(&self, arguments: Value) -> ToolExecutionResult;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

// ============================================================================
// Tool Registry
// ============================================================================

/// Named set of tools offered to the model
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::new()
    }

    /// Registry with the built-in chat tools
    pub fn with_defaults() -> Self {
        Self::builder().tool(GetCurrentDatetimeTool).build()
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.name().to_string(), Arc::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions sorted by name so requests are deterministic
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<_> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execute one call; unknown tools are a tool-level error
    pub async fn execute(&self, call: &ToolCall) -> ToolOutcome {
        let result = match self.tools.get(&call.name) {
            Some(tool) => tool.execute(call.arguments.clone()).await,
            None => ToolExecutionResult::tool_error(format!("Tool '{}' not found", call.name)),
        };
        result.into_outcome(&call.id, &call.name)
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.tools.keys().collect();
        names.sort();
        f.debug_struct("ToolRegistry").field("tools", &names).finish()
    }
}

/// Builder for ToolRegistry
#[derive(Default)]
pub struct ToolRegistryBuilder {
    registry: ToolRegistry,
}

impl ToolRegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tool(mut self, tool: impl Tool + 'static) -> Self {
        self.registry.register(tool);
        self
    }

    pub fn build(self) -> ToolRegistry {
        self.registry
    }
}

// ============================================================================
// Tool: get_current_datetime
// ============================================================================

/// Tool that returns the current date and time in UTC
pub struct GetCurrentDatetimeTool;

impl GetCurrentDatetimeTool {
    /// Result payload for a given instant
    pub fn payload(now: DateTime<Utc>) -> Value {
        json!({
            "iso": now.to_rfc3339_opts(SecondsFormat::Millis, true),
            "localeString": now.format("%-m/%-d/%Y, %-I:%M:%S %p").to_string(),
            "timezone": "UTC",
        })
    }
}

#[async_trait]
impl Tool for GetCurrentDatetimeTool {
    fn name(&self) -> &str {
        "get_current_datetime"
    }

    fn description(&self) -> &str {
        "Get the current date and time"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        })
    }

    async fn execute(&self, _arguments: Value) -> ToolExecutionResult {
        ToolExecutionResult::success(Self::payload(Utc::now()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct BrokenTool;

    #[async_trait]
    impl Tool for BrokenTool {
        fn name(&self) -> &str {
            "broken"
        }

        fn description(&self) -> &str {
            "Always fails internally"
        }

        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }

        async fn execute(&self, _arguments: Value) -> ToolExecutionResult {
            ToolExecutionResult::internal_error("db password=hunter2 rejected")
        }
    }

    fn call(name: &str) -> ToolCall {
        ToolCall {
            id: "c1".into(),
            name: name.into(),
            arguments: json!({}),
        }
    }

    #[test]
    fn test_datetime_payload() {
        let now = Utc.with_ymd_and_hms(2025, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(
            GetCurrentDatetimeTool::payload(now),
            json!({
                "iso": "2025-03-09T14:05:07.000Z",
                "localeString": "3/9/2025, 2:05:07 PM",
                "timezone": "UTC",
            })
        );
    }

    #[test]
    fn test_definitions_sorted() {
        let registry = ToolRegistry::builder()
            .tool(GetCurrentDatetimeTool)
            .tool(BrokenTool)
            .build();
        let names: Vec<_> = registry.definitions().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["broken", "get_current_datetime"]);
    }

    #[tokio::test]
    async fn test_execute_outcomes() {
        let registry = ToolRegistry::builder()
            .tool(GetCurrentDatetimeTool)
            .tool(BrokenTool)
            .build();

        match registry.execute(&call("get_current_datetime")).await {
            ToolOutcome::Output(value) => assert_eq!(value["timezone"], "UTC"),
            other => panic!("unexpected {:?}", other),
        }

        let hidden = registry.execute(&call("broken")).await;
        assert_eq!(hidden, ToolOutcome::Error(INTERNAL_TOOL_ERROR.to_string()));
        assert!(!hidden.to_model_content().contains("hunter2"));

        assert_eq!(
            registry.execute(&call("missing")).await,
            ToolOutcome::Error("Tool 'missing' not found".to_string())
        );
    }
}
