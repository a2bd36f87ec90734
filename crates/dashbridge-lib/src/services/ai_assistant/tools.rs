// Dashboard Tool Catalog and Executors
//
// Handles tool/function calling for dashboard operations:
// - Tool definitions for AI providers
// - Per-tool requirements consumed by the permission validator
// - Execution through the bridge (round-trip calls and pushes)

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use once_cell::sync::Lazy;
use serde_json::{json, Map, Value};

use crate::models::ai::{ChatToolDefinition, ToolCall};
use crate::models::bridge::ClientId;
use crate::models::guardrail::{ToolRequirement, ValidationContext};
use crate::models::tool::ToolResult;
use crate::services::bridge::Bridge;

use crate::models::guardrail::ToolRequirement::{DashboardContext, Image, LiveConnection};

/// How a tool is carried out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolExecution {
    /// Round-trip call to the UI; the answer becomes the tool output
    Remote(&'static str),
    /// Fire-and-forget push to the UI
    Push(&'static str),
    /// Answered by the backend itself
    Local,
}

/// A tool the model may call
#[derive(Debug, Clone)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
    pub requirements: &'static [ToolRequirement],
    pub execution: ToolExecution,
}

impl ToolSpec {
    pub fn definition(&self) -> ChatToolDefinition {
        ChatToolDefinition {
            name: self.name.to_string(),
            description: self.description.to_string(),
            parameters: self.parameters.clone(),
        }
    }

    /// Required parameters absent from `arguments`
    pub fn missing_parameters(&self, arguments: &Value) -> Vec<String> {
        self.parameters
            .get("required")
            .and_then(|r| r.as_array())
            .map(|required| {
                required
                    .iter()
                    .filter_map(|name| name.as_str())
                    .filter(|name| arguments.get(*name).map_or(true, Value::is_null))
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default()
    }
}

static TOOL_CATALOG: Lazy<Vec<ToolSpec>> = Lazy::new(|| {
    vec![
        ToolSpec {
            name: "get_dashboard_summary",
            description: "Get an overview of the connected dashboard: its name, sheets and data sources",
            parameters: json!({
                "type": "object",
                "properties": {}
            }),
            requirements: &[LiveConnection, DashboardContext],
            execution: ToolExecution::Remote("get-dashboard-summary"),
        },
        ToolSpec {
            name: "get_worksheet_data",
            description: "Read the summary data rows of one worksheet in the dashboard",
            parameters: json!({
                "type": "object",
                "properties": {
                    "worksheet": {
                        "type": "string",
                        "description": "Name of the worksheet to read"
                    },
                    "maxRows": {
                        "type": "integer",
                        "description": "Maximum number of rows to return (default 100)"
                    }
                },
                "required": ["worksheet"]
            }),
            requirements: &[LiveConnection, DashboardContext],
            execution: ToolExecution::Remote("get-worksheet-data"),
        },
        ToolSpec {
            name: "get_filters",
            description: "List the filters currently applied across the dashboard's worksheets",
            parameters: json!({
                "type": "object",
                "properties": {}
            }),
            requirements: &[LiveConnection, DashboardContext],
            execution: ToolExecution::Remote("get-filters"),
        },
        ToolSpec {
            name: "analyze_screenshot",
            description: "Fetch the screenshot the user attached so it can be described or analyzed",
            parameters: json!({
                "type": "object",
                "properties": {
                    "focus": {
                        "type": "string",
                        "description": "Optional area or question to focus the analysis on"
                    }
                }
            }),
            requirements: &[Image, LiveConnection],
            execution: ToolExecution::Remote("get-screenshot"),
        },
        ToolSpec {
            name: "render_visualization",
            description: "Render an HTML visualization (chart, table or card) on the extension canvas",
            parameters: json!({
                "type": "object",
                "properties": {
                    "html": {
                        "type": "string",
                        "description": "Self-contained HTML document to render"
                    },
                    "title": {
                        "type": "string",
                        "description": "Optional title shown above the visualization"
                    }
                },
                "required": ["html"]
            }),
            requirements: &[LiveConnection],
            execution: ToolExecution::Push("render"),
        },
        ToolSpec {
            name: "clear_canvas",
            description: "Remove whatever is currently rendered on the extension canvas",
            parameters: json!({
                "type": "object",
                "properties": {}
            }),
            requirements: &[LiveConnection],
            execution: ToolExecution::Push("clear-canvas"),
        },
        ToolSpec {
            name: "toggle_tooltips",
            description: "Show or hide tooltips on the dashboard",
            parameters: json!({
                "type": "object",
                "properties": {
                    "enabled": {
                        "type": "boolean",
                        "description": "true to show tooltips, false to hide them"
                    }
                },
                "required": ["enabled"]
            }),
            requirements: &[LiveConnection],
            execution: ToolExecution::Push("toggle-tooltips"),
        },
        ToolSpec {
            name: "get_current_time",
            description: "Get the current date and time (UTC)",
            parameters: json!({
                "type": "object",
                "properties": {}
            }),
            requirements: &[],
            execution: ToolExecution::Local,
        },
    ]
});

/// Every built-in tool
pub fn catalog() -> &'static [ToolSpec] {
    &TOOL_CATALOG
}

pub fn find_tool(name: &str) -> Option<&'static ToolSpec> {
    catalog().iter().find(|t| t.name == name)
}

/// Tool definitions handed to providers
pub fn chat_tool_definitions() -> Vec<ChatToolDefinition> {
    catalog().iter().map(ToolSpec::definition).collect()
}

/// Frame pushed or sent for a tool: `{type, ...arguments}`
pub fn build_ui_payload(frame_type: &str, arguments: &Value) -> Value {
    let mut payload = Map::new();
    payload.insert("type".to_string(), Value::String(frame_type.to_string()));
    if let Value::Object(args) = arguments {
        for (key, value) in args {
            if key != "type" && key != "requestId" {
                payload.insert(key.clone(), value.clone());
            }
        }
    }
    Value::Object(payload)
}

// =============================================================================
// Executors
// =============================================================================

/// Runs tool calls for one conversation
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Tool schema offered to the model
    fn definitions(&self) -> Vec<ChatToolDefinition> {
        chat_tool_definitions()
    }

    /// Current conditions; called again before every tool call
    async fn validation_context(&self) -> ValidationContext;

    /// Execute an already-validated call. Failures are reported in the result.
    async fn execute(&self, call: &ToolCall) -> ToolResult;
}

/// Executes catalog tools against the conversation's own connection
pub struct BridgeToolExecutor {
    bridge: Arc<Bridge>,
    client_id: ClientId,
    request_has_image: bool,
}

impl BridgeToolExecutor {
    pub fn new(bridge: Arc<Bridge>, client_id: impl Into<ClientId>, request_has_image: bool) -> Self {
        Self {
            bridge,
            client_id: client_id.into(),
            request_has_image,
        }
    }
}

#[async_trait]
impl ToolExecutor for BridgeToolExecutor {
    async fn validation_context(&self) -> ValidationContext {
        self.bridge
            .validation_context(&self.client_id, self.request_has_image)
            .await
    }

    async fn execute(&self, call: &ToolCall) -> ToolResult {
        let Some(spec) = find_tool(&call.name) else {
            return ToolResult::failure(&call.id, &call.name, format!("Unknown tool: {}", call.name));
        };

        let missing = spec.missing_parameters(&call.arguments);
        if !missing.is_empty() {
            return ToolResult::failure(
                &call.id,
                &call.name,
                format!("Missing required parameter(s): {}", missing.join(", ")),
            );
        }

        let started = Instant::now();
        log::info!("[orchestrator] Executing tool {} for {}", call.name, self.client_id);

        let outcome = match spec.execution {
            ToolExecution::Remote(frame_type) => {
                let payload = build_ui_payload(frame_type, &call.arguments);
                self.bridge.call(&self.client_id, payload).await
            }
            ToolExecution::Push(frame_type) => {
                let payload = build_ui_payload(frame_type, &call.arguments);
                self.bridge
                    .push(&self.client_id, &payload)
                    .await
                    .map(|_| json!({ "delivered": true }))
            }
            ToolExecution::Local => Ok(execute_local(spec.name)),
        };

        let elapsed = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(output) => ToolResult::success(&call.id, &call.name, output).with_duration(elapsed),
            Err(e) => {
                log::warn!("[orchestrator] Tool {} failed: {}", call.name, e);
                ToolResult::failure(&call.id, &call.name, e.to_string()).with_duration(elapsed)
            }
        }
    }
}

fn execute_local(name: &str) -> Value {
    match name {
        "get_current_time" => {
            let now = Utc::now();
            json!({
                "utc": now.to_rfc3339(),
                "unixSeconds": now.timestamp(),
            })
        }
        _ => Value::Null,
    }
}
