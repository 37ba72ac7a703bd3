//! Gateway-owned management tools and their text output.

use std::sync::Arc;

use rmcp::model::{JsonObject, Tool};
use serde_json::json;

use crate::config::{GatewaySettings, ServerSpec};
use crate::error::JunctionError;
use crate::lifecycle::ReloadReport;
use crate::server::ToolDescriptor;

/// Argument name of `enable_server` / `disable_server`.
pub const SERVER_NAME_ARG: &str = "server_name";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagementTool {
    ListServers,
    ListTools,
    EnableServer,
    DisableServer,
}

impl ManagementTool {
    pub const ALL: [ManagementTool; 4] = [
        ManagementTool::ListServers,
        ManagementTool::ListTools,
        ManagementTool::EnableServer,
        ManagementTool::DisableServer,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ManagementTool::ListServers => "list_servers",
            ManagementTool::ListTools => "list_tools",
            ManagementTool::EnableServer => "enable_server",
            ManagementTool::DisableServer => "disable_server",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ManagementTool::ListServers => "List all configured MCP servers",
            ManagementTool::ListTools => "List all available tools from mounted servers",
            ManagementTool::EnableServer => "Enable a disabled MCP server with hot reload",
            ManagementTool::DisableServer => "Disable an enabled MCP server with hot reload",
        }
    }

    /// Exact-match lookup; qualified child tool names never match.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.name() == name)
    }

    /// Whether a call changes the mounted set (and the advertised tool list).
    pub fn mutates(self) -> bool {
        matches!(self, ManagementTool::EnableServer | ManagementTool::DisableServer)
    }

    pub fn definition(self) -> Tool {
        let schema = if self.mutates() {
            json!({
                "type": "object",
                "properties": {
                    SERVER_NAME_ARG: {
                        "type": "string",
                        "description": "Name of the server as configured in mcpServers"
                    }
                },
                "required": [SERVER_NAME_ARG]
            })
        } else {
            json!({ "type": "object", "properties": {} })
        };
        let schema: JsonObject = match schema {
            serde_json::Value::Object(map) => map,
            _ => JsonObject::new(),
        };
        Tool::new(self.name(), self.description(), Arc::new(schema))
    }
}

/// Extract the required `server_name` string argument.
pub fn server_name_argument(tool: ManagementTool, arguments: Option<&JsonObject>) -> crate::Result<String> {
    arguments
        .and_then(|args| args.get(SERVER_NAME_ARG))
        .and_then(|value| value.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            JunctionError::InvalidArguments(
                tool.name().to_string(),
                format!("missing required string argument '{SERVER_NAME_ARG}'"),
            )
        })
}

/// `Total tools: <n>` followed by one `<name>: <description>` line per tool, sorted.
pub fn render_tool_listing(descriptors: &[ToolDescriptor]) -> String {
    let mut lines: Vec<String> = descriptors
        .iter()
        .map(|d| format!("{}: {}", d.qualified_name, d.description))
        .collect();
    lines.sort();

    let mut out = format!("Total tools: {}", descriptors.len());
    for line in lines {
        out.push('\n');
        out.push_str(&line);
    }
    out
}

/// One `<name>: enabled|disabled - <endpoint|N/A>` line per configured server.
pub fn render_server_listing(specs: &[ServerSpec], settings: &GatewaySettings) -> String {
    specs
        .iter()
        .map(|spec| {
            if spec.disabled {
                format!("{}: disabled - N/A", spec.name)
            } else {
                format!("{}: enabled - {}", spec.name, settings.endpoint_for(&spec.name))
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Result text of `enable_server` / `disable_server`.
pub fn render_toggle(name: &str, disabled: bool, outcome: &crate::Result<ReloadReport>) -> String {
    let verb = if disabled { "disabled" } else { "enabled" };
    match outcome {
        Ok(_) => format!("Server '{name}' {verb} and reloaded successfully."),
        Err(JunctionError::NotFound(_)) => format!("Server '{name}' not found in configuration"),
        Err(e) => {
            let action = if disabled { "disabling" } else { "enabling" };
            format!("Error {action} server: {e}")
        }
    }
}
