//! Child server management for Junction.
//!
//! `stdio` owns child processes and their MCP sessions, `proxy` presents a
//! child's tools uniformly, `diagnostics` keeps per-child stderr.

pub mod diagnostics;
pub mod proxy;
pub mod stdio;

use rmcp::model::{CallToolResult, Tool};

pub use proxy::ServerProxy;
pub use stdio::{ChildTransport, TransportOptions};

/// Listing entry for one callable tool, derived on every listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolDescriptor {
    pub qualified_name: String,
    pub description: String,
}

impl ToolDescriptor {
    /// Describe an already qualified tool.
    pub fn from_tool(tool: &Tool) -> Self {
        Self {
            qualified_name: tool.name.to_string(),
            description: tool
                .description
                .as_deref()
                .filter(|d| !d.trim().is_empty())
                .unwrap_or("No description")
                .to_string(),
        }
    }
}

/// Concatenate the text blocks of a tool result.
pub fn result_text(result: &CallToolResult) -> String {
    result
        .content
        .iter()
        .filter_map(|content| content.as_text().map(|t| t.text.clone()))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rmcp::model::Content;
    use serde_json::json;
    use std::sync::Arc;

    fn make_tool(name: &str, description: Option<&str>) -> Tool {
        let schema = Arc::new(json!({"type": "object"}).as_object().unwrap().clone());
        Tool {
            name: name.to_string().into(),
            title: None,
            description: description.map(|d| d.to_string().into()),
            input_schema: schema,
            output_schema: None,
            annotations: None,
            icons: None,
            meta: None,
        }
    }

    #[test]
    fn test_descriptor_defaults_missing_description() {
        let descriptor = ToolDescriptor::from_tool(&make_tool("echo/say", None));
        assert_eq!(descriptor.qualified_name, "echo/say");
        assert_eq!(descriptor.description, "No description");
    }

    #[test]
    fn test_descriptor_keeps_description() {
        let descriptor = ToolDescriptor::from_tool(&make_tool("echo/say", Some("Say it")));
        assert_eq!(descriptor.description, "Say it");
    }

    #[test]
    fn test_result_text_joins_blocks() {
        let result = CallToolResult::success(vec![Content::text("a"), Content::text("b")]);
        assert_eq!(result_text(&result), "a\nb");
    }
}
