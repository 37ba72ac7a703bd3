//! Tool namespacing for Junction.
//!
//! Mounted tools are exposed as `<server>/<tool>`. Only the first separator
//! matters: everything after it is handed to the child untouched.

use rmcp::model::Tool;

/// Separator between the server prefix and the child's local tool name.
pub const SEPARATOR: char = '/';

/// Build a qualified tool name, e.g. `("echo", "say")` -> `"echo/say"`.
pub fn qualify(prefix: &str, local: &str) -> String {
    format!("{prefix}{SEPARATOR}{local}")
}

/// Re-qualify a child tool under its server prefix. Description is kept as-is.
pub fn namespace_tool(prefix: &str, mut tool: Tool) -> Tool {
    tool.name = qualify(prefix, &tool.name).into();
    tool
}

/// Split a qualified name into `(prefix, local_name)` on the first separator.
///
/// Returns None when there is no separator or either side is empty.
pub fn split_qualified(qualified: &str) -> Option<(&str, &str)> {
    qualified
        .split_once(SEPARATOR)
        .filter(|(prefix, local)| !prefix.is_empty() && !local.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn make_tool(name: &str, description: Option<&str>) -> Tool {
        let schema = Arc::new(
            json!({"type": "object", "properties": {}})
                .as_object()
                .unwrap()
                .clone(),
        );
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
    fn test_namespace_tool_name() {
        let tool = make_tool("say", Some("Echo text back"));
        let namespaced = namespace_tool("echo", tool);
        assert_eq!(namespaced.name.as_ref(), "echo/say");
        assert_eq!(namespaced.description.as_deref(), Some("Echo text back"));
    }

    #[test]
    fn test_split_first_separator_only() {
        assert_eq!(
            split_qualified("fs/read/nested"),
            Some(("fs", "read/nested"))
        );
    }

    #[test]
    fn test_split_rejects_unqualified_and_empty_sides() {
        assert!(split_qualified("list_repos").is_none());
        assert!(split_qualified("/say").is_none());
        assert!(split_qualified("echo/").is_none());
    }

    #[test]
    fn test_qualify_then_split() {
        let qualified = qualify("echo", "say");
        assert_eq!(split_qualified(&qualified), Some(("echo", "say")));
    }
}
