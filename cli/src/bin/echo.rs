//! junction-echo: a small stdio MCP server for smoke tests.
//!
//! Tools:
//! - `echo`: returns its `text` argument
//! - `fail`: reports its `text` argument (or "failure requested") as a tool error
//! - `exit`: terminates the process without answering
//! - `env`: returns the value of the variable named by `name`, or `<unset>`
//! - `sleep`: waits `ms` milliseconds, then returns "slept"
//! - `pid`: returns the process id
//!
//! `JUNCTION_ECHO_NOISY` prints a non-JSON line before the protocol starts.
//! `JUNCTION_ECHO_IGNORE_STDIN` keeps the process alive after stdin closes.

use std::sync::Arc;

use rmcp::ErrorData as McpError;
use rmcp::ServiceExt;
use rmcp::handler::server::ServerHandler;
use rmcp::model::{
    CallToolRequestParams, CallToolResult, Content, JsonObject, ListToolsResult,
    PaginatedRequestParams, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::{RequestContext, RoleServer};

#[derive(Clone)]
struct EchoServer;

fn schema(property: Option<&str>) -> Arc<JsonObject> {
    let value = match property {
        Some(name) => serde_json::json!({
            "type": "object",
            "properties": { name: { "type": "string" } },
            "required": [name]
        }),
        None => serde_json::json!({ "type": "object", "properties": {} }),
    };
    Arc::new(value.as_object().cloned().unwrap_or_default())
}

fn millis_schema() -> Arc<JsonObject> {
    let value = serde_json::json!({
        "type": "object",
        "properties": { "ms": { "type": "integer", "minimum": 0 } },
        "required": ["ms"]
    });
    Arc::new(value.as_object().cloned().unwrap_or_default())
}

fn string_arg<'a>(arguments: &'a Option<JsonObject>, key: &str) -> Option<&'a str> {
    arguments.as_ref()?.get(key)?.as_str()
}

impl ServerHandler for EchoServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: rmcp::model::Implementation {
                name: "junction-echo".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }

    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult {
            tools: vec![
                Tool::new("echo", "Return the given text", schema(Some("text"))),
                Tool::new("fail", "Report the given text as a tool error", schema(None)),
                Tool::new("exit", "Terminate the server process", schema(None)),
                Tool::new("env", "Read an environment variable", schema(Some("name"))),
                Tool::new("sleep", "Wait the given number of milliseconds", millis_schema()),
                Tool::new("pid", "Return the server process id", schema(None)),
            ],
            next_cursor: None,
            meta: None,
        })
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        match request.name.as_ref() {
            "echo" => {
                let text = string_arg(&request.arguments, "text").unwrap_or_default();
                Ok(CallToolResult::success(vec![Content::text(text)]))
            }
            "fail" => {
                let text = string_arg(&request.arguments, "text").unwrap_or("failure requested");
                Ok(CallToolResult::error(vec![Content::text(text)]))
            }
            "exit" => std::process::exit(3),
            "env" => {
                let name = string_arg(&request.arguments, "name")
                    .ok_or_else(|| McpError::invalid_params("missing 'name'", None))?;
                let value = std::env::var(name).unwrap_or_else(|_| "<unset>".to_string());
                Ok(CallToolResult::success(vec![Content::text(value)]))
            }
            "sleep" => {
                let ms = request
                    .arguments
                    .as_ref()
                    .and_then(|args| args.get("ms"))
                    .and_then(serde_json::Value::as_u64)
                    .ok_or_else(|| McpError::invalid_params("missing 'ms'", None))?;
                tokio::time::sleep(std::time::Duration::from_millis(ms)).await;
                Ok(CallToolResult::success(vec![Content::text("slept")]))
            }
            "pid" => Ok(CallToolResult::success(vec![Content::text(
                std::process::id().to_string(),
            )])),
            other => Err(McpError::invalid_params(
                format!("unknown tool '{other}'"),
                None,
            )),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::var_os("JUNCTION_ECHO_NOISY").is_some() {
        println!("junction-echo starting");
    }
    eprintln!("junction-echo ready");

    let running = EchoServer
        .serve((tokio::io::stdin(), tokio::io::stdout()))
        .await?;
    running.waiting().await?;

    if std::env::var_os("JUNCTION_ECHO_IGNORE_STDIN").is_some() {
        eprintln!("junction-echo: stdin closed, staying up");
        std::future::pending::<()>().await;
    }
    Ok(())
}
