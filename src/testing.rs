//! In-memory MCP server used by unit tests in place of a child process.

use std::sync::Arc;
use std::time::Duration;

use rmcp::ErrorData as McpError;
use rmcp::ServiceExt;
use rmcp::handler::server::ServerHandler;
use rmcp::model::{
    CallToolRequestParams, CallToolResult, Content, JsonObject, ListToolsResult,
    PaginatedRequestParams, ServerCapabilities, ServerInfo, Tool,
};
use rmcp::service::{RequestContext, RoleServer};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::server::diagnostics::StderrBuffer;
use crate::server::stdio::{ChildTransport, TransportOptions};

/// Tools: `echo` returns `text`, `fail` reports `text` as a tool error.
#[derive(Clone, Default)]
pub struct MemoryServer;

fn text_schema() -> Arc<JsonObject> {
    let schema = serde_json::json!({
        "type": "object",
        "properties": { "text": { "type": "string" } }
    });
    Arc::new(schema.as_object().cloned().unwrap_or_default())
}

fn text_argument(arguments: &Option<JsonObject>) -> String {
    arguments
        .as_ref()
        .and_then(|args| args.get("text"))
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

impl ServerHandler for MemoryServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
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
                Tool::new("echo", "Echo the text argument", text_schema()),
                Tool::new("fail", "Report the text argument as an error", text_schema()),
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
        let text = text_argument(&request.arguments);
        match request.name.as_ref() {
            "echo" => Ok(CallToolResult::success(vec![Content::text(text)])),
            "fail" => Ok(CallToolResult::error(vec![Content::text(text)])),
            other => Err(McpError::invalid_params(
                format!("unknown tool '{other}'"),
                None,
            )),
        }
    }
}

/// A `ChildTransport` connected to a `MemoryServer` over an in-process pipe.
pub async fn in_memory_transport(name: &str) -> ChildTransport {
    let (client_stream, server_stream) = tokio::io::duplex(64 * 1024);

    let (server_read, server_write) = tokio::io::split(server_stream);
    tokio::spawn(async move {
        if let Ok(running) = MemoryServer.serve((server_read, server_write)).await {
            let _ = running.waiting().await;
        }
    });

    let (client_read, client_write) = tokio::io::split(client_stream);
    let options = TransportOptions {
        handshake_timeout: Duration::from_secs(5),
        shutdown_grace: Duration::from_millis(100),
    };
    ChildTransport::connect(
        name.to_string(),
        client_read,
        client_write,
        None,
        Arc::new(Mutex::new(StderrBuffer::new(10))),
        CancellationToken::new(),
        &options,
    )
    .await
    .expect("in-memory handshake")
}
