//! GatewayMcpServer: rmcp ServerHandler backed by the CompositeRouter.
//!
//! Every session shares the same router, so a reload is visible to all
//! clients on their next request. Connected client peers are kept so they can
//! be told when the tool list changes.

use std::sync::Arc;

use rmcp::ErrorData as McpError;
use rmcp::handler::server::ServerHandler;
use rmcp::model::{
    CallToolRequestParams, CallToolResult, Content, ListToolsResult, PaginatedRequestParams,
    ServerCapabilities, ServerInfo,
};
use rmcp::service::{NotificationContext, Peer, RequestContext, RoleServer};
use tokio::sync::Mutex;

use crate::error::JunctionError;
use crate::lifecycle::LifecycleManager;
use crate::management::ManagementTool;
use crate::router::CompositeRouter;

/// MCP server exposing the composite tool namespace.
///
/// Clones share the router and the peer list, which lets the HTTP service
/// hand a fresh clone to each session.
#[derive(Clone)]
pub struct GatewayMcpServer {
    router: Arc<CompositeRouter>,
    /// Connected session peers; stale ones are pruned on notification error.
    peers: Arc<Mutex<Vec<Peer<RoleServer>>>>,
}

impl GatewayMcpServer {
    pub fn new(lifecycle: Arc<LifecycleManager>) -> Self {
        Self {
            router: Arc::new(CompositeRouter::new(lifecycle)),
            peers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn router(&self) -> &Arc<CompositeRouter> {
        &self.router
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        self.router.lifecycle()
    }

    /// Send tools-list-changed to every connected client, dropping peers whose
    /// transport has gone away.
    pub async fn notify_tools_changed(&self) {
        let mut peers = self.peers.lock().await;
        let mut live_peers = Vec::with_capacity(peers.len());
        for peer in peers.drain(..) {
            match peer.notify_tool_list_changed().await {
                Ok(()) => live_peers.push(peer),
                Err(e) => {
                    tracing::debug!(error = %e, "pruning stale peer after tools-list-changed error");
                }
            }
        }
        tracing::debug!(peers = live_peers.len(), "tools-list-changed sent");
        *peers = live_peers;
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.lock().await.len()
    }
}

/// Map a router outcome onto the MCP reply.
///
/// Child failures stay tool results so the caller sees the child's own text;
/// addressing mistakes are invalid params; the rest are internal errors.
fn into_mcp_reply(outcome: crate::Result<CallToolResult>) -> Result<CallToolResult, McpError> {
    match outcome {
        Ok(result) => Ok(result),
        Err(e @ JunctionError::Upstream(..)) => {
            Ok(CallToolResult::error(vec![Content::text(e.caller_message())]))
        }
        Err(e @ (JunctionError::ToolNotFound(_) | JunctionError::InvalidArguments(..))) => {
            Err(McpError::invalid_params(e.to_string(), None))
        }
        Err(e) => Err(McpError::internal_error(e.to_string(), None)),
    }
}

impl ServerHandler for GatewayMcpServer {
    /// Advertise tools plus tools-list-changed notifications.
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            server_info: rmcp::model::Implementation {
                name: "junction".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                title: None,
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Junction MCP gateway. Child server tools are named <server>/<tool>; \
                 list_servers, list_tools, enable_server and disable_server manage them."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_tool_list_changed()
                .build(),
            ..Default::default()
        }
    }

    /// Management tools followed by every mounted server's qualified tools.
    async fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        Ok(ListToolsResult {
            tools: self.router.tools().await,
            next_cursor: None,
            meta: None,
        })
    }

    /// Dispatch through the router and notify clients after enable/disable.
    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let outcome = self.router.handle(&request.name, request.arguments).await;

        // enable/disable reload even when they report an error
        if ManagementTool::from_name(&request.name).is_some_and(ManagementTool::mutates) {
            self.notify_tools_changed().await;
        }

        if let Err(e) = &outcome {
            tracing::debug!(tool = %request.name, error = %e, "tool call failed");
        }
        into_mcp_reply(outcome)
    }

    /// Remember the client's peer for tools-list-changed broadcasts.
    async fn on_initialized(&self, context: NotificationContext<RoleServer>) {
        tracing::info!("MCP client initialized");
        self.peers.lock().await.push(context.peer.clone());
    }
}
