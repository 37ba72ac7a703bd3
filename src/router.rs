//! CompositeRouter: the single dispatch point behind the gateway endpoint.
//!
//! Exact management tool names are handled here. Anything else must be
//! `<server>/<tool>`; the prefix selects a mounted server and the remainder
//! is forwarded unchanged.

use std::sync::Arc;

use rmcp::model::{CallToolResult, Content, JsonObject, Tool};

use crate::error::JunctionError;
use crate::lifecycle::LifecycleManager;
use crate::management::{
    ManagementTool, render_server_listing, render_toggle, render_tool_listing, server_name_argument,
};
use crate::namespace::{namespace_tool, split_qualified};
use crate::server::ToolDescriptor;

#[derive(Clone)]
pub struct CompositeRouter {
    lifecycle: Arc<LifecycleManager>,
}

impl CompositeRouter {
    pub fn new(lifecycle: Arc<LifecycleManager>) -> Self {
        Self { lifecycle }
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleManager> {
        &self.lifecycle
    }

    /// Dispatch one tool call by its externally visible name.
    pub async fn handle(
        &self,
        name: &str,
        arguments: Option<JsonObject>,
    ) -> crate::Result<CallToolResult> {
        if let Some(tool) = ManagementTool::from_name(name) {
            let text = self.handle_management(tool, arguments.as_ref()).await?;
            return Ok(CallToolResult::success(vec![Content::text(text)]));
        }

        let (prefix, local) =
            split_qualified(name).ok_or_else(|| JunctionError::ToolNotFound(name.to_string()))?;
        let server = self
            .lifecycle
            .registry()
            .lookup(prefix)
            .await
            .ok_or_else(|| JunctionError::ToolNotFound(name.to_string()))?;

        tracing::debug!(server = %prefix, tool = %local, "forwarding tool call");
        server.proxy().call_tool(local, arguments).await
    }

    async fn handle_management(
        &self,
        tool: ManagementTool,
        arguments: Option<&JsonObject>,
    ) -> crate::Result<String> {
        match tool {
            ManagementTool::ListServers => Ok(self.list_servers().await),
            ManagementTool::ListTools => Ok(self.list_tools().await),
            ManagementTool::EnableServer => {
                let name = server_name_argument(tool, arguments)?;
                Ok(self.enable_server(&name).await)
            }
            ManagementTool::DisableServer => {
                let name = server_name_argument(tool, arguments)?;
                Ok(self.disable_server(&name).await)
            }
        }
    }

    /// Management tools followed by every mounted server's live tools under
    /// their qualified names. Servers whose listing fails are left out.
    pub async fn tools(&self) -> Vec<Tool> {
        let mut tools: Vec<Tool> = ManagementTool::ALL
            .into_iter()
            .map(ManagementTool::definition)
            .collect();

        let servers = self.lifecycle.registry().list_all().await;
        let listings = futures::future::join_all(
            servers
                .iter()
                .map(|server| async move { (server.name(), server.proxy().list_tools().await) }),
        )
        .await;

        for (prefix, listing) in listings {
            match listing {
                Ok(child_tools) => tools.extend(
                    child_tools
                        .into_iter()
                        .map(|tool| namespace_tool(prefix, tool)),
                ),
                Err(e) => {
                    tracing::warn!(server = %prefix, error = %e, "failed to list tools, skipping server");
                }
            }
        }
        tools
    }

    pub async fn tool_descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools()
            .await
            .iter()
            .map(ToolDescriptor::from_tool)
            .collect()
    }

    pub async fn list_tools(&self) -> String {
        render_tool_listing(&self.tool_descriptors().await)
    }

    /// Configured servers, read from the configuration file on every call.
    pub async fn list_servers(&self) -> String {
        let specs = self.lifecycle.store().load().await.specs();
        render_server_listing(&specs, self.lifecycle.settings())
    }

    pub async fn enable_server(&self, name: &str) -> String {
        let outcome = self.lifecycle.enable(name).await;
        if let Err(e) = &outcome {
            tracing::warn!(server = %name, error = %e, "enable_server failed");
        }
        render_toggle(name, false, &outcome)
    }

    pub async fn disable_server(&self, name: &str) -> String {
        let outcome = self.lifecycle.disable(name).await;
        if let Err(e) = &outcome {
            tracing::warn!(server = %name, error = %e, "disable_server failed");
        }
        render_toggle(name, true, &outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigStore, GatewaySettings, McpConfig, ServerSpec};
    use crate::registry::MountedServer;
    use crate::server::proxy::ServerProxy;
    use crate::server::result_text;
    use crate::testing::in_memory_transport;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    async fn router_with(dir: &TempDir, specs: Vec<ServerSpec>) -> CompositeRouter {
        let store = ConfigStore::new(dir.path().join("mcp.json"));
        store.persist(&McpConfig::from_specs(specs)).await.unwrap();
        let settings = GatewaySettings {
            startup_timeout: Duration::from_millis(300),
            handshake_timeout: Duration::from_millis(300),
            ..GatewaySettings::default()
        };
        CompositeRouter::new(Arc::new(LifecycleManager::new(
            store,
            settings,
            CancellationToken::new(),
        )))
    }

    /// Mount an in-memory server directly, bypassing process spawning.
    async fn mount_memory(router: &CompositeRouter, name: &str) {
        let transport = Arc::new(in_memory_transport(name).await);
        let proxy = ServerProxy::new(name, transport, Duration::from_secs(5));
        proxy.initialize(Duration::from_secs(5)).await.unwrap();
        router
            .lifecycle()
            .registry()
            .mount(MountedServer::new(ServerSpec::new(name, "memory"), proxy))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unknown_prefix_is_tool_not_found() {
        let dir = TempDir::new().unwrap();
        let router = router_with(&dir, vec![]).await;
        let result = router.handle("ghost/run", None).await;
        assert!(matches!(result, Err(JunctionError::ToolNotFound(n)) if n == "ghost/run"));
    }

    #[tokio::test]
    async fn test_unqualified_name_is_tool_not_found() {
        let dir = TempDir::new().unwrap();
        let router = router_with(&dir, vec![]).await;
        mount_memory(&router, "mem").await;

        let result = router.handle("echo", None).await;
        assert!(matches!(result, Err(JunctionError::ToolNotFound(n)) if n == "echo"));
        let result = router.handle("mem/", None).await;
        assert!(matches!(result, Err(JunctionError::ToolNotFound(_))));
    }

    #[tokio::test]
    async fn test_forward_strips_prefix() {
        let dir = TempDir::new().unwrap();
        let router = router_with(&dir, vec![]).await;
        mount_memory(&router, "mem").await;

        let args = json!({"text": "hello"}).as_object().cloned();
        let result = router.handle("mem/echo", args).await.unwrap();
        assert_eq!(result_text(&result), "hello");
    }

    #[tokio::test]
    async fn test_tools_lists_management_and_qualified_child_tools() {
        let dir = TempDir::new().unwrap();
        let router = router_with(&dir, vec![]).await;
        mount_memory(&router, "mem").await;

        let names: Vec<String> = router
            .tools()
            .await
            .iter()
            .map(|t| t.name.to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                "list_servers",
                "list_tools",
                "enable_server",
                "disable_server",
                "mem/echo",
                "mem/fail"
            ]
        );
    }

    #[tokio::test]
    async fn test_list_tools_text_counts_everything() {
        let dir = TempDir::new().unwrap();
        let router = router_with(&dir, vec![]).await;
        mount_memory(&router, "mem").await;

        let result = router.handle("list_tools", None).await.unwrap();
        let text = result_text(&result);
        assert!(text.starts_with("Total tools: 6\n"), "got: {text}");
        assert!(text.contains("\nmem/echo: Echo the text argument"));
    }

    #[tokio::test]
    async fn test_list_servers_reads_configuration() {
        let dir = TempDir::new().unwrap();
        let router = router_with(
            &dir,
            vec![
                ServerSpec::new("a", "x"),
                ServerSpec::new("b", "x").disabled(true),
            ],
        )
        .await;

        let result = router.handle("list_servers", None).await.unwrap();
        assert_eq!(
            result_text(&result),
            "a: enabled - http://localhost:3000/a/mcp\nb: disabled - N/A"
        );
    }

    #[tokio::test]
    async fn test_enable_requires_server_name() {
        let dir = TempDir::new().unwrap();
        let router = router_with(&dir, vec![]).await;
        let result = router.handle("enable_server", None).await;
        assert!(matches!(result, Err(JunctionError::InvalidArguments(t, _)) if t == "enable_server"));
    }

    #[tokio::test]
    async fn test_enable_unknown_server_text() {
        let dir = TempDir::new().unwrap();
        let router = router_with(&dir, vec![]).await;
        let args = json!({"server_name": "ghost"}).as_object().cloned();
        let result = router.handle("enable_server", args).await.unwrap();
        assert_eq!(result_text(&result), "Server 'ghost' not found in configuration");
    }

    #[tokio::test]
    async fn test_upstream_error_surfaces() {
        let dir = TempDir::new().unwrap();
        let router = router_with(&dir, vec![]).await;
        mount_memory(&router, "mem").await;

        let args = json!({"text": "nope"}).as_object().cloned();
        let result = router.handle("mem/fail", args).await;
        assert!(matches!(result, Err(JunctionError::Upstream(s, m)) if s == "mem" && m == "nope"));
    }
}
