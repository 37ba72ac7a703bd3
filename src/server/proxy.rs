//! Uniform view of one child server.
//!
//! Wraps a `ChildTransport`, probes it for readiness, keeps a cache of the
//! child's tool names, and folds every child-side failure into
//! `JunctionError::Upstream` so callers never see child-specific shapes.

use std::sync::Arc;
use std::time::Duration;

use rmcp::model::{CallToolResult, JsonObject, Tool};
use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::error::JunctionError;
use crate::namespace::qualify;
use crate::server::result_text;
use crate::server::stdio::ChildTransport;

/// Initial delay between readiness probes.
const PROBE_BACKOFF_INITIAL: Duration = Duration::from_millis(100);

/// Maximum delay between readiness probes.
const PROBE_BACKOFF_MAX: Duration = Duration::from_secs(2);

pub struct ServerProxy {
    name: String,
    transport: Arc<ChildTransport>,
    /// Child tools under their local names, refreshed on every listing.
    tools: RwLock<Vec<Tool>>,
    call_timeout: Duration,
}

impl ServerProxy {
    pub fn new(name: impl Into<String>, transport: Arc<ChildTransport>, call_timeout: Duration) -> Self {
        Self {
            name: name.into(),
            transport,
            tools: RwLock::new(Vec::new()),
            call_timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transport(&self) -> &Arc<ChildTransport> {
        &self.transport
    }

    /// Readiness probe: the child counts as ready after one successful tool
    /// listing. Retries with exponential backoff until `startup_window` runs out.
    pub async fn initialize(&self, startup_window: Duration) -> crate::Result<()> {
        let deadline = Instant::now() + startup_window;
        let mut backoff = PROBE_BACKOFF_INITIAL;
        let mut attempts: u32 = 0;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(JunctionError::Init(
                    self.name.clone(),
                    format!("not ready after {attempts} probe(s) within {startup_window:?}"),
                ));
            }
            attempts += 1;

            match self
                .transport
                .list_tools(remaining.min(self.call_timeout))
                .await
            {
                Ok(tools) => {
                    tracing::info!(
                        server = %self.name,
                        tool_count = tools.len(),
                        attempts,
                        "server ready"
                    );
                    *self.tools.write().await = tools;
                    return Ok(());
                }
                Err(JunctionError::TransportClosed(_)) => {
                    return Err(JunctionError::Init(
                        self.name.clone(),
                        "child exited during startup".to_string(),
                    ));
                }
                Err(e) => {
                    tracing::debug!(
                        server = %self.name,
                        error = %e,
                        attempt = attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        "readiness probe failed"
                    );
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    tokio::time::sleep(backoff.min(remaining)).await;
                    backoff = std::cmp::min(backoff * 2, PROBE_BACKOFF_MAX);
                }
            }
        }
    }

    /// Live tool listing from the child, under local names.
    pub async fn list_tools(&self) -> crate::Result<Vec<Tool>> {
        let tools = self
            .transport
            .list_tools(self.call_timeout)
            .await
            .map_err(|e| self.normalize(e))?;
        *self.tools.write().await = tools.clone();
        Ok(tools)
    }

    /// Tools seen by the last listing, without a round-trip.
    pub async fn cached_tools(&self) -> Vec<Tool> {
        self.tools.read().await.clone()
    }

    /// Call a child tool by its local name.
    ///
    /// Unknown names trigger one refresh of the tool cache before failing
    /// with `ToolNotFound`, so tools a child adds later stay reachable.
    pub async fn call_tool(
        &self,
        local_name: &str,
        arguments: Option<JsonObject>,
    ) -> crate::Result<CallToolResult> {
        if !self.knows(local_name).await {
            self.list_tools().await?;
            if !self.knows(local_name).await {
                return Err(JunctionError::ToolNotFound(qualify(&self.name, local_name)));
            }
        }

        let result = self
            .transport
            .invoke(local_name, arguments, self.call_timeout)
            .await
            .map_err(|e| self.normalize(e))?;

        if result.is_error == Some(true) {
            let message = result_text(&result);
            let message = if message.is_empty() {
                "tool reported an error without a message".to_string()
            } else {
                message
            };
            return Err(JunctionError::Upstream(self.name.clone(), message));
        }
        Ok(result)
    }

    async fn knows(&self, local_name: &str) -> bool {
        self.tools
            .read()
            .await
            .iter()
            .any(|tool| tool.name.as_ref() == local_name)
    }

    /// Child-reported errors become `Upstream`; transport failures pass through.
    fn normalize(&self, error: JunctionError) -> JunctionError {
        match error {
            JunctionError::ChildProtocol(name, message) => JunctionError::Upstream(name, message),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::in_memory_transport;
    use serde_json::json;

    async fn ready_proxy(name: &str) -> ServerProxy {
        let transport = Arc::new(in_memory_transport(name).await);
        let proxy = ServerProxy::new(name, transport, Duration::from_secs(5));
        proxy.initialize(Duration::from_secs(5)).await.unwrap();
        proxy
    }

    fn text_args(text: &str) -> Option<JsonObject> {
        json!({"text": text}).as_object().cloned()
    }

    #[tokio::test]
    async fn test_initialize_caches_tools() {
        let proxy = ready_proxy("mem").await;
        let cached = proxy.cached_tools().await;
        assert!(cached.iter().any(|t| t.name.as_ref() == "echo"));
        assert!(cached.iter().any(|t| t.name.as_ref() == "fail"));
    }

    #[tokio::test]
    async fn test_call_tool_passes_result_through() {
        let proxy = ready_proxy("mem").await;
        let result = proxy.call_tool("echo", text_args("ping")).await.unwrap();
        assert_eq!(result_text(&result), "ping");
    }

    #[tokio::test]
    async fn test_unknown_local_tool_is_not_found() {
        let proxy = ready_proxy("mem").await;
        let result = proxy.call_tool("missing", None).await;
        assert!(matches!(result, Err(JunctionError::ToolNotFound(q)) if q == "mem/missing"));
    }

    #[tokio::test]
    async fn test_tool_error_becomes_upstream() {
        let proxy = ready_proxy("mem").await;
        let result = proxy.call_tool("fail", text_args("disk on fire")).await;
        assert!(
            matches!(result, Err(JunctionError::Upstream(name, msg)) if name == "mem" && msg == "disk on fire")
        );
    }

    #[tokio::test]
    async fn test_closed_transport_fails_initialize() {
        let transport = Arc::new(in_memory_transport("mem").await);
        transport.close().await;
        let proxy = ServerProxy::new("mem", transport, Duration::from_secs(1));
        let result = proxy.initialize(Duration::from_secs(1)).await;
        assert!(matches!(result, Err(JunctionError::Init(name, _)) if name == "mem"));
    }
}
