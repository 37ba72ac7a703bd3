//! Endpoints serving the gateway: streamable HTTP on axum, or the process's
//! own stdin/stdout.

use std::sync::Arc;

use axum::Router;
use axum::http::{Request, StatusCode};
use axum::response::IntoResponse;
use rmcp::ServiceExt;
use rmcp::transport::streamable_http_server::{
    StreamableHttpServerConfig, StreamableHttpService, session::local::LocalSessionManager,
};
use tokio_util::sync::CancellationToken;
use tower::ServiceExt as TowerServiceExt;

use crate::standalone::server::GatewayMcpServer;

/// Axum router that hands every request to the streamable HTTP MCP service.
///
/// Each MCP session gets its own clone of `server`; all clones share one router.
pub fn http_router(server: GatewayMcpServer, cancel: CancellationToken) -> Router {
    let session_manager = Arc::new(LocalSessionManager::default());
    let http_config = StreamableHttpServerConfig {
        cancellation_token: cancel,
        ..Default::default()
    };
    let mcp_service = StreamableHttpService::new(
        move || Ok(server.clone()),
        session_manager,
        http_config,
    );

    Router::new().fallback(move |req: Request<axum::body::Body>| {
        let svc = mcp_service.clone();
        async move {
            match svc.oneshot(req).await {
                Ok(response) => response.into_response(),
                Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
            }
        }
    })
}

/// Serve the gateway over streamable HTTP until `cancel` fires.
pub async fn serve_http(
    server: GatewayMcpServer,
    host: &str,
    port: u16,
    cancel: CancellationToken,
) -> std::io::Result<()> {
    let addr = format!("{host}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!(%host, %port, "Junction HTTP server listening");
    tracing::info!("Connect your MCP client to http://{}:{}/mcp", host, port);

    let app = http_router(server, cancel.clone());
    axum::serve(listener, app)
        .with_graceful_shutdown(cancel.cancelled_owned())
        .await?;

    tracing::info!("Junction HTTP server stopped");
    Ok(())
}

/// Serve the gateway over this process's stdin/stdout until the client
/// disconnects or `cancel` fires.
pub async fn serve_stdio(server: GatewayMcpServer, cancel: CancellationToken) -> std::io::Result<()> {
    let transport = (tokio::io::stdin(), tokio::io::stdout());
    let running = server
        .serve_with_ct(transport, cancel.clone())
        .await
        .map_err(|e| std::io::Error::other(format!("stdio initialization failed: {e}")))?;

    tracing::info!("Junction stdio transport initialized, waiting for messages");

    tokio::select! {
        result = running.waiting() => match result {
            Ok(reason) => tracing::info!(?reason, "stdio transport completed"),
            Err(e) => return Err(std::io::Error::other(format!("stdio transport error: {e}"))),
        },
        _ = cancel.cancelled() => tracing::info!("stdio transport cancelled"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigStore, GatewaySettings, McpConfig};
    use crate::lifecycle::LifecycleManager;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_serve_http_stops_on_cancel() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().join("mcp.json"));
        store.persist(&McpConfig::default()).await.unwrap();
        let server = GatewayMcpServer::new(Arc::new(LifecycleManager::new(
            store,
            GatewaySettings::default(),
            CancellationToken::new(),
        )));

        let cancel = CancellationToken::new();
        let task = tokio::spawn(serve_http(server, "127.0.0.1", 0, cancel.clone()));
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        cancel.cancel();

        let result = tokio::time::timeout(std::time::Duration::from_secs(5), task)
            .await
            .expect("server should stop after cancel")
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_serve_http_bind_error() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().join("mcp.json"));
        let server = GatewayMcpServer::new(Arc::new(LifecycleManager::new(
            store,
            GatewaySettings::default(),
            CancellationToken::new(),
        )));

        let result = serve_http(server, "256.0.0.1", 1, CancellationToken::new()).await;
        assert!(result.is_err());
    }
}
