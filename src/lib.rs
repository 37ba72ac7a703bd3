//! Junction: unified MCP gateway.
//!
//! Spawns one stdio MCP server per configured entry, mounts each one's tools
//! under a `<server>/` prefix behind a single endpoint, and rebuilds the
//! mounted set when the configuration changes.

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod management;
pub mod namespace;
pub mod registry;
pub mod router;
pub mod server;
pub mod standalone;

#[cfg(test)]
mod testing;

pub use config::{
    ConfigStore, GatewaySettings, McpConfig, ReloadStrategy, ServerSpec, default_servers,
    merge_child_env, parse_env_ref,
};
pub use error::{JunctionError, Result};
pub use lifecycle::{LifecycleManager, LifecycleState, ReloadReport, ReloadTransaction};
pub use management::ManagementTool;
pub use registry::{MountRegistry, MountedServer};
pub use router::CompositeRouter;
pub use server::{ChildTransport, ServerProxy, ToolDescriptor, TransportOptions, result_text};
pub use standalone::hot_reload::run_hot_reload;
pub use standalone::http::{http_router, serve_http, serve_stdio};
pub use standalone::server::GatewayMcpServer;
