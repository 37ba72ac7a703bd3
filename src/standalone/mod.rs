//! Gateway front end: the MCP handler, its HTTP and stdio endpoints, and the
//! configuration watcher.

pub mod hot_reload;
pub mod http;
pub mod server;
