//! Error types for Junction gateway operations.

use std::time::Duration;

use thiserror::Error;

/// Main error type for Junction operations
#[derive(Error, Debug)]
pub enum JunctionError {
    /// Configuration file could not be read, parsed or written
    #[error("config error: {0}")]
    Config(String),

    /// A configured server entry is unusable (bad name, empty command)
    #[error("invalid config for server '{0}': {1}")]
    InvalidServer(String, String),

    /// Child process failed to start
    #[error("failed to spawn server '{0}': {1}")]
    Spawn(String, String),

    /// Child did not complete the MCP handshake in time
    #[error("handshake with server '{0}' timed out after {1:?}")]
    HandshakeTimeout(String, Duration),

    /// Child started but never became ready
    #[error("initialization failed for server '{0}': {1}")]
    Init(String, String),

    /// A tool call exceeded its deadline
    #[error("call to '{1}' on server '{0}' timed out")]
    CallTimeout(String, String),

    /// Child process went away; no further calls until the next reload
    #[error("transport to server '{0}' is closed")]
    TransportClosed(String),

    /// Child spoke something we could not use
    #[error("protocol error from server '{0}': {1}")]
    ChildProtocol(String, String),

    /// Unknown qualified tool name, or the prefix is not mounted
    #[error("tool not found: '{0}'")]
    ToolNotFound(String),

    /// Child reported an application-level failure; message passed through
    #[error("server '{0}' reported an error: {1}")]
    Upstream(String, String),

    /// Arguments to a gateway-owned tool are missing or malformed
    #[error("invalid arguments for '{0}': {1}")]
    InvalidArguments(String, String),

    /// Server name absent from the configuration
    #[error("server '{0}' not found in configuration")]
    NotFound(String),

    /// A server with this name is already mounted
    #[error("server '{0}' is already mounted")]
    DuplicateName(String),

    /// The gateway is shutting down
    #[error("gateway is shutting down")]
    ShuttingDown,
}

impl JunctionError {
    /// Message to hand back to callers for failures that originate in a child.
    ///
    /// Upstream errors expose the child's own text, everything else its display form.
    pub fn caller_message(&self) -> String {
        match self {
            JunctionError::Upstream(_, message) => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Result type alias for Junction operations
pub type Result<T> = std::result::Result<T, JunctionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = JunctionError::NotFound("ghost".to_string());
        assert_eq!(err.to_string(), "server 'ghost' not found in configuration");
    }

    #[test]
    fn test_handshake_timeout_display() {
        let err = JunctionError::HandshakeTimeout("echo".to_string(), Duration::from_secs(30));
        assert_eq!(
            err.to_string(),
            "handshake with server 'echo' timed out after 30s"
        );
    }

    #[test]
    fn test_upstream_caller_message_is_raw() {
        let err = JunctionError::Upstream("echo".to_string(), "boom".to_string());
        assert_eq!(err.caller_message(), "boom");
        let err = JunctionError::ToolNotFound("echo/nope".to_string());
        assert_eq!(err.caller_message(), "tool not found: 'echo/nope'");
    }
}
