//! STDIO child transport for Junction.
//!
//! One `ChildTransport` owns one spawned MCP server process and the MCP
//! client session running over its stdin/stdout.
//!
//! - Uses raw `tokio::process::Command` so noisy children can be tolerated:
//!   stdout is piped through a filter task that drops non-JSON lines before
//!   they reach the rmcp session.
//! - Stderr is drained into a rolling buffer for diagnostics.
//! - Requests are serialized per child: one request in flight at a time.
//! - A dead child is never respawned here; the lifecycle manager remounts it
//!   on the next reload.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use rmcp::model::{CallToolRequestParams, CallToolResult, JsonObject, Tool};
use rmcp::service::RunningService;
use rmcp::{Peer, RoleClient, ServiceError, ServiceExt};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::{GatewaySettings, ServerSpec, merge_child_env};
use crate::error::JunctionError;
use crate::server::diagnostics::StderrBuffer;

/// Number of stderr lines retained per child.
const STDERR_CAPACITY: usize = 100;

/// Number of stderr lines attached to a startup failure log.
const STDERR_TAIL_ON_FAILURE: usize = 10;

/// How long a failed request waits for the session to report a child exit.
const EXIT_SETTLE: Duration = Duration::from_millis(200);

/// Timing knobs for opening and closing a child.
#[derive(Debug, Clone, Copy)]
pub struct TransportOptions {
    pub handshake_timeout: Duration,
    pub shutdown_grace: Duration,
}

impl From<&GatewaySettings> for TransportOptions {
    fn from(settings: &GatewaySettings) -> Self {
        Self {
            handshake_timeout: settings.handshake_timeout,
            shutdown_grace: settings.shutdown_grace,
        }
    }
}

/// Spawn the child process for a server spec.
///
/// Returns the `Child` with stdin, stdout, and stderr all piped. The process
/// is killed if the handle is dropped without an explicit close.
fn spawn_child(spec: &ServerSpec) -> crate::Result<Child> {
    let mut cmd = Command::new(&spec.command);

    if !spec.args.is_empty() {
        cmd.args(&spec.args);
    }

    let extra_env = merge_child_env(&spec.env, |key| std::env::var(key).ok());
    if !extra_env.is_empty() {
        cmd.envs(extra_env);
    }

    cmd.stdin(std::process::Stdio::piped());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());
    cmd.kill_on_drop(true);

    cmd.spawn()
        .map_err(|e| JunctionError::Spawn(spec.name.clone(), e.to_string()))
}

/// Start a background task that filters stdout from the child process.
///
/// Non-JSON lines are discarded with a debug log. Valid JSON lines are
/// forwarded to the returned reader, which the rmcp session consumes as
/// newline-delimited JSON-RPC.
fn start_stdout_filter<R>(
    child_stdout: R,
    name: String,
    cancel: CancellationToken,
) -> tokio::io::ReadHalf<tokio::io::DuplexStream>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let (client_side, server_side) = tokio::io::duplex(65536);
    // The session reads from client_side; the filter writes into server_side.
    let (reader, _client_writer) = tokio::io::split(client_side);
    let (_server_reader, mut writer) = tokio::io::split(server_side);

    tokio::spawn(async move {
        let mut lines = BufReader::new(child_stdout).lines();
        loop {
            tokio::select! {
                line_result = lines.next_line() => {
                    match line_result {
                        Ok(Some(line)) => {
                            if serde_json::from_str::<serde_json::Value>(&line).is_ok() {
                                let with_newline = format!("{}\n", line);
                                if writer.write_all(with_newline.as_bytes()).await.is_err() {
                                    break;
                                }
                            } else {
                                tracing::debug!(
                                    server = %name,
                                    line = %line,
                                    "discarding non-JSON stdout line"
                                );
                            }
                        }
                        // EOF or read error: dropping the writer signals EOF to the session
                        Ok(None) | Err(_) => break,
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
    });

    reader
}

/// Start a background task that drains stderr from the child process.
///
/// Each line is logged at debug level and pushed into the rolling buffer.
fn start_stderr_drain<R>(
    child_stderr: R,
    name: String,
    stderr_buf: Arc<Mutex<StderrBuffer>>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(child_stderr).lines();
        loop {
            tokio::select! {
                line_result = lines.next_line() => {
                    match line_result {
                        Ok(Some(line)) => {
                            tracing::debug!(server = %name, line = %line, "server stderr");
                            stderr_buf.lock().await.push(line);
                        }
                        Ok(None) | Err(_) => break,
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
    });
}

/// A spawned child server and its MCP client session.
pub struct ChildTransport {
    name: String,
    peer: Peer<RoleClient>,
    /// None for sessions that are not backed by a process (tests).
    child: Mutex<Option<Child>>,
    /// Cancelling stops the session and the IO tasks, closing the child's stdin.
    session: CancellationToken,
    /// Fired once the session loop has ended for any reason.
    exited: CancellationToken,
    closed: AtomicBool,
    /// Serializes requests on the single stdio channel.
    channel: Mutex<()>,
    stderr: Arc<Mutex<StderrBuffer>>,
    shutdown_grace: Duration,
}

impl ChildTransport {
    /// Spawn the child for `spec` and complete the MCP handshake.
    ///
    /// The session runs under a child token of `parent`, so cancelling the
    /// parent tears down every transport opened from it.
    pub async fn open(
        spec: &ServerSpec,
        options: &TransportOptions,
        parent: &CancellationToken,
    ) -> crate::Result<Self> {
        let mut child = spawn_child(spec)?;
        let name = spec.name.clone();

        let child_stdin = child.stdin.take().ok_or_else(|| {
            JunctionError::Spawn(name.clone(), "failed to open stdin pipe".to_string())
        })?;
        let child_stdout = child.stdout.take().ok_or_else(|| {
            JunctionError::Spawn(name.clone(), "failed to open stdout pipe".to_string())
        })?;
        let child_stderr = child.stderr.take().ok_or_else(|| {
            JunctionError::Spawn(name.clone(), "failed to open stderr pipe".to_string())
        })?;

        let session = parent.child_token();
        let stderr = Arc::new(Mutex::new(StderrBuffer::new(STDERR_CAPACITY)));
        let filtered_reader = start_stdout_filter(child_stdout, name.clone(), session.clone());
        start_stderr_drain(child_stderr, name.clone(), stderr.clone(), session.clone());

        tracing::debug!(
            server = %name,
            pid = child.id().unwrap_or_default(),
            "child process spawned"
        );

        Self::connect(
            name,
            filtered_reader,
            child_stdin,
            Some(child),
            stderr,
            session,
            options,
        )
        .await
    }

    /// Run the MCP handshake over an already established byte channel.
    pub(crate) async fn connect<R, W>(
        name: String,
        reader: R,
        writer: W,
        child: Option<Child>,
        stderr: Arc<Mutex<StderrBuffer>>,
        session: CancellationToken,
        options: &TransportOptions,
    ) -> crate::Result<Self>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let handshake = tokio::time::timeout(
            options.handshake_timeout,
            ().serve_with_ct((reader, writer), session.clone()),
        )
        .await;

        let running: RunningService<RoleClient, ()> = match handshake {
            Ok(Ok(running)) => running,
            Ok(Err(e)) => {
                abort_startup(&name, child, &session, &stderr).await;
                return Err(JunctionError::Init(name, e.to_string()));
            }
            Err(_elapsed) => {
                abort_startup(&name, child, &session, &stderr).await;
                return Err(JunctionError::HandshakeTimeout(
                    name,
                    options.handshake_timeout,
                ));
            }
        };

        let peer = running.peer().clone();

        // Watch for the session ending: child exit, broken pipe, or cancellation
        let exited = CancellationToken::new();
        let exit_signal = exited.clone();
        let watch_name = name.clone();
        tokio::spawn(async move {
            match running.waiting().await {
                Ok(reason) => {
                    tracing::debug!(server = %watch_name, ?reason, "child session ended");
                }
                Err(e) => {
                    tracing::warn!(server = %watch_name, error = %e, "child session task failed");
                }
            }
            exit_signal.cancel();
        });

        tracing::debug!(server = %name, "MCP handshake complete");

        Ok(Self {
            name,
            peer,
            child: Mutex::new(child),
            session,
            exited,
            closed: AtomicBool::new(false),
            channel: Mutex::new(()),
            stderr,
            shutdown_grace: options.shutdown_grace,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// True until the child exits or the transport is closed.
    pub fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && !self.exited.is_cancelled()
    }

    /// The most recent stderr lines of the child, oldest first.
    pub async fn stderr_tail(&self, n: usize) -> Vec<String> {
        self.stderr.lock().await.tail(n)
    }

    /// List the child's tools, following pagination.
    pub async fn list_tools(&self, timeout: Duration) -> crate::Result<Vec<Tool>> {
        self.exchange("tools/list", timeout, self.peer.list_all_tools())
            .await
    }

    /// Invoke a tool on the child by its local name.
    pub async fn invoke(
        &self,
        tool: &str,
        arguments: Option<JsonObject>,
        timeout: Duration,
    ) -> crate::Result<CallToolResult> {
        let params = CallToolRequestParams {
            name: tool.to_string().into(),
            arguments,
            task: None,
            meta: None,
        };
        self.exchange(tool, timeout, self.peer.call_tool(params))
            .await
    }

    /// Run one request/response exchange on the channel.
    ///
    /// `request` is lazy: nothing is written until the channel lock is held.
    async fn exchange<T>(
        &self,
        what: &str,
        timeout: Duration,
        request: impl Future<Output = Result<T, ServiceError>>,
    ) -> crate::Result<T> {
        self.ensure_open()?;
        let _channel = self.channel.lock().await;
        self.ensure_open()?;

        tokio::select! {
            result = tokio::time::timeout(timeout, request) => match result {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => {
                    if !matches!(e, ServiceError::McpError(_)) {
                        // the session may still be winding down after a child exit
                        let _ = tokio::time::timeout(EXIT_SETTLE, self.exited.cancelled()).await;
                    }
                    Err(self.translate(e))
                }
                Err(_elapsed) => {
                    tracing::warn!(
                        server = %self.name,
                        request = %what,
                        timeout_ms = timeout.as_millis() as u64,
                        "child request timed out"
                    );
                    Err(JunctionError::CallTimeout(self.name.clone(), what.to_string()))
                }
            },
            _ = self.exited.cancelled() => {
                tracing::warn!(server = %self.name, request = %what, "child exited mid-request");
                Err(JunctionError::TransportClosed(self.name.clone()))
            }
        }
    }

    fn ensure_open(&self) -> crate::Result<()> {
        if self.is_alive() {
            Ok(())
        } else {
            Err(JunctionError::TransportClosed(self.name.clone()))
        }
    }

    fn translate(&self, error: ServiceError) -> JunctionError {
        match error {
            ServiceError::McpError(data) => {
                JunctionError::ChildProtocol(self.name.clone(), data.message.to_string())
            }
            ServiceError::TransportClosed => JunctionError::TransportClosed(self.name.clone()),
            other if self.exited.is_cancelled() => {
                tracing::debug!(server = %self.name, error = %other, "request failed after child exit");
                JunctionError::TransportClosed(self.name.clone())
            }
            other => JunctionError::ChildProtocol(self.name.clone(), other.to_string()),
        }
    }

    /// Stop the session and release the child process. Idempotent.
    ///
    /// Closing the session closes the child's stdin, which is the termination
    /// request for stdio servers. The child gets `shutdown_grace` to exit
    /// before it is killed.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.session.cancel();

        let child = self.child.lock().await.take();
        let Some(mut child) = child else {
            return;
        };

        match tokio::time::timeout(self.shutdown_grace, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(server = %self.name, %status, "child exited");
            }
            Ok(Err(e)) => {
                tracing::warn!(server = %self.name, error = %e, "failed to wait for child, killing");
                let _ = child.kill().await;
            }
            Err(_elapsed) => {
                tracing::warn!(
                    server = %self.name,
                    grace_ms = self.shutdown_grace.as_millis() as u64,
                    "child did not exit in time, killing"
                );
                if let Err(e) = child.kill().await {
                    tracing::warn!(server = %self.name, error = %e, "failed to kill child");
                }
            }
        }
    }
}

/// Tear down a child that failed its handshake and log what it printed.
async fn abort_startup(
    name: &str,
    child: Option<Child>,
    session: &CancellationToken,
    stderr: &Arc<Mutex<StderrBuffer>>,
) {
    session.cancel();
    if let Some(mut child) = child {
        let _ = child.kill().await;
    }
    let tail = stderr.lock().await.tail(STDERR_TAIL_ON_FAILURE);
    if !tail.is_empty() {
        tracing::warn!(server = %name, stderr = %tail.join("\n"), "child stderr before failure");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn options(handshake_ms: u64) -> TransportOptions {
        TransportOptions {
            handshake_timeout: Duration::from_millis(handshake_ms),
            shutdown_grace: Duration::from_millis(200),
        }
    }

    #[test]
    fn test_spawn_child_bad_command() {
        let spec = ServerSpec::new("test", "/this/command/does/not/exist-junction");
        let result = spawn_child(&spec);
        assert!(
            matches!(result, Err(JunctionError::Spawn(name, _)) if name == "test"),
            "Expected Spawn error for non-existent command"
        );
    }

    #[tokio::test]
    async fn test_stdout_filter_passes_json_and_discards_non_json() {
        let input = b"not json line\n{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}\nstill not json\n{\"x\":1}\n";
        let cursor = std::io::Cursor::new(input.to_vec());
        let mut reader = start_stdout_filter(cursor, "test".to_string(), CancellationToken::new());

        let mut out = String::new();
        reader.read_to_string(&mut out).await.unwrap();

        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(
            lines,
            vec!["{\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{}}", "{\"x\":1}"]
        );
    }

    #[tokio::test]
    async fn test_open_non_mcp_child_fails_handshake() {
        // echo prints a non-JSON line and exits: the session sees EOF
        let spec = ServerSpec::new("noisy", "echo").with_args(["hi"]);
        let result = ChildTransport::open(&spec, &options(5_000), &CancellationToken::new()).await;
        assert!(
            matches!(
                result,
                Err(JunctionError::Init(ref name, _)) | Err(JunctionError::HandshakeTimeout(ref name, _))
                    if name == "noisy"
            ),
            "Expected handshake failure, got {:?}",
            result.err()
        );
    }

    #[tokio::test]
    async fn test_open_silent_child_times_out() {
        let spec = ServerSpec::new("sleepy", "sleep").with_args(["5"]);
        let result = ChildTransport::open(&spec, &options(200), &CancellationToken::new()).await;
        assert!(
            matches!(result, Err(JunctionError::HandshakeTimeout(name, _)) if name == "sleepy"),
            "Expected HandshakeTimeout"
        );
    }

    #[tokio::test]
    async fn test_open_missing_command_is_spawn_error() {
        let spec = ServerSpec::new("ghost", "/nonexistent/junction-child");
        let result = ChildTransport::open(&spec, &options(1_000), &CancellationToken::new()).await;
        assert!(matches!(result, Err(JunctionError::Spawn(name, _)) if name == "ghost"));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_marks_dead() {
        let transport = crate::testing::in_memory_transport("mem").await;
        assert!(transport.is_alive());
        transport.close().await;
        transport.close().await;
        assert!(!transport.is_alive());

        let result = transport
            .invoke("echo", None, Duration::from_secs(1))
            .await;
        assert!(matches!(result, Err(JunctionError::TransportClosed(name)) if name == "mem"));
    }

    #[tokio::test]
    async fn test_invoke_and_list_over_session() {
        let transport = crate::testing::in_memory_transport("mem").await;
        let tools = transport.list_tools(Duration::from_secs(5)).await.unwrap();
        assert!(tools.iter().any(|t| t.name.as_ref() == "echo"));

        let mut args = JsonObject::new();
        args.insert("text".to_string(), serde_json::json!("hello"));
        let result = transport
            .invoke("echo", Some(args), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(crate::server::result_text(&result), "hello");
        transport.close().await;
    }

    #[tokio::test]
    async fn test_child_error_is_protocol_error() {
        let transport = crate::testing::in_memory_transport("mem").await;
        let result = transport
            .invoke("no_such_tool", None, Duration::from_secs(5))
            .await;
        assert!(matches!(result, Err(JunctionError::ChildProtocol(name, _)) if name == "mem"));
        transport.close().await;
    }
}
