//! Junction configuration: the persisted `mcp.json` model, its store, and
//! process-wide gateway settings.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::JunctionError;

/// Strip an env var reference to its variable name.
///
/// Accepts `${VAR_NAME}` syntax only. Returns `None` for literal values.
pub fn parse_env_ref(value: &str) -> Option<&str> {
    value.strip_prefix("${").and_then(|s| s.strip_suffix('}'))
}

/// Compute the environment entries to add on top of the inherited gateway environment.
///
/// Keys already defined for the gateway process are dropped, so process-wide
/// variables win over child-declared ones. `${VAR}` values are resolved
/// through `lookup`; unknown variables resolve to the empty string.
pub fn merge_child_env(
    env: &BTreeMap<String, String>,
    lookup: impl Fn(&str) -> Option<String>,
) -> BTreeMap<String, String> {
    env.iter()
        .filter(|(key, _)| lookup(key).is_none())
        .map(|(key, value)| {
            let resolved = match parse_env_ref(value) {
                Some(var_name) => lookup(var_name).unwrap_or_default(),
                None => value.clone(),
            };
            (key.clone(), resolved)
        })
        .collect()
}

fn server_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.-]*$").expect("valid regex"))
}

/// Persisted configuration file: `{"mcpServers": {<name>: {...}}}`.
///
/// Keys this gateway does not understand are kept in `extra` so that a
/// read-modify-write cycle leaves them untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct McpConfig {
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: BTreeMap<String, ServerEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One entry of the `mcpServers` map. The map key is the server name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerEntry {
    #[serde(default)]
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Desired state of one child server. Identity is `name`, which doubles as
/// the namespace prefix of its tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSpec {
    pub name: String,
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub disabled: bool,
}

impl ServerSpec {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            disabled: false,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    /// Check that the spec can be mounted: a usable prefix and a command to run.
    pub fn validate(&self) -> crate::Result<()> {
        if !server_name_pattern().is_match(&self.name) {
            return Err(JunctionError::InvalidServer(
                self.name.clone(),
                "name must start with an alphanumeric and contain only alphanumerics, '_', '.' or '-'"
                    .to_string(),
            ));
        }
        if self.command.trim().is_empty() {
            return Err(JunctionError::InvalidServer(
                self.name.clone(),
                "'command' must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    fn to_entry(&self) -> ServerEntry {
        ServerEntry {
            command: self.command.clone(),
            args: self.args.clone(),
            env: self.env.clone(),
            disabled: self.disabled,
            extra: Map::new(),
        }
    }
}

impl McpConfig {
    /// Build a config from specs, e.g. for the default server set.
    pub fn from_specs(specs: impl IntoIterator<Item = ServerSpec>) -> Self {
        let mcp_servers = specs
            .into_iter()
            .map(|spec| (spec.name.clone(), spec.to_entry()))
            .collect();
        Self {
            mcp_servers,
            extra: Map::new(),
        }
    }

    /// All configured servers, ordered by name, disabled ones included.
    pub fn specs(&self) -> Vec<ServerSpec> {
        self.mcp_servers
            .iter()
            .map(|(name, entry)| ServerSpec {
                name: name.clone(),
                command: entry.command.clone(),
                args: entry.args.clone(),
                env: entry.env.clone(),
                disabled: entry.disabled,
            })
            .collect()
    }

    /// Flip the `disabled` flag of a server. Fails without mutating anything
    /// when the name is not configured.
    pub fn set_disabled(&mut self, name: &str, disabled: bool) -> crate::Result<()> {
        let entry = self
            .mcp_servers
            .get_mut(name)
            .ok_or_else(|| JunctionError::NotFound(name.to_string()))?;
        entry.disabled = disabled;
        Ok(())
    }
}

/// Reads and atomically rewrites the configuration file.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
    fallback: McpConfig,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            fallback: McpConfig::default(),
        }
    }

    /// Server set to use when the configuration file does not exist.
    pub fn with_fallback(mut self, specs: Vec<ServerSpec>) -> Self {
        self.fallback = McpConfig::from_specs(specs);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lenient load: a missing file yields the fallback set, a malformed one
    /// an empty set. Never fails.
    pub async fn load(&self) -> McpConfig {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => match serde_json::from_str::<McpConfig>(&content) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %e,
                        "malformed config file, using empty server set"
                    );
                    McpConfig::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(
                    path = %self.path.display(),
                    servers = self.fallback.mcp_servers.len(),
                    "config file not found, using default server set"
                );
                self.fallback.clone()
            }
            Err(e) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %e,
                    "failed to read config file, using empty server set"
                );
                McpConfig::default()
            }
        }
    }

    /// Strict load for read-modify-write cycles.
    pub async fn load_strict(&self) -> crate::Result<McpConfig> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            JunctionError::Config(format!("failed to read {}: {}", self.path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            JunctionError::Config(format!("failed to parse {}: {}", self.path.display(), e))
        })
    }

    /// Rewrite the whole file: write a sibling temp file, then rename over the original.
    pub async fn persist(&self, config: &McpConfig) -> crate::Result<()> {
        let mut content = serde_json::to_string_pretty(config)
            .map_err(|e| JunctionError::Config(format!("failed to serialize config: {e}")))?;
        content.push('\n');

        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mcp.json".to_string());
        let tmp_path = self.path.with_file_name(format!(".{file_name}.tmp"));

        tokio::fs::write(&tmp_path, content).await.map_err(|e| {
            JunctionError::Config(format!("failed to write {}: {}", tmp_path.display(), e))
        })?;
        if let Err(e) = tokio::fs::rename(&tmp_path, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp_path).await;
            return Err(JunctionError::Config(format!(
                "failed to replace {}: {}",
                self.path.display(),
                e
            )));
        }
        tracing::debug!(path = %self.path.display(), "config persisted");
        Ok(())
    }
}

/// How a reload brings the mounted set in line with the configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReloadStrategy {
    /// Unmount everything, then mount the fresh configuration.
    #[default]
    Full,
    /// Restart only servers that were added, removed or changed.
    Incremental,
}

impl FromStr for ReloadStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(ReloadStrategy::Full),
            "incremental" => Ok(ReloadStrategy::Incremental),
            other => Err(format!(
                "unknown reload strategy '{other}', expected 'full' or 'incremental'"
            )),
        }
    }
}

/// Process-wide gateway settings.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub host: String,
    pub port: u16,
    pub debug: bool,
    /// Window for a freshly spawned child to pass the readiness probe
    pub startup_timeout: Duration,
    /// Deadline for the MCP initialize handshake
    pub handshake_timeout: Duration,
    /// Per tool call deadline
    pub call_timeout: Duration,
    /// Time a child gets to exit after its stdin closes, before it is killed
    pub shutdown_grace: Duration,
    /// Extra wait after a child passed its readiness probe; zero disables it
    pub settle_delay: Duration,
    pub reload_strategy: ReloadStrategy,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3000,
            debug: false,
            startup_timeout: Duration::from_secs(30),
            handshake_timeout: Duration::from_secs(30),
            call_timeout: Duration::from_secs(60),
            shutdown_grace: Duration::from_secs(5),
            settle_delay: Duration::ZERO,
            reload_strategy: ReloadStrategy::Full,
        }
    }
}

impl GatewaySettings {
    /// Display endpoint reported by `list_servers` for an enabled server.
    pub fn endpoint_for(&self, name: &str) -> String {
        format!("http://{}:{}/{}/mcp", self.host, self.port, name)
    }
}

/// Server set used when no configuration file exists, driven by env toggles.
pub fn default_servers(lookup: impl Fn(&str) -> Option<String>) -> Vec<ServerSpec> {
    let flag = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

    let mut servers = Vec::new();
    if flag("ENABLE_PLAYWRIGHT", "true").eq_ignore_ascii_case("true") {
        servers.push(
            ServerSpec::new("playwright", "npx")
                .with_args(["-y", "@modelcontextprotocol/server-playwright"])
                .with_env("PLAYWRIGHT_HEADLESS", flag("PLAYWRIGHT_HEADLESS", "true"))
                .with_env("PLAYWRIGHT_TIMEOUT", flag("PLAYWRIGHT_TIMEOUT", "30000")),
        );
    }
    servers
}
