//! LifecycleManager: setup, reload, enable/disable and shutdown of the
//! mounted server set.
//!
//! Every state-changing operation runs under one reload lock, so at most one
//! reload is in flight. Children of one reload start concurrently, each is
//! mounted as soon as it is ready, and a failing child never blocks its
//! siblings.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;

use crate::config::{ConfigStore, GatewaySettings, ReloadStrategy, ServerSpec};
use crate::error::JunctionError;
use crate::registry::{MountRegistry, MountedServer};
use crate::server::proxy::ServerProxy;
use crate::server::stdio::{ChildTransport, TransportOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Reloading,
    ShuttingDown,
}

/// Plan of one reload cycle: what to stop and what to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReloadTransaction {
    pub strategy: ReloadStrategy,
    pub teardown: Vec<ServerSpec>,
    pub bringup: Vec<ServerSpec>,
}

impl ReloadTransaction {
    /// Compute the plan that moves `mounted` to the enabled part of `desired`.
    ///
    /// `Full` stops everything and starts every enabled spec. `Incremental`
    /// leaves a mounted server alone when its spec is unchanged and enabled.
    pub fn plan(strategy: ReloadStrategy, mounted: &[ServerSpec], desired: &[ServerSpec]) -> Self {
        let enabled: Vec<ServerSpec> = desired.iter().filter(|s| !s.disabled).cloned().collect();

        match strategy {
            ReloadStrategy::Full => Self {
                strategy,
                teardown: mounted.to_vec(),
                bringup: enabled,
            },
            ReloadStrategy::Incremental => {
                let wanted: BTreeMap<&str, &ServerSpec> =
                    enabled.iter().map(|s| (s.name.as_str(), s)).collect();
                let running: BTreeMap<&str, &ServerSpec> =
                    mounted.iter().map(|s| (s.name.as_str(), s)).collect();

                let teardown = mounted
                    .iter()
                    .filter(|s| wanted.get(s.name.as_str()) != Some(s))
                    .cloned()
                    .collect();
                let bringup = enabled
                    .iter()
                    .filter(|s| running.get(s.name.as_str()) != Some(s))
                    .cloned()
                    .collect();
                Self {
                    strategy,
                    teardown,
                    bringup,
                }
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.teardown.is_empty() && self.bringup.is_empty()
    }
}

/// Outcome of one setup or reload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadReport {
    pub unmounted: Vec<String>,
    pub mounted: Vec<String>,
    /// Servers that could not be started, with the reason.
    pub failed: Vec<(String, String)>,
}

pub struct LifecycleManager {
    store: ConfigStore,
    settings: GatewaySettings,
    registry: Arc<MountRegistry>,
    state: watch::Sender<LifecycleState>,
    reload_lock: Mutex<()>,
    /// Configured specs as of the last setup/reload.
    applied: Mutex<Option<Vec<ServerSpec>>>,
    /// Parent of every child session token. Cancelled on shutdown.
    cancel: CancellationToken,
}

/// Number of child stderr lines logged when a started child fails its probe.
const STDERR_TAIL_ON_PROBE_FAILURE: usize = 10;

impl LifecycleManager {
    /// `cancel` is the parent of every child session; cancelling it aborts
    /// any bring-up in progress.
    pub fn new(store: ConfigStore, settings: GatewaySettings, cancel: CancellationToken) -> Self {
        let (state, _) = watch::channel(LifecycleState::Idle);
        Self {
            store,
            settings,
            registry: Arc::new(MountRegistry::new()),
            state,
            reload_lock: Mutex::new(()),
            applied: Mutex::new(None),
            cancel,
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Receiver that observes state transitions.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub fn registry(&self) -> &Arc<MountRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    /// Mount every valid, enabled server from the configuration.
    ///
    /// Individual failures are logged and reported, never fatal.
    pub async fn setup(&self) -> crate::Result<ReloadReport> {
        let _guard = self.reload_lock.lock().await;
        self.ensure_running()?;
        let desired = self.store.load().await.specs();
        tracing::info!(
            config = %self.store.path().display(),
            configured = desired.len(),
            "setting up servers"
        );
        Ok(self.apply(ReloadStrategy::Full, desired).await)
    }

    /// Stop-the-world reload: unmount everything, then mount the fresh configuration.
    pub async fn reload(&self) -> crate::Result<ReloadReport> {
        self.reload_with(ReloadStrategy::Full).await
    }

    pub async fn reload_with(&self, strategy: ReloadStrategy) -> crate::Result<ReloadReport> {
        let _guard = self.reload_lock.lock().await;
        self.ensure_running()?;
        let desired = self.store.load().await.specs();
        Ok(self.apply(strategy, desired).await)
    }

    /// Reload with the configured strategy, but only when the configuration
    /// differs from what was last applied.
    pub async fn reload_if_changed(&self) -> crate::Result<Option<ReloadReport>> {
        let _guard = self.reload_lock.lock().await;
        self.ensure_running()?;
        let desired = self.store.load().await.specs();
        if self.applied.lock().await.as_ref() == Some(&desired) {
            tracing::debug!("configuration unchanged, skipping reload");
            return Ok(None);
        }
        Ok(Some(self.apply(self.settings.reload_strategy, desired).await))
    }

    /// Clear the `disabled` flag of a server, persist, and reload.
    pub async fn enable(&self, name: &str) -> crate::Result<ReloadReport> {
        self.set_disabled(name, false).await
    }

    /// Set the `disabled` flag of a server, persist, and reload.
    pub async fn disable(&self, name: &str) -> crate::Result<ReloadReport> {
        self.set_disabled(name, true).await
    }

    async fn set_disabled(&self, name: &str, disabled: bool) -> crate::Result<ReloadReport> {
        let _guard = self.reload_lock.lock().await;
        self.ensure_running()?;

        let mut config = self.store.load_strict().await?;
        config.set_disabled(name, disabled)?;
        self.store.persist(&config).await?;
        tracing::info!(server = %name, disabled, "server flag persisted");

        Ok(self
            .apply(self.settings.reload_strategy, config.specs())
            .await)
    }

    /// Unmount every server and cancel all child sessions. Terminal.
    ///
    /// A setup or reload in progress is aborted rather than waited out.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let _guard = self.reload_lock.lock().await;
        if self.state() == LifecycleState::ShuttingDown {
            return;
        }
        self.state.send_replace(LifecycleState::ShuttingDown);
        tracing::info!("shutting down all servers");

        let closed = self.registry.unmount_all().await;
        tracing::info!(count = closed.len(), "shutdown complete");
    }

    fn ensure_running(&self) -> crate::Result<()> {
        if self.state() == LifecycleState::ShuttingDown || self.cancel.is_cancelled() {
            Err(JunctionError::ShuttingDown)
        } else {
            Ok(())
        }
    }

    /// Bring the registry in line with `desired`. Caller holds the reload lock.
    async fn apply(&self, strategy: ReloadStrategy, desired: Vec<ServerSpec>) -> ReloadReport {
        self.state.send_replace(LifecycleState::Reloading);

        let mounted: Vec<ServerSpec> = self
            .registry
            .list_all()
            .await
            .iter()
            .map(|server| server.spec().clone())
            .collect();
        let transaction = ReloadTransaction::plan(strategy, &mounted, &desired);

        for spec in desired.iter().filter(|s| s.disabled) {
            tracing::info!(server = %spec.name, "skipping disabled server");
        }
        tracing::debug!(
            strategy = ?transaction.strategy,
            teardown = transaction.teardown.len(),
            bringup = transaction.bringup.len(),
            "reload planned"
        );

        let mut report = ReloadReport::default();

        match transaction.strategy {
            ReloadStrategy::Full => report.unmounted = self.registry.unmount_all().await,
            ReloadStrategy::Incremental => {
                for spec in &transaction.teardown {
                    match self.registry.unmount(&spec.name).await {
                        Ok(()) => report.unmounted.push(spec.name.clone()),
                        Err(e) => {
                            tracing::debug!(server = %spec.name, error = %e, "already unmounted")
                        }
                    }
                }
            }
        }

        let mut pending: FuturesUnordered<_> = transaction
            .bringup
            .iter()
            .map(|spec| async move {
                let outcome = match self.start_cancellable(spec.clone()).await {
                    Ok(server) => self.registry.mount(server).await.map(|_| ()),
                    Err(e) => Err(e),
                };
                (spec.name.clone(), outcome)
            })
            .collect();

        while let Some((name, outcome)) = pending.next().await {
            match outcome {
                Ok(()) => {
                    tracing::info!(server = %name, "server mounted");
                    report.mounted.push(name);
                }
                Err(e) => {
                    tracing::warn!(server = %name, error = %e, "server failed to start, skipping");
                    report.failed.push((name, e.to_string()));
                }
            }
        }
        report.mounted.sort();
        report.failed.sort();

        *self.applied.lock().await = Some(desired);
        self.state.send_replace(LifecycleState::Idle);

        let total = self.registry.len().await;
        tracing::info!(
            mounted = report.mounted.len(),
            unmounted = report.unmounted.len(),
            failed = report.failed.len(),
            total,
            "reload complete"
        );
        report
    }

    /// `start_server`, abandoned as soon as the manager is cancelled. Dropping
    /// the half-started child kills it.
    async fn start_cancellable(&self, spec: ServerSpec) -> crate::Result<MountedServer> {
        tokio::select! {
            started = self.start_server(spec) => started,
            _ = self.cancel.cancelled() => Err(JunctionError::ShuttingDown),
        }
    }

    /// Spawn, handshake and probe one child. On failure nothing is left running.
    async fn start_server(&self, spec: ServerSpec) -> crate::Result<MountedServer> {
        spec.validate()?;

        let options = TransportOptions::from(&self.settings);
        let transport = Arc::new(ChildTransport::open(&spec, &options, &self.cancel).await?);
        let proxy = ServerProxy::new(&spec.name, transport.clone(), self.settings.call_timeout);

        if let Err(e) = proxy.initialize(self.settings.startup_timeout).await {
            let tail = transport.stderr_tail(STDERR_TAIL_ON_PROBE_FAILURE).await;
            if !tail.is_empty() {
                tracing::warn!(server = %spec.name, stderr = %tail.join("\n"), "child stderr before failure");
            }
            transport.close().await;
            return Err(e);
        }
        if !self.settings.settle_delay.is_zero() {
            tokio::time::sleep(self.settings.settle_delay).await;
        }
        Ok(MountedServer::new(spec, proxy))
    }
}
