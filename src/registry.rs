//! MountRegistry: namespace prefix to mounted child server.
//!
//! Entries are only ever inserted fully initialized and removed whole, so a
//! reader never observes a half-built server. Child I/O always happens after
//! the lock has been released.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::config::ServerSpec;
use crate::error::JunctionError;
use crate::server::proxy::ServerProxy;
use crate::server::stdio::ChildTransport;

/// A child server that passed startup and is reachable through the router.
pub struct MountedServer {
    spec: ServerSpec,
    proxy: ServerProxy,
}

impl MountedServer {
    pub fn new(spec: ServerSpec, proxy: ServerProxy) -> Self {
        Self { spec, proxy }
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &ServerSpec {
        &self.spec
    }

    pub fn proxy(&self) -> &ServerProxy {
        &self.proxy
    }

    pub fn transport(&self) -> &Arc<ChildTransport> {
        self.proxy.transport()
    }
}

/// Set of mounted servers keyed by name (the namespace prefix).
#[derive(Default)]
pub struct MountRegistry {
    mounts: RwLock<BTreeMap<String, Arc<MountedServer>>>,
}

impl MountRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a mounted server.
    ///
    /// A name collision leaves the existing entry untouched and closes the
    /// rejected server's transport.
    pub async fn mount(&self, server: MountedServer) -> crate::Result<Arc<MountedServer>> {
        let server = Arc::new(server);
        let rejected = {
            let mut mounts = self.mounts.write().await;
            if mounts.contains_key(server.name()) {
                true
            } else {
                mounts.insert(server.name().to_string(), server.clone());
                false
            }
        };

        if rejected {
            tracing::warn!(server = %server.name(), "duplicate mount rejected");
            server.transport().close().await;
            return Err(JunctionError::DuplicateName(server.name().to_string()));
        }
        tracing::info!(server = %server.name(), "server mounted");
        Ok(server)
    }

    /// Remove a server and close its transport.
    pub async fn unmount(&self, name: &str) -> crate::Result<()> {
        let removed = self.mounts.write().await.remove(name);
        let server = removed.ok_or_else(|| JunctionError::NotFound(name.to_string()))?;
        server.transport().close().await;
        tracing::info!(server = %name, "server unmounted");
        Ok(())
    }

    /// Remove every server in one write section, then close all transports
    /// concurrently. Returns the names that were mounted.
    pub async fn unmount_all(&self) -> Vec<String> {
        let drained = std::mem::take(&mut *self.mounts.write().await);
        let names: Vec<String> = drained.keys().cloned().collect();

        futures::future::join_all(
            drained
                .values()
                .map(|server| async move { server.transport().close().await }),
        )
        .await;

        if !names.is_empty() {
            tracing::info!(count = names.len(), "all servers unmounted");
        }
        names
    }

    pub async fn lookup(&self, prefix: &str) -> Option<Arc<MountedServer>> {
        self.mounts.read().await.get(prefix).cloned()
    }

    /// Snapshot of all mounted servers, ordered by name.
    pub async fn list_all(&self) -> Vec<Arc<MountedServer>> {
        self.mounts.read().await.values().cloned().collect()
    }

    pub async fn names(&self) -> Vec<String> {
        self.mounts.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.mounts.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.mounts.read().await.is_empty()
    }
}
