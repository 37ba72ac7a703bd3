//! Hot reload of the configuration file for `junction serve`.
//!
//! The parent directory is watched rather than the file itself: the gateway
//! replaces the file by rename, which would orphan a watch on the old inode.
//! Events are filtered by file name and debounced for 100ms. A reload happens
//! only when the configured server set actually changed, and connected
//! clients then receive a tools-list-changed notification.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{EventKind, RecursiveMode, Watcher};
use tokio_util::sync::CancellationToken;

use crate::standalone::server::GatewayMcpServer;

const DEBOUNCE: Duration = Duration::from_millis(100);

/// Whether a watcher event concerns the configuration file.
fn is_config_event(event: &notify::Event, file_name: &OsString) -> bool {
    if matches!(event.kind, EventKind::Access(_)) {
        return false;
    }
    event
        .paths
        .iter()
        .any(|path| path.file_name() == Some(file_name.as_os_str()))
}

fn watch_target(config_path: &Path) -> Option<(PathBuf, OsString)> {
    let file_name = config_path.file_name()?.to_os_string();
    let parent = match config_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    Some((parent, file_name))
}

/// Watch `config_path` and reload the gateway on each change until `cancel` fires.
pub async fn run_hot_reload(
    config_path: PathBuf,
    server: GatewayMcpServer,
    cancel: CancellationToken,
) {
    let Some((watch_dir, file_name)) = watch_target(&config_path) else {
        tracing::error!(path = %config_path.display(), "config path has no file name, hot-reload disabled");
        return;
    };

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<notify::Result<notify::Event>>();

    // notify's EventHandler is implemented for closures, not for tokio senders
    let mut watcher = match notify::recommended_watcher(move |event| {
        let _ = tx.send(event);
    }) {
        Ok(w) => w,
        Err(e) => {
            tracing::error!(error = %e, "failed to create file watcher for hot-reload");
            return;
        }
    };

    if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        tracing::error!(
            path = %watch_dir.display(),
            error = %e,
            "failed to watch config directory for hot-reload"
        );
        return;
    }

    // Dropping the watcher silently stops event delivery.
    let _watcher = watcher;

    tracing::info!(path = %config_path.display(), "hot-reload watching config file");

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Some(Ok(event)) => {
                        if !is_config_event(&event, &file_name) {
                            continue;
                        }
                        tokio::time::sleep(DEBOUNCE).await;
                        while rx.try_recv().is_ok() {}
                        reload(&server).await;
                    }
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "file watcher error during hot-reload");
                    }
                    None => {
                        tracing::debug!("hot-reload watcher channel closed");
                        return;
                    }
                }
            }
            _ = cancel.cancelled() => {
                tracing::debug!("hot-reload cancelled");
                return;
            }
        }
    }
}

async fn reload(server: &GatewayMcpServer) {
    match server.lifecycle().reload_if_changed().await {
        Ok(Some(report)) => {
            tracing::info!(
                mounted = report.mounted.len(),
                unmounted = report.unmounted.len(),
                failed = report.failed.len(),
                "config reloaded"
            );
            server.notify_tools_changed().await;
        }
        Ok(None) => {}
        Err(e) => {
            tracing::warn!(error = %e, "hot-reload skipped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigStore, GatewaySettings, McpConfig, ServerSpec};
    use crate::lifecycle::LifecycleManager;
    use notify::event::{AccessKind, CreateKind, ModifyKind};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn event(kind: EventKind, path: &str) -> notify::Event {
        notify::Event::new(kind).add_path(PathBuf::from(path))
    }

    #[test]
    fn test_is_config_event_filters_by_file_name() {
        let name = OsString::from("mcp.json");
        assert!(is_config_event(
            &event(EventKind::Modify(ModifyKind::Any), "/etc/junction/mcp.json"),
            &name
        ));
        assert!(is_config_event(
            &event(EventKind::Create(CreateKind::File), "/etc/junction/mcp.json"),
            &name
        ));
        assert!(!is_config_event(
            &event(EventKind::Create(CreateKind::File), "/etc/junction/.mcp.json.tmp"),
            &name
        ));
        assert!(!is_config_event(
            &event(EventKind::Access(AccessKind::Any), "/etc/junction/mcp.json"),
            &name
        ));
    }

    #[test]
    fn test_watch_target_defaults_to_current_dir() {
        let (dir, name) = watch_target(Path::new("mcp.json")).unwrap();
        assert_eq!(dir, PathBuf::from("."));
        assert_eq!(name, OsString::from("mcp.json"));

        let (dir, _) = watch_target(Path::new("/srv/gw/mcp.json")).unwrap();
        assert_eq!(dir, PathBuf::from("/srv/gw"));
    }

    #[tokio::test]
    async fn test_watcher_reloads_on_external_edit() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().join("mcp.json"));
        store.persist(&McpConfig::default()).await.unwrap();
        let lifecycle = Arc::new(LifecycleManager::new(
            store.clone(),
            GatewaySettings::default(),
            CancellationToken::new(),
        ));
        lifecycle.setup().await.unwrap();
        let server = GatewayMcpServer::new(lifecycle.clone());

        let mut state = lifecycle.subscribe();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_hot_reload(
            store.path().to_path_buf(),
            server,
            cancel.clone(),
        ));
        tokio::time::sleep(Duration::from_millis(200)).await;

        store
            .persist(&McpConfig::from_specs(vec![
                ServerSpec::new("later", "x").disabled(true),
            ]))
            .await
            .unwrap();

        let changed = tokio::time::timeout(Duration::from_secs(5), state.changed()).await;
        assert!(
            matches!(changed, Ok(Ok(()))),
            "watcher should have started a reload"
        );

        cancel.cancel();
        task.await.unwrap();
    }
}
