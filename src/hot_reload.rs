//! Hot-reload for `steward run`.
//!
//! Watches the store file using the `notify` crate. On each detected change
//! (with 100ms debounce) the store is re-read; a running gateway gets a
//! supervised restart with the fresh config, a stopped one only gets its
//! config document rewritten. An unreadable store leaves everything as is.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use notify::{RecursiveMode, Watcher};
use tokio_util::sync::CancellationToken;

use crate::health::GatewayControl;
use crate::store::DefinitionStore;
use crate::supervisor::Outcome;
use crate::synth;

const DEBOUNCE: Duration = Duration::from_millis(100);

/// Apply the current store contents to the gateway.
pub async fn apply_store_change(
    store: &dyn DefinitionStore,
    control: &dyn GatewayControl,
) -> Outcome {
    let settings = match store.load_settings().await {
        Ok(settings) => settings,
        Err(e) => return Outcome::failed(format!("store reload failed, keeping current gateway: {}", e)),
    };
    let definitions = match store.enabled_definitions().await {
        Ok(definitions) => definitions,
        Err(e) => return Outcome::failed(format!("store reload failed, keeping current gateway: {}", e)),
    };

    let status = control.status().await;
    if status.is_running() {
        return control.restart_with_fresh_config(&definitions, &settings).await;
    }

    match synth::write_standard_document(&definitions, &settings).await {
        Ok(count) => Outcome::ok(format!(
            "Gateway is {}; config rewritten with {} servers.",
            status, count
        )),
        Err(e) => Outcome::failed(e.to_string()),
    }
}

fn concerns(event: &notify::Event, file_name: Option<&std::ffi::OsStr>) -> bool {
    match file_name {
        Some(name) => event.paths.iter().any(|p| p.file_name() == Some(name)),
        None => true,
    }
}

/// Watch `store_path` and apply every change until `cancel` fires.
///
/// The parent directory is watched rather than the file itself so that
/// editors replacing the file by rename keep triggering reloads.
pub async fn run_hot_reload(
    store_path: PathBuf,
    store: Arc<dyn DefinitionStore>,
    control: Arc<dyn GatewayControl>,
    cancel: CancellationToken,
) {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<notify::Result<notify::Event>>();

    // notify's EventHandler is implemented for FnMut; tokio's sender is not.
    let mut watcher = match notify::recommended_watcher(move |event| {
        let _ = tx.send(event);
    }) {
        Ok(w) => w,
        Err(e) => {
            tracing::error!(error = %e, "failed to create file watcher for hot-reload");
            return;
        }
    };

    let watch_dir = match store_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        tracing::error!(
            path = %watch_dir.display(),
            error = %e,
            "failed to watch store directory for hot-reload"
        );
        return;
    }

    // Dropping the watcher silently stops event delivery.
    let _watcher = watcher;
    let file_name = store_path.file_name().map(|n| n.to_os_string());

    tracing::info!(path = %store_path.display(), "hot-reload watching store file");

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Some(Ok(event)) if event.kind.is_access() => {}
                    Some(Ok(event)) => {
                        if !concerns(&event, file_name.as_deref()) {
                            continue;
                        }
                        tokio::time::sleep(DEBOUNCE).await;
                        while rx.try_recv().is_ok() {}

                        reload(&store_path, store.as_ref(), control.as_ref()).await;
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

async fn reload(store_path: &Path, store: &dyn DefinitionStore, control: &dyn GatewayControl) {
    let outcome = apply_store_change(store, control).await;
    if outcome.success {
        tracing::info!(path = %store_path.display(), message = %outcome.message, "store change applied");
    } else {
        tracing::warn!(path = %store_path.display(), message = %outcome.message, "store change not applied");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::ServerDefinition;
    use crate::settings::SupervisorSettings;
    use crate::store::{FileStore, MemoryStore};
    use crate::supervisor::GatewayStatus;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingControl {
        status: GatewayStatus,
        restarts: AtomicUsize,
    }

    impl CountingControl {
        fn new(status: GatewayStatus) -> Arc<Self> {
            Arc::new(Self {
                status,
                restarts: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl GatewayControl for CountingControl {
        async fn status(&self) -> GatewayStatus {
            self.status
        }

        async fn restart_with_fresh_config(
            &self,
            definitions: &[ServerDefinition],
            _settings: &SupervisorSettings,
        ) -> Outcome {
            self.restarts.fetch_add(1, Ordering::SeqCst);
            Outcome::ok(format!("restarted with {}", definitions.len()))
        }
    }

    #[tokio::test]
    async fn test_running_gateway_is_restarted() {
        let store = MemoryStore::new(
            SupervisorSettings::default(),
            vec![ServerDefinition::stdio("time", "uvx", vec![])],
        );
        let control = CountingControl::new(GatewayStatus::Running(10));

        let outcome = apply_store_change(&store, control.as_ref()).await;
        assert!(outcome.success);
        assert_eq!(outcome.message, "restarted with 1");
        assert_eq!(control.restarts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stopped_gateway_only_rewrites_config() {
        let dir = tempfile::tempdir().unwrap();
        let settings = SupervisorSettings {
            config_file_path: dir.path().join("gateway.json"),
            ..Default::default()
        };
        let store = MemoryStore::new(settings.clone(), vec![]);
        let control = CountingControl::new(GatewayStatus::Stopped);

        let outcome = apply_store_change(&store, control.as_ref()).await;
        assert!(outcome.success, "{}", outcome.message);
        assert!(settings.config_file_path.exists());
        assert_eq!(control.restarts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_broken_store_keeps_gateway() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("steward.toml");
        std::fs::write(&path, "this is not valid toml {{").unwrap();
        let control = CountingControl::new(GatewayStatus::Running(10));

        let outcome = apply_store_change(&FileStore::new(&path), control.as_ref()).await;
        assert!(!outcome.success);
        assert!(outcome.message.contains("keeping current gateway"));
        assert_eq!(control.restarts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_watcher_applies_change_and_stops_on_cancel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("steward.toml");
        std::fs::write(&path, "[settings]\nport = 8000\n").unwrap();

        let control = CountingControl::new(GatewayStatus::Running(10));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_hot_reload(
            path.clone(),
            Arc::new(FileStore::new(&path)),
            control.clone(),
            cancel.clone(),
        ));

        // Give the watcher time to register before touching the file.
        tokio::time::sleep(Duration::from_millis(300)).await;
        std::fs::write(&path, "[settings]\nport = 8100\n").unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while control.restarts.load(Ordering::SeqCst) == 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(control.restarts.load(Ordering::SeqCst) >= 1);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("hot-reload exits after cancel")
            .unwrap();
    }
}
