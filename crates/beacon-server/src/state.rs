//! Application state shared across handlers.

use std::sync::Arc;

use beacon_core::{BeaconConfig, PresenceEngine, Storage, SyncPolicy, SyncQueue, SyncSink};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::sink::{HttpSink, LogSink};

/// Shared application state handle.
pub type SharedState = Arc<AppState>;

/// Application state.
///
/// The engine synchronizes itself; this struct ties it to the configuration
/// and the snapshot store, and orders snapshot writes.
#[derive(Debug)]
pub struct AppState {
    /// The presence engine.
    pub engine: PresenceEngine,

    /// Snapshot store; `None` when running in memory only.
    pub storage: Option<Storage>,

    /// Configuration the server was started with.
    pub config: BeaconConfig,

    /// Held from taking a snapshot until it is on disk, so an older snapshot
    /// never replaces a newer one.
    persist_lock: Mutex<()>,
}

impl AppState {
    /// Create application state from configuration.
    ///
    /// Picks an [`HttpSink`] when a sync endpoint is configured, a [`LogSink`]
    /// otherwise, and restores the last snapshot if storage is enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or the snapshot
    /// exists but cannot be read.
    pub fn new(config: BeaconConfig, storage: Option<Storage>) -> anyhow::Result<Self> {
        let sink: Arc<dyn SyncSink> = match config.sync.endpoint() {
            Some(endpoint) => {
                if config.sync.enabled {
                    info!(endpoint, "Syncing history to HTTP endpoint");
                } else {
                    info!(endpoint, "Sync paused; records stay queued");
                }
                let sink = HttpSink::new(endpoint, config.sync.attempt_timeout())?
                    .with_api_key(config.sync.api_key().map(str::to_string))
                    .with_enabled(config.sync.enabled);
                Arc::new(sink)
            }
            None => {
                info!("No sync endpoint configured; records go to the log");
                Arc::new(LogSink)
            }
        };
        let queue = SyncQueue::new(sink, SyncPolicy::from(&config.sync));
        let engine = PresenceEngine::new(&config.presence, queue);

        if let Some(storage) = &storage {
            if let Some(snapshot) = storage.load_snapshot()? {
                engine.restore(snapshot);
            }
        }

        Ok(Self {
            engine,
            storage,
            config,
            persist_lock: Mutex::new(()),
        })
    }

    /// In-memory state with an explicit sink, for tests and `--ephemeral`.
    #[must_use]
    pub fn in_memory(config: BeaconConfig, sink: Arc<dyn SyncSink>) -> Self {
        let queue = SyncQueue::new(sink, SyncPolicy::from(&config.sync));
        Self {
            engine: PresenceEngine::new(&config.presence, queue),
            storage: None,
            config,
            persist_lock: Mutex::new(()),
        }
    }

    /// Write the current registries to storage, if enabled.
    ///
    /// Failures are logged, not returned: the in-memory state is authoritative.
    pub async fn persist(&self) {
        let Some(storage) = &self.storage else {
            return;
        };
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.engine.snapshot().await;
        if let Err(e) = storage.save_snapshot(&snapshot) {
            warn!(error = %e, "Failed to save snapshot");
        }
    }
}

#[cfg(test)]
mod tests {
    use beacon_core::Sighting;

    use super::*;

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_persists_keep_latest_state() {
        let dir = tempfile::tempdir().unwrap();
        let state = Arc::new(
            AppState::new(BeaconConfig::default(), Some(Storage::new(dir.path()))).unwrap(),
        );

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    state
                        .engine
                        .record_sighting(Sighting::new(format!("D{i}"), -50))
                        .await
                        .unwrap();
                    state.persist().await;
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let saved = Storage::new(dir.path()).load_snapshot().unwrap().unwrap();
        assert_eq!(saved.devices.len(), 16);
    }

    #[tokio::test]
    async fn test_paused_endpoint_keeps_records_queued() {
        let mut config = BeaconConfig::default();
        config.sync.endpoint = Some("http://127.0.0.1:9/append".to_string());
        config.sync.enabled = false;
        let state = AppState::new(config, None).unwrap();

        let status = state.engine.sync_queue().status();
        assert!(!status.enabled);
        let report = state.engine.sync_queue().flush().await;
        assert_eq!(report.delivered + report.failed, 0);
    }
}
