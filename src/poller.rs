//! Scan status polling.
//!
//! One cancellable task per in-flight scan, keyed by scan id. Each task
//! queries the status endpoint on a fixed interval, merges the response
//! into the store, and stops on a terminal status, on the first fetch
//! error (fail-stop, no retry), or at a hard wall-clock ceiling. On any
//! exit the task clears its own handle and removes the repository from
//! the scanning working set, so no timer outlives its scan.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::api::ScanApi;
use crate::store::DashboardStore;

/// Polling cadence and cutoff.
#[derive(Clone, Copy, Debug)]
pub struct PollerSettings {
    pub interval: Duration,
    /// Wall-clock ceiling after which polling is cancelled unconditionally,
    /// terminal or not.
    pub ceiling: Duration,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            ceiling: Duration::from_secs(30 * 60),
        }
    }
}

struct PollHandle {
    repository_id: String,
    task: JoinHandle<()>,
}

/// Tracks in-flight scans to completion without blocking anything else.
#[derive(Clone)]
pub struct ScanPoller {
    api: Arc<dyn ScanApi>,
    store: DashboardStore,
    settings: PollerSettings,
    active: Arc<RwLock<HashMap<String, PollHandle>>>,
}

impl ScanPoller {
    pub fn new(api: Arc<dyn ScanApi>, store: DashboardStore) -> Self {
        Self::with_settings(api, store, PollerSettings::default())
    }

    pub fn with_settings(
        api: Arc<dyn ScanApi>,
        store: DashboardStore,
        settings: PollerSettings,
    ) -> Self {
        Self {
            api,
            store,
            settings,
            active: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start tracking a scan. At most one loop exists per scan id: starting
    /// again for the same id cancels the previous loop first
    /// (last-writer-wins).
    pub async fn start_polling(&self, scan_id: &str, repository_id: &str) {
        let mut active = self.active.write().await;
        if let Some(previous) = active.remove(scan_id) {
            debug!("Replacing existing polling loop for scan {}", scan_id);
            previous.task.abort();
            if previous.repository_id != repository_id {
                self.store.clear_scanning(&previous.repository_id).await;
            }
        }
        self.store.mark_scanning(repository_id).await;

        let api = self.api.clone();
        let store = self.store.clone();
        let handles = self.active.clone();
        let settings = self.settings;
        let scan_id_owned = scan_id.to_string();
        let repository_id_owned = repository_id.to_string();

        let task = tokio::spawn(async move {
            poll_loop(
                api,
                store.clone(),
                settings,
                &scan_id_owned,
                &repository_id_owned,
            )
            .await;
            store.clear_scanning(&repository_id_owned).await;
            handles.write().await.remove(&scan_id_owned);
        });

        active.insert(
            scan_id.to_string(),
            PollHandle {
                repository_id: repository_id.to_string(),
                task,
            },
        );
    }

    /// Explicitly stop tracking a scan. Returns false when no loop was
    /// active for that id.
    pub async fn cancel(&self, scan_id: &str) -> bool {
        let removed = self.active.write().await.remove(scan_id);
        match removed {
            Some(handle) => {
                handle.task.abort();
                self.store.clear_scanning(&handle.repository_id).await;
                debug!("Cancelled polling for scan {}", scan_id);
                true
            }
            None => false,
        }
    }

    /// Component teardown: abort every loop and clear the working set.
    pub async fn shutdown(&self) {
        let mut active = self.active.write().await;
        for (scan_id, handle) in active.drain() {
            handle.task.abort();
            self.store.clear_scanning(&handle.repository_id).await;
            debug!("Aborted polling for scan {} on shutdown", scan_id);
        }
    }

    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }

    pub async fn is_polling(&self, scan_id: &str) -> bool {
        self.active.read().await.contains_key(scan_id)
    }
}

async fn poll_loop(
    api: Arc<dyn ScanApi>,
    store: DashboardStore,
    settings: PollerSettings,
    scan_id: &str,
    repository_id: &str,
) {
    let started = Instant::now();
    let mut ticker = interval(settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; the first status query should
    // happen one interval after the scan started.
    ticker.tick().await;

    loop {
        ticker.tick().await;

        // Termination conditions are evaluated here, once per interval.
        if started.elapsed() >= settings.ceiling {
            warn!(
                "Polling ceiling reached for scan {} after {:?}, giving up",
                scan_id,
                started.elapsed()
            );
            return;
        }

        match api.scan_status(scan_id).await {
            Ok(update) => {
                let status = update.scan.status;
                store.apply_scan_update(repository_id, update).await;
                if status.is_terminal() {
                    info!("Scan {} reached terminal status {}", scan_id, status);
                    return;
                }
                debug!("Scan {} still {}", scan_id, status);
            }
            Err(err) => {
                // Fail-stop: a failed poll abandons tracking for this scan;
                // the owner restarts it explicitly if wanted.
                warn!("Poll for scan {} failed, stopping: {}", scan_id, err);
                return;
            }
        }
    }
}
