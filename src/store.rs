//! Shared dashboard state.
//!
//! All mutable dashboard state lives here, owned explicitly by whoever
//! created the store and shared via `Arc`; no module-level globals, so
//! two dashboard instances never interfere. Mutation happens in exactly
//! two places: the poller's per-scan merge and the aggregator's
//! full-collection replace, both serialized by the lock.

use indexmap::IndexMap;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::models::{
    CustomScan, DashboardSnapshot, RepoStatus, Repository, ScanUpdate, UserAccount,
};

#[derive(Default)]
struct StoreState {
    repositories: IndexMap<String, Repository>,
    custom_scans: Vec<CustomScan>,
    snapshot: Option<DashboardSnapshot>,
    /// Repository ids with an active polling loop.
    scanning: HashSet<String>,
    user: Option<UserAccount>,
    last_error: Option<String>,
}

/// Handle to the dashboard's shared state; cheap to clone.
#[derive(Clone, Default)]
pub struct DashboardStore {
    inner: Arc<RwLock<StoreState>>,
}

impl DashboardStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Full-collection replace, done once per successful aggregation cycle.
    pub async fn replace_collections(
        &self,
        repositories: Vec<Repository>,
        custom_scans: Vec<CustomScan>,
    ) {
        let mut state = self.inner.write().await;
        state.repositories = repositories
            .into_iter()
            .map(|repo| (repo.id.clone(), repo))
            .collect();
        state.custom_scans = custom_scans;
    }

    pub async fn repositories(&self) -> Vec<Repository> {
        self.inner.read().await.repositories.values().cloned().collect()
    }

    pub async fn repository(&self, id: &str) -> Option<Repository> {
        self.inner.read().await.repositories.get(id).cloned()
    }

    pub async fn custom_scans(&self) -> Vec<CustomScan> {
        self.inner.read().await.custom_scans.clone()
    }

    /// Merge one poll response into the owning repository.
    ///
    /// Field-level merge: the latest scan and the derived status are always
    /// overwritten, the repository rollups only when the response supplied
    /// them. A stale non-terminal status for a scan already merged as
    /// terminal is dropped; terminal states never revert.
    ///
    /// Returns false when the update was dropped (unknown repository or
    /// stale response).
    pub async fn apply_scan_update(&self, repository_id: &str, update: ScanUpdate) -> bool {
        let mut state = self.inner.write().await;
        let Some(repo) = state.repositories.get_mut(repository_id) else {
            warn!(
                "Dropping scan update for unknown repository {}",
                repository_id
            );
            return false;
        };

        if let Some(current) = &repo.latest_scan {
            if current.id == update.scan.id
                && current.status.is_terminal()
                && !update.scan.status.is_terminal()
            {
                debug!(
                    "Ignoring stale {} status for terminal scan {}",
                    update.scan.status, current.id
                );
                return false;
            }
        }

        repo.status = RepoStatus::from(update.scan.status);
        repo.latest_scan = Some(update.scan);
        if let Some(counts) = update.counts {
            repo.counts = Some(counts);
        }
        if let Some(score) = update.security_score {
            repo.security_score = Some(score);
        }
        if let Some(coverage) = update.code_coverage {
            repo.code_coverage = Some(coverage);
        }
        true
    }

    pub async fn mark_scanning(&self, repository_id: &str) {
        self.inner
            .write()
            .await
            .scanning
            .insert(repository_id.to_string());
    }

    pub async fn clear_scanning(&self, repository_id: &str) {
        self.inner.write().await.scanning.remove(repository_id);
    }

    pub async fn is_scanning(&self, repository_id: &str) -> bool {
        self.inner.read().await.scanning.contains(repository_id)
    }

    pub async fn publish_snapshot(&self, snapshot: DashboardSnapshot) {
        let mut state = self.inner.write().await;
        state.snapshot = Some(snapshot);
        state.last_error = None;
    }

    pub async fn snapshot(&self) -> Option<DashboardSnapshot> {
        self.inner.read().await.snapshot.clone()
    }

    pub async fn set_user(&self, user: UserAccount) {
        self.inner.write().await.user = Some(user);
    }

    pub async fn user(&self) -> Option<UserAccount> {
        self.inner.read().await.user.clone()
    }

    /// Record a surfaced error; the previous snapshot stays in place so the
    /// view can keep rendering it next to the message.
    pub async fn set_error(&self, message: impl Into<String>) {
        self.inner.write().await.last_error = Some(message.into());
    }

    pub async fn last_error(&self) -> Option<String> {
        self.inner.read().await.last_error.clone()
    }
}
