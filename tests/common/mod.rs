//! Shared test fixtures: an in-memory `ScanApi` and model builders.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use scanboard::api::ScanApi;
use scanboard::errors::{ApiError, ApiResult};
use scanboard::models::{
    CustomScan, RepoFilter, RepoStatus, Repository, Scan, ScanStatus, ScanUpdate, SecurityMetrics,
    TimeRange, UserAccount, VulnerabilityCounts,
};

pub fn scan(id: &str, repo_id: &str, status: ScanStatus) -> Scan {
    Scan {
        id: id.to_string(),
        repository_id: repo_id.to_string(),
        status,
        started_at: Utc::now(),
        completed_at: None,
        duration_seconds: None,
        counts: VulnerabilityCounts::default(),
        security_score: None,
        code_coverage: None,
    }
}

pub fn repo(id: &str) -> Repository {
    Repository {
        id: id.to_string(),
        name: format!("{}-name", id),
        owner: "acme".to_string(),
        status: RepoStatus::Pending,
        latest_scan: None,
        counts: None,
        security_score: None,
        code_coverage: None,
    }
}

pub fn custom(id: &str, repo_id: &str, counts: VulnerabilityCounts) -> CustomScan {
    CustomScan {
        id: id.to_string(),
        repository_id: repo_id.to_string(),
        name: format!("rules-{}", id),
        status: ScanStatus::Completed,
        started_at: Utc::now(),
        completed_at: Some(Utc::now()),
        counts,
        security_score: None,
    }
}

pub fn running_update(scan_id: &str, repo_id: &str) -> ScanUpdate {
    ScanUpdate::new(scan(scan_id, repo_id, ScanStatus::Running))
}

pub fn completed_update(
    scan_id: &str,
    repo_id: &str,
    counts: VulnerabilityCounts,
    score: Option<u32>,
) -> ScanUpdate {
    let mut finished = scan(scan_id, repo_id, ScanStatus::Completed);
    finished.completed_at = Some(Utc::now());
    finished.counts = counts;
    finished.security_score = score;
    ScanUpdate {
        scan: finished,
        counts: Some(counts),
        security_score: score,
        code_coverage: None,
    }
}

fn backend_down() -> ApiError {
    ApiError::Status {
        status: 503,
        message: "backend unavailable".to_string(),
    }
}

/// In-memory backend. Poll responses are consumed from `updates` in
/// order; once drained, `steady` repeats forever, or the next poll fails
/// when `fail_when_drained` is set.
#[derive(Default)]
pub struct MockApi {
    pub repositories: Mutex<Vec<Repository>>,
    pub custom_scans: Mutex<Vec<CustomScan>>,
    pub metrics: Mutex<SecurityMetrics>,
    pub fail_repositories: AtomicBool,
    pub fail_metrics: AtomicBool,
    /// When set, the current-user read sleeps this long before answering,
    /// keeping an aggregation cycle in flight.
    pub user_delay: Mutex<Option<Duration>>,
    pub repo_calls: AtomicUsize,
    pub updates: Mutex<VecDeque<ScanUpdate>>,
    pub steady: Mutex<Option<ScanUpdate>>,
    pub fail_when_drained: AtomicBool,
    pub status_calls: AtomicUsize,
    pub next_scan: Mutex<Option<Scan>>,
}

impl MockApi {
    pub fn with_repositories(repositories: Vec<Repository>) -> Self {
        Self {
            repositories: Mutex::new(repositories),
            ..Default::default()
        }
    }

    pub fn queue_update(&self, update: ScanUpdate) {
        self.updates.lock().unwrap().push_back(update);
    }

    pub fn set_steady(&self, update: ScanUpdate) {
        *self.steady.lock().unwrap() = Some(update);
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn repo_calls(&self) -> usize {
        self.repo_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScanApi for MockApi {
    async fn current_user(&self) -> ApiResult<UserAccount> {
        let delay = *self.user_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(UserAccount {
            id: "u1".to_string(),
            email: "dev@example.com".to_string(),
            name: Some("Dev".to_string()),
        })
    }

    async fn repositories(&self, filter: &RepoFilter) -> ApiResult<Vec<Repository>> {
        self.repo_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_repositories.load(Ordering::SeqCst) {
            return Err(backend_down());
        }
        Ok(self
            .repositories
            .lock()
            .unwrap()
            .iter()
            .filter(|repo| filter.matches(&repo.id))
            .cloned()
            .collect())
    }

    async fn custom_scans(&self, filter: &RepoFilter) -> ApiResult<Vec<CustomScan>> {
        Ok(self
            .custom_scans
            .lock()
            .unwrap()
            .iter()
            .filter(|scan| filter.matches(&scan.repository_id))
            .cloned()
            .collect())
    }

    async fn security_metrics(
        &self,
        _filter: &RepoFilter,
        _range: TimeRange,
    ) -> ApiResult<SecurityMetrics> {
        if self.fail_metrics.load(Ordering::SeqCst) {
            return Err(backend_down());
        }
        Ok(self.metrics.lock().unwrap().clone())
    }

    async fn start_scan(&self, repository_id: &str) -> ApiResult<Scan> {
        self.next_scan
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| ApiError::Status {
                status: 409,
                message: format!("no scan available for {}", repository_id),
            })
    }

    async fn stop_scan(&self, _scan_id: &str) -> ApiResult<()> {
        Ok(())
    }

    async fn scan_status(&self, _scan_id: &str) -> ApiResult<ScanUpdate> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(update) = self.updates.lock().unwrap().pop_front() {
            return Ok(update);
        }
        if let Some(update) = self.steady.lock().unwrap().clone() {
            return Ok(update);
        }
        if self.fail_when_drained.load(Ordering::SeqCst) {
            return Err(backend_down());
        }
        Err(ApiError::Status {
            status: 404,
            message: "scan not found".to_string(),
        })
    }
}
