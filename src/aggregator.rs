//! Dashboard metrics aggregation.
//!
//! `build_snapshot` is the pure core: given the full repository and
//! custom-scan collections, the selected-repository filter and the remote
//! metrics payload, it materializes one [`DashboardSnapshot`]. The
//! surrounding [`DashboardService`] drives the four backend reads
//! concurrently, joins them (never combining partial results), and commits
//! the snapshot to the store.

use chrono::{DateTime, Local, Utc};
use indexmap::IndexMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

use crate::api::ScanApi;
use crate::errors::ApiResult;
use crate::models::{
    display_clock_time, round_score, ActivityEntry, ActivityLevel, CustomScan, DashboardSnapshot,
    RepoFilter, Repository, Scan, ScanStatus, ScanUpdate, SecurityMetrics, TimeRange,
    VulnerabilityCounts, VulnerabilityTypeEntry,
};
use crate::poller::{PollerSettings, ScanPoller};
use crate::store::DashboardStore;

/// Most recent activity entries kept in a snapshot.
const ACTIVITY_LIMIT: usize = 5;

/// Score assumed for a scoped view with no data and no vulnerabilities.
const CLEAN_SCORE: u32 = 100;

/// Floor of the locally computed fallback score.
const FALLBACK_FLOOR: u32 = 5;

// Placeholder category names for the severity buckets; not a real
// classification.
const LABEL_CRITICAL: &str = "SQL Injection";
const LABEL_HIGH: &str = "XSS";
const LABEL_MEDIUM: &str = "CSRF";
const LABEL_LOW: &str = "Outdated Dependencies";

/// Build one consistent snapshot from the four aggregation inputs.
///
/// `repositories` and `custom_scans` are the *unfiltered* collections;
/// scoping by `filter` happens here. An account with no repositories at
/// all short-circuits to an all-zero snapshot with a null score; "no
/// data yet" is not the same as "scanned clean".
pub fn build_snapshot(
    repositories: &[Repository],
    custom_scans: &[CustomScan],
    filter: &RepoFilter,
    metrics: &SecurityMetrics,
    now: DateTime<Utc>,
) -> DashboardSnapshot {
    if repositories.is_empty() {
        return DashboardSnapshot::default();
    }

    let scoped_repos: Vec<&Repository> = repositories
        .iter()
        .filter(|repo| filter.matches(&repo.id))
        .collect();
    let scoped_custom: Vec<&CustomScan> = custom_scans
        .iter()
        .filter(|scan| filter.matches(&scan.repository_id))
        .collect();

    let security_score = resolve_security_score(&scoped_repos, filter, metrics);

    let summed = sum_scan_counts(&scoped_repos);
    let total_vulnerabilities = metrics
        .total_vulnerabilities
        .unwrap_or(summed.total as u64);
    let critical_vulnerabilities = metrics
        .critical_vulnerabilities
        .unwrap_or(summed.critical as u64);
    let files_scanned = metrics.files_scanned.unwrap_or(0);
    let active_projects = metrics
        .active_projects
        .unwrap_or(scoped_repos.len() as u64);

    DashboardSnapshot {
        security_score: Some(security_score),
        total_vulnerabilities,
        critical_vulnerabilities,
        files_scanned,
        active_projects,
        scans_today: count_scans_today(&scoped_repos, &scoped_custom, now),
        recent_activity: build_activity(&scoped_repos, &scoped_custom),
        vulnerability_types: build_breakdown(&scoped_repos, &scoped_custom),
    }
}

/// Security score resolution.
///
/// Single-repository view, strict priority, first present value wins:
/// latest scan's score, then the repository's own score, then the remote
/// overall score, then a weighted local fallback when vulnerabilities
/// exist, then 100 (clean). The `all` view always takes the rounded
/// remote overall score, defaulting to 100.
fn resolve_security_score(
    scoped_repos: &[&Repository],
    filter: &RepoFilter,
    metrics: &SecurityMetrics,
) -> u32 {
    let remote = metrics.overall_score.map(round_score);

    match filter {
        RepoFilter::All => remote.unwrap_or(CLEAN_SCORE),
        RepoFilter::One(_) => {
            let repo = scoped_repos.first();
            let latest_scan = repo.and_then(|r| r.latest_scan.as_ref());

            latest_scan
                .and_then(|scan| scan.security_score)
                .or(repo.and_then(|r| r.security_score))
                .or(remote)
                .or_else(|| latest_scan.and_then(|scan| weighted_fallback(&scan.counts)))
                .unwrap_or(CLEAN_SCORE)
        }
    }
}

/// Locally computed score from severity counts, only defined when at
/// least one vulnerability exists.
fn weighted_fallback(counts: &VulnerabilityCounts) -> Option<u32> {
    if counts.is_clean() {
        return None;
    }
    let penalty = 25 * counts.critical as i64
        + 10 * counts.high as i64
        + 5 * counts.medium as i64
        + counts.low as i64;
    Some((100 - penalty).clamp(FALLBACK_FLOOR as i64, 100) as u32)
}

fn sum_scan_counts(scoped_repos: &[&Repository]) -> VulnerabilityCounts {
    let mut summed = VulnerabilityCounts::default();
    for scan in scoped_repos.iter().filter_map(|r| r.latest_scan.as_ref()) {
        summed.critical += scan.counts.critical;
        summed.high += scan.counts.high;
        summed.medium += scan.counts.medium;
        summed.low += scan.counts.low;
        summed.total += scan.counts.total;
    }
    summed
}

fn count_scans_today(
    scoped_repos: &[&Repository],
    scoped_custom: &[&CustomScan],
    now: DateTime<Utc>,
) -> u64 {
    let today = now.with_timezone(&Local).date_naive();
    let repo_scans = scoped_repos
        .iter()
        .filter_map(|r| r.latest_scan.as_ref())
        .filter(|scan| scan.started_at.with_timezone(&Local).date_naive() == today)
        .count();
    let custom_scans = scoped_custom
        .iter()
        .filter(|scan| scan.started_at.with_timezone(&Local).date_naive() == today)
        .count();
    (repo_scans + custom_scans) as u64
}

fn scan_activity_level(status: ScanStatus, counts: &VulnerabilityCounts) -> ActivityLevel {
    match status {
        ScanStatus::Pending | ScanStatus::Running => ActivityLevel::Info,
        ScanStatus::Completed if counts.is_clean() => ActivityLevel::Success,
        _ => ActivityLevel::Warning,
    }
}

fn scan_phase(scan: &Scan) -> &'static str {
    if scan.completed_at.is_some() {
        "completed"
    } else {
        "started"
    }
}

/// Recent activity: repository latest scans plus the five most recent
/// custom scans, merged, sorted by event time (completion if present,
/// else start), and capped. Keys are synthetic list identities, unique
/// within one snapshot only.
fn build_activity(
    scoped_repos: &[&Repository],
    scoped_custom: &[&CustomScan],
) -> Vec<ActivityEntry> {
    struct Pending<'a> {
        kind: &'static str,
        scan_id: &'a str,
        repository_id: &'a str,
        label: String,
        occurred_at: DateTime<Utc>,
        level: ActivityLevel,
    }

    let mut entries: Vec<Pending> = Vec::new();

    for repo in scoped_repos {
        if let Some(scan) = &repo.latest_scan {
            entries.push(Pending {
                kind: "scan",
                scan_id: &scan.id,
                repository_id: &repo.id,
                label: format!("{} scan {}", repo.name, scan_phase(scan)),
                occurred_at: scan.event_time(),
                level: scan_activity_level(scan.status, &scan.counts),
            });
        }
    }

    let mut recent_custom: Vec<&&CustomScan> = scoped_custom.iter().collect();
    recent_custom.sort_by_key(|scan| std::cmp::Reverse(scan.event_time()));
    for scan in recent_custom.into_iter().take(ACTIVITY_LIMIT) {
        let phase = if scan.completed_at.is_some() {
            "completed"
        } else {
            "started"
        };
        entries.push(Pending {
            kind: "custom",
            scan_id: &scan.id,
            repository_id: &scan.repository_id,
            label: format!("{} scan {}", scan.name, phase),
            occurred_at: scan.event_time(),
            level: scan_activity_level(scan.status, &scan.counts),
        });
    }

    entries.sort_by_key(|entry| std::cmp::Reverse(entry.occurred_at));
    entries.truncate(ACTIVITY_LIMIT);

    entries
        .into_iter()
        .enumerate()
        .map(|(position, entry)| ActivityEntry {
            key: format!(
                "{}-{}-{}-{}",
                entry.kind, entry.scan_id, entry.repository_id, position
            ),
            label: entry.label,
            occurred_at: entry.occurred_at,
            display_time: display_clock_time(entry.occurred_at),
            level: entry.level,
        })
        .collect()
}

/// Vulnerability-type breakdown. Severity buckets map to fixed placeholder
/// labels; zero buckets are dropped. Counts for the same label accumulate
/// across repositories.
fn build_breakdown(
    scoped_repos: &[&Repository],
    scoped_custom: &[&CustomScan],
) -> Vec<VulnerabilityTypeEntry> {
    let mut buckets: IndexMap<String, u64> = IndexMap::new();

    let mut add = |label: String, count: u32| {
        if count > 0 {
            *buckets.entry(label).or_insert(0) += count as u64;
        }
    };

    for scan in scoped_repos.iter().filter_map(|r| r.latest_scan.as_ref()) {
        add(LABEL_CRITICAL.to_string(), scan.counts.critical);
        add(LABEL_HIGH.to_string(), scan.counts.high);
        add(LABEL_MEDIUM.to_string(), scan.counts.medium);
        add(LABEL_LOW.to_string(), scan.counts.low);
    }

    for scan in scoped_custom {
        add("Custom Rule - Critical".to_string(), scan.counts.critical);
        add("Custom Rule - High".to_string(), scan.counts.high);
        add("Custom Rule - Medium".to_string(), scan.counts.medium);
        add("Custom Rule - Low".to_string(), scan.counts.low);
    }

    buckets
        .into_iter()
        .map(|(label, count)| VulnerabilityTypeEntry { label, count })
        .collect()
}

/// Drives aggregation cycles and scan lifecycle operations against the
/// store. Owns the poller; polling is an internal side effect of
/// `start_scan`, never exposed directly.
#[derive(Clone)]
pub struct DashboardService {
    api: Arc<dyn ScanApi>,
    store: DashboardStore,
    poller: ScanPoller,
    /// Best-effort de-duplication of overlapping refresh cycles; a forced
    /// refresh bypasses it and the last response to land wins.
    refreshing: Arc<AtomicBool>,
    /// Cleared on teardown; in-flight cycles check it before committing.
    alive: Arc<AtomicBool>,
}

impl DashboardService {
    pub fn new(api: Arc<dyn ScanApi>, store: DashboardStore) -> Self {
        Self::with_poller_settings(api, store, PollerSettings::default())
    }

    pub fn with_poller_settings(
        api: Arc<dyn ScanApi>,
        store: DashboardStore,
        settings: PollerSettings,
    ) -> Self {
        let poller = ScanPoller::with_settings(api.clone(), store.clone(), settings);
        Self {
            api,
            store,
            poller,
            refreshing: Arc::new(AtomicBool::new(false)),
            alive: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn store(&self) -> &DashboardStore {
        &self.store
    }

    /// Whether a polling loop is currently tracking this scan. The poller
    /// itself stays internal; polling is a side effect of `start_scan`.
    pub async fn is_tracking(&self, scan_id: &str) -> bool {
        self.poller.is_polling(scan_id).await
    }

    /// Number of scans currently being tracked.
    pub async fn tracked_scans(&self) -> usize {
        self.poller.active_count().await
    }

    /// Run one aggregation cycle: issue the four reads concurrently, join
    /// them, and publish a fresh snapshot. If any read fails, nothing is
    /// published; the previous snapshot stays and the error is surfaced.
    ///
    /// A cycle started while another is in flight is suppressed unless
    /// `force` is set (the retry/force-refresh trigger).
    pub async fn refresh(&self, filter: &RepoFilter, range: TimeRange, force: bool) -> ApiResult<()> {
        if self.refreshing.swap(true, Ordering::SeqCst) && !force {
            debug!("Refresh already in flight, suppressing");
            return Ok(());
        }

        let result = self.refresh_inner(filter, range).await;
        self.refreshing.store(false, Ordering::SeqCst);

        if let Err(err) = &result {
            info!("Aggregation cycle failed: {}", err);
            self.store.set_error(err.to_string()).await;
        }
        result
    }

    async fn refresh_inner(&self, filter: &RepoFilter, range: TimeRange) -> ApiResult<()> {
        // A join, not a race: results are combined only once all four have
        // resolved. Collections are fetched unscoped; scoping is the
        // aggregator's job. The metrics read is scoped server-side.
        let (user, repositories, custom_scans, metrics) = tokio::try_join!(
            self.api.current_user(),
            self.api.repositories(&RepoFilter::All),
            self.api.custom_scans(&RepoFilter::All),
            self.api.security_metrics(filter, range),
        )?;

        if !self.alive.load(Ordering::SeqCst) {
            debug!("View torn down, discarding aggregation results");
            return Ok(());
        }

        let snapshot = build_snapshot(&repositories, &custom_scans, filter, &metrics, Utc::now());
        self.store.set_user(user).await;
        self.store
            .replace_collections(repositories, custom_scans)
            .await;
        self.store.publish_snapshot(snapshot).await;
        Ok(())
    }

    /// Start a scan for a repository and begin polling it.
    pub async fn start_scan(&self, repository_id: &str) -> ApiResult<Scan> {
        let scan = self.api.start_scan(repository_id).await?;
        info!("Started scan {} for repository {}", scan.id, repository_id);
        self.store
            .apply_scan_update(repository_id, ScanUpdate::new(scan.clone()))
            .await;
        self.poller.start_polling(&scan.id, repository_id).await;
        Ok(scan)
    }

    /// Stop a running scan and its polling loop.
    pub async fn stop_scan(&self, scan_id: &str) -> ApiResult<()> {
        self.api.stop_scan(scan_id).await?;
        self.poller.cancel(scan_id).await;
        info!("Stopped scan {}", scan_id);
        Ok(())
    }

    /// Component teardown: results of in-flight cycles are discarded and
    /// every polling timer is cleared.
    pub async fn teardown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        self.poller.shutdown().await;
    }
}
