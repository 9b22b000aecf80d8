//! Aggregation cycle tests: join semantics, scoping, teardown and the
//! scan lifecycle surface.

mod common;

use common::{custom, repo, scan, MockApi};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use scanboard::aggregator::DashboardService;
use scanboard::models::{
    RepoFilter, RepoStatus, ScanStatus, SecurityMetrics, TimeRange, VulnerabilityCounts,
};
use scanboard::poller::PollerSettings;
use scanboard::store::DashboardStore;
use tokio_test::{assert_err, assert_ok};

fn service(api: Arc<MockApi>, store: DashboardStore) -> DashboardService {
    DashboardService::with_poller_settings(api, store, PollerSettings::default())
}

fn seeded_api() -> MockApi {
    let mut r1 = repo("r1");
    let mut s1 = scan("s1", "r1", ScanStatus::Completed);
    s1.counts = VulnerabilityCounts::tally(1, 2, 0, 0);
    r1.latest_scan = Some(s1);
    r1.status = RepoStatus::Completed;

    let mut r2 = repo("r2");
    let mut s2 = scan("s2", "r2", ScanStatus::Running);
    s2.counts = VulnerabilityCounts::tally(0, 0, 3, 0);
    r2.latest_scan = Some(s2);
    r2.status = RepoStatus::Scanning;

    let api = MockApi::with_repositories(vec![r1, r2]);
    *api.custom_scans.lock().unwrap() = vec![
        custom("c1", "r1", VulnerabilityCounts::tally(0, 1, 0, 0)),
        custom("c2", "r2", VulnerabilityCounts::tally(0, 4, 0, 0)),
    ];
    *api.metrics.lock().unwrap() = SecurityMetrics {
        overall_score: Some(81.2),
        total_vulnerabilities: Some(6),
        critical_vulnerabilities: Some(1),
        files_scanned: Some(420),
        active_projects: Some(2),
    };
    api
}

#[tokio::test]
async fn test_refresh_publishes_a_snapshot_and_replaces_collections() {
    let api = Arc::new(seeded_api());
    let store = DashboardStore::new();
    let service = service(api.clone(), store.clone());

    tokio_test::assert_ok!(
        service
            .refresh(&RepoFilter::All, TimeRange::Month, false)
            .await
    );

    let snapshot = store.snapshot().await.expect("snapshot published");
    assert_eq!(snapshot.security_score, Some(81));
    assert_eq!(snapshot.total_vulnerabilities, 6);
    assert_eq!(snapshot.files_scanned, 420);
    assert!(!snapshot.recent_activity.is_empty());

    assert_eq!(store.repositories().await.len(), 2);
    assert_eq!(store.custom_scans().await.len(), 2);
    assert_eq!(store.user().await.unwrap().id, "u1");
    assert_eq!(store.last_error().await, None);
}

#[tokio::test]
async fn test_failed_fetch_retains_the_previous_snapshot() {
    let api = Arc::new(seeded_api());
    let store = DashboardStore::new();
    let service = service(api.clone(), store.clone());

    service
        .refresh(&RepoFilter::All, TimeRange::Month, false)
        .await
        .unwrap();
    let before = store.snapshot().await.unwrap();
    let repos_before = store.repositories().await;

    // Backend data changes, but the metrics read now fails: the cycle must
    // abort with no partial update.
    api.repositories.lock().unwrap().push(repo("r3"));
    api.fail_metrics.store(true, Ordering::SeqCst);

    tokio_test::assert_err!(
        service
            .refresh(&RepoFilter::All, TimeRange::Month, true)
            .await
    );

    assert_eq!(store.snapshot().await.unwrap(), before);
    assert_eq!(store.repositories().await, repos_before);
    let message = store.last_error().await.expect("error surfaced");
    assert!(message.contains("503"));

    // A later successful forced refresh recovers and clears the error.
    api.fail_metrics.store(false, Ordering::SeqCst);
    service
        .refresh(&RepoFilter::All, TimeRange::Month, true)
        .await
        .unwrap();
    assert_eq!(store.repositories().await.len(), 3);
    assert_eq!(store.last_error().await, None);
}

#[tokio::test]
async fn test_selecting_a_repository_scopes_the_snapshot() {
    let api = Arc::new(seeded_api());
    *api.metrics.lock().unwrap() = SecurityMetrics::default();
    let store = DashboardStore::new();
    let service = service(api.clone(), store.clone());

    service
        .refresh(&RepoFilter::One("r1".to_string()), TimeRange::Week, false)
        .await
        .unwrap();

    let snapshot = store.snapshot().await.unwrap();
    // r2's running scan and c2's custom findings are out of scope.
    assert!(snapshot
        .recent_activity
        .iter()
        .all(|entry| !entry.key.contains("-r2-")));
    assert_eq!(
        snapshot
            .vulnerability_types
            .iter()
            .find(|e| e.label == "Custom Rule - High")
            .map(|e| e.count),
        Some(1)
    );
    // Both collections are still fetched unscoped for later re-filtering.
    assert_eq!(store.repositories().await.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_overlapping_refresh_suppressed_unless_forced() {
    let api = Arc::new(seeded_api());
    *api.user_delay.lock().unwrap() = Some(Duration::from_secs(10));

    let store = DashboardStore::new();
    let service = service(api.clone(), store.clone());

    let in_flight = {
        let service = service.clone();
        tokio::spawn(async move {
            service
                .refresh(&RepoFilter::All, TimeRange::Month, false)
                .await
        })
    };
    // Let the first cycle issue its reads and park on the slow one.
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(api.repo_calls(), 1);

    // A second non-forced cycle while one is outstanding is suppressed:
    // it returns without issuing any fetch.
    tokio_test::assert_ok!(
        service
            .refresh(&RepoFilter::All, TimeRange::Month, false)
            .await
    );
    assert_eq!(api.repo_calls(), 1);

    // A forced cycle bypasses the guard and fetches again.
    tokio_test::assert_ok!(
        service
            .refresh(&RepoFilter::All, TimeRange::Month, true)
            .await
    );
    assert_eq!(api.repo_calls(), 2);

    tokio_test::assert_ok!(in_flight.await.unwrap());
    assert!(store.snapshot().await.is_some());
}

#[tokio::test]
async fn test_teardown_discards_in_flight_results() {
    let api = Arc::new(seeded_api());
    let store = DashboardStore::new();
    let service = service(api.clone(), store.clone());

    service.teardown().await;
    service
        .refresh(&RepoFilter::All, TimeRange::Month, false)
        .await
        .unwrap();

    assert_eq!(store.snapshot().await, None);
    assert!(store.repositories().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_start_scan_polls_to_completion() {
    let api = Arc::new(seeded_api());
    *api.next_scan.lock().unwrap() = Some(scan("s9", "r1", ScanStatus::Running));
    api.queue_update(common::running_update("s9", "r1"));
    api.queue_update(common::completed_update(
        "s9",
        "r1",
        VulnerabilityCounts::default(),
        Some(95),
    ));

    let store = DashboardStore::new();
    let service = service(api.clone(), store.clone());
    service
        .refresh(&RepoFilter::All, TimeRange::Month, false)
        .await
        .unwrap();

    let started = service.start_scan("r1").await.unwrap();
    assert_eq!(started.id, "s9");
    assert!(store.is_scanning("r1").await);
    assert_eq!(store.repository("r1").await.unwrap().status, RepoStatus::Scanning);

    tokio::time::sleep(Duration::from_secs(30)).await;

    assert!(!store.is_scanning("r1").await);
    let finished = store.repository("r1").await.unwrap();
    assert_eq!(finished.status, RepoStatus::Completed);
    assert_eq!(finished.security_score, Some(95));
    assert_eq!(service.tracked_scans().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_scan_cancels_the_polling_loop() {
    let api = Arc::new(seeded_api());
    *api.next_scan.lock().unwrap() = Some(scan("s9", "r1", ScanStatus::Running));
    api.set_steady(common::running_update("s9", "r1"));

    let store = DashboardStore::new();
    let service = service(api.clone(), store.clone());
    service
        .refresh(&RepoFilter::All, TimeRange::Month, false)
        .await
        .unwrap();

    service.start_scan("r1").await.unwrap();
    tokio::time::sleep(Duration::from_secs(7)).await;
    assert!(service.is_tracking("s9").await);

    service.stop_scan("s9").await.unwrap();
    assert!(!service.is_tracking("s9").await);
    assert!(!store.is_scanning("r1").await);

    let calls = api.status_calls();
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(api.status_calls(), calls);
}
