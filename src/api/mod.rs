//! REST backend seam
//!
//! The dashboard core never talks to `reqwest` directly; everything goes
//! through the [`ScanApi`] trait so the poller and the aggregator can be
//! driven by an in-memory implementation in tests. [`HttpScanApi`] is the
//! production implementation.

pub mod http;

pub use http::HttpScanApi;

use async_trait::async_trait;

use crate::errors::ApiResult;
use crate::models::{
    CustomScan, RepoFilter, Repository, Scan, ScanUpdate, SecurityMetrics, TimeRange, UserAccount,
};

/// Read and scan-lifecycle operations against the scanning backend.
///
/// All requests carry a bearer token; a missing token is a fatal
/// precondition surfaced as [`crate::errors::ApiError::MissingToken`]
/// before any request is issued.
#[async_trait]
pub trait ScanApi: Send + Sync {
    /// Current account.
    async fn current_user(&self) -> ApiResult<UserAccount>;

    /// Tracked repositories, optionally restricted to one id.
    async fn repositories(&self, filter: &RepoFilter) -> ApiResult<Vec<Repository>>;

    /// Custom scans, optionally restricted to one repository id.
    async fn custom_scans(&self, filter: &RepoFilter) -> ApiResult<Vec<CustomScan>>;

    /// Aggregated security metrics, time-filtered server-side.
    async fn security_metrics(
        &self,
        filter: &RepoFilter,
        range: TimeRange,
    ) -> ApiResult<SecurityMetrics>;

    /// Kick off a scan for a repository; returns the created scan.
    async fn start_scan(&self, repository_id: &str) -> ApiResult<Scan>;

    /// Ask the backend to stop a running scan.
    async fn stop_scan(&self, scan_id: &str) -> ApiResult<()>;

    /// Poll target: current state of one scan.
    async fn scan_status(&self, scan_id: &str) -> ApiResult<ScanUpdate>;
}
