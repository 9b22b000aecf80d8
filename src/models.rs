use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle of a single scan execution.
///
/// Terminal states are final: once a scan reports completed, failed or
/// stopped, no later status may move it back to pending/running.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl ScanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ScanStatus::Completed | ScanStatus::Failed | ScanStatus::Stopped
        )
    }
}

impl fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
            ScanStatus::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for ScanStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ScanStatus::Pending),
            "running" => Ok(ScanStatus::Running),
            "completed" => Ok(ScanStatus::Completed),
            "failed" => Ok(ScanStatus::Failed),
            "stopped" => Ok(ScanStatus::Stopped),
            other => Err(format!("unknown scan status '{}'", other)),
        }
    }
}

/// Repository-level status, always derived from the latest scan.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RepoStatus {
    Pending,
    Scanning,
    Completed,
    Failed,
}

impl From<ScanStatus> for RepoStatus {
    fn from(status: ScanStatus) -> Self {
        match status {
            ScanStatus::Running => RepoStatus::Scanning,
            ScanStatus::Completed => RepoStatus::Completed,
            ScanStatus::Failed => RepoStatus::Failed,
            ScanStatus::Pending | ScanStatus::Stopped => RepoStatus::Pending,
        }
    }
}

/// Per-severity vulnerability tallies.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct VulnerabilityCounts {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
    pub total: u32,
}

impl VulnerabilityCounts {
    pub fn tally(critical: u32, high: u32, medium: u32, low: u32) -> Self {
        Self {
            critical,
            high,
            medium,
            low,
            total: critical + high + medium + low,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.total == 0
    }
}

/// One execution of vulnerability analysis against a repository.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Scan {
    pub id: String,
    pub repository_id: String,
    pub status: ScanStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<i64>,
    pub counts: VulnerabilityCounts,
    pub security_score: Option<u32>,
    pub code_coverage: Option<f64>,
}

impl Scan {
    /// The time this scan should be reported under: completion if it has
    /// one, otherwise the start time.
    pub fn event_time(&self) -> DateTime<Utc> {
        self.completed_at.unwrap_or(self.started_at)
    }
}

/// A scan addressed independently of its repository; the `repository_id`
/// is a lookup key only, never ownership.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CustomScan {
    pub id: String,
    pub repository_id: String,
    pub name: String,
    pub status: ScanStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub counts: VulnerabilityCounts,
    pub security_score: Option<u32>,
}

impl CustomScan {
    pub fn event_time(&self) -> DateTime<Utc> {
        self.completed_at.unwrap_or(self.started_at)
    }
}

/// A tracked source-control project.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Repository {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub status: RepoStatus,
    pub latest_scan: Option<Scan>,
    pub counts: Option<VulnerabilityCounts>,
    pub security_score: Option<u32>,
    pub code_coverage: Option<f64>,
}

/// One poll response, normalized at the API boundary. The scan itself is
/// always present; the repository-level rollups are only overwritten when
/// the response carried them.
#[derive(Clone, Debug, PartialEq)]
pub struct ScanUpdate {
    pub scan: Scan,
    pub counts: Option<VulnerabilityCounts>,
    pub security_score: Option<u32>,
    pub code_coverage: Option<f64>,
}

impl ScanUpdate {
    pub fn new(scan: Scan) -> Self {
        Self {
            scan,
            counts: None,
            security_score: None,
            code_coverage: None,
        }
    }
}

/// Time window accepted by the metrics endpoint.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimeRange {
    #[serde(rename = "1d")]
    Day,
    #[serde(rename = "7d")]
    Week,
    #[serde(rename = "30d")]
    Month,
    #[serde(rename = "180d")]
    HalfYear,
    #[serde(rename = "1y")]
    Year,
    #[serde(rename = "all")]
    All,
}

impl TimeRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRange::Day => "1d",
            TimeRange::Week => "7d",
            TimeRange::Month => "30d",
            TimeRange::HalfYear => "180d",
            TimeRange::Year => "1y",
            TimeRange::All => "all",
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TimeRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1d" => Ok(TimeRange::Day),
            "7d" => Ok(TimeRange::Week),
            "30d" => Ok(TimeRange::Month),
            "180d" => Ok(TimeRange::HalfYear),
            "1y" => Ok(TimeRange::Year),
            "all" => Ok(TimeRange::All),
            other => Err(format!("unknown time range '{}'", other)),
        }
    }
}

/// Selected-repository scope for aggregation and API calls.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RepoFilter {
    All,
    One(String),
}

impl RepoFilter {
    pub fn matches(&self, repository_id: &str) -> bool {
        match self {
            RepoFilter::All => true,
            RepoFilter::One(id) => id == repository_id,
        }
    }

    /// Query-parameter form; `All` sends no filter.
    pub fn as_param(&self) -> Option<&str> {
        match self {
            RepoFilter::All => None,
            RepoFilter::One(id) => Some(id),
        }
    }
}

impl From<&str> for RepoFilter {
    fn from(s: &str) -> Self {
        if s == "all" {
            RepoFilter::All
        } else {
            RepoFilter::One(s.to_string())
        }
    }
}

/// Aggregated security metrics payload, time-filtered server-side.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct SecurityMetrics {
    pub overall_score: Option<f64>,
    pub total_vulnerabilities: Option<u64>,
    pub critical_vulnerabilities: Option<u64>,
    pub files_scanned: Option<u64>,
    pub active_projects: Option<u64>,
}

/// Current-user payload.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct UserAccount {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
}

/// Severity tag on an activity entry.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActivityLevel {
    Info,
    Success,
    Warning,
}

/// One row of the dashboard's recent-activity feed.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ActivityEntry {
    /// Synthetic list-identity key; unique within one snapshot.
    pub key: String,
    pub label: String,
    pub occurred_at: DateTime<Utc>,
    /// Localized hour:minute, display only.
    pub display_time: String,
    pub level: ActivityLevel,
}

/// One row of the vulnerability-type breakdown.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct VulnerabilityTypeEntry {
    pub label: String,
    pub count: u64,
}

/// The materialized dashboard view, fully recomputed on every refresh.
///
/// `security_score` is nullable on purpose: `None` means "no data yet"
/// (an account with nothing imported), which is distinct from a computed
/// score of zero.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct DashboardSnapshot {
    pub security_score: Option<u32>,
    pub total_vulnerabilities: u64,
    pub critical_vulnerabilities: u64,
    pub files_scanned: u64,
    pub active_projects: u64,
    pub scans_today: u64,
    pub recent_activity: Vec<ActivityEntry>,
    pub vulnerability_types: Vec<VulnerabilityTypeEntry>,
}

/// Round a wire-level score into the 0-100 integer scale used everywhere
/// in the snapshot.
pub fn round_score(value: f64) -> u32 {
    value.round().clamp(0.0, 100.0) as u32
}

/// Localized hour:minute display form of a timestamp.
pub fn display_clock_time(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(ScanStatus::Completed.is_terminal());
        assert!(ScanStatus::Failed.is_terminal());
        assert!(ScanStatus::Stopped.is_terminal());
        assert!(!ScanStatus::Pending.is_terminal());
        assert!(!ScanStatus::Running.is_terminal());
    }

    #[test]
    fn test_repo_status_derivation() {
        assert_eq!(RepoStatus::from(ScanStatus::Running), RepoStatus::Scanning);
        assert_eq!(
            RepoStatus::from(ScanStatus::Completed),
            RepoStatus::Completed
        );
        assert_eq!(RepoStatus::from(ScanStatus::Failed), RepoStatus::Failed);
        assert_eq!(RepoStatus::from(ScanStatus::Pending), RepoStatus::Pending);
        assert_eq!(RepoStatus::from(ScanStatus::Stopped), RepoStatus::Pending);
    }

    #[test]
    fn test_time_range_round_trip() {
        for range in [
            TimeRange::Day,
            TimeRange::Week,
            TimeRange::Month,
            TimeRange::HalfYear,
            TimeRange::Year,
            TimeRange::All,
        ] {
            assert_eq!(range.as_str().parse::<TimeRange>(), Ok(range));
        }
        assert!("2w".parse::<TimeRange>().is_err());
    }

    #[test]
    fn test_counts_tally() {
        let counts = VulnerabilityCounts::tally(1, 2, 3, 4);
        assert_eq!(counts.total, 10);
        assert!(!counts.is_clean());
        assert!(VulnerabilityCounts::default().is_clean());
    }

    #[test]
    fn test_repo_filter_matching() {
        let all = RepoFilter::from("all");
        assert_eq!(all, RepoFilter::All);
        assert!(all.matches("anything"));
        assert_eq!(all.as_param(), None);

        let one = RepoFilter::from("repo-1");
        assert!(one.matches("repo-1"));
        assert!(!one.matches("repo-2"));
        assert_eq!(one.as_param(), Some("repo-1"));
    }

    #[test]
    fn test_scan_status_serializes_lowercase() {
        let json = serde_json::to_string(&ScanStatus::Running).unwrap();
        assert_eq!(json, "\"running\"");
        let parsed: ScanStatus = serde_json::from_str("\"stopped\"").unwrap();
        assert_eq!(parsed, ScanStatus::Stopped);
    }
}
