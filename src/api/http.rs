//! HTTP implementation of the backend seam.
//!
//! Wire payloads are duck-shaped: every field is optional and list
//! endpoints answer either a bare array or a wrapped `{"items": [...]}`
//! object. This module is the normalization boundary: raw shapes are
//! converted to the canonical `models` types here and nowhere else.
//! Absent fields mean "no value", not an error; only a payload missing
//! its identity is malformed.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;
use url::Url;

use super::ScanApi;
use crate::config::DashboardConfig;
use crate::errors::{ApiError, ApiResult};
use crate::models::{
    round_score, CustomScan, RepoFilter, Repository, RepoStatus, Scan, ScanStatus, ScanUpdate,
    SecurityMetrics, TimeRange, UserAccount, VulnerabilityCounts,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// `ScanApi` over the product's REST backend.
pub struct HttpScanApi {
    client: reqwest::Client,
    base: Url,
    token: String,
}

impl HttpScanApi {
    pub fn new(base_url: &str, token: impl Into<String>) -> ApiResult<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(ApiError::MissingToken);
        }
        let base = Url::parse(base_url)
            .map_err(|err| ApiError::BaseUrl(format!("{}: {}", base_url, err)))?;
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base,
            token,
        })
    }

    pub fn from_config(config: &DashboardConfig) -> ApiResult<Self> {
        let token = config
            .resolve_token()
            .map_err(|_| ApiError::MissingToken)?;
        Self::new(&config.base_url, token)
    }

    fn endpoint(&self, path: &str) -> ApiResult<Url> {
        self.base
            .join(path)
            .map_err(|err| ApiError::BaseUrl(format!("{}: {}", path, err)))
    }

    async fn get_json<T: DeserializeOwned>(&self, mut url: Url, query: &[(&str, &str)]) -> ApiResult<T> {
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query.iter().copied());
        }
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn post_json<T: DeserializeOwned>(&self, url: Url) -> ApiResult<T> {
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> ApiResult<T> {
        let status = response.status();
        if !status.is_success() {
            let message = match response.text().await {
                Ok(body) if !body.is_empty() => body,
                _ => status.to_string(),
            };
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|err| ApiError::Decode(err.to_string()))
    }
}

#[async_trait]
impl ScanApi for HttpScanApi {
    async fn current_user(&self) -> ApiResult<UserAccount> {
        let raw: RawUser = self.get_json(self.endpoint("api/v1/user")?, &[]).await?;
        raw.normalize()
    }

    async fn repositories(&self, filter: &RepoFilter) -> ApiResult<Vec<Repository>> {
        let mut query = Vec::new();
        if let Some(id) = filter.as_param() {
            query.push(("repository_id", id));
        }
        let raw: ListPayload<RawRepository> = self
            .get_json(self.endpoint("api/v1/repositories")?, &query)
            .await?;
        raw.into_items()
            .into_iter()
            .map(RawRepository::normalize)
            .collect()
    }

    async fn custom_scans(&self, filter: &RepoFilter) -> ApiResult<Vec<CustomScan>> {
        let mut query = Vec::new();
        if let Some(id) = filter.as_param() {
            query.push(("repository_id", id));
        }
        let raw: ListPayload<RawCustomScan> = self
            .get_json(self.endpoint("api/v1/custom-scans")?, &query)
            .await?;
        raw.into_items()
            .into_iter()
            .map(RawCustomScan::normalize)
            .collect()
    }

    async fn security_metrics(
        &self,
        filter: &RepoFilter,
        range: TimeRange,
    ) -> ApiResult<SecurityMetrics> {
        let mut query = vec![("range", range.as_str())];
        if let Some(id) = filter.as_param() {
            query.push(("repository_id", id));
        }
        let raw: RawMetrics = self
            .get_json(self.endpoint("api/v1/metrics/security")?, &query)
            .await?;
        Ok(raw.normalize())
    }

    async fn start_scan(&self, repository_id: &str) -> ApiResult<Scan> {
        let path = format!("api/v1/repositories/{}/scans", repository_id);
        let raw: RawScan = self.post_json(self.endpoint(&path)?).await?;
        raw.normalize(Some(repository_id))
    }

    async fn stop_scan(&self, scan_id: &str) -> ApiResult<()> {
        let path = format!("api/v1/scans/{}/stop", scan_id);
        let _: serde_json::Value = self.post_json(self.endpoint(&path)?).await?;
        Ok(())
    }

    async fn scan_status(&self, scan_id: &str) -> ApiResult<ScanUpdate> {
        let path = format!("api/v1/scans/{}", scan_id);
        let raw: RawScan = self.get_json(self.endpoint(&path)?, &[]).await?;
        raw.into_update()
    }
}

/// List endpoints answer either a bare array or a wrapped object.
#[derive(Deserialize)]
#[serde(untagged)]
enum ListPayload<T> {
    Wrapped { items: Vec<T> },
    Bare(Vec<T>),
}

impl<T> ListPayload<T> {
    fn into_items(self) -> Vec<T> {
        match self {
            ListPayload::Wrapped { items } => items,
            ListPayload::Bare(items) => items,
        }
    }
}

#[derive(Deserialize)]
struct RawUser {
    id: Option<String>,
    email: Option<String>,
    name: Option<String>,
}

impl RawUser {
    fn normalize(self) -> ApiResult<UserAccount> {
        let id = self
            .id
            .ok_or_else(|| ApiError::Decode("user without id".to_string()))?;
        Ok(UserAccount {
            id,
            email: self.email.unwrap_or_default(),
            name: self.name,
        })
    }
}

#[derive(Deserialize)]
struct RawScan {
    id: Option<String>,
    repository_id: Option<String>,
    status: Option<String>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    duration_seconds: Option<i64>,
    critical: Option<u32>,
    high: Option<u32>,
    medium: Option<u32>,
    low: Option<u32>,
    total: Option<u32>,
    security_score: Option<f64>,
    code_coverage: Option<f64>,
}

impl RawScan {
    /// Counts are "supplied" only when at least one severity field came
    /// over the wire; a response that omits them all must not zero out
    /// previously merged counts.
    fn supplied_counts(&self) -> Option<VulnerabilityCounts> {
        if self.critical.is_none()
            && self.high.is_none()
            && self.medium.is_none()
            && self.low.is_none()
            && self.total.is_none()
        {
            return None;
        }
        let critical = self.critical.unwrap_or(0);
        let high = self.high.unwrap_or(0);
        let medium = self.medium.unwrap_or(0);
        let low = self.low.unwrap_or(0);
        Some(VulnerabilityCounts {
            critical,
            high,
            medium,
            low,
            total: self.total.unwrap_or(critical + high + medium + low),
        })
    }

    fn parsed_status(&self) -> ScanStatus {
        match self.status.as_deref() {
            None => ScanStatus::Pending,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!("Unknown scan status '{}', treating as pending", raw);
                ScanStatus::Pending
            }),
        }
    }

    fn normalize(self, fallback_repository: Option<&str>) -> ApiResult<Scan> {
        let id = self
            .id
            .clone()
            .ok_or_else(|| ApiError::Decode("scan without id".to_string()))?;
        let repository_id = self
            .repository_id
            .clone()
            .or_else(|| fallback_repository.map(str::to_string))
            .ok_or_else(|| ApiError::Decode(format!("scan {} without repository id", id)))?;
        let started_at = self
            .started_at
            .ok_or_else(|| ApiError::Decode(format!("scan {} without start time", id)))?;
        Ok(Scan {
            id,
            repository_id,
            status: self.parsed_status(),
            started_at,
            completed_at: self.completed_at,
            duration_seconds: self.duration_seconds,
            counts: self.supplied_counts().unwrap_or_default(),
            security_score: self.security_score.map(round_score),
            code_coverage: self.code_coverage,
        })
    }

    fn into_update(self) -> ApiResult<ScanUpdate> {
        let counts = self.supplied_counts();
        let security_score = self.security_score.map(round_score);
        let code_coverage = self.code_coverage;
        let scan = self.normalize(None)?;
        Ok(ScanUpdate {
            scan,
            counts,
            security_score,
            code_coverage,
        })
    }
}

#[derive(Deserialize)]
struct RawRepository {
    id: Option<String>,
    name: Option<String>,
    owner: Option<String>,
    status: Option<String>,
    latest_scan: Option<RawScan>,
    critical: Option<u32>,
    high: Option<u32>,
    medium: Option<u32>,
    low: Option<u32>,
    total: Option<u32>,
    security_score: Option<f64>,
    code_coverage: Option<f64>,
}

impl RawRepository {
    fn normalize(self) -> ApiResult<Repository> {
        let id = self
            .id
            .ok_or_else(|| ApiError::Decode("repository without id".to_string()))?;
        let latest_scan = self
            .latest_scan
            .map(|raw| raw.normalize(Some(&id)))
            .transpose()?;

        // Repository status is always derived from the latest scan; the
        // wire status only matters when there is no scan yet.
        let status = match &latest_scan {
            Some(scan) => RepoStatus::from(scan.status),
            None => match self.status.as_deref() {
                Some("scanning") => RepoStatus::Scanning,
                Some("completed") => RepoStatus::Completed,
                Some("failed") => RepoStatus::Failed,
                _ => RepoStatus::Pending,
            },
        };

        let counts = if self.critical.is_none()
            && self.high.is_none()
            && self.medium.is_none()
            && self.low.is_none()
            && self.total.is_none()
        {
            None
        } else {
            let critical = self.critical.unwrap_or(0);
            let high = self.high.unwrap_or(0);
            let medium = self.medium.unwrap_or(0);
            let low = self.low.unwrap_or(0);
            Some(VulnerabilityCounts {
                critical,
                high,
                medium,
                low,
                total: self.total.unwrap_or(critical + high + medium + low),
            })
        };

        Ok(Repository {
            name: self.name.unwrap_or_else(|| id.clone()),
            owner: self.owner.unwrap_or_default(),
            status,
            latest_scan,
            counts,
            security_score: self.security_score.map(round_score),
            code_coverage: self.code_coverage,
            id,
        })
    }
}

#[derive(Deserialize)]
struct RawCustomScan {
    id: Option<String>,
    repository_id: Option<String>,
    name: Option<String>,
    status: Option<String>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    critical: Option<u32>,
    high: Option<u32>,
    medium: Option<u32>,
    low: Option<u32>,
    total: Option<u32>,
    security_score: Option<f64>,
}

impl RawCustomScan {
    fn normalize(self) -> ApiResult<CustomScan> {
        let id = self
            .id
            .ok_or_else(|| ApiError::Decode("custom scan without id".to_string()))?;
        let repository_id = self
            .repository_id
            .ok_or_else(|| ApiError::Decode(format!("custom scan {} without repository id", id)))?;
        let started_at = self
            .started_at
            .ok_or_else(|| ApiError::Decode(format!("custom scan {} without start time", id)))?;
        let status = match self.status.as_deref() {
            None => ScanStatus::Pending,
            Some(raw) => raw.parse().unwrap_or(ScanStatus::Pending),
        };
        let critical = self.critical.unwrap_or(0);
        let high = self.high.unwrap_or(0);
        let medium = self.medium.unwrap_or(0);
        let low = self.low.unwrap_or(0);
        Ok(CustomScan {
            name: self.name.unwrap_or_else(|| format!("Custom scan {}", id)),
            repository_id,
            status,
            started_at,
            completed_at: self.completed_at,
            counts: VulnerabilityCounts {
                critical,
                high,
                medium,
                low,
                total: self.total.unwrap_or(critical + high + medium + low),
            },
            security_score: self.security_score.map(round_score),
            id,
        })
    }
}

#[derive(Deserialize)]
struct RawMetrics {
    #[serde(alias = "security_score")]
    overall_score: Option<f64>,
    #[serde(alias = "total")]
    total_vulnerabilities: Option<u64>,
    #[serde(alias = "critical")]
    critical_vulnerabilities: Option<u64>,
    files_scanned: Option<u64>,
    active_projects: Option<u64>,
}

impl RawMetrics {
    fn normalize(self) -> SecurityMetrics {
        SecurityMetrics {
            overall_score: self.overall_score,
            total_vulnerabilities: self.total_vulnerabilities,
            critical_vulnerabilities: self.critical_vulnerabilities,
            files_scanned: self.files_scanned,
            active_projects: self.active_projects,
        }
    }
}
