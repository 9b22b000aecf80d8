//! Backend communication errors
//!
//! A missing credential is a fatal precondition: no fetch is attempted and
//! nothing retries automatically. Transport failures and non-success HTTP
//! responses are treated identically by callers (surface an error, keep
//! previous state). Absent response *fields* are never an error; only a
//! payload that cannot be decoded at all is.

use thiserror::Error;

/// Errors from talking to the scanning backend
#[derive(Error, Debug)]
pub enum ApiError {
    /// No bearer token available in configuration or local storage
    #[error("No API token configured")]
    MissingToken,

    /// Transport-level failure (connection, TLS, timeout)
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    /// Backend answered with a non-success status
    #[error("Backend returned {status}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Response body or status text
        message: String,
    },

    /// Response body could not be decoded into the expected shape
    #[error("Malformed response payload: {0}")]
    Decode(String),

    /// Base URL in configuration is not a valid URL
    #[error("Invalid base URL: {0}")]
    BaseUrl(String),
}

impl ApiError {
    /// Check if this failure means credentials are missing or rejected
    pub fn is_auth(&self) -> bool {
        matches!(
            self,
            ApiError::MissingToken | ApiError::Status { status: 401, .. }
        )
    }

    /// Check if this is a transport or HTTP-status failure, the two cases
    /// callers treat the same way
    pub fn is_fetch_failure(&self) -> bool {
        matches!(self, ApiError::Transport(_) | ApiError::Status { .. })
    }

    /// Get error code for surfaced UI messages
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::MissingToken => "MISSING_TOKEN",
            ApiError::Transport(_) => "TRANSPORT",
            ApiError::Status { .. } => "HTTP_STATUS",
            ApiError::Decode(_) => "DECODE",
            ApiError::BaseUrl(_) => "BAD_BASE_URL",
        }
    }
}
