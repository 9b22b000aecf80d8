//! Error types for the dashboard core
//!
//! Every fetch-level failure is caught at the boundary of the component
//! that issued it and converted to local error state; nothing in this
//! crate panics on a backend failure.
//!
//! # Error Categories
//!
//! - **ApiError**: backend communication (credentials, transport, HTTP
//!   status, payload decoding)
//! - **ConfigError**: configuration loading and token resolution

pub mod api;
pub mod config;

pub use api::ApiError;
pub use config::ConfigError;

/// Result type alias for backend operations
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;
