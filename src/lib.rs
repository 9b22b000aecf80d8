pub mod aggregator;
pub mod api;
pub mod config;
pub mod errors;
pub mod models;
pub mod poller;
pub mod store;

pub use aggregator::{build_snapshot, DashboardService};
pub use api::{HttpScanApi, ScanApi};
pub use config::DashboardConfig;
pub use poller::{PollerSettings, ScanPoller};
pub use store::DashboardStore;
