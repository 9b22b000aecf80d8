use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

use scanboard::aggregator::DashboardService;
use scanboard::api::HttpScanApi;
use scanboard::config::DashboardConfig;
use scanboard::models::{RepoFilter, TimeRange};
use scanboard::poller::PollerSettings;
use scanboard::store::DashboardStore;

#[derive(Parser)]
#[clap(author, version, about)]
struct Cli {
    #[clap(short, long, global = true)]
    log_level: Option<String>,
    /// Config file (defaults to scanboard.toml when present)
    #[clap(short, long, global = true)]
    config: Option<PathBuf>,
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch and print the current dashboard snapshot
    Snapshot {
        /// Repository id, or "all"
        #[clap(short, long, default_value = "all")]
        repo: String,
        /// Time range: 1d, 7d, 30d, 180d, 1y, all (default from config,
        /// else 30d)
        #[clap(short = 't', long)]
        range: Option<String>,
    },
    /// List tracked repositories
    Repos,
    /// Start a scan and watch it to completion
    Watch {
        /// Repository id to scan
        #[clap(short, long)]
        repo: String,
    },
}

fn init_logging(log_level: Option<&str>) {
    let filter = match log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    let config = DashboardConfig::load(cli.config.as_deref())?;
    let api = Arc::new(HttpScanApi::from_config(&config)?);
    let store = DashboardStore::new();
    let settings = PollerSettings {
        interval: config.poll_interval(),
        ceiling: config.poll_ceiling(),
    };
    let service = DashboardService::with_poller_settings(api, store.clone(), settings);

    match cli.command {
        Commands::Snapshot { repo, range } => {
            let filter = RepoFilter::from(repo.as_str());
            let range: TimeRange = match range {
                Some(raw) => raw.parse().map_err(|_| {
                    anyhow!("invalid time range; expected 1d, 7d, 30d, 180d, 1y or all")
                })?,
                None => config.time_range.unwrap_or(TimeRange::Month),
            };
            service.refresh(&filter, range, true).await?;
            let snapshot = store
                .snapshot()
                .await
                .ok_or_else(|| anyhow!("no snapshot produced"))?;
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        Commands::Repos => {
            service.refresh(&RepoFilter::All, TimeRange::Month, true).await?;
            for repo in store.repositories().await {
                println!(
                    "{}\t{}/{}\t{:?}\tscore={}",
                    repo.id,
                    repo.owner,
                    repo.name,
                    repo.status,
                    repo.security_score
                        .map(|s| s.to_string())
                        .unwrap_or_else(|| "-".to_string())
                );
            }
        }
        Commands::Watch { repo } => {
            service.refresh(&RepoFilter::All, TimeRange::Month, true).await?;
            let scan = service.start_scan(&repo).await?;
            info!("Watching scan {} for repository {}", scan.id, repo);
            while store.is_scanning(&repo).await {
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            match store.repository(&repo).await {
                Some(repo) => println!("{}", serde_json::to_string_pretty(&repo)?),
                None => println!("repository {} no longer tracked", repo),
            }
            service.teardown().await;
        }
    }

    Ok(())
}
