//! `workdeck`: print the first page of every linked email's workspaces.
//!
//! The session comes from `WORKDECK_ACCESS_TOKEN` and `WORKDECK_LINKED_EMAILS`.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use workdeck_lib::api::HttpBackend;
use workdeck_lib::cache::MemoryQueryCache;
use workdeck_lib::config::{apply_env_overrides, load_config, load_config_from};
use workdeck_lib::pagination::{FilterMode, SortDirection, SortKey};
use workdeck_lib::registry::{session_from_env, StaticIdentity};
use workdeck_lib::reminders::SystemClock;
use workdeck_lib::{logging, Dashboard};

#[derive(Parser)]
#[command(name = "workdeck", version, about = "Workspaces across every linked email")]
struct Cli {
    /// Config file (defaults to ~/.workdeck/config.json)
    #[arg(long)]
    config: Option<PathBuf>,
    /// Filter mode: type, email or name
    #[arg(long, default_value = "name")]
    filter_mode: FilterMode,
    /// Filter value for the selected mode
    #[arg(long, default_value = "")]
    filter: String,
    /// Sort key: name or created_at
    #[arg(long)]
    sort: Option<SortKey>,
    /// Sort descending
    #[arg(long, default_value_t = false)]
    desc: bool,
    /// Re-fetch emails whose first fetch failed before printing
    #[arg(long, default_value_t = false)]
    retry_failed: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            let mut config = load_config_from(path)
                .with_context(|| format!("loading config from {}", path.display()))?;
            apply_env_overrides(&mut config, |key| std::env::var(key).ok());
            config
        }
        None => load_config().context("loading config")?,
    };
    logging::init(&config.log_level);

    let session = session_from_env(|key| std::env::var(key).ok())
        .context("WORKDECK_ACCESS_TOKEN is not set")?;
    let backend = Arc::new(
        HttpBackend::new(&config, &session.access_token).context("building HTTP client")?,
    );
    let identity = Arc::new(StaticIdentity::new(Some(session)));
    let dashboard = Dashboard::new(
        backend,
        identity,
        Arc::new(MemoryQueryCache::new()),
        Arc::new(SystemClock),
    );

    {
        let mut engine = dashboard.pagination();
        engine.set_mode(cli.filter_mode);
        engine.set_filter(&cli.filter);
        let direction = if cli.desc {
            SortDirection::Desc
        } else {
            SortDirection::Asc
        };
        engine.set_sort(cli.sort, direction);
    }

    let mut snapshot = dashboard.refresh().await;
    if cli.retry_failed && !snapshot.failed_emails().is_empty() {
        snapshot = dashboard.retry_failed().await;
    }
    for email in snapshot.failed_emails() {
        log::warn!("Workspaces for {} could not be loaded", email);
    }
    for anomaly in snapshot.anomalies() {
        log::warn!(
            "Workspace {} appears under {} linked emails",
            anomaly.workspace_id,
            anomaly.emails.len()
        );
    }

    let groups = dashboard.render_groups();
    println!("{}", serde_json::to_string_pretty(&groups)?);
    Ok(())
}
