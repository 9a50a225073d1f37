use anyhow::Result;
use chrono::Utc;
use clap::Parser;
use reqwest::Url;
use std::path::PathBuf;
use tracing::info;

use watchlist_notifier::config;
use watchlist_notifier::db;
use watchlist_notifier::job::{run_daily_check, RunContext};
use watchlist_notifier::push::FcmClient;
use watchlist_notifier::tmdb::TmdbClient;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Refresh watchlist availability once and notify users of new streaming options"
)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/notifier.db", cfg.app.data_dir));

    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    let provider = match &cfg.tmdb.base_url {
        Some(base) => TmdbClient::with_base_url(cfg.tmdb.api_key.clone(), Url::parse(base)?),
        None => TmdbClient::new(cfg.tmdb.api_key.clone()),
    };
    let push = match &cfg.push.endpoint {
        Some(endpoint) => {
            FcmClient::with_endpoint(cfg.push.server_key.clone(), Url::parse(endpoint)?)
        }
        None => FcmClient::new(cfg.push.server_key.clone()),
    };

    let ctx = RunContext {
        pool: &pool,
        provider: &provider,
        push: &push,
        today: Utc::now().date_naive(),
        min_watchlist_size: cfg.app.min_watchlist_size,
    };

    let summary = run_daily_check(&ctx).await?;
    info!(
        success = summary.success,
        notifications_sent = summary.notifications_sent,
        "run finished"
    );
    Ok(())
}
