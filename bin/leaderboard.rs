//! # Leaderboard Driver
//!
//! Builds the pipeline from settings and prints the leaderboard as JSON.
//!
//! ## Usage
//!
//! ```bash
//! # one-shot
//! ALCHEMY_API_KEY=... cargo run --bin leaderboard -- --top 20
//!
//! # re-read every 30s until Ctrl+C (cache hits until the TTL expires)
//! cargo run --bin leaderboard -- --watch 30
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio::time::{interval, Duration, MissedTickBehavior};
use transfer_leaderboard::{
    leaderboard::{LeaderboardAssembler, LeaderboardResponse},
    leaderboard_cache::SystemClock,
    metrics,
    profile_enricher::RipProfileClient,
    settings::Settings,
    transfer_fetcher::AlchemyTransferSource,
};

#[derive(Debug, Parser)]
#[command(name = "leaderboard", about = "Rank wallets by collectible transfers received")]
struct Cli {
    /// Settings file (defaults to ./Leaderboard.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Only print the first N entries
    #[arg(long)]
    top: Option<usize>,

    /// Re-read the leaderboard every N seconds until Ctrl+C
    #[arg(long, value_name = "SECS")]
    watch: Option<u64>,

    /// Ignore the cache and recompute on the first read
    #[arg(long)]
    force: bool,
}

#[cfg(not(feature = "observability"))]
fn init_logging(settings: &Settings) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&settings.log.level))
        .init();
}

#[cfg(feature = "observability")]
fn init_logging(settings: &Settings) {
    use std::str::FromStr;
    use transfer_leaderboard::settings::LogFormat;

    let level = tracing::Level::from_str(&settings.log.level).unwrap_or(tracing::Level::INFO);
    match settings.log.format {
        LogFormat::Json => tracing_subscriber::fmt().json().with_max_level(level).init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_max_level(level).init(),
    }
}

#[cfg(feature = "observability")]
fn init_metrics(settings: &Settings) -> Result<()> {
    if !settings.metrics.enabled {
        return Ok(());
    }
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], settings.metrics.port))
        .install()
        .context("failed to install Prometheus exporter")?;
    metrics::describe_metrics();
    info!("Prometheus exporter listening on :{}", settings.metrics.port);
    Ok(())
}

#[cfg(not(feature = "observability"))]
fn init_metrics(_settings: &Settings) -> Result<()> {
    metrics::describe_metrics();
    Ok(())
}

fn print(response: &LeaderboardResponse, top: Option<usize>) -> Result<()> {
    let json = match top {
        Some(n) => {
            let mut truncated = serde_json::to_value(response)?;
            if let Some(entries) = truncated.get_mut("entries").and_then(|e| e.as_array_mut()) {
                entries.truncate(n);
            }
            serde_json::to_string_pretty(&truncated)?
        }
        None => serde_json::to_string_pretty(response)?,
    };
    println!("{}", json);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;
    init_logging(&settings);
    init_metrics(&settings)?;

    let source = AlchemyTransferSource::from_settings(&settings.ledger)?;
    let lookup = RipProfileClient::from_settings(&settings.enrichment)?;
    let assembler = LeaderboardAssembler::new(
        settings.leaderboard_config()?,
        Arc::new(source),
        Arc::new(lookup),
        Arc::new(SystemClock),
    );
    info!(
        "Leaderboard for contract {} from {} (ttl {}s)",
        assembler.config().contract_address,
        assembler.config().source_address,
        settings.cache.ttl_seconds
    );

    let first = if cli.force {
        assembler.refresh().await?
    } else {
        assembler.get_leaderboard().await?
    };
    print(&first, cli.top)?;

    let Some(secs) = cli.watch else {
        return Ok(());
    };

    let mut ticker = interval(Duration::from_secs(secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match assembler.get_leaderboard().await {
                    Ok(response) => {
                        info!(
                            "{} entries (served from cache: {})",
                            response.entries.len(),
                            response.served_from_cache
                        );
                        print(&response, cli.top)?;
                    }
                    // keep watching; the previous snapshot is still cached
                    Err(e) => error!("Leaderboard read failed: {}", e),
                }
            }
            _ = signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }
    Ok(())
}
