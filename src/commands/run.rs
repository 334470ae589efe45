//! Run command: the polling loop until Ctrl+C

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

use pattern_trader::execution::ExecutionMode;
use pattern_trader::{Config, StopHandle};

use super::{build_strategy, runtime, FeedKind};

pub fn run(config_path: String, feed: FeedKind, data_dir: Option<PathBuf>) -> Result<()> {
    dotenv::dotenv().ok();
    runtime()?.block_on(run_async(config_path, feed, data_dir))
}

/// Live orders are routed to the paper account built in `build_strategy`
fn live_mode_warning(config: &Config) -> String {
    format!(
        "LIVE MODE - orders go to the in-memory paper account ({:.2} {}), not a real exchange",
        config.exchange.paper_balance, config.exchange.quote_currency
    )
}

async fn run_async(config_path: String, feed: FeedKind, data_dir: Option<PathBuf>) -> Result<()> {
    let config = Config::from_file(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    let t = &config.trading;
    info!("=================================================================");
    info!("  PATTERN TRADER - {} MODE", t.execution_mode.to_string().to_uppercase());
    info!("=================================================================");
    info!("Symbol: {}", t.symbol);
    info!("Timeframes: {}", t.timeframes.join(", "));
    info!("Patterns: {:?}", t.allowed_patterns);
    info!("Risk per trade: {:.2}%", t.risk_pct * 100.0);
    info!("Poll interval: {}s", t.poll_interval_seconds);

    if t.execution_mode == ExecutionMode::Live {
        warn!("{}", live_mode_warning(&config));
        warn!("Press Ctrl+C within 10 seconds to abort...");

        for i in (1..=10).rev() {
            info!("Starting in {} seconds...", i);
            sleep(Duration::from_secs(1)).await;
        }
    }

    let mut strategy = build_strategy(config, feed, data_dir)?;

    let stop = StopHandle::new();
    let signal_stop = stop.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl+C, stopping after the current iteration...");
                signal_stop.stop();
            }
            Err(e) => {
                error!("Error setting up signal handler: {}", e);
            }
        }
    });

    strategy.run(stop).await?;

    let stats = strategy.risk_manager().statistics();
    info!(
        open_trades = stats.open_trades,
        closed_trades = stats.total_trades,
        total_pnl = %stats.total_pnl,
        "Session ended"
    );
    Ok(())
}
