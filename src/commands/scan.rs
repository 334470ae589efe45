//! Scan command: one detection pass per timeframe over CSV data, no orders

use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{info, warn};

use pattern_trader::Config;

use super::{build_strategy, runtime, FeedKind};

pub fn run(config_path: String, data_dir: PathBuf) -> Result<()> {
    let config = Config::from_file(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path))?;

    runtime()?.block_on(async move {
        let timeframes = config.trading.timeframes.clone();
        let symbol = config.trading.symbol.clone();
        let strategy = build_strategy(config, FeedKind::Csv, Some(data_dir))?;

        for timeframe in &timeframes {
            let scan = match strategy.scan_timeframe(timeframe).await {
                Ok(scan) => scan,
                Err(e) => {
                    warn!(timeframe = %timeframe, error = %e, "Scan failed");
                    continue;
                }
            };

            info!(
                "{} {}: {} bars, trend {} (strength {:.2}), {} pattern(s)",
                symbol,
                scan.timeframe,
                scan.bars,
                scan.trend,
                scan.trend_strength,
                scan.patterns.len()
            );

            for found in &scan.patterns {
                let p = &found.pattern;
                println!(
                    "{:<6} {:<24} bar {:>4}  neckline {:>12.4}  confidence {:.2}  retest {}",
                    scan.timeframe,
                    p.kind(),
                    p.formation_index,
                    p.neckline,
                    p.confidence,
                    if found.retest_confirmed { "confirmed" } else { "pending" }
                );
            }
        }
        Ok(())
    })
}
