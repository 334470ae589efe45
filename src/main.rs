//! Pattern trader - main entry point
//!
//! This binary provides two subcommands:
//! - run: poll the market and trade confirmed patterns (simulate or live)
//! - scan: one detection pass over CSV data, printing trend and patterns

use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;

use commands::FeedKind;

#[derive(Parser, Debug)]
#[command(name = "pattern-trader")]
#[command(about = "Chart-pattern trading: trend, patterns, risk-gated bracket orders", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the trading loop until Ctrl+C
    Run {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/default.json")]
        config: String,

        /// Market data source
        #[arg(long, value_enum, default_value = "binance")]
        feed: FeedKind,

        /// Directory of {PAIR}_{timeframe}.csv files (csv feed only)
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },

    /// Detect patterns once per timeframe without trading
    Scan {
        /// Path to configuration file
        #[arg(short, long, default_value = "configs/default.json")]
        config: String,

        /// Directory of {PAIR}_{timeframe}.csv files
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
    },
}

/// Console plus a per-command daily log file. The returned guard flushes the
/// file writer on drop and must live until the command returns.
fn setup_logging(verbose: bool, command_name: &str) -> Result<WorkerGuard> {
    std::fs::create_dir_all("logs")?;

    let log_filename = daily_log_filename(command_name, chrono::Local::now().date_naive());
    let log_path = PathBuf::from("logs").join(&log_filename);

    let level = if verbose { "debug" } else { "info" };
    let filter_str = format!(
        "{},hyper=warn,hyper_util=warn,reqwest=warn,rustls=warn,h2=warn",
        level
    );
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&filter_str));

    // same file for every run of this command on one day; appended to
    let file_appender = tracing_appender::rolling::never("logs", &log_filename);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let console_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_line_number(true)
        .with_ansi(true);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_writer)
        .with_target(false)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    info!("Log file: {}", log_path.display());
    Ok(guard)
}

/// `{command}_{YYYYMMDD}.log`
fn daily_log_filename(command_name: &str, date: NaiveDate) -> String {
    format!("{}_{}.log", command_name, date.format("%Y%m%d"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let command_name = match &cli.command {
        Commands::Run { .. } => "run",
        Commands::Scan { .. } => "scan",
    };

    let _log_guard = setup_logging(cli.verbose, command_name)?;

    match cli.command {
        Commands::Run {
            config,
            feed,
            data_dir,
        } => commands::run::run(config, feed, data_dir),

        Commands::Scan { config, data_dir } => commands::scan::run(config, data_dir),
    }
}
