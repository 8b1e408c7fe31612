use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{self, EnvFilter};

mod cli;
mod config;
mod error;
mod monitoring;
mod plotting;
mod reader;
mod search;
mod server;
mod stats;
mod storage;

use cli::commands::{
    ChiSquareCommand, DebugInfoCommand, DescribeCommand, ListCommand, OddsRatioCommand, PlotCommand,
    ProportionCommand, ServeCommand, SheetsCommand, TTestCommand, UploadCommand,
};
use config::ServerConfig;

#[derive(Parser)]
#[command(name = "sheetstat")]
#[command(about = "Statistics over uploaded spreadsheet and CSV datasets")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding uploaded datasets, metadata and plots
    #[arg(long, global = true, env = "SHEETSTAT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the statistics operations as newline-delimited JSON
    Serve(ServeCommand),
    /// Upload a spreadsheet or CSV file and print its dataset id
    Upload(UploadCommand),
    /// List uploaded datasets
    List(ListCommand),
    /// Summarize every column of a dataset
    Describe(DescribeCommand),
    /// Ratio of rows matching two filters
    Proportion(ProportionCommand),
    /// Odds ratio and risk ratio of a 2x2 exposure/outcome table
    OddsRatio(OddsRatioCommand),
    /// Chi-square test of independence between two columns
    ChiSquare(ChiSquareCommand),
    /// Welch's t-test between two groups
    TTest(TTestCommand),
    /// Render a histogram or scatter plot to PNG
    Plot(PlotCommand),
    /// Show what the data directory contains
    DebugInfo(DebugInfoCommand),
    /// List the sheets of a workbook dataset
    Sheets(SheetsCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so the stdio transport keeps stdout for responses
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::new(format!(
            "sheetstat={}",
            if cli.verbose { "debug" } else { "info" }
        )))
        .init();

    // Cap Polars threads; requests already run concurrently on the blocking pool
    let max_polars_threads = std::cmp::min(4, num_cpus::get());
    std::env::set_var("POLARS_MAX_THREADS", max_polars_threads.to_string());
    info!("🧵 Limited Polars to {} threads", max_polars_threads);

    info!("Starting sheetstat v{}", env!("CARGO_PKG_VERSION"));

    let listen = match &cli.command {
        Commands::Serve(cmd) => cmd.listen.clone(),
        _ => None,
    };
    let config = ServerConfig::load(cli.config.as_deref(), cli.data_dir, listen)?;

    match cli.command {
        Commands::Serve(cmd) => cmd.execute(config).await,
        Commands::Upload(cmd) => cmd.execute(config).await,
        Commands::List(cmd) => cmd.execute(config).await,
        Commands::Describe(cmd) => cmd.execute(config).await,
        Commands::Proportion(cmd) => cmd.execute(config).await,
        Commands::OddsRatio(cmd) => cmd.execute(config).await,
        Commands::ChiSquare(cmd) => cmd.execute(config).await,
        Commands::TTest(cmd) => cmd.execute(config).await,
        Commands::Plot(cmd) => cmd.execute(config).await,
        Commands::DebugInfo(cmd) => cmd.execute(config).await,
        Commands::Sheets(cmd) => cmd.execute(config).await,
    }
}
